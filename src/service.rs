//! Public facade tying the store and the worker pool together.

use crate::config::Config;
use crate::error::Result;
use crate::format::Formatter;
use crate::pipeline::{Dispatcher, DispatcherHandle};
use crate::store::{
    PipelineResult, QueueStats, SubmitOptions, TaskSnapshot, TaskStatus, TaskStore,
};
use crate::stt::SpeechEngine;
use std::sync::Arc;

/// A running transcription service: durable queue plus worker pool.
///
/// Submissions return immediately with a task id; workers pick tasks up
/// in the background and every state change is readable through
/// [`TranscriptionService::status`].
pub struct TranscriptionService {
    store: Arc<TaskStore>,
    handle: DispatcherHandle,
}

impl TranscriptionService {
    /// Open the store at the configured path, recover interrupted tasks,
    /// and start the worker pool.
    pub fn start(
        config: Config,
        engine: Arc<dyn SpeechEngine>,
        formatter: Option<Arc<dyn Formatter>>,
    ) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(TaskStore::open(&config.store.path)?);
        let handle = Dispatcher::start(Arc::clone(&store), engine, formatter, &config)?;
        Ok(Self { store, handle })
    }

    /// Start against an already-open store (tests, embedded setups).
    pub fn start_with_store(
        config: Config,
        store: Arc<TaskStore>,
        engine: Arc<dyn SpeechEngine>,
        formatter: Option<Arc<dyn Formatter>>,
    ) -> Result<Self> {
        config.validate()?;
        let handle = Dispatcher::start(Arc::clone(&store), engine, formatter, &config)?;
        Ok(Self { store, handle })
    }

    /// Submit an audio file for transcription.
    ///
    /// Validation happens here: an unreadable audio reference or
    /// incoherent options are rejected before anything is queued.
    pub fn submit(&self, owner: &str, audio_ref: &str, options: SubmitOptions) -> Result<String> {
        self.store.enqueue(owner, audio_ref, &options)
    }

    /// Current status, progress, and partial-result availability.
    pub fn status(&self, task_id: &str) -> Result<TaskSnapshot> {
        self.store.snapshot(task_id)
    }

    /// Final (or partial, for failed tasks) pipeline result.
    pub fn result(&self, task_id: &str) -> Result<PipelineResult> {
        self.store.result(task_id)
    }

    /// Request cancellation; returns the status after the request.
    ///
    /// Queued tasks cancel immediately. Running tasks cancel at the next
    /// stage boundary or chunk dispatch, so the returned status may still
    /// be a live one.
    pub fn cancel(&self, task_id: &str) -> Result<TaskStatus> {
        self.store.request_cancel(task_id)
    }

    /// Queue occupancy counters.
    pub fn queue_stats(&self) -> Result<QueueStats> {
        self.store.queue_stats()
    }

    /// Snapshots of all tasks submitted by one owner, newest first.
    pub fn tasks_for_owner(&self, owner: &str) -> Result<Vec<TaskSnapshot>> {
        self.store.tasks_for_owner(owner)
    }

    /// Stop the worker pool gracefully. Queued tasks stay in the store
    /// and are picked up by the next start.
    pub async fn shutdown(self) {
        self.handle.shutdown().await;
    }
}
