//! Worker pool driving claimed tasks through the pipeline.
//!
//! Each worker owns at most one task at a time and carries it through
//! every stage, checkpointing to the store at each boundary so a crash
//! loses at most the work since the last checkpoint. Cancellation is
//! checked at every stage boundary; a cancelled task stops where it is
//! and discards whatever was in flight.

use crate::audio::{AudioAnalyzer, Preprocessor, wav};
use crate::config::Config;
use crate::defaults::AUTO_LANGUAGE;
use crate::error::{Result, ScribeError};
use crate::format::{Formatter, FormattingPass};
use crate::pipeline::assembler::Assembler;
use crate::pipeline::chunker::Chunker;
use crate::pipeline::orchestrator::{ChunkOrchestrator, ChunkRun};
use crate::store::{
    ChunkRecord, ChunkStatus, PipelineResult, StageTiming, Task, TaskStatus, TaskStore,
};
use crate::stt::SpeechEngine;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Spawns the worker pool and hands back a shutdown handle.
pub struct Dispatcher;

impl Dispatcher {
    /// Recover interrupted tasks, then start the configured number of
    /// workers against the store.
    pub fn start(
        store: Arc<TaskStore>,
        engine: Arc<dyn SpeechEngine>,
        formatter: Option<Arc<dyn Formatter>>,
        config: &Config,
    ) -> Result<DispatcherHandle> {
        store.recover_orphaned()?;
        if !engine.is_ready() {
            tracing::warn!(engine = engine.name(), "engine reports not ready, dispatching anyway");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(config.dispatch.workers);

        for i in 0..config.dispatch.workers {
            let worker = Worker {
                name: format!("worker-{i}"),
                store: Arc::clone(&store),
                engine: Arc::clone(&engine),
                formatter: formatter.clone(),
                config: config.clone(),
                shutdown: shutdown_rx.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }

        tracing::info!(
            workers = config.dispatch.workers,
            engine = engine.name(),
            configured_kind = config.engine.kind.as_str(),
            "dispatcher started"
        );
        Ok(DispatcherHandle {
            shutdown_tx,
            handles,
        })
    }
}

/// Handle for stopping the worker pool.
///
/// Shutdown is graceful: workers finish the task they currently own
/// before exiting, so no task is orphaned by a clean stop.
pub struct DispatcherHandle {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl DispatcherHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        tracing::info!("dispatcher stopped");
    }
}

struct Worker {
    name: String,
    store: Arc<TaskStore>,
    engine: Arc<dyn SpeechEngine>,
    formatter: Option<Arc<dyn Formatter>>,
    config: Config,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        let claim_poll = Duration::from_millis(self.config.dispatch.claim_poll_ms);
        let store_retry = Duration::from_millis(self.config.dispatch.store_retry_ms);

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            match self.store.claim(&self.name) {
                Ok(Some(task)) => {
                    let task_id = task.id.clone();
                    if let Err(err) = self.process(task).await {
                        tracing::error!(worker = %self.name, task_id = %task_id, error = %err, "task failed");
                        // Outcome-recording errors land here too; best
                        // effort, the recovery sweep picks up leftovers.
                        let _ = self.store.fail(&task_id, &err.to_string(), None);
                    }
                }
                Ok(None) => self.idle(claim_poll).await,
                Err(err) => {
                    tracing::warn!(worker = %self.name, error = %err, "store unavailable, backing off");
                    self.idle(store_retry).await;
                }
            }
        }
        tracing::debug!(worker = %self.name, "worker exiting");
    }

    async fn idle(&mut self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.shutdown.changed() => {}
        }
    }

    /// Drive one claimed task through the remaining stages.
    ///
    /// Returns `Ok` for every terminal outcome the pipeline itself
    /// records (done, failed with partial, cancelled); an `Err` means a
    /// stage blew up and the caller records the failure.
    async fn process(&self, task: Task) -> Result<()> {
        let id = task.id.clone();
        tracing::info!(worker = %self.name, task_id = %id, audio_ref = %task.audio_ref, "processing task");

        let mut timings: Vec<StageTiming> = Vec::new();

        // Analysis. The claim already moved the task to `analyzing`.
        if self.cancelled(&id)? {
            return self.apply_cancel(&id);
        }
        let stage_start = Instant::now();
        let samples = wav::load(Path::new(&task.audio_ref))?;
        let params = AudioAnalyzer::new().analyze(&samples)?;
        push_timing(&mut timings, TaskStatus::Analyzing, stage_start);
        self.store.persist_stage(
            &id,
            TaskStatus::Preprocessing,
            Some(&serde_json::to_value(&params).map_err(|e| ScribeError::Other(e.to_string()))?),
        )?;

        // Preprocessing.
        if self.cancelled(&id)? {
            return self.apply_cancel(&id);
        }
        let stage_start = Instant::now();
        let processed = Preprocessor::new().apply(&samples, &params)?;
        push_timing(&mut timings, TaskStatus::Preprocessing, stage_start);
        self.store.persist_stage(&id, TaskStatus::Chunking, None)?;

        // Chunk planning.
        if self.cancelled(&id)? {
            return self.apply_cancel(&id);
        }
        let stage_start = Instant::now();
        let chunker = Chunker::new(task.options.chunk_duration_secs, task.options.overlap_secs)?;
        let records: Vec<ChunkRecord> = chunker
            .split(processed.len() as u64)
            .into_iter()
            .map(|spec| ChunkRecord {
                task_id: id.clone(),
                seq: spec.seq,
                start_sample: spec.start_sample,
                sample_len: spec.sample_len,
                overlap_samples: spec.overlap_samples,
                status: ChunkStatus::Pending,
                transcript: None,
                confidence: None,
                attempts: 0,
            })
            .collect();
        self.store.insert_chunks(&id, &records)?;
        push_timing(&mut timings, TaskStatus::Chunking, stage_start);
        self.store.persist_stage(&id, TaskStatus::Transcribing, None)?;
        tracing::debug!(task_id = %id, chunks = records.len(), "chunk plan written");

        // Parallel transcription.
        let stage_start = Instant::now();
        let orchestrator = ChunkOrchestrator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.engine),
            self.config.pipeline.chunk_concurrency,
            self.config.pipeline.max_chunk_attempts,
            Duration::from_millis(self.config.pipeline.retry_base_ms),
            crate::defaults::RETRY_MAX_DELAY,
        );
        let language = match task.options.language.as_str() {
            AUTO_LANGUAGE | "" => None,
            lang => Some(lang.to_string()),
        };
        let run = orchestrator
            .run(&id, Arc::new(processed), &records, language)
            .await?;
        push_timing(&mut timings, TaskStatus::Transcribing, stage_start);

        let (parts, failed) = match run {
            ChunkRun::Cancelled => return self.apply_cancel(&id),
            ChunkRun::Completed { parts, failed } => (parts, failed),
        };
        if self.cancelled(&id)? {
            // Cancellation arrived after the last dispatch; the chunk
            // results stay in the store but the document is never built.
            return self.apply_cancel(&id);
        }

        // Assembly.
        self.store.persist_stage(&id, TaskStatus::Assembling, None)?;
        let stage_start = Instant::now();
        let transcript = Assembler::new().merge(&parts);
        push_timing(&mut timings, TaskStatus::Assembling, stage_start);
        let chunk_count = parts.len() as u32;

        if !failed.is_empty() {
            let message = format!("{} of {chunk_count} chunks failed permanently", failed.len());
            let partial = PipelineResult {
                transcript,
                formatted: None,
                soft_failure: false,
                failed_chunks: failed,
                chunk_count,
                stage_timings: timings,
            };
            tracing::warn!(task_id = %id, %message, "task failed with partial result");
            self.store.fail(&id, &message, Some(&partial))?;
            return Ok(());
        }

        let mut result = PipelineResult {
            transcript,
            formatted: None,
            soft_failure: false,
            failed_chunks: Vec::new(),
            chunk_count,
            stage_timings: Vec::new(),
        };

        // Formatting, best effort.
        if task.options.enable_formatting
            && self.config.formatting.enabled
            && let Some(formatter) = &self.formatter
        {
            if self.cancelled(&id)? {
                return self.apply_cancel(&id);
            }
            self.store.persist_stage(&id, TaskStatus::Formatting, None)?;
            let stage_start = Instant::now();
            let pass = FormattingPass::new(
                self.config.formatting.window_chars,
                self.config.formatting.window_overlap_chars,
            );
            match pass.run(formatter.as_ref(), &result.transcript).await {
                Ok(formatted) => result.formatted = Some(formatted),
                Err(err) => {
                    tracing::warn!(task_id = %id, error = %err, "formatting failed, keeping raw transcript");
                    result.soft_failure = true;
                }
            }
            push_timing(&mut timings, TaskStatus::Formatting, stage_start);
        }

        result.stage_timings = timings;
        self.store.complete(&id, &result)?;
        tracing::info!(task_id = %id, chunks = chunk_count, "task done");
        Ok(())
    }

    fn cancelled(&self, task_id: &str) -> Result<bool> {
        self.store.cancel_requested(task_id)
    }

    fn apply_cancel(&self, task_id: &str) -> Result<()> {
        tracing::info!(task_id, "task cancelled mid-pipeline");
        self.store.mark_cancelled(task_id)
    }
}

fn push_timing(timings: &mut Vec<StageTiming>, stage: TaskStatus, start: Instant) {
    timings.push(StageTiming {
        stage: stage.as_str().to_string(),
        millis: start.elapsed().as_millis() as u64,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SubmitOptions;
    use crate::stt::MockEngine;

    fn write_wav(seconds: u64) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::with_suffix(".wav").unwrap();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: crate::defaults::SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(file.path(), spec).unwrap();
        let total = seconds * crate::defaults::SAMPLE_RATE as u64;
        for i in 0..total {
            let s: i16 = if i % 2 == 0 { 10000 } else { -10000 };
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        file
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.dispatch.workers = 1;
        config.dispatch.claim_poll_ms = 10;
        config.pipeline.chunk_concurrency = 1;
        config.pipeline.retry_base_ms = 1;
        config
    }

    async fn wait_for_terminal(store: &TaskStore, id: &str) -> TaskStatus {
        for _ in 0..500 {
            let snapshot = store.snapshot(id).unwrap();
            if snapshot.status.is_terminal() {
                return snapshot.status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {id} never reached a terminal state");
    }

    #[tokio::test]
    async fn test_single_chunk_task_runs_to_done() {
        let store = Arc::new(TaskStore::open_in_memory().unwrap());
        let audio = write_wav(2);

        let options = SubmitOptions {
            enable_formatting: false,
            ..Default::default()
        };
        let id = store
            .enqueue("u", audio.path().to_str().unwrap(), &options)
            .unwrap();

        let engine = Arc::new(MockEngine::new().with_response("spoken words"));
        let handle =
            Dispatcher::start(Arc::clone(&store), engine, None, &test_config()).unwrap();

        let status = wait_for_terminal(&store, &id).await;
        handle.shutdown().await;

        assert_eq!(status, TaskStatus::Done);
        let result = store.result(&id).unwrap();
        assert_eq!(result.transcript, "spoken words");
        assert_eq!(result.chunk_count, 1);
        assert!(result.formatted.is_none());
        assert!(!result.soft_failure);
        assert!(!result.stage_timings.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_audio_fails_task() {
        let store = Arc::new(TaskStore::open_in_memory().unwrap());
        // The file exists at submission but holds no valid audio.
        let mut bogus = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut bogus, b"not audio at all").unwrap();

        let id = store
            .enqueue("u", bogus.path().to_str().unwrap(), &SubmitOptions::default())
            .unwrap();

        let engine = Arc::new(MockEngine::new());
        let handle =
            Dispatcher::start(Arc::clone(&store), engine, None, &test_config()).unwrap();

        let status = wait_for_terminal(&store, &id).await;
        handle.shutdown().await;

        assert_eq!(status, TaskStatus::Failed);
        let snapshot = store.snapshot(&id).unwrap();
        assert!(snapshot.error.is_some());
    }

    #[tokio::test]
    async fn test_shutdown_with_empty_queue_returns_quickly() {
        let store = Arc::new(TaskStore::open_in_memory().unwrap());
        let engine = Arc::new(MockEngine::new());
        let handle =
            Dispatcher::start(Arc::clone(&store), engine, None, &test_config()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("shutdown must not hang on an idle pool");
    }
}
