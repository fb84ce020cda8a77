//! Parallel per-chunk transcription with bounded concurrency.
//!
//! Chunks of one task are dispatched to the engine under a semaphore, so
//! at most `chunk_concurrency` engine calls (and chunk buffers) are live
//! at once. Transient engine errors are retried with exponential backoff
//! and jitter up to the attempt budget; any other error fails the chunk
//! permanently without burning retries. Every chunk outcome is written
//! to the store as it lands.

use crate::error::{Result, ScribeError};
use crate::pipeline::assembler::ChunkText;
use crate::store::{ChunkRecord, ChunkStatus, TaskStore};
use crate::stt::SpeechEngine;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Outcome of running one task's chunk set.
#[derive(Debug)]
pub enum ChunkRun {
    /// Every chunk reached a terminal state.
    Completed {
        /// Per-chunk transcripts in sequence order.
        parts: Vec<ChunkText>,
        /// Sequence indices of permanently failed chunks.
        failed: Vec<u32>,
    },
    /// Cancellation was observed; remaining chunks were not dispatched
    /// and in-flight results were discarded.
    Cancelled,
}

pub struct ChunkOrchestrator {
    store: Arc<TaskStore>,
    engine: Arc<dyn SpeechEngine>,
    concurrency: usize,
    max_attempts: u32,
    retry_base: Duration,
    retry_max: Duration,
}

impl ChunkOrchestrator {
    pub fn new(
        store: Arc<TaskStore>,
        engine: Arc<dyn SpeechEngine>,
        concurrency: usize,
        max_attempts: u32,
        retry_base: Duration,
        retry_max: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            concurrency: concurrency.max(1),
            max_attempts: max_attempts.max(1),
            retry_base,
            retry_max,
        }
    }

    /// Transcribe all chunks of a task.
    ///
    /// The cancellation flag is checked before every dispatch; once
    /// observed, nothing else is dispatched and the run reports
    /// [`ChunkRun::Cancelled`].
    pub async fn run(
        &self,
        task_id: &str,
        samples: Arc<Vec<i16>>,
        chunks: &[ChunkRecord],
        language: Option<String>,
    ) -> Result<ChunkRun> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set: JoinSet<(u32, Result<String>)> = JoinSet::new();

        for chunk in chunks {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| ScribeError::Other(e.to_string()))?;

            if self.store.cancel_requested(task_id)? {
                drop(permit);
                join_set.shutdown().await;
                return Ok(ChunkRun::Cancelled);
            }

            let store = Arc::clone(&self.store);
            let engine = Arc::clone(&self.engine);
            let samples = Arc::clone(&samples);
            let task_id = task_id.to_string();
            let language = language.clone();
            let spec = chunk.clone();
            let max_attempts = self.max_attempts;
            let retry_base = self.retry_base;
            let retry_max = self.retry_max;

            join_set.spawn(async move {
                let _permit = permit;
                let seq = spec.seq;
                let result = transcribe_chunk(
                    &store,
                    engine.as_ref(),
                    &task_id,
                    &spec,
                    &samples,
                    language.as_deref(),
                    max_attempts,
                    retry_base,
                    retry_max,
                )
                .await;
                (seq, result)
            });
        }

        let mut parts: Vec<ChunkText> = vec![ChunkText::Missing; chunks.len()];
        let mut failed = Vec::new();

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((seq, Ok(text))) => {
                    parts[seq as usize] = ChunkText::Text(text);
                }
                Ok((seq, Err(err))) => {
                    tracing::warn!(task_id, seq, error = %err, "chunk failed permanently");
                    failed.push(seq);
                }
                Err(join_err) => {
                    return Err(ScribeError::Other(format!(
                        "chunk worker panicked: {join_err}"
                    )));
                }
            }
        }

        failed.sort_unstable();
        Ok(ChunkRun::Completed { parts, failed })
    }
}

/// Drive one chunk to a terminal state, persisting every transition.
#[allow(clippy::too_many_arguments)]
async fn transcribe_chunk(
    store: &TaskStore,
    engine: &dyn SpeechEngine,
    task_id: &str,
    spec: &ChunkRecord,
    samples: &[i16],
    language: Option<&str>,
    max_attempts: u32,
    retry_base: Duration,
    retry_max: Duration,
) -> Result<String> {
    let start = spec.start_sample as usize;
    let end = (start + spec.sample_len as usize).min(samples.len());
    let slice = &samples[start.min(samples.len())..end];

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        store.mark_chunk_in_flight(task_id, spec.seq)?;

        match engine.transcribe(slice, language).await {
            Ok(output) => {
                store.finish_chunk(
                    task_id,
                    spec.seq,
                    ChunkStatus::Done,
                    Some(&output.text),
                    output.confidence,
                )?;
                return Ok(output.text);
            }
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = backoff_delay(retry_base, retry_max, attempt);
                tracing::debug!(
                    task_id,
                    seq = spec.seq,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient engine error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                store.finish_chunk(task_id, spec.seq, ChunkStatus::Failed, None, None)?;
                return Err(err);
            }
        }
    }
}

/// Exponential backoff with jitter: `base * 2^(attempt-1)` capped at
/// `max`, plus up to half of that again at random.
fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32 << (attempt - 1).min(16));
    let capped = exp.min(max);
    let jitter_ms = rand::rng().random_range(0..=capped.as_millis() as u64 / 2);
    capped + Duration::from_millis(jitter_ms)
}
