//! Task and chunk data model.

use crate::defaults;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Task lifecycle states.
///
/// Transitions are monotonic along the pipeline order; the only backward
/// transition permitted anywhere is the terminal jump to `Failed` or
/// `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Analyzing,
    Preprocessing,
    Chunking,
    Transcribing,
    Assembling,
    Formatting,
    Done,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Position in the pipeline order, used to enforce monotonicity.
    pub fn rank(self) -> u8 {
        match self {
            TaskStatus::Queued => 0,
            TaskStatus::Analyzing => 1,
            TaskStatus::Preprocessing => 2,
            TaskStatus::Chunking => 3,
            TaskStatus::Transcribing => 4,
            TaskStatus::Assembling => 5,
            TaskStatus::Formatting => 6,
            TaskStatus::Done => 7,
            TaskStatus::Failed => 8,
            TaskStatus::Cancelled => 9,
        }
    }

    /// Terminal states permit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether a transition from `self` to `next` is legal.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, TaskStatus::Failed | TaskStatus::Cancelled) {
            return true;
        }
        next.rank() >= self.rank()
    }

    /// Approximate completion fraction while a task is in this state.
    ///
    /// The transcribing stage dominates wall time; the chunk-completion
    /// share is layered on top of its base fraction by the store.
    pub fn base_progress(self) -> f32 {
        match self {
            TaskStatus::Queued => 0.0,
            TaskStatus::Analyzing => 0.05,
            TaskStatus::Preprocessing => 0.10,
            TaskStatus::Chunking => 0.15,
            TaskStatus::Transcribing => 0.20,
            TaskStatus::Assembling => 0.90,
            TaskStatus::Formatting => 0.95,
            TaskStatus::Done | TaskStatus::Failed | TaskStatus::Cancelled => 1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Analyzing => "analyzing",
            TaskStatus::Preprocessing => "preprocessing",
            TaskStatus::Chunking => "chunking",
            TaskStatus::Transcribing => "transcribing",
            TaskStatus::Assembling => "assembling",
            TaskStatus::Formatting => "formatting",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "analyzing" => Ok(TaskStatus::Analyzing),
            "preprocessing" => Ok(TaskStatus::Preprocessing),
            "chunking" => Ok(TaskStatus::Chunking),
            "transcribing" => Ok(TaskStatus::Transcribing),
            "assembling" => Ok(TaskStatus::Assembling),
            "formatting" => Ok(TaskStatus::Formatting),
            "done" => Ok(TaskStatus::Done),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Chunk lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    InFlight,
    Done,
    Failed,
}

impl ChunkStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChunkStatus::Done | ChunkStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChunkStatus::Pending => "pending",
            ChunkStatus::InFlight => "in_flight",
            ChunkStatus::Done => "done",
            ChunkStatus::Failed => "failed",
        }
    }
}

impl FromStr for ChunkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ChunkStatus::Pending),
            "in_flight" => Ok(ChunkStatus::InFlight),
            "done" => Ok(ChunkStatus::Done),
            "failed" => Ok(ChunkStatus::Failed),
            other => Err(format!("unknown chunk status: {other}")),
        }
    }
}

/// Options accepted at submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitOptions {
    /// Language hint, or "auto" for detection.
    pub language: String,
    /// Maximum chunk duration in seconds.
    pub chunk_duration_secs: u64,
    /// Overlap between consecutive chunks in seconds.
    pub overlap_secs: u64,
    /// Whether to run the formatting stage.
    pub enable_formatting: bool,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            language: defaults::AUTO_LANGUAGE.to_string(),
            chunk_duration_secs: defaults::CHUNK_DURATION_SECS,
            overlap_secs: defaults::OVERLAP_SECS,
            enable_formatting: true,
        }
    }
}

/// A submitted transcription job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Submitter reference, opaque to the core.
    pub owner: String,
    /// Source audio reference (path to the submitted file).
    pub audio_ref: String,
    pub status: TaskStatus,
    pub attempts: u32,
    /// Identity of the worker currently owning the task, if any.
    pub worker: Option<String>,
    pub cancel_requested: bool,
    pub options: SubmitOptions,
    /// Stage checkpoint payload (analysis parameters, timings so far).
    pub stage_data: Option<serde_json::Value>,
    pub result: Option<PipelineResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One bounded segment of a task's canonical audio stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub task_id: String,
    /// Position in the chunk sequence; reassembly is keyed by this.
    pub seq: u32,
    pub start_sample: u64,
    pub sample_len: u64,
    /// Samples shared with the next chunk (zero for the final chunk).
    pub overlap_samples: u64,
    pub status: ChunkStatus,
    pub transcript: Option<String>,
    pub confidence: Option<f32>,
    pub attempts: u32,
}

/// Wall time spent in one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: String,
    pub millis: u64,
}

/// Final output of the pipeline for one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Merged transcript (partial when chunks failed).
    pub transcript: String,
    /// Formatting-service output; None when skipped or soft-failed.
    pub formatted: Option<String>,
    /// Set when the formatting stage failed but transcription succeeded.
    pub soft_failure: bool,
    /// Sequence indices of chunks omitted from the transcript.
    pub failed_chunks: Vec<u32>,
    pub chunk_count: u32,
    pub stage_timings: Vec<StageTiming>,
}

impl PipelineResult {
    /// True when every chunk made it into the transcript.
    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty()
    }
}

/// Externally visible task state, served by `getStatus`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: f32,
    pub partial_result_available: bool,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_rank_is_pipeline_order() {
        let order = [
            TaskStatus::Queued,
            TaskStatus::Analyzing,
            TaskStatus::Preprocessing,
            TaskStatus::Chunking,
            TaskStatus::Transcribing,
            TaskStatus::Assembling,
            TaskStatus::Formatting,
            TaskStatus::Done,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
        }
    }

    #[test]
    fn test_forward_transitions_allowed() {
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Analyzing));
        assert!(TaskStatus::Analyzing.can_transition_to(TaskStatus::Preprocessing));
        assert!(TaskStatus::Transcribing.can_transition_to(TaskStatus::Assembling));
        assert!(TaskStatus::Formatting.can_transition_to(TaskStatus::Done));
    }

    #[test]
    fn test_backward_transitions_rejected() {
        assert!(!TaskStatus::Transcribing.can_transition_to(TaskStatus::Analyzing));
        assert!(!TaskStatus::Done.can_transition_to(TaskStatus::Queued));
        assert!(!TaskStatus::Assembling.can_transition_to(TaskStatus::Chunking));
    }

    #[test]
    fn test_fail_and_cancel_allowed_from_any_live_state() {
        for status in [
            TaskStatus::Queued,
            TaskStatus::Analyzing,
            TaskStatus::Transcribing,
            TaskStatus::Formatting,
        ] {
            assert!(status.can_transition_to(TaskStatus::Failed));
            assert!(status.can_transition_to(TaskStatus::Cancelled));
        }
    }

    #[test]
    fn test_terminal_states_permit_nothing() {
        for terminal in [TaskStatus::Done, TaskStatus::Failed, TaskStatus::Cancelled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(TaskStatus::Queued));
            assert!(!terminal.can_transition_to(TaskStatus::Failed));
            assert!(!terminal.can_transition_to(TaskStatus::Cancelled));
        }
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            TaskStatus::Queued,
            TaskStatus::Analyzing,
            TaskStatus::Preprocessing,
            TaskStatus::Chunking,
            TaskStatus::Transcribing,
            TaskStatus::Assembling,
            TaskStatus::Formatting,
            TaskStatus::Done,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            let parsed: TaskStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_chunk_status_round_trip() {
        for status in [
            ChunkStatus::Pending,
            ChunkStatus::InFlight,
            ChunkStatus::Done,
            ChunkStatus::Failed,
        ] {
            let parsed: ChunkStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_chunk_terminal_states() {
        assert!(ChunkStatus::Done.is_terminal());
        assert!(ChunkStatus::Failed.is_terminal());
        assert!(!ChunkStatus::Pending.is_terminal());
        assert!(!ChunkStatus::InFlight.is_terminal());
    }

    #[test]
    fn test_base_progress_is_monotonic() {
        let order = [
            TaskStatus::Queued,
            TaskStatus::Analyzing,
            TaskStatus::Preprocessing,
            TaskStatus::Chunking,
            TaskStatus::Transcribing,
            TaskStatus::Assembling,
            TaskStatus::Formatting,
            TaskStatus::Done,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].base_progress() <= pair[1].base_progress());
        }
    }

    #[test]
    fn test_submit_options_defaults() {
        let options = SubmitOptions::default();
        assert_eq!(options.language, "auto");
        assert_eq!(options.chunk_duration_secs, 300);
        assert_eq!(options.overlap_secs, 10);
        assert!(options.enable_formatting);
    }

    #[test]
    fn test_pipeline_result_completeness() {
        let mut result = PipelineResult {
            transcript: "hello".to_string(),
            chunk_count: 3,
            ..Default::default()
        };
        assert!(result.is_complete());

        result.failed_chunks.push(1);
        assert!(!result.is_complete());
    }

    #[test]
    fn test_options_json_round_trip() {
        let options = SubmitOptions {
            language: "ru".to_string(),
            chunk_duration_secs: 120,
            overlap_secs: 5,
            enable_formatting: false,
        };
        let json = serde_json::to_string(&options).unwrap();
        let back: SubmitOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(options, back);
    }
}
