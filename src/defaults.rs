//! Default configuration constants for scribeq.
//!
//! This module provides shared constants used across different configuration types
//! to ensure consistency and eliminate duplication.

use std::time::Duration;

/// Canonical audio sample rate in Hz.
///
/// 16kHz is the standard for speech recognition and provides a good balance
/// between quality and computational efficiency. All submitted audio is
/// resampled to this rate before analysis.
pub const SAMPLE_RATE: u32 = 16000;

/// Default chunk duration in seconds.
///
/// 300s (5 minutes) keeps each segment comfortably inside the limits of
/// typical speech-to-text engines while bounding per-chunk memory.
pub const CHUNK_DURATION_SECS: u64 = 300;

/// Default overlap between consecutive chunks in seconds.
///
/// Speech that straddles a chunk boundary is transcribed twice and the
/// duplicate span is reconciled during assembly.
pub const OVERLAP_SECS: u64 = 10;

/// Default number of pipeline workers.
///
/// Each worker drives one task through the full pipeline at a time.
pub const WORKERS: usize = 2;

/// Default concurrency ceiling for chunk transcription within one task.
///
/// Independent of the worker count: this bounds parallel engine calls
/// (and buffered chunk audio) for a single task.
pub const CHUNK_CONCURRENCY: usize = 4;

/// Maximum transcription attempts per chunk before it is marked failed.
pub const MAX_CHUNK_ATTEMPTS: u32 = 3;

/// Base delay for exponential retry backoff.
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// Upper bound for a single retry backoff delay.
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

/// Polling interval for idle workers waiting for queued tasks.
pub const CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Delay before retrying the task store after a store-level failure.
pub const STORE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Language value that requests automatic language detection.
pub const AUTO_LANGUAGE: &str = "auto";

/// Default formatting window size in characters.
///
/// Long documents are sent to the formatting service in windows of this
/// size to stay inside the service's prompt limits.
pub const FORMAT_WINDOW_CHARS: usize = 5000;

/// Default overlap between formatting windows in characters.
pub const FORMAT_WINDOW_OVERLAP_CHARS: usize = 500;

/// RMS analysis frame length in samples (128ms at 16kHz).
pub const ANALYSIS_FRAME_SAMPLES: usize = 2048;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_is_shorter_than_chunk() {
        assert!(OVERLAP_SECS < CHUNK_DURATION_SECS);
    }

    #[test]
    fn format_window_overlap_is_shorter_than_window() {
        assert!(FORMAT_WINDOW_OVERLAP_CHARS < FORMAT_WINDOW_CHARS);
    }
}
