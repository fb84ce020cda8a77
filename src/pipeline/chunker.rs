//! Deterministic chunk planning over the canonical audio stream.
//!
//! Chunks advance by `chunk - overlap` samples, so consecutive chunks
//! share an overlap window that lets assembly reconcile speech cut at a
//! boundary. Planning depends only on the stream length and the two
//! durations, so a re-run after recovery produces the identical plan.

use crate::defaults::SAMPLE_RATE;
use crate::error::{Result, ScribeError};

/// One planned segment of the canonical stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpec {
    pub seq: u32,
    pub start_sample: u64,
    pub sample_len: u64,
    /// Samples shared with the next chunk (zero for the final chunk).
    pub overlap_samples: u64,
}

/// Splits a sample stream into overlapping chunks.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_samples: u64,
    overlap_samples: u64,
}

impl Chunker {
    /// Create a chunker for the given durations.
    ///
    /// The overlap must be strictly shorter than the chunk duration or
    /// the plan would never advance.
    pub fn new(chunk_duration_secs: u64, overlap_secs: u64) -> Result<Self> {
        if chunk_duration_secs == 0 {
            return Err(ScribeError::Config {
                key: "chunk_duration_secs".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if overlap_secs >= chunk_duration_secs {
            return Err(ScribeError::Config {
                key: "overlap_secs".to_string(),
                message: format!(
                    "overlap ({overlap_secs}s) must be shorter than chunk duration ({chunk_duration_secs}s)"
                ),
            });
        }
        Ok(Self {
            chunk_samples: chunk_duration_secs * SAMPLE_RATE as u64,
            overlap_samples: overlap_secs * SAMPLE_RATE as u64,
        })
    }

    /// Plan the chunk sequence for a stream of `total_samples`.
    ///
    /// A stream no longer than one chunk yields a single chunk. A final
    /// remnant shorter than the overlap window carries no new content,
    /// so it is merged into the preceding chunk instead of planned on
    /// its own.
    pub fn split(&self, total_samples: u64) -> Vec<ChunkSpec> {
        if total_samples == 0 {
            return Vec::new();
        }

        let stride = self.chunk_samples - self.overlap_samples;
        let mut chunks: Vec<ChunkSpec> = Vec::new();
        let mut start = 0u64;

        loop {
            // The last chunk stretches to the end of the stream, so a
            // remnant shorter than the overlap window is absorbed here
            // instead of becoming a contentless chunk of its own.
            let len = (total_samples - start).min(self.chunk_samples);
            chunks.push(ChunkSpec {
                seq: chunks.len() as u32,
                start_sample: start,
                sample_len: len,
                overlap_samples: 0,
            });

            if start + len >= total_samples {
                break;
            }
            start += stride;
        }

        // Overlap with the successor is what each chunk actually shares.
        for i in 0..chunks.len().saturating_sub(1) {
            let end = chunks[i].start_sample + chunks[i].sample_len;
            chunks[i].overlap_samples = end.saturating_sub(chunks[i + 1].start_sample);
        }

        chunks
    }
}
