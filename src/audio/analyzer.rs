//! Audio analysis for automatic preprocessing parameters.
//!
//! Derives a per-file noise profile from frame-level RMS energy: quiet
//! frames approximate the noise floor, loud frames the speech level. The
//! resulting [`AnalysisParams`] drive the preprocessor's gain and gating.

use crate::defaults::ANALYSIS_FRAME_SAMPLES;
use crate::error::{Result, ScribeError};
use serde::{Deserialize, Serialize};

/// Target average speech level in dBFS for gain suggestion.
const TARGET_LEVEL_DB: f32 = -20.0;

/// Maximum gain boost in dB. Quiet recordings are lifted at most this much.
const MAX_GAIN_DB: f32 = 6.0;

/// Floor for log computations on near-silent signals.
const EPSILON: f32 = 1e-10;

/// Preprocessing parameters derived from analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalysisParams {
    /// Estimated noise floor in dBFS (20th percentile of frame RMS).
    pub noise_floor_db: f32,
    /// Gain in dB that brings the average speech level toward the target.
    pub suggested_gain_db: f32,
    /// Linear RMS threshold (0.0 to 1.0) below which a frame is silence.
    pub silence_threshold: f32,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            noise_floor_db: -60.0,
            suggested_gain_db: 0.0,
            silence_threshold: 0.005,
        }
    }
}

/// Analyzer that inspects a canonical audio stream.
#[derive(Debug, Clone, Default)]
pub struct AudioAnalyzer {
    frame_samples: usize,
}

impl AudioAnalyzer {
    /// Creates an analyzer with the default frame length.
    pub fn new() -> Self {
        Self {
            frame_samples: ANALYSIS_FRAME_SAMPLES,
        }
    }

    /// Creates an analyzer with a custom frame length (test hook).
    pub fn with_frame_samples(frame_samples: usize) -> Self {
        Self { frame_samples }
    }

    /// Analyze a canonical stream and derive preprocessing parameters.
    ///
    /// Fails with an input error on an empty or all-zero stream; a file
    /// with no signal at all cannot be transcribed and should fail fast.
    pub fn analyze(&self, samples: &[i16]) -> Result<AnalysisParams> {
        if samples.is_empty() {
            return Err(ScribeError::Input {
                message: "audio stream is empty".to_string(),
            });
        }

        let frames = rms_frames(samples, self.frame_samples.max(1));
        if frames.iter().all(|&r| r <= EPSILON) {
            return Err(ScribeError::Input {
                message: "audio stream contains no signal".to_string(),
            });
        }

        let mut sorted = frames.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));

        // 20th percentile of frame RMS approximates the noise floor;
        // the median approximates sustained speech level.
        let p20 = percentile(&sorted, 0.20);
        let median = percentile(&sorted, 0.50);

        let noise_floor_db = to_db(p20);
        let speech_db = to_db(median);

        // Lift quiet recordings toward the target, never attenuate.
        let suggested_gain_db = (TARGET_LEVEL_DB - speech_db).clamp(0.0, MAX_GAIN_DB);

        // Silence sits between the noise floor and the speech level.
        let silence_threshold = (p20 * 2.0).min(median * 0.5).max(EPSILON);

        Ok(AnalysisParams {
            noise_floor_db,
            suggested_gain_db,
            silence_threshold,
        })
    }
}

/// RMS energy per frame, normalized to 0.0..=1.0.
fn rms_frames(samples: &[i16], frame_len: usize) -> Vec<f32> {
    samples
        .chunks(frame_len)
        .map(|frame| {
            let sum_sq: f64 = frame
                .iter()
                .map(|&s| {
                    let x = s as f64 / i16::MAX as f64;
                    x * x
                })
                .sum();
            (sum_sq / frame.len() as f64).sqrt() as f32
        })
        .collect()
}

fn percentile(sorted: &[f32], p: f32) -> f32 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f32 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn to_db(linear: f32) -> f32 {
    20.0 * (linear + EPSILON).log10()
}
