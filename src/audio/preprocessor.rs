//! Deterministic preprocessing of the canonical audio stream.
//!
//! Three passes, in order: gain application, noise-gate attenuation below
//! the analyzed noise floor, and compaction of long silent stretches.
//! Given identical input and parameters the output is identical; failures
//! here mean malformed input and are fatal for the task, never retried.

use crate::audio::analyzer::AnalysisParams;
use crate::defaults::{ANALYSIS_FRAME_SAMPLES, SAMPLE_RATE};
use crate::error::{Result, ScribeError};

/// Silent stretches longer than this are shortened during compaction.
const MAX_SILENCE_MS: u32 = 1000;

/// Silence kept in place of a long stretch, for natural pacing.
const KEPT_SILENCE_MS: u32 = 300;

/// Attenuation applied to sub-threshold frames by the noise gate.
const GATE_ATTENUATION: f32 = 0.25;

/// Preprocessor that produces the canonical stream for chunking.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    frame_samples: usize,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Preprocessor {
    /// Creates a preprocessor with the default frame length.
    pub fn new() -> Self {
        Self {
            frame_samples: ANALYSIS_FRAME_SAMPLES,
        }
    }

    /// Creates a preprocessor with a custom frame length (test hook).
    pub fn with_frame_samples(frame_samples: usize) -> Self {
        Self {
            frame_samples: frame_samples.max(1),
        }
    }

    /// Apply gain, noise gating, and silence compaction.
    pub fn apply(&self, samples: &[i16], params: &AnalysisParams) -> Result<Vec<i16>> {
        if samples.is_empty() {
            return Err(ScribeError::Processing {
                message: "cannot preprocess an empty stream".to_string(),
            });
        }

        let gained = apply_gain(samples, params.suggested_gain_db);
        let gated = self.noise_gate(&gained, params.silence_threshold);
        let compacted = self.compact_silence(&gated, params.silence_threshold);

        if compacted.is_empty() {
            return Err(ScribeError::Processing {
                message: "preprocessing removed all audio content".to_string(),
            });
        }

        Ok(compacted)
    }

    /// Attenuate frames whose RMS sits below the silence threshold.
    fn noise_gate(&self, samples: &[i16], threshold: f32) -> Vec<i16> {
        let mut out = Vec::with_capacity(samples.len());
        for frame in samples.chunks(self.frame_samples) {
            if frame_rms(frame) < threshold {
                out.extend(
                    frame
                        .iter()
                        .map(|&s| (s as f32 * GATE_ATTENUATION) as i16),
                );
            } else {
                out.extend_from_slice(frame);
            }
        }
        out
    }

    /// Shorten silent stretches longer than `MAX_SILENCE_MS`.
    ///
    /// Works at frame granularity: runs of consecutive silent frames are
    /// truncated to the kept-silence budget, keeping pauses natural without
    /// feeding the engine minutes of dead air.
    fn compact_silence(&self, samples: &[i16], threshold: f32) -> Vec<i16> {
        let max_silence_frames = duration_frames(MAX_SILENCE_MS, self.frame_samples);
        let kept_frames = duration_frames(KEPT_SILENCE_MS, self.frame_samples).max(1);

        let mut out = Vec::with_capacity(samples.len());
        let mut silent_run: Vec<&[i16]> = Vec::new();

        for frame in samples.chunks(self.frame_samples) {
            if frame_rms(frame) < threshold {
                silent_run.push(frame);
            } else {
                flush_silence(&mut out, &silent_run, max_silence_frames, kept_frames);
                silent_run.clear();
                out.extend_from_slice(frame);
            }
        }
        flush_silence(&mut out, &silent_run, max_silence_frames, kept_frames);

        out
    }
}

fn flush_silence(
    out: &mut Vec<i16>,
    run: &[&[i16]],
    max_silence_frames: usize,
    kept_frames: usize,
) {
    let frames: &[&[i16]] = if run.len() > max_silence_frames {
        &run[..kept_frames]
    } else {
        run
    };
    for frame in frames {
        out.extend_from_slice(frame);
    }
}

fn apply_gain(samples: &[i16], gain_db: f32) -> Vec<i16> {
    if gain_db == 0.0 {
        return samples.to_vec();
    }
    let factor = 10.0f32.powf(gain_db / 20.0);
    samples
        .iter()
        .map(|&s| {
            (s as f32 * factor)
                .round()
                .clamp(i16::MIN as f32, i16::MAX as f32) as i16
        })
        .collect()
}

fn frame_rms(frame: &[i16]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = frame
        .iter()
        .map(|&s| {
            let x = s as f64 / i16::MAX as f64;
            x * x
        })
        .sum();
    (sum_sq / frame.len() as f64).sqrt() as f32
}

fn duration_frames(ms: u32, frame_samples: usize) -> usize {
    let samples = (ms as u64 * SAMPLE_RATE as u64 / 1000) as usize;
    samples / frame_samples.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(threshold: f32, gain_db: f32) -> AnalysisParams {
        AnalysisParams {
            noise_floor_db: -60.0,
            suggested_gain_db: gain_db,
            silence_threshold: threshold,
        }
    }

    fn square_wave(amp: i16, len: usize) -> Vec<i16> {
        (0..len).map(|i| if i % 2 == 0 { amp } else { -amp }).collect()
    }

    #[test]
    fn test_empty_input_is_processing_error() {
        let pre = Preprocessor::new();
        let result = pre.apply(&[], &params(0.005, 0.0));
        assert!(matches!(result, Err(ScribeError::Processing { .. })));
    }

    #[test]
    fn test_zero_gain_loud_audio_unchanged() {
        let pre = Preprocessor::with_frame_samples(256);
        let samples = square_wave(10000, 1024);

        let out = pre.apply(&samples, &params(0.001, 0.0)).unwrap();
        assert_eq!(out, samples);
    }

    #[test]
    fn test_gain_scales_samples() {
        // +6dB is very close to doubling
        let out = apply_gain(&[1000, -1000], 6.0);
        assert!((1990..=2000).contains(&out[0]));
        assert!((-2000..=-1990).contains(&out[1]));
    }

    #[test]
    fn test_gain_clamps_at_full_scale() {
        let out = apply_gain(&[30000, -30000], 6.0);
        assert_eq!(out[0], i16::MAX);
        assert_eq!(out[1], i16::MIN);
    }

    #[test]
    fn test_noise_gate_attenuates_quiet_frames() {
        let pre = Preprocessor::with_frame_samples(256);
        // One quiet frame, one loud frame
        let mut samples = square_wave(50, 256);
        samples.extend(square_wave(10000, 256));

        let threshold = 1000.0 / i16::MAX as f32;
        let out = pre.apply(&samples, &params(threshold, 0.0)).unwrap();

        // Quiet frame attenuated to a quarter
        assert!(out[0].abs() <= 50 / 4 + 1);
        // Loud frame untouched
        assert_eq!(out[256], 10000);
    }

    #[test]
    fn test_long_silence_is_compacted() {
        let frame = 256;
        let pre = Preprocessor::with_frame_samples(frame);

        // speech, then 2s of silence, then speech
        let silence_len = 2 * SAMPLE_RATE as usize;
        let mut samples = square_wave(10000, frame * 4);
        samples.extend(vec![0i16; silence_len]);
        samples.extend(square_wave(10000, frame * 4));

        let threshold = 1000.0 / i16::MAX as f32;
        let out = pre.apply(&samples, &params(threshold, 0.0)).unwrap();

        assert!(
            out.len() < samples.len(),
            "2s silent stretch should be shortened: {} vs {}",
            out.len(),
            samples.len()
        );
        // Both speech sections survive
        let speech_total = 2 * frame * 4;
        assert!(out.len() >= speech_total);
    }

    #[test]
    fn test_short_pauses_are_preserved() {
        let frame = 256;
        let pre = Preprocessor::with_frame_samples(frame);

        // 500ms pause stays under MAX_SILENCE_MS
        let pause_len = SAMPLE_RATE as usize / 2;
        let mut samples = square_wave(10000, frame * 4);
        samples.extend(vec![0i16; pause_len]);
        samples.extend(square_wave(10000, frame * 4));

        let threshold = 1000.0 / i16::MAX as f32;
        let out = pre.apply(&samples, &params(threshold, 0.0)).unwrap();

        // Gate attenuates but compaction keeps every frame
        assert_eq!(out.len(), samples.len());
    }

    #[test]
    fn test_apply_is_deterministic() {
        let pre = Preprocessor::with_frame_samples(256);
        let mut samples = square_wave(8000, 2048);
        samples.extend(vec![0i16; 4096]);
        samples.extend(square_wave(8000, 2048));

        let p = params(0.01, 3.0);
        let a = pre.apply(&samples, &p).unwrap();
        let b = pre.apply(&samples, &p).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_all_silence_below_threshold_still_yields_output() {
        let pre = Preprocessor::with_frame_samples(256);
        // Quiet but nonzero stream, entirely under the threshold
        let samples = square_wave(10, 1024);

        let threshold = 1000.0 / i16::MAX as f32;
        let out = pre.apply(&samples, &params(threshold, 0.0)).unwrap();
        assert!(!out.is_empty());
    }
}
