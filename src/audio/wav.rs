//! WAV decoding into the canonical audio stream.
//!
//! Supports arbitrary sample rates and channel counts, downmixing and
//! resampling to 16kHz mono.

use crate::defaults::SAMPLE_RATE;
use crate::error::{Result, ScribeError};
use std::io::Read;
use std::path::Path;

/// Load a WAV file into canonical 16kHz mono samples.
///
/// Any decode failure is an input error: the submitted audio is bad, not
/// the pipeline, so the task fails without retry.
pub fn load(path: &Path) -> Result<Vec<i16>> {
    let file = std::fs::File::open(path).map_err(|e| ScribeError::Input {
        message: format!("cannot open {}: {}", path.display(), e),
    })?;
    from_reader(Box::new(std::io::BufReader::new(file)))
}

/// Decode WAV data from any reader into canonical samples.
pub fn from_reader(reader: Box<dyn Read + Send>) -> Result<Vec<i16>> {
    let mut wav_reader = hound::WavReader::new(reader).map_err(|e| ScribeError::Input {
        message: format!("Failed to parse WAV file: {}", e),
    })?;

    let spec = wav_reader.spec();
    let source_rate = spec.sample_rate;
    let source_channels = spec.channels;

    let raw_samples: Vec<i16> = wav_reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ScribeError::Input {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

    // Downmix to mono by averaging channels
    let mono_samples = if source_channels > 1 {
        let channels = source_channels as usize;
        raw_samples
            .chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    } else {
        raw_samples
    };

    if source_rate == SAMPLE_RATE {
        Ok(mono_samples)
    } else {
        Ok(resample(&mono_samples, source_rate, SAMPLE_RATE))
    }
}

/// Simple linear interpolation resampling.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = source_pos.floor() as usize;
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn from_reader_16khz_mono_matches_exactly() {
        let input_samples = vec![100i16, 200, 300, 400, 500];
        let wav_data = make_wav_data(16000, 1, &input_samples);

        let samples = from_reader(Box::new(Cursor::new(wav_data))).unwrap();
        assert_eq!(samples, input_samples);
    }

    #[test]
    fn from_reader_16khz_stereo_downmixes_to_mono() {
        // Stereo pairs: (100, 200), (300, 400), (500, 600)
        let stereo_samples = vec![100i16, 200, 300, 400, 500, 600];
        let wav_data = make_wav_data(16000, 2, &stereo_samples);

        let samples = from_reader(Box::new(Cursor::new(wav_data))).unwrap();
        assert_eq!(samples, vec![150i16, 350, 550]);
    }

    #[test]
    fn from_reader_48khz_mono_resamples_to_16khz() {
        let input_samples = vec![0i16; 48000]; // 1 second at 48kHz
        let wav_data = make_wav_data(48000, 1, &input_samples);

        let samples = from_reader(Box::new(Cursor::new(wav_data))).unwrap();
        assert!(samples.len() >= 15900 && samples.len() <= 16100);
    }

    #[test]
    fn from_reader_44100hz_preserves_amplitude() {
        let input_samples = vec![1000i16; 44100];
        let wav_data = make_wav_data(44100, 1, &input_samples);

        let samples = from_reader(Box::new(Cursor::new(wav_data))).unwrap();
        assert!(samples.len() >= 15900 && samples.len() <= 16100);
        assert!(samples.iter().all(|&s| (900..=1100).contains(&s)));
    }

    #[test]
    fn invalid_wav_data_returns_input_error() {
        let invalid_data = vec![0u8, 1, 2, 3, 4, 5];

        let result = from_reader(Box::new(Cursor::new(invalid_data)));
        assert!(result.is_err());
        match result {
            Err(ScribeError::Input { message }) => {
                assert!(message.contains("Failed to parse WAV file"));
            }
            _ => panic!("Expected Input error"),
        }
    }

    #[test]
    fn empty_wav_data_returns_error() {
        let result = from_reader(Box::new(Cursor::new(Vec::new())));
        assert!(result.is_err());
    }

    #[test]
    fn load_missing_file_returns_input_error() {
        let result = load(Path::new("/tmp/scribeq_missing_98765.wav"));
        assert!(matches!(result, Err(ScribeError::Input { .. })));
    }

    #[test]
    fn stereo_downmix_handles_negative_values() {
        // Stereo pairs with negative values: (-100, 100), (300, -300)
        let stereo_samples = vec![-100i16, 100, 300, -300];
        let wav_data = make_wav_data(16000, 2, &stereo_samples);

        let samples = from_reader(Box::new(Cursor::new(wav_data))).unwrap();
        assert_eq!(samples, vec![0i16, 0]);
    }

    #[test]
    fn resample_identity_same_rate() {
        let samples = vec![100i16, 200, 300, 400, 500];
        let resampled = resample(&samples, 16000, 16000);
        assert_eq!(resampled, samples);
    }

    #[test]
    fn resample_upsample_interpolates() {
        let samples = vec![0i16, 1000, 2000];
        let resampled = resample(&samples, 8000, 16000);

        assert_eq!(resampled.len(), 6);
        assert_eq!(resampled[0], 0);
        assert!(resampled[1] > 0 && resampled[1] < 1000);
        assert_eq!(resampled[2], 1000);
    }

    #[test]
    fn resample_downsample_halves_count() {
        let samples = vec![0i16; 3200];
        let resampled = resample(&samples, 16000, 8000);
        assert_eq!(resampled.len(), 1600);
    }

    #[test]
    fn resample_handles_edge_cases() {
        let empty = resample(&[], 16000, 8000);
        assert_eq!(empty.len(), 0);

        let single = resample(&[100i16], 16000, 8000);
        assert_eq!(single.len(), 1);
        assert_eq!(single[0], 100);
    }

    #[test]
    fn test_malformed_wav_random_garbage() {
        let mut garbage = Vec::new();
        for i in 0..500 {
            garbage.push(((i * 17 + 42) % 256) as u8);
        }

        let result = from_reader(Box::new(Cursor::new(garbage)));
        assert!(result.is_err(), "Should reject random garbage as WAV");
    }
}
