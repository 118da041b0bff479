//! WAV ingest backed by `hound`.

use std::path::Path;

use dubsync_core::analysis::{AnalysisError, AnalysisResult, AudioIngest, AudioSignal};
use hound::{SampleFormat, WavReader};

/// Decodes PCM WAV files into mono `f64` signals.
///
/// Channels are averaged. Integer samples are scaled by their bit depth.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavIngest;

impl AudioIngest for WavIngest {
    fn load(&self, path: &Path, target_rate: Option<u32>) -> AnalysisResult<AudioSignal> {
        let reader = WavReader::open(path)
            .map_err(|e| AnalysisError::Ingest(format!("{}: {}", path.display(), e)))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f64> = match spec.sample_format {
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f64;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f64 / scale))
                    .collect::<Result<_, _>>()
            }
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .map(|s| s.map(f64::from))
                .collect::<Result<_, _>>(),
        }
        .map_err(|e| AnalysisError::Ingest(format!("{}: {}", path.display(), e)))?;

        let mono = mix_to_mono(&interleaved, channels);
        let samples = match target_rate {
            Some(rate) if rate != spec.sample_rate => {
                tracing::info!(
                    "Resampling {} from {} Hz to {} Hz",
                    path.display(),
                    spec.sample_rate,
                    rate
                );
                resample_linear(&mono, spec.sample_rate, rate)
            }
            _ => mono,
        };
        let rate = target_rate.unwrap_or(spec.sample_rate);

        tracing::debug!(
            "Loaded {}: {} channels, {} samples at {} Hz",
            path.display(),
            channels,
            samples.len(),
            rate
        );
        Ok(AudioSignal::new(samples, rate))
    }
}

fn mix_to_mono(interleaved: &[f64], channels: usize) -> Vec<f64> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f64>() / channels as f64)
        .collect()
}

/// Linear interpolation resampler.
fn resample_linear(samples: &[f64], from: u32, to: u32) -> Vec<f64> {
    if samples.is_empty() || from == 0 || to == 0 {
        return Vec::new();
    }
    let ratio = from as f64 / to as f64;
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    let last = samples.len() - 1;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = (pos.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = pos - idx as f64;
            samples[idx] * (1.0 - frac) + samples[next] * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    fn write_stereo_i16(path: &Path, rate: u32, frames: &[(i16, i16)]) {
        let spec = WavSpec {
            channels: 2,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for &(l, r) in frames {
            writer.write_sample(l).unwrap();
            writer.write_sample(r).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn stereo_int_is_mixed_and_scaled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_stereo_i16(&path, 8000, &[(16384, 0), (-16384, -16384)]);

        let signal = WavIngest.load(&path, None).unwrap();
        assert_eq!(signal.sample_rate(), 8000);
        assert_eq!(signal.samples(), &[0.25, -0.5]);
    }

    #[test]
    fn float_wav_is_resampled_to_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("float.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for i in 0..1600 {
            writer.write_sample(i as f32 / 1600.0).unwrap();
        }
        writer.finalize().unwrap();

        let signal = WavIngest.load(&path, Some(8000)).unwrap();
        assert_eq!(signal.sample_rate(), 8000);
        assert_eq!(signal.len(), 800);
        assert!((signal.samples()[10] - 20.0 / 1600.0).abs() < 1e-6);
    }

    #[test]
    fn missing_file_is_ingest_error() {
        let err = WavIngest.load(Path::new("/nonexistent/none.wav"), None).unwrap_err();
        assert!(matches!(err, AnalysisError::Ingest(_)));
    }

    #[test]
    fn linear_resample_interpolates() {
        let up = resample_linear(&[0.0, 1.0], 1, 2);
        assert_eq!(up, vec![0.0, 0.5, 1.0, 1.0]);
        assert!(resample_linear(&[], 8000, 16000).is_empty());
    }
}
