//! Per-window feature extraction.
//!
//! Frame layout follows the usual short-time analysis setup:
//! - `n_fft = next_pow2(0.032 * sample_rate)`, hop `n_fft / 4`, Hann window
//! - 40 mel bands (Slaney-normalized triangular filters)
//! - 13 cepstral coefficients from an orthonormal DCT-II of the log-mel
//!   frame, skipping the 0th (overall energy) coefficient
//!
//! Extraction never fails. Missing data shows up as `None` fields and in
//! [`FeaturePresence`].

use std::f64::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};

use super::types::AudioWindow;

/// Number of mel bands.
pub const N_MELS: usize = 40;
/// Number of cepstral coefficients kept (1..=13).
pub const N_MFCC: usize = 13;
/// Onset peaks must exceed `mean + ONSET_PEAK_STD * std` of the envelope.
const ONSET_PEAK_STD: f64 = 1.5;
/// Minimum distance between onset peaks, in frames.
const ONSET_MIN_SEPARATION: usize = 3;

/// Features of one analysis window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkFeatures {
    /// MFCC matrix, `mfcc[frame][coefficient]`.
    pub mfcc: Option<Vec<Vec<f64>>>,
    /// Mean log-mel energy per band.
    pub mel_energies: Option<Vec<f64>>,
    /// Mean log-mel energy per frame.
    pub mel_frame_energy: Option<Vec<f64>>,
    /// Root-mean-square amplitude of the whole window.
    pub rms: Option<f64>,
    /// RMS per frame.
    pub rms_series: Option<Vec<f64>>,
    /// Fraction of adjacent samples that change sign.
    pub zcr: Option<f64>,
    /// Spectral-flux onset strength per frame, normalized to max 1.
    pub onset_envelope: Option<Vec<f64>>,
    /// Frames holding onset peaks.
    pub onset_frames: Option<Vec<usize>>,
    /// Hop between frames in samples.
    pub hop_length: usize,
    /// Sample rate of the source window.
    pub sample_rate: u32,
}

/// Which feature groups are available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturePresence {
    pub mfcc: bool,
    pub mel_energies: bool,
    pub rms: bool,
    pub zcr: bool,
    pub onsets: bool,
}

impl FeaturePresence {
    /// Spectral (frame-level) features are available.
    pub fn has_spectral(&self) -> bool {
        self.mfcc && self.mel_energies
    }
}

impl ChunkFeatures {
    pub fn present(&self) -> FeaturePresence {
        FeaturePresence {
            mfcc: self.mfcc.as_ref().is_some_and(|m| !m.is_empty()),
            mel_energies: self.mel_energies.is_some(),
            rms: self.rms.is_some(),
            zcr: self.zcr.is_some(),
            onsets: self.onset_envelope.as_ref().is_some_and(|e| !e.is_empty()),
        }
    }

    /// Number of analysis frames (0 when no frame-level features exist).
    pub fn frame_count(&self) -> usize {
        self.rms_series.as_ref().map(Vec::len).unwrap_or(0)
    }

    /// Duration of one hop in seconds.
    pub fn hop_seconds(&self) -> f64 {
        self.hop_length as f64 / self.sample_rate.max(1) as f64
    }
}

/// Triangular mel filter restricted to its non-zero bins.
#[derive(Debug, Clone)]
struct MelFilter {
    first_bin: usize,
    weights: Vec<f64>,
}

/// Short-time feature extractor for one sample rate.
pub struct FeatureExtractor {
    sample_rate: u32,
    n_fft: usize,
    hop_length: usize,
    window: Vec<f64>,
    filterbank: Vec<MelFilter>,
    /// `dct[k][band]`, rows 1..=N_MFCC of an orthonormal DCT-II.
    dct: Vec<Vec<f64>>,
    fft: Arc<dyn Fft<f64>>,
}

impl FeatureExtractor {
    /// Create an extractor for `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        let n_fft = frame_size(sample_rate);
        let fft = FftPlanner::<f64>::new().plan_fft_forward(n_fft);

        Self {
            sample_rate,
            n_fft,
            hop_length: n_fft / 4,
            window: hann_window(n_fft),
            filterbank: mel_filterbank(sample_rate, n_fft, N_MELS),
            dct: dct_matrix(N_MELS, N_MFCC),
            fft,
        }
    }

    /// Same frame layout with a custom hop (clamped to `1..=n_fft`).
    ///
    /// Whole-stream methods use a finer hop so frame-lag rounding stays
    /// below a few milliseconds.
    pub fn with_hop(sample_rate: u32, hop_length: usize) -> Self {
        let mut extractor = Self::new(sample_rate);
        extractor.hop_length = hop_length.clamp(1, extractor.n_fft);
        extractor
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    pub fn hop_length(&self) -> usize {
        self.hop_length
    }

    /// Extract every feature available for `window`.
    pub fn extract(&self, window: &AudioWindow<'_>) -> ChunkFeatures {
        let samples = window.samples();
        let mut features = ChunkFeatures {
            hop_length: self.hop_length,
            sample_rate: self.sample_rate,
            ..ChunkFeatures::default()
        };

        if samples.is_empty() {
            return features;
        }

        features.rms = Some(rms(samples));
        features.zcr = Some(zero_crossing_rate(samples));

        if samples.len() < self.n_fft {
            return features;
        }

        let num_frames = (samples.len() - self.n_fft) / self.hop_length + 1;
        let num_bins = self.n_fft / 2 + 1;

        let mut mfcc = Vec::with_capacity(num_frames);
        let mut rms_series = Vec::with_capacity(num_frames);
        let mut mel_frame_energy = Vec::with_capacity(num_frames);
        let mut mel_sum = vec![0.0; self.filterbank.len()];
        let mut envelope = vec![0.0; num_frames];
        let mut prev_mag: Option<Vec<f64>> = None;

        let mut buffer = vec![Complex::new(0.0, 0.0); self.n_fft];
        let mut log_mel = vec![0.0; self.filterbank.len()];

        for frame_idx in 0..num_frames {
            let start = frame_idx * self.hop_length;
            let frame = &samples[start..start + self.n_fft];
            rms_series.push(rms(frame));

            for ((slot, &s), &w) in buffer.iter_mut().zip(frame).zip(&self.window) {
                *slot = Complex::new(s * w, 0.0);
            }
            self.fft.process(&mut buffer);

            let magnitude: Vec<f64> = buffer[..num_bins].iter().map(|c| c.norm()).collect();

            for (band, filter) in self.filterbank.iter().enumerate() {
                let energy: f64 = filter
                    .weights
                    .iter()
                    .zip(&magnitude[filter.first_bin..])
                    .map(|(w, m)| w * m * m)
                    .sum();
                log_mel[band] = energy.max(1e-10).ln();
                mel_sum[band] += log_mel[band];
            }
            mel_frame_energy.push(log_mel.iter().sum::<f64>() / log_mel.len().max(1) as f64);

            mfcc.push(
                self.dct
                    .iter()
                    .map(|row| row.iter().zip(&log_mel).map(|(c, v)| c * v).sum())
                    .collect::<Vec<f64>>(),
            );

            // Spectral flux, half-wave rectified
            if let Some(prev) = &prev_mag {
                envelope[frame_idx] = magnitude
                    .iter()
                    .zip(prev)
                    .map(|(m, p)| (m - p).max(0.0))
                    .sum();
            }
            prev_mag = Some(magnitude);
        }

        let max_flux = envelope.iter().cloned().fold(0.0_f64, f64::max);
        if max_flux > 1e-10 {
            for v in &mut envelope {
                *v /= max_flux;
            }
        }

        features.onset_frames = Some(pick_onsets(&envelope));
        features.onset_envelope = Some(envelope);
        features.mel_energies = Some(
            mel_sum
                .into_iter()
                .map(|s| s / num_frames as f64)
                .collect(),
        );
        features.mel_frame_energy = Some(mel_frame_energy);
        features.rms_series = Some(rms_series);
        features.mfcc = Some(mfcc);
        features
    }
}

/// `next_pow2(0.032 * sample_rate)`, at least 16.
pub fn frame_size(sample_rate: u32) -> usize {
    ((0.032 * sample_rate as f64).round() as usize)
        .max(16)
        .next_power_of_two()
}

/// Root-mean-square amplitude.
pub fn rms(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f64>() / samples.len() as f64).sqrt()
}

fn zero_crossing_rate(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f64 / (samples.len() - 1) as f64
}

/// Local maxima above `mean + 1.5 std`, at least 3 frames apart.
fn pick_onsets(envelope: &[f64]) -> Vec<usize> {
    if envelope.len() < 3 {
        return Vec::new();
    }
    let n = envelope.len() as f64;
    let mean = envelope.iter().sum::<f64>() / n;
    let std = (envelope.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    let threshold = mean + ONSET_PEAK_STD * std;

    let mut peaks: Vec<usize> = Vec::new();
    for i in 1..envelope.len() - 1 {
        let v = envelope[i];
        if v <= threshold || v <= envelope[i - 1] || v < envelope[i + 1] {
            continue;
        }
        match peaks.last() {
            Some(&last) if i - last < ONSET_MIN_SEPARATION => {
                if v > envelope[last] {
                    if let Some(slot) = peaks.last_mut() {
                        *slot = i;
                    }
                }
            }
            _ => peaks.push(i),
        }
    }
    peaks
}

/// Create a Hann window.
fn hann_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / size as f64).cos()))
        .collect()
}

fn hz_to_mel(hz: f64) -> f64 {
    1127.0 * (1.0 + hz / 700.0).ln()
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * ((mel / 1127.0).exp() - 1.0)
}

/// Triangular mel filterbank over `0..sample_rate/2` with Slaney
/// normalization (scale by `2 / bandwidth_hz`).
fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize) -> Vec<MelFilter> {
    let n_bins = n_fft / 2 + 1;
    let mel_max = hz_to_mel(sample_rate as f64 / 2.0);

    let hz_points: Vec<f64> = (0..=n_mels + 1)
        .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();
    let bin_points: Vec<f64> = hz_points
        .iter()
        .map(|&hz| hz * n_fft as f64 / sample_rate as f64)
        .collect();

    (0..n_mels)
        .map(|i| {
            let (start, center, end) = (bin_points[i], bin_points[i + 1], bin_points[i + 2]);
            let bandwidth = hz_points[i + 2] - hz_points[i];
            let norm = if bandwidth > 0.0 { 2.0 / bandwidth } else { 0.0 };

            let weights_full: Vec<f64> = (0..n_bins)
                .map(|j| {
                    let f = j as f64;
                    if f >= start && f < center && center > start {
                        (f - start) / (center - start) * norm
                    } else if f >= center && f <= end && end > center {
                        (end - f) / (end - center) * norm
                    } else {
                        0.0
                    }
                })
                .collect();

            let first = weights_full.iter().position(|&w| w > 0.0).unwrap_or(0);
            let last = weights_full
                .iter()
                .rposition(|&w| w > 0.0)
                .map(|p| p + 1)
                .unwrap_or(first);
            MelFilter {
                first_bin: first,
                weights: weights_full[first..last].to_vec(),
            }
        })
        .collect()
}

/// Rows 1..=n_mfcc of an orthonormal DCT-II over `n` inputs.
fn dct_matrix(n: usize, n_mfcc: usize) -> Vec<Vec<f64>> {
    let scale = (2.0 / n as f64).sqrt();
    (1..=n_mfcc)
        .map(|k| {
            (0..n)
                .map(|i| scale * (PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * n as f64)).cos())
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::{noise, tone};

    #[test]
    fn frame_size_follows_sample_rate() {
        assert_eq!(frame_size(8000), 256);
        assert_eq!(frame_size(16000), 512);
        assert_eq!(frame_size(48000), 2048);
    }

    #[test]
    fn custom_hop_yields_more_frames() {
        let samples = noise(8000, 4, 0.5);
        let window = AudioWindow::from_slice(&samples, 8000);
        let coarse = FeatureExtractor::new(8000).extract(&window);
        let fine = FeatureExtractor::with_hop(8000, 32).extract(&window);
        assert_eq!(fine.hop_length, 32);
        assert_eq!(fine.frame_count(), (8000 - 256) / 32 + 1);
        assert!(fine.frame_count() > coarse.frame_count());
    }

    #[test]
    fn empty_window_has_no_features() {
        let extractor = FeatureExtractor::new(8000);
        let features = extractor.extract(&AudioWindow::from_slice(&[], 8000));
        assert_eq!(features.present(), FeaturePresence::default());
    }

    #[test]
    fn short_window_has_only_rms_and_zcr() {
        let extractor = FeatureExtractor::new(8000);
        let samples = tone(440.0, 8000, 100);
        let features = extractor.extract(&AudioWindow::from_slice(&samples, 8000));
        let presence = features.present();
        assert!(presence.rms && presence.zcr);
        assert!(!presence.mfcc && !presence.mel_energies && !presence.onsets);
    }

    #[test]
    fn full_window_has_thirteen_coefficients() {
        let extractor = FeatureExtractor::new(8000);
        let samples = noise(8000, 7, 0.3);
        let features = extractor.extract(&AudioWindow::from_slice(&samples, 8000));
        let presence = features.present();
        assert!(presence.has_spectral());
        assert!(presence.onsets);

        let mfcc = features.mfcc.as_ref().unwrap();
        assert_eq!(mfcc.len(), (8000 - 256) / 64 + 1);
        assert!(mfcc.iter().all(|f| f.len() == N_MFCC));
        assert_eq!(features.mel_energies.as_ref().unwrap().len(), N_MELS);
        assert_eq!(features.frame_count(), mfcc.len());
    }

    #[test]
    fn rms_and_zcr_match_known_signals() {
        let extractor = FeatureExtractor::new(8000);
        let square: Vec<f64> = (0..1000).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        let features = extractor.extract(&AudioWindow::from_slice(&square, 8000));
        assert!((features.rms.unwrap() - 0.5).abs() < 1e-12);
        assert!((features.zcr.unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn onsets_are_found_at_bursts() {
        let extractor = FeatureExtractor::new(8000);
        let mut samples = vec![0.0; 16000];
        let burst = noise(400, 3, 0.8);
        for start in [2000, 8000, 13000] {
            samples[start..start + 400].copy_from_slice(&burst);
        }
        let features = extractor.extract(&AudioWindow::from_slice(&samples, 8000));
        let onsets = features.onset_frames.unwrap();
        assert!(!onsets.is_empty(), "bursts should produce onset peaks");
        for pair in onsets.windows(2) {
            assert!(pair[1] - pair[0] >= ONSET_MIN_SEPARATION);
        }
    }

    #[test]
    fn pick_onsets_respects_separation() {
        let mut env = vec![0.0; 20];
        env[5] = 1.0;
        env[6] = 0.2;
        env[7] = 0.9;
        env[15] = 1.0;
        let peaks = pick_onsets(&env);
        assert_eq!(peaks, vec![5, 15]);
    }
}
