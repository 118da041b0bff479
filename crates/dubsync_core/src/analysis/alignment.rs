//! Coarse global pre-alignment.
//!
//! When the master is much longer than the dub (the dub covers a single
//! reel or episode of a longer master), chunk windows addressed at equal
//! timestamps would never overlap. This module finds where the dub content
//! sits inside the master at low resolution:
//!
//! 1. Skip leading dub silence (first 1 s window above the silence floor)
//! 2. Block-average both streams down to about 2 kHz
//! 3. Slide a probe of dub content across strided master windows using
//!    fully normalized correlation (per-lag master energy)
//! 4. Accept the best position only when the normalized peak is high enough

use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};

use super::features::rms;
use super::types::AudioSignal;

/// Settings for global alignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalAlignmentConfig {
    pub enabled: bool,
    /// Trigger when master duration exceeds dub duration by this factor.
    pub duration_ratio: f64,
    /// ...and by at least this many seconds.
    pub min_extra_seconds: f64,
    /// RMS a 1 s dub window must exceed to count as content.
    pub silence_floor: f64,
    /// Length of the dub probe in seconds.
    pub probe_seconds: f64,
    /// Approximate rate after block-average decimation.
    pub target_rate: u32,
    /// Minimum normalized correlation to accept the match.
    pub min_correlation: f64,
}

impl Default for GlobalAlignmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_ratio: 1.5,
            min_extra_seconds: 10.0,
            silence_floor: 0.01,
            probe_seconds: 30.0,
            target_rate: 2000,
            min_correlation: 0.3,
        }
    }
}

impl GlobalAlignmentConfig {
    /// Whether the duration mismatch calls for global alignment.
    pub fn should_trigger(&self, master_secs: f64, dub_secs: f64) -> bool {
        self.enabled
            && master_secs > dub_secs * self.duration_ratio
            && master_secs - dub_secs >= self.min_extra_seconds
    }
}

/// Outcome of global alignment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalAlignment {
    /// The duration check asked for alignment.
    pub triggered: bool,
    /// The match passed the correlation threshold.
    pub accepted: bool,
    /// Dub position minus master position, 0 when not accepted.
    pub offset_seconds: f64,
    /// `offset_seconds` at the full sample rate.
    pub offset_samples: i64,
    /// Normalized correlation of the best match.
    pub correlation: f64,
    /// Where dub content starts after leading silence.
    pub dub_content_start: f64,
    /// Where the probe matched inside the master.
    pub master_match_position: f64,
}

/// Locate the dub content inside a longer master.
///
/// Callers check [`GlobalAlignmentConfig::should_trigger`] first; this
/// function always searches and marks the result as triggered.
pub fn global_alignment(
    master: &AudioSignal,
    dub: &AudioSignal,
    config: &GlobalAlignmentConfig,
) -> GlobalAlignment {
    let mut result = GlobalAlignment {
        triggered: true,
        ..GlobalAlignment::default()
    };

    let sample_rate = dub.sample_rate();
    let Some(content_start) = first_content_second(dub, config.silence_floor) else {
        tracing::warn!("Global alignment: dub has no content above the silence floor");
        return result;
    };
    result.dub_content_start = content_start;

    let factor = (sample_rate as f64 / config.target_rate.max(1) as f64)
        .round()
        .max(1.0) as usize;
    let low_rate = sample_rate as f64 / factor as f64;
    let master_low = block_average(master.samples(), factor);
    let dub_low = block_average(dub.samples(), factor);

    let probe_start = (content_start * low_rate).round() as usize;
    let probe_len = ((config.probe_seconds * low_rate).round() as usize)
        .min(dub_low.len().saturating_sub(probe_start));
    if probe_len < low_rate as usize {
        tracing::warn!("Global alignment: probe shorter than 1 s, skipping");
        return result;
    }

    let Some(probe) = zero_mean_unit(&dub_low[probe_start..probe_start + probe_len]) else {
        return result;
    };

    let Some((position, correlation)) = search(&master_low, &probe) else {
        return result;
    };
    result.correlation = correlation;

    if correlation < config.min_correlation {
        tracing::info!(
            "Global alignment rejected: correlation {:.3} below {:.2}",
            correlation,
            config.min_correlation
        );
        return result;
    }

    result.accepted = true;
    result.master_match_position = position as f64 / low_rate;
    result.offset_seconds = content_start - result.master_match_position;
    result.offset_samples = (result.offset_seconds * sample_rate as f64).round() as i64;

    tracing::info!(
        "Global alignment: dub content at {:.2}s matches master at {:.2}s (offset {:+.3}s, r={:.3})",
        content_start,
        result.master_match_position,
        result.offset_seconds,
        correlation
    );
    result
}

/// Start (seconds) of the first 1 s window whose RMS exceeds `floor`.
fn first_content_second(signal: &AudioSignal, floor: f64) -> Option<f64> {
    let window = signal.sample_rate().max(1) as usize;
    signal
        .samples()
        .chunks(window)
        .position(|w| rms(w) > floor)
        .map(|i| (i * window) as f64 / signal.sample_rate().max(1) as f64)
}

fn block_average(samples: &[f64], factor: usize) -> Vec<f64> {
    if factor <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(factor)
        .map(|block| block.iter().sum::<f64>() / block.len() as f64)
        .collect()
}

fn zero_mean_unit(values: &[f64]) -> Option<Vec<f64>> {
    let mean = values.iter().sum::<f64>() / values.len().max(1) as f64;
    let centered: Vec<f64> = values.iter().map(|v| v - mean).collect();
    let norm = centered.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm <= 1e-12 {
        return None;
    }
    Some(centered.into_iter().map(|v| v / norm).collect())
}

/// Best `(position, ncc)` of the unit probe across the master.
///
/// Windows of twice the probe length advance by one probe length, so every
/// position is covered by some window. Ties keep the earliest position.
fn search(master: &[f64], probe: &[f64]) -> Option<(usize, f64)> {
    let probe_len = probe.len();
    if master.len() < probe_len {
        return None;
    }

    let window_len = probe_len * 2;
    let fft_len = (window_len + probe_len).next_power_of_two();
    let (fft, ifft) = {
        let mut planner = FftPlanner::<f64>::new();
        (planner.plan_fft_forward(fft_len), planner.plan_fft_inverse(fft_len))
    };

    let mut probe_spec: Vec<Complex<f64>> = probe.iter().map(|&x| Complex::new(x, 0.0)).collect();
    probe_spec.resize(fft_len, Complex::new(0.0, 0.0));
    fft.process(&mut probe_spec);

    let starts: Vec<usize> = (0..master.len())
        .step_by(probe_len)
        .filter(|&s| master.len() - s >= probe_len)
        .collect();

    let per_window: Vec<Option<(usize, f64)>> = starts
        .par_iter()
        .map(|&start| {
            let window = &master[start..(start + window_len).min(master.len())];
            let mut spec: Vec<Complex<f64>> = window.iter().map(|&x| Complex::new(x, 0.0)).collect();
            spec.resize(fft_len, Complex::new(0.0, 0.0));
            fft.process(&mut spec);
            for (w, p) in spec.iter_mut().zip(&probe_spec) {
                *w = p.conj() * *w;
            }
            ifft.process(&mut spec);
            let scale = 1.0 / fft_len as f64;

            // Prefix sums give per-lag energy of the master segment
            let mut sum = vec![0.0; window.len() + 1];
            let mut sum_sq = vec![0.0; window.len() + 1];
            for (i, &x) in window.iter().enumerate() {
                sum[i + 1] = sum[i] + x;
                sum_sq[i + 1] = sum_sq[i] + x * x;
            }

            let mut best: Option<(usize, f64)> = None;
            for lag in 0..=window.len() - probe_len {
                let s = sum[lag + probe_len] - sum[lag];
                let sq = sum_sq[lag + probe_len] - sum_sq[lag];
                let energy = sq - s * s / probe_len as f64;
                if energy <= 1e-12 {
                    continue;
                }
                let ncc = spec[lag].re * scale / energy.sqrt();
                if best.map_or(true, |(_, b)| ncc > b) {
                    best = Some((start + lag, ncc));
                }
            }
            best
        })
        .collect();

    per_window
        .into_iter()
        .flatten()
        .fold(None, |acc: Option<(usize, f64)>, cand| match acc {
            Some((pos, v)) if v > cand.1 || (v == cand.1 && pos <= cand.0) => Some((pos, v)),
            _ => Some(cand),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::{bursty_noise, noise};

    const SR: u32 = 4000;

    #[test]
    fn trigger_requires_ratio_and_margin() {
        let config = GlobalAlignmentConfig::default();
        assert!(config.should_trigger(70.0, 20.0));
        assert!(!config.should_trigger(25.0, 20.0), "ratio below 1.5");
        assert!(!config.should_trigger(15.0, 8.0), "less than 10 s longer");
    }

    #[test]
    fn finds_dub_inside_padded_master() {
        let dub_samples = bursty_noise(20 * SR as usize, SR, 17);
        let mut master_samples = vec![0.0; 30 * SR as usize];
        master_samples.extend_from_slice(&dub_samples);
        master_samples.extend(vec![0.0; 20 * SR as usize]);

        let master = AudioSignal::new(master_samples, SR);
        let dub = AudioSignal::new(dub_samples, SR);
        let result = global_alignment(&master, &dub, &GlobalAlignmentConfig::default());

        assert!(result.accepted, "correlation was {}", result.correlation);
        assert!(
            (result.offset_seconds.abs() - 30.0).abs() < 0.01,
            "Expected |offset| ~30 s, got {}",
            result.offset_seconds
        );
        // Dub content sits 30 s earlier in the dub than in the master
        assert!(result.offset_seconds < 0.0);
        assert_eq!(result.offset_samples, (result.offset_seconds * SR as f64).round() as i64);
    }

    #[test]
    fn skips_leading_dub_silence() {
        let content = bursty_noise(15 * SR as usize, SR, 23);
        let mut dub_samples = vec![0.0; 5 * SR as usize];
        dub_samples.extend_from_slice(&content);
        let mut master_samples = vec![0.0; 40 * SR as usize];
        master_samples.extend_from_slice(&content);
        master_samples.extend(vec![0.0; 10 * SR as usize]);

        let master = AudioSignal::new(master_samples, SR);
        let dub = AudioSignal::new(dub_samples, SR);
        let result = global_alignment(&master, &dub, &GlobalAlignmentConfig::default());

        assert!(result.accepted);
        assert_eq!(result.dub_content_start, 5.0);
        assert!((result.master_match_position - 40.0).abs() < 0.01);
        assert!((result.offset_seconds + 35.0).abs() < 0.01);
    }

    #[test]
    fn unrelated_material_is_rejected() {
        let master = AudioSignal::new(noise(70 * SR as usize, 1, 0.5), SR);
        let dub = AudioSignal::new(noise(20 * SR as usize, 2, 0.5), SR);
        let result = global_alignment(&master, &dub, &GlobalAlignmentConfig::default());
        assert!(!result.accepted);
        assert_eq!(result.offset_seconds, 0.0);
        assert!(result.triggered);
    }

    #[test]
    fn silent_dub_is_not_aligned() {
        let master = AudioSignal::new(noise(70 * SR as usize, 1, 0.5), SR);
        let dub = AudioSignal::new(vec![0.0; 20 * SR as usize], SR);
        let result = global_alignment(&master, &dub, &GlobalAlignmentConfig::default());
        assert!(!result.accepted);
    }
}
