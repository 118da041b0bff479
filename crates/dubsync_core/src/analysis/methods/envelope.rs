//! Frame-series correlation shared by the frame-level methods.
//!
//! Correlates one or more per-frame feature series (onset strength, mel
//! energy, cepstral coefficients) and locates the best frame lag with
//! sub-frame parabolic refinement.

use parking_lot::Mutex;
use rustfft::{num_complex::Complex, FftPlanner};

use crate::analysis::peak_fit::{fit_peak, pick_peak};
use crate::analysis::types::{AnalysisError, AnalysisResult, OffsetEstimate};
use crate::models::OffsetMethod;

/// Fewer frames than this cannot produce a meaningful lag.
pub const MIN_FRAMES: usize = 8;

/// Spectral weighting applied to the cross-power spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weighting {
    /// Phase transform (GCC-PHAT): keep phase only.
    Phat,
    /// Plain correlation of z-scored series, normalized per series.
    Normalized,
}

/// Best lag between two sets of frame series.
#[derive(Debug, Clone, Copy)]
pub struct FrameLag {
    /// Integer frame lag (dub minus master).
    pub lag: i64,
    /// Parabolic sub-frame part, within +/-0.5.
    pub fraction: f64,
    /// Correlation score at the peak.
    pub peak: f64,
    /// Peak quality (0.0 - 1.0).
    pub confidence: f64,
    pub ambiguous: bool,
}

impl FrameLag {
    /// Convert to a sample-domain estimate.
    ///
    /// The whole frame lag is rounded to integer samples; the remainder
    /// becomes the sub-sample part.
    pub fn into_estimate(self, method: OffsetMethod, hop: usize, sample_rate: u32) -> OffsetEstimate {
        let total = (self.lag as f64 + self.fraction) * hop as f64;
        let whole = total.round();
        OffsetEstimate::new(method, whole as i64, sample_rate, self.peak, self.confidence)
            .with_sub_sample(total - whole)
    }
}

/// Correlate paired series; `master[i]` pairs with `dub[i]`.
///
/// Series are truncated to the shortest length. Lags up to half that length
/// are searched.
pub fn correlate_series(
    planner: &Mutex<FftPlanner<f64>>,
    master: &[&[f64]],
    dub: &[&[f64]],
    weighting: Weighting,
) -> AnalysisResult<FrameLag> {
    let n = master
        .iter()
        .chain(dub.iter())
        .map(|s| s.len())
        .min()
        .unwrap_or(0);
    if n < MIN_FRAMES || master.is_empty() || master.len() != dub.len() {
        return Err(AnalysisError::InvalidInput(format!(
            "too few frames for correlation: {}",
            n
        )));
    }

    let max_lag = (n / 2).min(n - 1);
    let fft_len = (n + max_lag).next_power_of_two();

    let (fft, ifft) = {
        let mut planner = planner.lock();
        (planner.plan_fft_forward(fft_len), planner.plan_fft_inverse(fft_len))
    };

    let mut cross = vec![Complex::new(0.0, 0.0); fft_len];
    let mut used = 0usize;
    for (m, d) in master.iter().zip(dub) {
        let (Some(m), Some(d)) = (prepare(&m[..n], weighting), prepare(&d[..n], weighting)) else {
            continue;
        };
        let mut m_spec = to_complex(&m, fft_len);
        let mut d_spec = to_complex(&d, fft_len);
        fft.process(&mut m_spec);
        fft.process(&mut d_spec);
        for ((acc, a), b) in cross.iter_mut().zip(&m_spec).zip(&d_spec) {
            *acc += a.conj() * b;
        }
        used += 1;
    }
    if used == 0 {
        return Err(AnalysisError::InvalidInput(
            "feature series carry no variation".to_string(),
        ));
    }

    if weighting == Weighting::Phat {
        for val in &mut cross {
            let mag = val.norm();
            if mag > 1e-12 {
                *val /= mag;
            } else {
                *val = Complex::new(0.0, 0.0);
            }
        }
    }

    ifft.process(&mut cross);

    let scale = match weighting {
        Weighting::Phat => 1.0 / fft_len as f64,
        Weighting::Normalized => 1.0 / (fft_len as f64 * used as f64 * n as f64),
    };
    let max_lag = max_lag as i64;
    let lags: Vec<i64> = (-max_lag..=max_lag).collect();
    let scores: Vec<f64> = lags
        .iter()
        .map(|&k| {
            let idx = if k >= 0 {
                k as usize
            } else {
                (fft_len as i64 + k) as usize
            };
            (cross[idx].re * scale).abs()
        })
        .collect();

    let pick = pick_peak(&lags, &scores)
        .filter(|p| p.value > 1e-12)
        .ok_or_else(|| AnalysisError::InvalidInput("flat correlation".to_string()))?;
    let fit = fit_peak(&scores, pick.index);

    Ok(FrameLag {
        lag: pick.lag,
        fraction: fit.delta,
        peak: pick.value,
        confidence: peak_confidence(&scores, pick.index),
        ambiguous: pick.ambiguous,
    })
}

/// Zero-mean (and unit variance for [`Weighting::Normalized`]) copy.
fn prepare(series: &[f64], weighting: Weighting) -> Option<Vec<f64>> {
    let n = series.len() as f64;
    let mean = series.iter().sum::<f64>() / n;
    let std = (series.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt();
    if std <= 1e-12 {
        return None;
    }
    let divisor = match weighting {
        Weighting::Phat => 1.0,
        Weighting::Normalized => std,
    };
    Some(series.iter().map(|x| (x - mean) / divisor).collect())
}

fn to_complex(values: &[f64], len: usize) -> Vec<Complex<f64>> {
    let mut out: Vec<Complex<f64>> = values.iter().map(|&x| Complex::new(x, 0.0)).collect();
    out.resize(len, Complex::new(0.0, 0.0));
    out
}

/// Peak quality from prominence, uniqueness and background SNR.
///
/// Each ratio goes through `1 - 1/(1 + ratio/scale)` so the result stays
/// strictly inside 0..1.
pub fn peak_confidence(scores: &[f64], peak_idx: usize) -> f64 {
    let Some(&peak) = scores.get(peak_idx) else {
        return 0.0;
    };

    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let noise_floor = sorted[sorted.len() / 2];
    let prominence_ratio = peak / (noise_floor + 1e-9);

    // Second-best outside a 1% guard band around the peak
    let guard = (scores.len() / 100).max(1);
    let start_mask = peak_idx.saturating_sub(guard);
    let end_mask = (peak_idx + guard + 1).min(scores.len());
    let second_best = scores
        .iter()
        .enumerate()
        .filter(|(i, _)| *i < start_mask || *i >= end_mask)
        .map(|(_, &v)| v)
        .fold(noise_floor, f64::max);
    let uniqueness_ratio = peak / (second_best + 1e-9);

    let threshold_90 = sorted
        .get(sorted.len() * 90 / 100)
        .copied()
        .unwrap_or(peak);
    let background: Vec<f64> = scores.iter().copied().filter(|&x| x < threshold_90).collect();
    let bg_std = if background.len() > 10 {
        let mean = background.iter().sum::<f64>() / background.len() as f64;
        (background.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / background.len() as f64)
            .sqrt()
    } else {
        1e-9
    };
    let snr_ratio = peak / (bg_std + 1e-9);

    fn sigmoid_score(ratio: f64, scale: f64) -> f64 {
        1.0 - 1.0 / (1.0 + ratio.max(0.0) / scale)
    }

    (sigmoid_score(prominence_ratio, 10.0) * 0.25
        + sigmoid_score(uniqueness_ratio - 1.0, 2.0) * 0.50
        + sigmoid_score(snr_ratio, 30.0) * 0.25)
        .clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::{delayed, noise};

    fn planner() -> Mutex<FftPlanner<f64>> {
        Mutex::new(FftPlanner::new())
    }

    #[test]
    fn phat_finds_frame_shift() {
        let master = noise(400, 8, 1.0);
        let dub = delayed(&master, 12);
        let lag = correlate_series(&planner(), &[&master], &[&dub], Weighting::Phat).unwrap();
        assert_eq!(lag.lag, 12);
        assert!(lag.confidence > 0.5, "confidence was {}", lag.confidence);
    }

    #[test]
    fn normalized_sums_multiple_series() {
        let a = noise(300, 1, 1.0);
        let b = noise(300, 2, 1.0);
        let (da, db) = (delayed(&a, 5), delayed(&b, 5));
        let lag = correlate_series(
            &planner(),
            &[&a, &b],
            &[&da, &db],
            Weighting::Normalized,
        )
        .unwrap();
        assert_eq!(lag.lag, 5);
        assert!(lag.peak > 0.9 && lag.peak <= 1.0, "peak was {}", lag.peak);
    }

    #[test]
    fn flat_series_is_rejected() {
        let flat = vec![1.0; 100];
        assert!(correlate_series(&planner(), &[&flat], &[&flat], Weighting::Phat).is_err());
        assert!(correlate_series(&planner(), &[&[1.0, 2.0][..]], &[&[1.0, 2.0][..]], Weighting::Phat).is_err());
    }

    #[test]
    fn frame_lag_converts_to_samples() {
        let lag = FrameLag {
            lag: 62,
            fraction: 0.5,
            peak: 0.8,
            confidence: 0.7,
            ambiguous: false,
        };
        let est = lag.into_estimate(OffsetMethod::Onset, 32, 8000);
        assert_eq!(est.offset_samples, 2000);
        assert_eq!(est.offset_seconds, 0.25);
        assert_eq!(est.sub_sample_offset, Some(0.0));
    }

    #[test]
    fn peak_confidence_prefers_sharp_peaks() {
        let mut sharp = vec![0.01; 200];
        sharp[100] = 1.0;
        let mut flat = vec![0.5; 200];
        flat[100] = 0.55;
        assert!(peak_confidence(&sharp, 100) > peak_confidence(&flat, 100));
    }
}
