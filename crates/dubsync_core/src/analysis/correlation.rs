//! Sample-accurate offset estimation.
//!
//! Two stages over a master/dub window pair:
//! 1. Coarse: FFT cross-correlation of zero-mean, unit-energy windows,
//!    `c[k] = sum m[n] * d[n + k]`, searched over `|k| <= max_lag`
//! 2. Refinement: overlap-normalized correlation evaluated directly around
//!    the coarse lag, parabolic sub-sample fit and a phase-coherence check
//!
//! Offsets follow the crate-wide convention: dub position minus master
//! position. A positive lag means the dub content arrives later.

use std::sync::Arc;

use parking_lot::Mutex;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};

use super::peak_fit::{fit_peak, pick_peak};
use super::types::{AnalysisError, AnalysisResult, AudioSignal, OffsetEstimate};
use crate::models::OffsetMethod;

/// Windows shorter than this cannot be correlated meaningfully.
pub const MIN_WINDOW_SAMPLES: usize = 16;
/// Divisor mapping peak prominence (in standard deviations) to 0..1.
const PROMINENCE_SCALE: f64 = 12.0;

/// Configuration for the offset estimator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Largest lag searched by the coarse stage; `None` = half the window.
    pub max_lag_samples: Option<usize>,
    /// Half-width of the direct refinement search around the coarse lag.
    pub refinement_search_samples: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            max_lag_samples: None,
            refinement_search_samples: 8,
        }
    }
}

/// How window positions map onto the two streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// Independent window starts in each stream (samples).
    Direct { master_start: i64, dub_start: i64 },
    /// Dub window start plus a known global offset (dub minus master).
    Aligned { dub_start: i64, global_offset: i64 },
}

impl Addressing {
    /// `(master_start, dub_start)` before clamping.
    pub fn starts(&self) -> (i64, i64) {
        match *self {
            Addressing::Direct {
                master_start,
                dub_start,
            } => (master_start, dub_start),
            Addressing::Aligned {
                dub_start,
                global_offset,
            } => (dub_start - global_offset, dub_start),
        }
    }
}

/// Result of the coarse FFT stage.
#[derive(Debug, Clone, Copy)]
pub struct CoarseLag {
    pub lag: i64,
    /// `|c|` at the chosen lag (unit-energy windows, so within 0..1).
    pub peak: f64,
    /// `(peak - mean) / std` over the searched curve.
    pub prominence: f64,
    pub ambiguous: bool,
}

/// Result of the direct refinement stage.
#[derive(Debug, Clone, Copy)]
pub struct RefinedLag {
    pub lag: i64,
    /// Sub-sample part, within +/-0.5.
    pub fraction: f64,
    /// Overlap-normalized correlation at `lag`.
    pub peak: f64,
    /// Share of the window overlapping at `lag`.
    pub overlap_fraction: f64,
    pub ambiguous: bool,
}

/// Normalized cross-correlation offset estimator.
pub struct OffsetEstimator {
    config: EstimatorConfig,
    /// Cached FFT planner.
    planner: Mutex<FftPlanner<f64>>,
}

impl OffsetEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            config,
            planner: Mutex::new(FftPlanner::new()),
        }
    }

    fn plan(&self, len: usize) -> (Arc<dyn Fft<f64>>, Arc<dyn Fft<f64>>) {
        let mut planner = self.planner.lock();
        (planner.plan_fft_forward(len), planner.plan_fft_inverse(len))
    }

    /// Estimate the offset between two windows (window-relative lag).
    pub fn estimate(&self, master: &[f64], dub: &[f64], sample_rate: u32) -> AnalysisResult<OffsetEstimate> {
        let coarse = self.coarse_lag(master, dub)?;
        let refined = self.refine(master, dub, coarse.lag);
        let coherence = self.phase_coherence(master, dub, refined.lag);

        let mut estimate = OffsetEstimate::new(
            OffsetMethod::RawCorrelation,
            refined.lag,
            sample_rate,
            refined.peak,
            (coarse.prominence / PROMINENCE_SCALE).clamp(0.0, 1.0),
        )
        .with_sub_sample(refined.fraction)
        .with_phase_coherence(coherence);
        estimate.peak_prominence = coarse.prominence;
        estimate.overlap_fraction = refined.overlap_fraction;
        estimate.ambiguous_peak = coarse.ambiguous || refined.ambiguous;

        tracing::trace!(
            "estimate: coarse={} refined={}{:+.3} peak={:.3} prom={:.2} coh={:.3}",
            coarse.lag,
            refined.lag,
            refined.fraction,
            refined.peak,
            coarse.prominence,
            coherence
        );
        Ok(estimate)
    }

    /// Estimate the total offset for windows addressed into full streams.
    ///
    /// Window starts are clamped into each stream and the clamped positions
    /// enter the total: `(dub_start - master_start) + fine`.
    pub fn estimate_at(
        &self,
        master: &AudioSignal,
        dub: &AudioSignal,
        addressing: Addressing,
        len_samples: usize,
    ) -> AnalysisResult<OffsetEstimate> {
        let (master_start, dub_start) = addressing.starts();
        let master_win = master.window_samples(master_start, len_samples);
        let dub_win = dub.window_samples(dub_start, len_samples);

        let fine = self.estimate(master_win.samples(), dub_win.samples(), dub.sample_rate())?;
        let base = dub_win.start_sample() as i64 - master_win.start_sample() as i64;
        Ok(fine.shifted(base))
    }

    /// Coarse FFT correlation of normalized windows.
    pub fn coarse_lag(&self, master: &[f64], dub: &[f64]) -> AnalysisResult<CoarseLag> {
        let n = master.len().min(dub.len());
        if n < MIN_WINDOW_SAMPLES {
            return Err(AnalysisError::InvalidInput(format!(
                "window too short for correlation: {} samples",
                n
            )));
        }

        let m = normalize(&master[..n]).ok_or_else(|| {
            AnalysisError::InvalidInput("master window has no energy".to_string())
        })?;
        let d = normalize(&dub[..n])
            .ok_or_else(|| AnalysisError::InvalidInput("dub window has no energy".to_string()))?;

        let max_lag = self.config.max_lag_samples.unwrap_or(n / 2).min(n - 1);
        // n + max_lag keeps every searched lag free of circular wrap-around
        let fft_len = (n + max_lag).next_power_of_two();
        let (fft, ifft) = self.plan(fft_len);

        let mut m_spec = to_complex(&m, fft_len);
        let mut d_spec = to_complex(&d, fft_len);
        fft.process(&mut m_spec);
        fft.process(&mut d_spec);

        let mut product: Vec<Complex<f64>> = m_spec
            .iter()
            .zip(&d_spec)
            .map(|(a, b)| a.conj() * b)
            .collect();
        ifft.process(&mut product);

        let scale = 1.0 / fft_len as f64;
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
                (product[idx].re * scale).abs()
            })
            .collect();

        let pick = pick_peak(&lags, &scores).ok_or_else(|| {
            AnalysisError::InvalidInput("correlation produced no finite values".to_string())
        })?;

        Ok(CoarseLag {
            lag: pick.lag,
            peak: pick.value,
            prominence: prominence(&scores, pick.value),
            ambiguous: pick.ambiguous,
        })
    }

    /// Direct overlap-normalized correlation around `center_lag`.
    pub fn refine(&self, master: &[f64], dub: &[f64], center_lag: i64) -> RefinedLag {
        let n = master.len().min(dub.len());
        let radius = self.config.refinement_search_samples as i64;
        let limit = n.saturating_sub(1) as i64;

        let lo = (center_lag - radius).max(-limit);
        let hi = (center_lag + radius).min(limit);
        let lags: Vec<i64> = (lo..=hi).collect();
        let scores: Vec<f64> = lags
            .iter()
            .map(|&k| overlap_ncc(&master[..n], &dub[..n], k).abs())
            .collect();

        let Some(pick) = pick_peak(&lags, &scores) else {
            return RefinedLag {
                lag: center_lag,
                fraction: 0.0,
                peak: 0.0,
                overlap_fraction: overlap_fraction(n, center_lag),
                ambiguous: false,
            };
        };

        let fit = fit_peak(&scores, pick.index);
        RefinedLag {
            lag: pick.lag,
            fraction: fit.delta,
            peak: pick.value.clamp(0.0, 1.0),
            overlap_fraction: overlap_fraction(n, pick.lag),
            ambiguous: pick.ambiguous,
        }
    }

    /// Magnitude of the mean unit phasor of the cross-power spectrum of the
    /// windows aligned at `lag`, over bins with non-negligible energy.
    pub fn phase_coherence(&self, master: &[f64], dub: &[f64], lag: i64) -> f64 {
        let n = master.len().min(dub.len());
        let (m_seg, d_seg) = overlap(&master[..n], &dub[..n], lag);
        if m_seg.len() < MIN_WINDOW_SAMPLES {
            return 0.0;
        }

        let fft_len = m_seg.len().next_power_of_two();
        let (fft, _) = self.plan(fft_len);
        let mut m_spec = to_complex(m_seg, fft_len);
        let mut d_spec = to_complex(d_seg, fft_len);
        fft.process(&mut m_spec);
        fft.process(&mut d_spec);

        let cross: Vec<Complex<f64>> = m_spec[1..fft_len / 2]
            .iter()
            .zip(&d_spec[1..fft_len / 2])
            .map(|(a, b)| a.conj() * b)
            .collect();
        let max_mag = cross.iter().map(|c| c.norm()).fold(0.0_f64, f64::max);
        if max_mag <= 1e-12 {
            return 0.0;
        }

        let floor = max_mag * 1e-6;
        let (sum, count) = cross
            .iter()
            .filter(|c| c.norm() > floor)
            .fold((Complex::new(0.0, 0.0), 0usize), |(s, k), c| {
                (s + c / c.norm(), k + 1)
            });
        if count == 0 {
            return 0.0;
        }
        (sum.norm() / count as f64).clamp(0.0, 1.0)
    }
}

impl Default for OffsetEstimator {
    fn default() -> Self {
        Self::new(EstimatorConfig::default())
    }
}

/// Zero-mean, unit-energy copy; `None` when the window is constant.
fn normalize(samples: &[f64]) -> Option<Vec<f64>> {
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let centered: Vec<f64> = samples.iter().map(|x| x - mean).collect();
    let energy = centered.iter().map(|x| x * x).sum::<f64>().sqrt();
    if energy <= 1e-12 {
        return None;
    }
    Some(centered.into_iter().map(|x| x / energy).collect())
}

fn to_complex(samples: &[f64], len: usize) -> Vec<Complex<f64>> {
    let mut out: Vec<Complex<f64>> = samples.iter().map(|&x| Complex::new(x, 0.0)).collect();
    out.resize(len, Complex::new(0.0, 0.0));
    out
}

/// Overlapping segments when the dub is shifted by `lag`:
/// `master[i]` pairs with `dub[i + lag]`.
fn overlap<'a>(master: &'a [f64], dub: &'a [f64], lag: i64) -> (&'a [f64], &'a [f64]) {
    let n = master.len().min(dub.len());
    let shift = lag.unsigned_abs() as usize;
    if shift >= n {
        return (&[], &[]);
    }
    if lag >= 0 {
        (&master[..n - shift], &dub[shift..n])
    } else {
        (&master[shift..n], &dub[..n - shift])
    }
}

fn overlap_fraction(n: usize, lag: i64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    (n.saturating_sub(lag.unsigned_abs() as usize)) as f64 / n as f64
}

/// Correlation normalized by the energy of the overlapping parts only.
fn overlap_ncc(master: &[f64], dub: &[f64], lag: i64) -> f64 {
    let (m, d) = overlap(master, dub, lag);
    if m.is_empty() {
        return 0.0;
    }
    let mean_m = m.iter().sum::<f64>() / m.len() as f64;
    let mean_d = d.iter().sum::<f64>() / d.len() as f64;
    let (mut num, mut em, mut ed) = (0.0, 0.0, 0.0);
    for (x, y) in m.iter().zip(d) {
        let (a, b) = (x - mean_m, y - mean_d);
        num += a * b;
        em += a * a;
        ed += b * b;
    }
    let denom = (em * ed).sqrt();
    if denom <= 1e-12 {
        0.0
    } else {
        num / denom
    }
}

/// `(peak - mean) / std` of a correlation curve.
fn prominence(curve: &[f64], peak: f64) -> f64 {
    if curve.len() < 2 {
        return 0.0;
    }
    let n = curve.len() as f64;
    let mean = curve.iter().sum::<f64>() / n;
    let std = (curve.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    if std <= 1e-12 {
        return 0.0;
    }
    (peak - mean) / std
}
