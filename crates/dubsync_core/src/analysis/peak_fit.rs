//! Peak picking and fitting for sub-sample accuracy.
//!
//! - [`pick_peak`] selects the correlation maximum with the smallest-lag
//!   tie-break and reports ambiguity
//! - [`fit_peak`] uses quadratic (parabolic) interpolation through the peak
//!   and its two neighbours to find the true peak position

/// Values within this distance of the maximum count as tied.
pub const PEAK_TIE_TOLERANCE: f64 = 1e-9;

/// Chosen discrete peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakPick {
    /// Position of the chosen peak in the input slice.
    pub index: usize,
    /// Lag associated with that position.
    pub lag: i64,
    /// Score at the peak.
    pub value: f64,
    /// More than one lag was within tolerance of the maximum.
    pub ambiguous: bool,
}

/// Pick the maximum of `scores`, where `scores[i]` belongs to `lags[i]`.
///
/// Among all lags within [`PEAK_TIE_TOLERANCE`] of the maximum the one with
/// the smallest `|lag|` wins; a `+k` / `-k` tie goes to the non-negative lag.
/// Returns `None` for empty input or when no score is finite.
pub fn pick_peak(lags: &[i64], scores: &[f64]) -> Option<PeakPick> {
    let max = scores
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return None;
    }

    let mut best: Option<PeakPick> = None;
    let mut tied = 0usize;
    for (i, (&lag, &value)) in lags.iter().zip(scores).enumerate() {
        if !value.is_finite() || max - value > PEAK_TIE_TOLERANCE {
            continue;
        }
        tied += 1;
        let better = match best {
            None => true,
            Some(b) => {
                let (la, lb) = (lag.unsigned_abs(), b.lag.unsigned_abs());
                la < lb || (la == lb && lag >= 0 && b.lag < 0)
            }
        };
        if better {
            best = Some(PeakPick {
                index: i,
                lag,
                value,
                ambiguous: false,
            });
        }
    }

    best.map(|mut b| {
        b.ambiguous = tied > 1;
        b
    })
}

/// Parabolic refinement of a discrete peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakFit {
    /// Fractional offset from the discrete peak, within +/-0.5.
    pub delta: f64,
    /// Interpolated peak value.
    pub value: f64,
    /// Whether interpolation was possible (peak not at an edge).
    pub fitted: bool,
}

/// Fit a parabola through `values[peak_index - 1..=peak_index + 1]`.
///
/// The fractional part is clamped to +/-0.5 so the integer position stays
/// the discrete peak.
pub fn fit_peak(values: &[f64], peak_index: usize) -> PeakFit {
    let Some(&y1) = values.get(peak_index) else {
        return PeakFit {
            delta: 0.0,
            value: 0.0,
            fitted: false,
        };
    };

    // Need neighbors for interpolation
    if peak_index == 0 || peak_index + 1 >= values.len() {
        return PeakFit {
            delta: 0.0,
            value: y1,
            fitted: false,
        };
    }

    let y0 = values[peak_index - 1];
    let y2 = values[peak_index + 1];

    // y = ax^2 + bx + c through x = -1, 0, 1:
    //   c = y1, a = (y0 + y2)/2 - y1, b = (y2 - y0)/2
    // Peak of parabola: x_peak = -b/(2a)
    let a = (y0 + y2) / 2.0 - y1;
    let b = (y2 - y0) / 2.0;

    if a.abs() <= 1e-12 {
        return PeakFit {
            delta: 0.0,
            value: y1,
            fitted: false,
        };
    }

    let delta = (-b / (2.0 * a)).clamp(-0.5, 0.5);
    let value = y1 - (b * b) / (4.0 * a);

    PeakFit {
        delta,
        value,
        fitted: true,
    }
}
