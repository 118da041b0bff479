//! Cepstral correlation method.
//!
//! Each of the 13 MFCC coefficient tracks is z-scored and correlated against
//! its counterpart; the correlations are summed so that every coefficient
//! votes for the same lag. MFCCs are robust to amplitude and channel
//! differences.

use parking_lot::Mutex;
use rustfft::FftPlanner;

use crate::analysis::types::{AnalysisError, AnalysisResult, OffsetEstimate};
use crate::models::OffsetMethod;

use super::envelope::{correlate_series, Weighting};
use super::{CorrelationMethod, MethodInput};

/// MFCC sequence correlator.
pub struct Cepstral {
    planner: Mutex<FftPlanner<f64>>,
}

impl Cepstral {
    pub fn new() -> Self {
        Self {
            planner: Mutex::new(FftPlanner::new()),
        }
    }
}

impl Default for Cepstral {
    fn default() -> Self {
        Self::new()
    }
}

/// Transpose `mfcc[frame][coef]` into one series per coefficient.
fn coefficient_tracks(mfcc: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let width = mfcc.first().map(Vec::len).unwrap_or(0);
    (0..width)
        .map(|k| mfcc.iter().map(|frame| frame[k]).collect())
        .collect()
}

impl CorrelationMethod for Cepstral {
    fn method(&self) -> OffsetMethod {
        OffsetMethod::Cepstral
    }

    fn description(&self) -> &str {
        "Cepstral Correlation - summed MFCC coefficient correlation"
    }

    fn estimate(&self, input: &MethodInput<'_>) -> AnalysisResult<OffsetEstimate> {
        let (Some(master), Some(dub)) = (
            input.master_features.mfcc.as_deref(),
            input.dub_features.mfcc.as_deref(),
        ) else {
            return Err(AnalysisError::InvalidInput("MFCC unavailable".to_string()));
        };

        let master_tracks = coefficient_tracks(master);
        let dub_tracks = coefficient_tracks(dub);
        let m: Vec<&[f64]> = master_tracks.iter().map(Vec::as_slice).collect();
        let d: Vec<&[f64]> = dub_tracks.iter().map(Vec::as_slice).collect();

        let lag = correlate_series(&self.planner, &m, &d, Weighting::Normalized)?;
        let mut estimate = lag.into_estimate(
            OffsetMethod::Cepstral,
            input.master_features.hop_length,
            input.master.sample_rate(),
        );
        estimate.ambiguous_peak = lag.ambiguous;
        Ok(estimate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::features::FeatureExtractor;
    use crate::analysis::test_support::{bursty_noise, delayed};
    use crate::analysis::types::AudioWindow;

    #[test]
    fn cepstral_detects_delay() {
        let extractor = FeatureExtractor::new(8000);
        let master = bursty_noise(40000, 8000, 9);
        let dub = delayed(&master, 640);
        let (mw, dw) = (
            AudioWindow::from_slice(&master, 8000),
            AudioWindow::from_slice(&dub, 8000),
        );
        let (mf, df) = (extractor.extract(&mw), extractor.extract(&dw));
        let input = MethodInput {
            master: mw,
            dub: dw,
            master_features: &mf,
            dub_features: &df,
        };

        let est = Cepstral::new().estimate(&input).unwrap();
        assert_eq!(est.method, OffsetMethod::Cepstral);
        assert!(
            (est.precise_seconds() - 0.08).abs() <= 0.008,
            "Expected ~0.08 s, got {}",
            est.precise_seconds()
        );
        assert!(est.correlation_peak > 0.5);
    }

    #[test]
    fn coefficient_tracks_transposes() {
        let tracks = coefficient_tracks(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]);
        assert_eq!(tracks, vec![vec![1.0, 3.0, 5.0], vec![2.0, 4.0, 6.0]]);
    }
}
