//! Raw sample correlation method.
//!
//! Thin adapter exposing the [`OffsetEstimator`] through the
//! `CorrelationMethod` trait so it can take part in consensus.

use crate::analysis::correlation::{EstimatorConfig, OffsetEstimator};
use crate::analysis::types::{AnalysisResult, OffsetEstimate};
use crate::models::OffsetMethod;

use super::{CorrelationMethod, MethodInput};

/// Sample-accurate normalized cross-correlation.
pub struct RawCorrelation {
    estimator: OffsetEstimator,
}

impl RawCorrelation {
    pub fn new() -> Self {
        Self::with_config(EstimatorConfig::default())
    }

    pub fn with_config(config: EstimatorConfig) -> Self {
        Self {
            estimator: OffsetEstimator::new(config),
        }
    }
}

impl Default for RawCorrelation {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationMethod for RawCorrelation {
    fn method(&self) -> OffsetMethod {
        OffsetMethod::RawCorrelation
    }

    fn description(&self) -> &str {
        "Raw Sample Correlation - FFT cross-correlation with sub-sample refinement"
    }

    fn estimate(&self, input: &MethodInput<'_>) -> AnalysisResult<OffsetEstimate> {
        self.estimator.estimate(
            input.master.samples(),
            input.dub.samples(),
            input.master.sample_rate(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::features::ChunkFeatures;
    use crate::analysis::test_support::{delayed, noise};
    use crate::analysis::types::AudioWindow;

    #[test]
    fn raw_is_sample_accurate() {
        let master = noise(8000, 21, 0.4);
        let dub = delayed(&master, 123);
        let features = ChunkFeatures::default();
        let input = MethodInput {
            master: AudioWindow::from_slice(&master, 8000),
            dub: AudioWindow::from_slice(&dub, 8000),
            master_features: &features,
            dub_features: &features,
        };
        let est = RawCorrelation::new().estimate(&input).unwrap();
        assert_eq!(est.method, OffsetMethod::RawCorrelation);
        assert_eq!(est.offset_samples, 123);
    }
}
