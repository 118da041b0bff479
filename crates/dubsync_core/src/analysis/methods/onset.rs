//! Onset correlation method.
//!
//! Correlates spectral-flux onset strength envelopes rather than raw
//! waveforms. This matches *when things happen*, which holds up when the
//! two streams are different mixes of the same programme.

use parking_lot::Mutex;
use rustfft::FftPlanner;

use crate::analysis::types::{AnalysisError, AnalysisResult, OffsetEstimate};
use crate::models::OffsetMethod;

use super::envelope::{correlate_series, Weighting};
use super::{CorrelationMethod, MethodInput};

/// Onset envelope correlator using GCC-PHAT.
pub struct Onset {
    /// Cached FFT planner for efficiency.
    planner: Mutex<FftPlanner<f64>>,
}

impl Onset {
    pub fn new() -> Self {
        Self {
            planner: Mutex::new(FftPlanner::new()),
        }
    }
}

impl Default for Onset {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationMethod for Onset {
    fn method(&self) -> OffsetMethod {
        OffsetMethod::Onset
    }

    fn description(&self) -> &str {
        "Onset Detection - correlates transient envelopes"
    }

    fn estimate(&self, input: &MethodInput<'_>) -> AnalysisResult<OffsetEstimate> {
        let (Some(master), Some(dub)) = (
            input.master_features.onset_envelope.as_deref(),
            input.dub_features.onset_envelope.as_deref(),
        ) else {
            return Err(AnalysisError::InvalidInput(
                "onset envelope unavailable".to_string(),
            ));
        };

        let lag = correlate_series(&self.planner, &[master], &[dub], Weighting::Phat)?;
        let mut estimate = lag.into_estimate(
            OffsetMethod::Onset,
            input.master_features.hop_length,
            input.master.sample_rate(),
        );
        estimate.ambiguous_peak = lag.ambiguous;
        Ok(estimate)
    }
}
