//! Heuristic "needs verification" gate.
//!
//! Sums weighted indicators that a result is likely wrong. When the sum
//! crosses the threshold an independent onset correlation over the leading
//! part of both streams is run as a second opinion.

use serde::{Deserialize, Serialize};

use super::features::{frame_size, FeatureExtractor};
use super::methods::{CorrelationMethod, MethodInput, Onset};
use super::types::AudioSignal;

/// Indicator weights and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    pub enabled: bool,
    /// Severity at which a result is flagged.
    pub threshold: f64,
    pub large_offset_seconds: f64,
    pub large_offset_weight: f64,
    pub low_confidence: f64,
    pub low_confidence_weight: f64,
    /// |offset| / shorter duration above this is suspicious.
    pub duration_ratio: f64,
    pub duration_ratio_weight: f64,
    pub sibling_spread_seconds: f64,
    pub sibling_spread_weight: f64,
    pub first_in_batch_weight: f64,
    pub secondary_check: bool,
    /// Leading span correlated by the secondary check (s).
    pub secondary_window_seconds: f64,
    pub disagreement_seconds: f64,
    pub disagreement_weight: f64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.30,
            large_offset_seconds: 10.0,
            large_offset_weight: 0.25,
            low_confidence: 0.70,
            low_confidence_weight: 0.30,
            duration_ratio: 0.5,
            duration_ratio_weight: 0.35,
            sibling_spread_seconds: 0.5,
            sibling_spread_weight: 0.30,
            first_in_batch_weight: 0.05,
            secondary_check: true,
            secondary_window_seconds: 30.0,
            disagreement_seconds: 2.0,
            disagreement_weight: 0.40,
        }
    }
}

/// Indicator that contributed to the severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationReason {
    LargeOffset,
    LowConfidence,
    OffsetDurationRatio,
    SiblingSpread,
    FirstInBatch,
    MethodsDisagree,
}

/// What the verifier knows about one result.
#[derive(Debug, Clone, Default)]
pub struct VerificationInput {
    pub offset_seconds: f64,
    pub confidence: f64,
    pub master_duration: f64,
    pub dub_duration: f64,
    /// Offsets of the other components in the same batch.
    pub sibling_offsets: Vec<f64>,
    pub first_in_batch: bool,
}

/// Verifier verdict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub needs_verification: bool,
    pub severity: f64,
    pub reasons: Vec<VerificationReason>,
    /// Offset found by the secondary onset check, when it ran.
    pub secondary_offset: Option<f64>,
    pub methods_disagree: bool,
}

/// Flags results that deserve a second look.
pub struct SmartVerifier {
    config: VerificationConfig,
}

impl SmartVerifier {
    pub fn new(config: VerificationConfig) -> Self {
        Self { config }
    }

    /// Score the indicators only.
    pub fn assess(&self, input: &VerificationInput) -> VerificationReport {
        let mut report = VerificationReport::default();
        if !self.config.enabled {
            return report;
        }
        let c = &self.config;
        let offset = input.offset_seconds.abs();

        let shorter = input.master_duration.min(input.dub_duration);
        let spread = sibling_spread(input.offset_seconds, &input.sibling_offsets);

        let indicators = [
            (offset > c.large_offset_seconds, VerificationReason::LargeOffset, c.large_offset_weight),
            (input.confidence < c.low_confidence, VerificationReason::LowConfidence, c.low_confidence_weight),
            (
                shorter > 0.0 && offset / shorter > c.duration_ratio,
                VerificationReason::OffsetDurationRatio,
                c.duration_ratio_weight,
            ),
            (spread > c.sibling_spread_seconds, VerificationReason::SiblingSpread, c.sibling_spread_weight),
            (input.first_in_batch, VerificationReason::FirstInBatch, c.first_in_batch_weight),
        ];
        for (hit, reason, weight) in indicators {
            if hit {
                report.severity += weight;
                report.reasons.push(reason);
            }
        }
        report.needs_verification = self.flagged(report.severity);
        report
    }

    /// Score the indicators and run the secondary check when flagged.
    pub fn verify(
        &self,
        input: &VerificationInput,
        master: &AudioSignal,
        dub: &AudioSignal,
    ) -> VerificationReport {
        let mut report = self.assess(input);
        if !report.needs_verification || !self.config.secondary_check {
            return report;
        }

        report.secondary_offset = self.secondary_offset(master, dub, input.offset_seconds);
        if let Some(secondary) = report.secondary_offset {
            let disagreement = (secondary - input.offset_seconds).abs();
            if disagreement > self.config.disagreement_seconds {
                report.severity += self.config.disagreement_weight;
                report.reasons.push(VerificationReason::MethodsDisagree);
                report.methods_disagree = true;
            }
            tracing::info!(
                "Secondary onset check: {:+.3}s vs {:+.3}s (disagreement {:.3}s)",
                secondary,
                input.offset_seconds,
                disagreement
            );
        }
        report.needs_verification = self.flagged(report.severity);

        if report.needs_verification {
            tracing::warn!(
                "Result needs verification (severity {:.2}): {:?}",
                report.severity,
                report.reasons
            );
        }
        report
    }

    fn flagged(&self, severity: f64) -> bool {
        severity >= self.config.threshold - 1e-9
    }

    /// Onset correlation over the leading shared window, with the master
    /// window shifted by the primary offset. Returns primary plus residual.
    fn secondary_offset(&self, master: &AudioSignal, dub: &AudioSignal, primary: f64) -> Option<f64> {
        let len = (self.config.secondary_window_seconds * dub.sample_rate() as f64).round() as usize;
        let shift = dub.seconds_to_samples(primary);
        let dub_win = dub.window_samples(shift.max(0), len);
        let master_win = master.window_samples(dub_win.start_sample() as i64 - shift, len);
        let base = dub_win.start_sample() as i64 - master_win.start_sample() as i64;

        let sample_rate = dub.sample_rate();
        let extractor = FeatureExtractor::with_hop(sample_rate, frame_size(sample_rate) / 8);
        let master_features = extractor.extract(&master_win);
        let dub_features = extractor.extract(&dub_win);

        let input = MethodInput {
            master: master_win,
            dub: dub_win,
            master_features: &master_features,
            dub_features: &dub_features,
        };
        match Onset::new().estimate(&input) {
            Ok(estimate) => Some(estimate.shifted(base).precise_seconds()),
            Err(e) => {
                tracing::debug!("Secondary onset check failed: {}", e);
                None
            }
        }
    }
}

impl Default for SmartVerifier {
    fn default() -> Self {
        Self::new(VerificationConfig::default())
    }
}

/// Max minus min over this offset and its siblings (0 without siblings).
fn sibling_spread(offset: f64, siblings: &[f64]) -> f64 {
    if siblings.is_empty() {
        return 0.0;
    }
    let all = siblings.iter().copied().chain(std::iter::once(offset));
    let (min, max) = all.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    max - min
}
