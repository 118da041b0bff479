//! Cross-method consensus.
//!
//! Each whole-stream method produces one [`OffsetEstimate`]. The resolver
//! picks a primary estimate with fixed, deterministic rules and reports
//! which other methods agree with it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::types::{AnalysisError, AnalysisResult, OffsetEstimate};
use crate::models::{ConsensusRule, OffsetMethod};

/// Consensus thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Methods within this distance of the primary agree with it (s).
    pub agreement_window: f64,
    /// Minimum confidence for cepstral / raw to be preferred.
    pub reliability_threshold: f64,
    /// Confidence bonus per agreeing method.
    pub agreement_bonus: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            agreement_window: 2.0,
            reliability_threshold: 0.3,
            agreement_bonus: 0.05,
        }
    }
}

/// Combined decision across methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub offset_seconds: f64,
    pub confidence: f64,
    pub primary_method: OffsetMethod,
    /// Methods within the agreement window of the primary (primary included).
    pub contributing_methods: Vec<OffsetMethod>,
    /// Every method's own offset.
    pub per_method_offsets: BTreeMap<OffsetMethod, f64>,
    pub rule: ConsensusRule,
    /// The fallback had to take an unreliable method.
    pub low_confidence: bool,
}

/// Resolve a consensus from per-method estimates.
///
/// `requested` restricts the choice to those methods when non-empty, even
/// at low confidence. Later duplicates of a method are ignored.
pub fn resolve(
    estimates: &[OffsetEstimate],
    requested: &[OffsetMethod],
    config: &ConsensusConfig,
) -> AnalysisResult<ConsensusResult> {
    let mut by_method: BTreeMap<OffsetMethod, &OffsetEstimate> = BTreeMap::new();
    for estimate in estimates {
        by_method.entry(estimate.method).or_insert(estimate);
    }
    if by_method.is_empty() {
        return Err(AnalysisError::AllMethodsFailed);
    }

    let (primary, rule, low_confidence) = if requested.is_empty() {
        choose_default(&by_method, config).ok_or(AnalysisError::AllMethodsFailed)?
    } else {
        let candidates: Vec<&OffsetEstimate> = by_method
            .iter()
            .filter(|(m, _)| requested.contains(*m))
            .map(|(_, e)| *e)
            .collect();
        let primary = highest_confidence(&candidates).ok_or(AnalysisError::AllMethodsFailed)?;
        (primary, ConsensusRule::Requested, false)
    };

    let primary_offset = primary.precise_seconds();
    let contributing_methods: Vec<OffsetMethod> = by_method
        .iter()
        .filter(|(_, e)| (e.precise_seconds() - primary_offset).abs() <= config.agreement_window)
        .map(|(m, _)| *m)
        .collect();
    let agreeing_others = contributing_methods.len().saturating_sub(1);
    let confidence =
        (primary.confidence + config.agreement_bonus * agreeing_others as f64).min(1.0);

    let per_method_offsets = by_method
        .iter()
        .map(|(m, e)| (*m, e.precise_seconds()))
        .collect();

    tracing::info!(
        "Consensus ({:?}): {} at {:+.4}s, confidence {:.3}, {} agreeing{}",
        rule,
        primary.method,
        primary_offset,
        confidence,
        contributing_methods.len(),
        if low_confidence { " [low confidence]" } else { "" }
    );

    Ok(ConsensusResult {
        offset_seconds: primary_offset,
        confidence,
        primary_method: primary.method,
        contributing_methods,
        per_method_offsets,
        rule,
        low_confidence,
    })
}

fn choose_default<'a>(
    by_method: &BTreeMap<OffsetMethod, &'a OffsetEstimate>,
    config: &ConsensusConfig,
) -> Option<(&'a OffsetEstimate, ConsensusRule, bool)> {
    let get = |m: OffsetMethod| by_method.get(&m).copied();

    if let (Some(onset), Some(spectral)) = (get(OffsetMethod::Onset), get(OffsetMethod::Spectral)) {
        if (onset.precise_seconds() - spectral.precise_seconds()).abs() <= config.agreement_window {
            let pick = if spectral.confidence > onset.confidence {
                spectral
            } else {
                onset
            };
            return Some((pick, ConsensusRule::OnsetSpectralAgreement, false));
        }
    }

    for method in [OffsetMethod::Cepstral, OffsetMethod::RawCorrelation] {
        if let Some(e) = get(method).filter(|e| e.confidence >= config.reliability_threshold) {
            return Some((e, ConsensusRule::Preferred, false));
        }
    }

    let all: Vec<&OffsetEstimate> = by_method.values().copied().collect();
    let fallback = highest_confidence(&all)?;
    tracing::warn!(
        "No reliable method; falling back to {} (confidence {:.3})",
        fallback.method,
        fallback.confidence
    );
    Some((fallback, ConsensusRule::HighestConfidenceFallback, true))
}

/// Highest confidence; ties keep the earlier method in `OffsetMethod` order.
fn highest_confidence<'a>(candidates: &[&'a OffsetEstimate]) -> Option<&'a OffsetEstimate> {
    candidates.iter().copied().fold(None, |best, e| match best {
        Some(b) if b.confidence > e.confidence => Some(b),
        Some(b) if b.confidence == e.confidence && b.method <= e.method => Some(b),
        _ => Some(e),
    })
}
