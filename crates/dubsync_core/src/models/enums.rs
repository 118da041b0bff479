//! Core enums used throughout the engine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Whole-stream offset detection method.
///
/// Declaration order is the deterministic preference order used to break
/// exact confidence ties during consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetMethod {
    /// Correlation of cepstral-coefficient (MFCC) sequences.
    Cepstral,
    /// Sample-accurate correlation of the raw waveforms.
    RawCorrelation,
    /// Correlation of onset-strength envelopes.
    Onset,
    /// Correlation of mel-spectral energy envelopes.
    Spectral,
}

impl OffsetMethod {
    /// Get the display name for this method.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cepstral => "Cepstral Correlation",
            Self::RawCorrelation => "Raw Sample Correlation",
            Self::Onset => "Onset Correlation",
            Self::Spectral => "Spectral Correlation",
        }
    }

    /// Get all available methods as a list.
    pub fn all() -> &'static [OffsetMethod] {
        &[
            Self::Cepstral,
            Self::RawCorrelation,
            Self::Onset,
            Self::Spectral,
        ]
    }
}

impl std::fmt::Display for OffsetMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for OffsetMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cepstral" | "mfcc" => Ok(Self::Cepstral),
            "raw" | "raw_correlation" | "correlation" => Ok(Self::RawCorrelation),
            "onset" => Ok(Self::Onset),
            "spectral" | "spectrogram" => Ok(Self::Spectral),
            other => Err(format!("unknown offset method '{}'", other)),
        }
    }
}

/// Heuristic content label for an analysis window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Dialogue,
    Music,
    Silence,
    Mixed,
    #[default]
    Unknown,
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentType::Dialogue => write!(f, "dialogue"),
            ContentType::Music => write!(f, "music"),
            ContentType::Silence => write!(f, "silence"),
            ContentType::Mixed => write!(f, "mixed"),
            ContentType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Quality rating of a single chunk measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityLabel {
    Excellent,
    Good,
    Fair,
    Poor,
    /// No usable content on either side (nothing to measure).
    Skipped,
}

impl QualityLabel {
    /// Whether this rating counts towards the "good coverage" ratio.
    pub fn is_good(&self) -> bool {
        matches!(self, Self::Excellent | Self::Good)
    }

    /// Whether a chunk with this rating may feed baseline statistics.
    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::Poor | Self::Skipped)
    }
}

impl std::fmt::Display for QualityLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityLabel::Excellent => write!(f, "Excellent"),
            QualityLabel::Good => write!(f, "Good"),
            QualityLabel::Fair => write!(f, "Fair"),
            QualityLabel::Poor => write!(f, "Poor"),
            QualityLabel::Skipped => write!(f, "Skipped"),
        }
    }
}

/// Classification of a localized deviation from the baseline offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventClassification {
    /// Dub carries material the master lacks (dub runs late).
    ExtraContent,
    /// Dub is missing material present in the master (dub runs early).
    MissingContent,
    /// Offset changes steadily across the event.
    Drift,
}

impl std::fmt::Display for EventClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventClassification::ExtraContent => write!(f, "EXTRA_CONTENT"),
            EventClassification::MissingContent => write!(f, "MISSING_CONTENT"),
            EventClassification::Drift => write!(f, "DRIFT"),
        }
    }
}

/// Overall shape of the offset curve across the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftPattern {
    /// Constant offset.
    #[default]
    Uniform,
    /// Offset grows or shrinks linearly (clock/sample-rate mismatch).
    Linear,
    /// Several distinct offset plateaus (edits, reel changes).
    Stepping,
}

impl std::fmt::Display for DriftPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriftPattern::Uniform => write!(f, "Uniform"),
            DriftPattern::Linear => write!(f, "Linear Drift"),
            DriftPattern::Stepping => write!(f, "Stepping"),
        }
    }
}

/// Where the baseline offset of a drift report came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineSource {
    /// Weighted median of at least two reliable chunks.
    WeightedMedian,
    /// Only one reliable chunk existed.
    SingleChunk,
    /// No reliable chunk; weighted median over every measured chunk.
    FullTimeline,
    /// Nothing was measured.
    #[default]
    Empty,
}

/// Rule of the consensus policy that produced the final decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusRule {
    /// Caller restricted the method set.
    Requested,
    /// Onset and spectral agreed.
    OnsetSpectralAgreement,
    /// Preferred method (cepstral, then raw correlation) was reliable.
    Preferred,
    /// Highest-confidence remaining method.
    HighestConfidenceFallback,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_method_serializes_snake_case() {
        let json = serde_json::to_string(&OffsetMethod::RawCorrelation).unwrap();
        assert_eq!(json, "\"raw_correlation\"");
    }

    #[test]
    fn offset_method_parses_aliases() {
        assert_eq!("MFCC".parse::<OffsetMethod>().unwrap(), OffsetMethod::Cepstral);
        assert_eq!("raw".parse::<OffsetMethod>().unwrap(), OffsetMethod::RawCorrelation);
        assert_eq!(" onset ".parse::<OffsetMethod>().unwrap(), OffsetMethod::Onset);
        assert!("dtw".parse::<OffsetMethod>().is_err());
    }

    #[test]
    fn method_order_puts_cepstral_first() {
        let mut methods = vec![OffsetMethod::Spectral, OffsetMethod::Onset, OffsetMethod::Cepstral];
        methods.sort();
        assert_eq!(methods[0], OffsetMethod::Cepstral);
    }

    #[test]
    fn event_classification_uses_upper_case() {
        let json = serde_json::to_string(&EventClassification::MissingContent).unwrap();
        assert_eq!(json, "\"MISSING_CONTENT\"");
    }

    #[test]
    fn quality_label_usability() {
        assert!(QualityLabel::Fair.is_usable());
        assert!(!QualityLabel::Poor.is_usable());
        assert!(!QualityLabel::Skipped.is_usable());
        assert!(QualityLabel::Good.is_good());
        assert!(!QualityLabel::Fair.is_good());
    }
}
