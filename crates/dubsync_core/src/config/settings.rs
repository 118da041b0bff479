//! Settings struct with TOML-based sections.
//!
//! Every field has a serde default, so a partial (or empty) file loads
//! cleanly. The `*_config` methods turn sections into engine configs.

use serde::{Deserialize, Serialize};

use crate::analysis::{
    ChunkConfig, ConsensusConfig, DriftConfig, EstimatorConfig, GlobalAlignmentConfig,
    LocalizedEventConfig, MultiPassConfig, VerificationConfig,
};
use crate::logging::LogLevel;
use crate::models::OffsetMethod;

/// Root settings structure containing all configuration sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Pass-1 chunking and method selection.
    #[serde(default)]
    pub analysis: AnalysisSettings,

    /// Pass-2 targeted refinement.
    #[serde(default)]
    pub refinement: RefinementSettings,

    #[serde(default)]
    pub drift: DriftSettings,

    #[serde(default)]
    pub localized_events: LocalizedEventSettings,

    #[serde(default)]
    pub global_alignment: GlobalAlignmentSettings,

    #[serde(default)]
    pub consensus: ConsensusSettings,

    #[serde(default)]
    pub verification: VerificationSettings,

    #[serde(default)]
    pub runtime: RuntimeSettings,
}

/// Section names in file order.
pub const SECTION_NAMES: [&str; 9] = [
    "logging",
    "analysis",
    "refinement",
    "drift",
    "localized_events",
    "global_alignment",
    "consensus",
    "verification",
    "runtime",
];

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default level when RUST_LOG is unset.
    #[serde(default)]
    pub level: LogLevel,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
        }
    }
}

/// Analysis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// Duration of each pass-1 chunk in seconds.
    #[serde(default = "default_chunk_size")]
    pub chunk_size_seconds: f64,

    /// Fraction of each chunk shared with the next.
    #[serde(default = "default_overlap_ratio")]
    pub overlap_ratio: f64,

    /// Maximum number of pass-1 chunks.
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,

    /// Restrict consensus to these methods (empty = automatic).
    #[serde(default)]
    pub requested_methods: Vec<OffsetMethod>,

    /// Span analyzed by the whole-stream methods.
    #[serde(default = "default_whole_stream_seconds")]
    pub whole_stream_seconds: f64,

    /// Half-width of the direct refinement search.
    #[serde(default = "default_refinement_search")]
    pub refinement_search_samples: usize,
}

fn default_chunk_size() -> f64 {
    30.0
}

fn default_overlap_ratio() -> f64 {
    0.7
}

fn default_max_chunks() -> usize {
    50
}

fn default_whole_stream_seconds() -> f64 {
    120.0
}

fn default_refinement_search() -> usize {
    8
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            chunk_size_seconds: default_chunk_size(),
            overlap_ratio: default_overlap_ratio(),
            max_chunks: default_max_chunks(),
            requested_methods: Vec::new(),
            whole_stream_seconds: default_whole_stream_seconds(),
            refinement_search_samples: default_refinement_search(),
        }
    }
}

/// Targeted refinement configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_refinement_chunk_size")]
    pub refinement_chunk_size_seconds: f64,

    #[serde(default = "default_refinement_overlap")]
    pub overlap_ratio: f64,

    #[serde(default = "default_refinement_max_chunks")]
    pub max_chunks_per_region: usize,

    /// Refine when more than this share of chunks is under threshold.
    #[serde(default = "default_max_low_confidence_share")]
    pub max_low_confidence_share: f64,

    /// Refine when fewer than this share is Good or Excellent.
    #[serde(default = "default_min_good_share")]
    pub min_good_share: f64,

    #[serde(default = "default_region_merge_gap")]
    pub region_merge_gap_seconds: f64,
}

fn default_true() -> bool {
    true
}

fn default_refinement_chunk_size() -> f64 {
    10.0
}

fn default_refinement_overlap() -> f64 {
    0.5
}

fn default_refinement_max_chunks() -> usize {
    20
}

fn default_max_low_confidence_share() -> f64 {
    0.3
}

fn default_min_good_share() -> f64 {
    0.7
}

fn default_region_merge_gap() -> f64 {
    5.0
}

impl Default for RefinementSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            refinement_chunk_size_seconds: default_refinement_chunk_size(),
            overlap_ratio: default_refinement_overlap(),
            max_chunks_per_region: default_refinement_max_chunks(),
            max_low_confidence_share: default_max_low_confidence_share(),
            min_good_share: default_min_good_share(),
            region_merge_gap_seconds: default_region_merge_gap(),
        }
    }
}

/// Drift analysis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftSettings {
    /// Minimum ensemble confidence for a reliable chunk.
    #[serde(default = "default_gap_threshold")]
    pub gap_analysis_confidence_threshold: f64,

    #[serde(default = "default_drift_significance")]
    pub drift_significance_threshold_seconds: f64,

    #[serde(default = "default_region_deviation")]
    pub region_deviation_seconds: f64,

    #[serde(default = "default_linear_min_slope")]
    pub linear_min_slope: f64,

    #[serde(default = "default_r_squared")]
    pub linear_min_r_squared: f64,

    #[serde(default = "default_dbscan_epsilon")]
    pub dbscan_epsilon_seconds: f64,

    #[serde(default = "default_dbscan_min_samples")]
    pub dbscan_min_samples: usize,
}

fn default_gap_threshold() -> f64 {
    0.5
}

fn default_drift_significance() -> f64 {
    0.1
}

fn default_region_deviation() -> f64 {
    0.05
}

fn default_linear_min_slope() -> f64 {
    0.001
}

fn default_r_squared() -> f64 {
    0.7
}

fn default_dbscan_epsilon() -> f64 {
    0.05
}

fn default_dbscan_min_samples() -> usize {
    2
}

impl Default for DriftSettings {
    fn default() -> Self {
        Self {
            gap_analysis_confidence_threshold: default_gap_threshold(),
            drift_significance_threshold_seconds: default_drift_significance(),
            region_deviation_seconds: default_region_deviation(),
            linear_min_slope: default_linear_min_slope(),
            linear_min_r_squared: default_r_squared(),
            dbscan_epsilon_seconds: default_dbscan_epsilon(),
            dbscan_min_samples: default_dbscan_min_samples(),
        }
    }
}

/// Localized event thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalizedEventSettings {
    #[serde(default = "default_min_delta")]
    pub min_delta: f64,

    #[serde(default = "default_max_gap")]
    pub max_gap: f64,

    #[serde(default = "default_min_duration")]
    pub min_duration: f64,

    #[serde(default = "default_min_segments")]
    pub min_segments: usize,

    /// Chunks further than this from the baseline are ignored.
    #[serde(default = "default_outlier_limit")]
    pub outlier_limit: f64,

    #[serde(default = "default_high_confidence")]
    pub high_confidence: f64,

    #[serde(default = "default_event_drift_slope")]
    pub drift_min_slope: f64,

    #[serde(default = "default_r_squared")]
    pub drift_min_r_squared: f64,
}

fn default_min_delta() -> f64 {
    0.5
}

fn default_max_gap() -> f64 {
    30.0
}

fn default_min_duration() -> f64 {
    45.0
}

fn default_min_segments() -> usize {
    2
}

fn default_outlier_limit() -> f64 {
    10.0
}

fn default_high_confidence() -> f64 {
    0.8
}

fn default_event_drift_slope() -> f64 {
    0.01
}

impl Default for LocalizedEventSettings {
    fn default() -> Self {
        Self {
            min_delta: default_min_delta(),
            max_gap: default_max_gap(),
            min_duration: default_min_duration(),
            min_segments: default_min_segments(),
            outlier_limit: default_outlier_limit(),
            high_confidence: default_high_confidence(),
            drift_min_slope: default_event_drift_slope(),
            drift_min_r_squared: default_r_squared(),
        }
    }
}

/// Global pre-alignment configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalAlignmentSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_duration_ratio")]
    pub duration_ratio: f64,

    #[serde(default = "default_min_extra_seconds")]
    pub min_extra_seconds: f64,

    #[serde(default = "default_silence_floor")]
    pub silence_floor: f64,

    #[serde(default = "default_probe_seconds")]
    pub probe_seconds: f64,

    #[serde(default = "default_target_rate")]
    pub target_rate: u32,

    #[serde(default = "default_min_correlation")]
    pub min_correlation: f64,
}

fn default_duration_ratio() -> f64 {
    1.5
}

fn default_min_extra_seconds() -> f64 {
    10.0
}

fn default_silence_floor() -> f64 {
    0.01
}

fn default_probe_seconds() -> f64 {
    30.0
}

fn default_target_rate() -> u32 {
    2000
}

fn default_min_correlation() -> f64 {
    0.3
}

impl Default for GlobalAlignmentSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_ratio: default_duration_ratio(),
            min_extra_seconds: default_min_extra_seconds(),
            silence_floor: default_silence_floor(),
            probe_seconds: default_probe_seconds(),
            target_rate: default_target_rate(),
            min_correlation: default_min_correlation(),
        }
    }
}

/// Consensus configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusSettings {
    #[serde(default = "default_agreement_window")]
    pub agreement_window_seconds: f64,

    #[serde(default = "default_reliability")]
    pub reliability_threshold: f64,

    #[serde(default = "default_agreement_bonus")]
    pub agreement_bonus: f64,
}

fn default_agreement_window() -> f64 {
    2.0
}

fn default_reliability() -> f64 {
    0.3
}

fn default_agreement_bonus() -> f64 {
    0.05
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        Self {
            agreement_window_seconds: default_agreement_window(),
            reliability_threshold: default_reliability(),
            agreement_bonus: default_agreement_bonus(),
        }
    }
}

/// Verification gate configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_severity_threshold")]
    pub severity_threshold: f64,

    /// Run the onset cross-check on flagged results.
    #[serde(default = "default_true")]
    pub secondary_check: bool,

    #[serde(default = "default_secondary_window")]
    pub secondary_window_seconds: f64,
}

fn default_severity_threshold() -> f64 {
    0.30
}

fn default_secondary_window() -> f64 {
    30.0
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            severity_threshold: default_severity_threshold(),
            secondary_check: true,
            secondary_window_seconds: default_secondary_window(),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Chunk worker threads; 0 = one per core.
    #[serde(default)]
    pub threads: usize,
}

impl Settings {
    pub fn drift_config(&self) -> DriftConfig {
        let d = &self.drift;
        let e = &self.localized_events;
        DriftConfig {
            confidence_threshold: d.gap_analysis_confidence_threshold,
            significance_threshold: d.drift_significance_threshold_seconds,
            region_deviation: d.region_deviation_seconds,
            linear_min_slope: d.linear_min_slope,
            linear_min_r_squared: d.linear_min_r_squared,
            dbscan_epsilon: d.dbscan_epsilon_seconds,
            dbscan_min_samples: d.dbscan_min_samples,
            events: LocalizedEventConfig {
                min_delta: e.min_delta,
                max_gap: e.max_gap,
                min_duration: e.min_duration,
                min_segments: e.min_segments,
                outlier_limit: e.outlier_limit,
                high_confidence: e.high_confidence,
                drift_min_slope: e.drift_min_slope,
                drift_min_r_squared: e.drift_min_r_squared,
            },
        }
    }

    pub fn multipass_config(&self) -> MultiPassConfig {
        let r = &self.refinement;
        MultiPassConfig {
            chunks: ChunkConfig {
                chunk_size: self.analysis.chunk_size_seconds,
                overlap_ratio: self.analysis.overlap_ratio,
                max_chunks: self.analysis.max_chunks,
            },
            refinement_enabled: r.enabled,
            refinement_chunk_size: r.refinement_chunk_size_seconds,
            refinement_overlap: r.overlap_ratio,
            refinement_max_chunks: r.max_chunks_per_region,
            max_low_confidence_share: r.max_low_confidence_share,
            min_good_share: r.min_good_share,
            region_merge_gap: r.region_merge_gap_seconds,
            estimator: EstimatorConfig {
                max_lag_samples: None,
                refinement_search_samples: self.analysis.refinement_search_samples,
            },
            drift: self.drift_config(),
        }
    }

    pub fn alignment_config(&self) -> GlobalAlignmentConfig {
        let g = &self.global_alignment;
        GlobalAlignmentConfig {
            enabled: g.enabled,
            duration_ratio: g.duration_ratio,
            min_extra_seconds: g.min_extra_seconds,
            silence_floor: g.silence_floor,
            probe_seconds: g.probe_seconds,
            target_rate: g.target_rate,
            min_correlation: g.min_correlation,
        }
    }

    pub fn consensus_config(&self) -> ConsensusConfig {
        ConsensusConfig {
            agreement_window: self.consensus.agreement_window_seconds,
            reliability_threshold: self.consensus.reliability_threshold,
            agreement_bonus: self.consensus.agreement_bonus,
        }
    }

    pub fn verification_config(&self) -> VerificationConfig {
        let v = &self.verification;
        VerificationConfig {
            enabled: v.enabled,
            threshold: v.severity_threshold,
            secondary_check: v.secondary_check,
            secondary_window_seconds: v.secondary_window_seconds,
            ..VerificationConfig::default()
        }
    }
}
