//! Audio offset analysis between a master and a dub.
//!
//! # Architecture
//!
//! The analysis pipeline is built from small stages that
//! [`OffsetAnalyzer`] composes together:
//!
//! 1. **Global Alignment** (`alignment`): Locate the dub inside a much longer
//!    master before chunking.
//!
//! 2. **Chunk Planning** (`chunks`): Overlapping windows over the shared
//!    region.
//!
//! 3. **Features and Classification** (`features`, `classify`): Per-window
//!    spectral features and a content label that weights the confidence
//!    score.
//!
//! 4. **Correlation** (`correlation`): FFT coarse search plus a refinement
//!    search with sub-sample peak fitting.
//!
//! 5. **Multi-Pass** (`multipass`): Coarse pass, refinement decision,
//!    targeted fine pass, combined timeline.
//!
//! 6. **Drift Detection** (`drift_detection`): Baseline offset, drift
//!    regions, localized events and the global drift pattern.
//!
//! 7. **Methods and Consensus** (`methods`, `consensus`): Whole-stream
//!    estimates from independent methods and a deterministic pick.
//!
//! 8. **Verification** (`verify`): Severity score and secondary check.
//!
//! # Usage
//!
//! ```ignore
//! use dubsync_core::analysis::{AudioSignal, OffsetAnalyzer};
//! use dubsync_core::{cancel::CancelHandle, config::Settings, device::Device};
//!
//! let analyzer = OffsetAnalyzer::new(&Settings::default(), Device::resolve(0));
//! let report = analyzer.analyze(&master, &dub, &CancelHandle::new())?;
//!
//! println!("offset: {:?}", report.offset_seconds());
//! ```

mod alignment;
mod analyzer;
mod chunks;
mod classify;
mod confidence;
mod consensus;
mod correlation;
mod drift_detection;
mod features;
mod ingest;
pub mod methods;
mod multipass;
mod peak_fit;
pub mod types;
mod verify;

#[cfg(test)]
mod test_support;

pub use types::{
    AnalysisError, AnalysisResult, AudioSignal, AudioWindow, Chunk, ChunkResult, OffsetEstimate,
    Timeline,
};

pub use alignment::{global_alignment, GlobalAlignment, GlobalAlignmentConfig};

pub use chunks::{create_chunks, plan_region, ChunkConfig};

pub use classify::{classify, ContentClassification, WeightHints};

pub use confidence::{quality_label, score_chunk, ConfidenceBreakdown};

pub use correlation::{Addressing, CoarseLag, EstimatorConfig, OffsetEstimator, RefinedLag};

pub use features::{frame_size, ChunkFeatures, FeatureExtractor, FeaturePresence};

pub use multipass::{
    ChunkAnalyzer, MultiPassConfig, MultiPassController, MultiPassPhase, MultiPassState,
    RefinementDecision, TargetRegion,
};

pub use drift_detection::{
    analyze_drift, weighted_median, DriftConfig, DriftRegion, DriftReport, LocalizedEvent,
    LocalizedEventConfig, WeightedOffset,
};

pub use consensus::{resolve, ConsensusConfig, ConsensusResult};

pub use verify::{
    SmartVerifier, VerificationConfig, VerificationInput, VerificationReason, VerificationReport,
};

pub use methods::{create_method, selected_methods, CorrelationMethod, MethodInput};

pub use ingest::AudioIngest;

pub use analyzer::{AnalysisReport, OffsetAnalyzer, PassSummary};
