//! Data models for dubsync.
//!
//! Shared enums used by the analysis engine, the configuration layer and the
//! serialized report.

mod enums;

pub use enums::{
    BaselineSource, ConsensusRule, ContentType, DriftPattern, EventClassification, OffsetMethod,
    QualityLabel,
};
