//! Audio ingest seam.
//!
//! Container decoding lives outside the engine. Callers plug in an
//! [`AudioIngest`] that turns a path into a mono [`AudioSignal`].

use std::path::Path;

use super::types::{AnalysisResult, AudioSignal};

/// Decodes a media path into a mono signal.
pub trait AudioIngest: Send + Sync {
    /// Load `path`, resampled to `target_rate` when given.
    fn load(&self, path: &Path, target_rate: Option<u32>) -> AnalysisResult<AudioSignal>;
}
