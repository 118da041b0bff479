//! Whole-stream offset detection methods.
//!
//! This module defines the `CorrelationMethod` trait and one implementation
//! per [`OffsetMethod`]. Every implementation returns the same
//! [`OffsetEstimate`] shape so the consensus resolver can compare them.
//!
//! - [`Cepstral`]: summed correlation of z-scored MFCC coefficient series
//! - [`Onset`]: GCC-PHAT on spectral-flux onset envelopes
//! - [`Spectral`]: GCC-PHAT on per-frame mean log-mel energy
//! - [`RawCorrelation`]: sample-accurate normalized cross-correlation

mod cepstral;
pub mod envelope;
mod onset;
mod raw;
mod spectral;

pub use cepstral::Cepstral;
pub use onset::Onset;
pub use raw::RawCorrelation;
pub use spectral::Spectral;

use crate::analysis::features::ChunkFeatures;
use crate::analysis::types::{AnalysisResult, AudioWindow, OffsetEstimate};
use crate::models::OffsetMethod;

/// Inputs shared by all methods for one window pair.
///
/// Features are extracted once by the caller and reused by every
/// frame-level method.
#[derive(Debug, Clone, Copy)]
pub struct MethodInput<'a> {
    pub master: AudioWindow<'a>,
    pub dub: AudioWindow<'a>,
    pub master_features: &'a ChunkFeatures,
    pub dub_features: &'a ChunkFeatures,
}

/// Trait for offset detection methods.
///
/// Implementations return the window-relative offset of `dub` against
/// `master` (dub position minus master position).
pub trait CorrelationMethod: Send + Sync {
    /// Method tag carried by every estimate.
    fn method(&self) -> OffsetMethod;

    /// Name of this correlation method.
    fn name(&self) -> &str {
        self.method().name()
    }

    /// Short description of the method.
    fn description(&self) -> &str;

    /// Estimate the offset for one window pair.
    fn estimate(&self, input: &MethodInput<'_>) -> AnalysisResult<OffsetEstimate>;
}

/// Factory for creating a method implementation from its tag.
pub fn create_method(method: OffsetMethod) -> Box<dyn CorrelationMethod> {
    match method {
        OffsetMethod::Cepstral => Box::new(Cepstral::new()),
        OffsetMethod::RawCorrelation => Box::new(RawCorrelation::new()),
        OffsetMethod::Onset => Box::new(Onset::new()),
        OffsetMethod::Spectral => Box::new(Spectral::new()),
    }
}

/// Create implementations for a list of tags (deduplicated, in order).
pub fn selected_methods(methods: &[OffsetMethod]) -> Vec<Box<dyn CorrelationMethod>> {
    let mut seen = Vec::new();
    methods
        .iter()
        .filter(|m| {
            if seen.contains(*m) {
                false
            } else {
                seen.push(**m);
                true
            }
        })
        .map(|&m| create_method(m))
        .collect()
}
