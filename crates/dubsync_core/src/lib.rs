//! dubsync core - offset analysis between a master and a dubbed audio track
//!
//! This crate contains the analysis engine with zero UI dependencies.
//! Decoding is left to the caller through [`analysis::AudioIngest`], so the
//! engine can be driven by the CLI or embedded in another tool.

pub mod analysis;
pub mod cancel;
pub mod config;
pub mod device;
pub mod logging;
pub mod models;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
