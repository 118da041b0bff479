//! Configuration management for dubsync.
//!
//! This module provides:
//! - TOML-based configuration with one table per engine stage
//! - Atomic file writes (write to temp, then rename)
//! - Validation on load with automatic defaults
//!
//! # Example
//!
//! ```no_run
//! use dubsync_core::config::ConfigManager;
//!
//! let mut config = ConfigManager::new("dubsync.toml");
//! config.load_or_create().unwrap();
//!
//! println!("Chunk size: {}s", config.settings().analysis.chunk_size_seconds);
//!
//! config.settings_mut().analysis.max_chunks = 10;
//! config.save().unwrap();
//! ```

mod manager;
mod settings;

pub use manager::{validate, ConfigError, ConfigManager, ConfigResult};
pub use settings::{
    AnalysisSettings, ConsensusSettings, DriftSettings, GlobalAlignmentSettings,
    LocalizedEventSettings, LoggingSettings, RefinementSettings, RuntimeSettings, Settings,
    VerificationSettings, SECTION_NAMES,
};
