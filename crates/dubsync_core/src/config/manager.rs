//! Config manager for loading, validating, and saving settings.
//!
//! Key features:
//! - Atomic writes (write to temp file, then rename)
//! - Validation on load (out-of-range values are clamped and reported)
//! - Unknown sections are dropped on the next save

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::settings::{Settings, SECTION_NAMES};

/// Errors that can occur during config operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

/// Result type for config operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Manages the settings file.
pub struct ConfigManager {
    /// Path to the config file.
    config_path: PathBuf,
    /// Current settings loaded in memory.
    settings: Settings,
}

impl ConfigManager {
    /// Create a new config manager with the given config file path.
    ///
    /// Does not load the config - call `load()` or `load_or_create()` after.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            settings: Settings::default(),
        }
    }

    /// Get the config file path.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Get a reference to the current settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Get a mutable reference to the current settings.
    ///
    /// Changes are only in memory until `save()` is called.
    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Consume the manager, keeping the settings.
    pub fn into_settings(self) -> Settings {
        self.settings
    }

    /// Load config from file.
    ///
    /// Returns error if file doesn't exist.
    pub fn load(&mut self) -> ConfigResult<()> {
        if !self.config_path.exists() {
            return Err(ConfigError::NotFound(self.config_path.clone()));
        }

        let content = fs::read_to_string(&self.config_path)?;
        let (settings, _) = parse_and_validate(&content)?;
        self.settings = settings;
        Ok(())
    }

    /// Load config from file, creating with defaults if it doesn't exist.
    ///
    /// Also validates and cleans up the config, saving if changes were made.
    pub fn load_or_create(&mut self) -> ConfigResult<()> {
        if self.config_path.exists() {
            let content = fs::read_to_string(&self.config_path)?;
            let (settings, adjusted) = parse_and_validate(&content)?;
            self.settings = settings;

            let unknown = unknown_sections(&content)?;
            if !unknown.is_empty() {
                tracing::warn!("Dropping unknown config sections: {}", unknown.join(", "));
            }

            if adjusted || !unknown.is_empty() {
                self.save()?;
            }
        } else {
            self.settings = Settings::default();
            self.save()?;
            tracing::info!("Created default config at {}", self.config_path.display());
        }
        Ok(())
    }

    /// Save the entire config atomically.
    ///
    /// Writes to a temp file first, then renames to ensure atomic write.
    pub fn save(&self) -> ConfigResult<()> {
        let content = self.generate_config_with_comments()?;
        self.atomic_write(&content)?;
        Ok(())
    }

    /// Generate config content with a header comment.
    fn generate_config_with_comments(&self) -> ConfigResult<String> {
        let mut output = String::new();
        output.push_str("# dubsync configuration\n");
        output.push_str("# Missing keys fall back to defaults; values are range-checked on load.\n\n");
        output.push_str(&toml::to_string_pretty(&self.settings)?);
        Ok(output)
    }

    /// Write content to config file atomically.
    ///
    /// Writes to a temp file first, then renames.
    fn atomic_write(&self, content: &str) -> io::Result<()> {
        // Create parent directory if needed
        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Write to temp file in same directory (for atomic rename)
        let temp_path = self.config_path.with_extension("toml.tmp");

        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?; // Ensure data is flushed to disk
        }

        fs::rename(&temp_path, &self.config_path)?;

        Ok(())
    }
}

/// Parse and validate; the flag reports whether anything was clamped.
fn parse_and_validate(content: &str) -> ConfigResult<(Settings, bool)> {
    let mut settings: Settings = toml::from_str(content)?;
    let adjustments = validate(&mut settings);
    for note in &adjustments {
        tracing::warn!("Config adjusted: {}", note);
    }
    Ok((settings, !adjustments.is_empty()))
}

fn unknown_sections(content: &str) -> ConfigResult<Vec<String>> {
    let table: toml::Table = toml::from_str(content)?;
    Ok(table
        .keys()
        .filter(|k| !SECTION_NAMES.contains(&k.as_str()))
        .cloned()
        .collect())
}

/// Clamp out-of-range values in place, returning one note per change.
pub fn validate(settings: &mut Settings) -> Vec<String> {
    let mut notes = Vec::new();

    fn clamp_f64(name: &str, value: &mut f64, min: f64, max: f64, notes: &mut Vec<String>) {
        let clamped = if value.is_finite() {
            value.clamp(min, max)
        } else {
            min
        };
        if clamped != *value {
            notes.push(format!("{} {} -> {}", name, value, clamped));
            *value = clamped;
        }
    }

    fn at_least(name: &str, value: &mut usize, min: usize, notes: &mut Vec<String>) {
        if *value < min {
            notes.push(format!("{} {} -> {}", name, value, min));
            *value = min;
        }
    }

    let a = &mut settings.analysis;
    clamp_f64("analysis.chunk_size_seconds", &mut a.chunk_size_seconds, 1.0, 600.0, &mut notes);
    clamp_f64("analysis.overlap_ratio", &mut a.overlap_ratio, 0.0, 0.95, &mut notes);
    at_least("analysis.max_chunks", &mut a.max_chunks, 1, &mut notes);
    clamp_f64("analysis.whole_stream_seconds", &mut a.whole_stream_seconds, 5.0, 3600.0, &mut notes);
    at_least("analysis.refinement_search_samples", &mut a.refinement_search_samples, 1, &mut notes);
    let before = a.requested_methods.len();
    let mut seen = Vec::new();
    a.requested_methods.retain(|m| {
        let fresh = !seen.contains(m);
        seen.push(*m);
        fresh
    });
    if a.requested_methods.len() != before {
        notes.push("analysis.requested_methods: duplicates removed".to_string());
    }

    let r = &mut settings.refinement;
    clamp_f64("refinement.refinement_chunk_size_seconds", &mut r.refinement_chunk_size_seconds, 1.0, 600.0, &mut notes);
    clamp_f64("refinement.overlap_ratio", &mut r.overlap_ratio, 0.0, 0.95, &mut notes);
    at_least("refinement.max_chunks_per_region", &mut r.max_chunks_per_region, 1, &mut notes);
    clamp_f64("refinement.max_low_confidence_share", &mut r.max_low_confidence_share, 0.0, 1.0, &mut notes);
    clamp_f64("refinement.min_good_share", &mut r.min_good_share, 0.0, 1.0, &mut notes);
    clamp_f64("refinement.region_merge_gap_seconds", &mut r.region_merge_gap_seconds, 0.0, 600.0, &mut notes);

    let d = &mut settings.drift;
    clamp_f64("drift.gap_analysis_confidence_threshold", &mut d.gap_analysis_confidence_threshold, 0.0, 1.0, &mut notes);
    clamp_f64("drift.drift_significance_threshold_seconds", &mut d.drift_significance_threshold_seconds, 0.0, 60.0, &mut notes);
    clamp_f64("drift.region_deviation_seconds", &mut d.region_deviation_seconds, 0.0, 60.0, &mut notes);
    clamp_f64("drift.linear_min_r_squared", &mut d.linear_min_r_squared, 0.0, 1.0, &mut notes);
    clamp_f64("drift.dbscan_epsilon_seconds", &mut d.dbscan_epsilon_seconds, 0.001, 10.0, &mut notes);
    at_least("drift.dbscan_min_samples", &mut d.dbscan_min_samples, 1, &mut notes);

    let e = &mut settings.localized_events;
    clamp_f64("localized_events.min_delta", &mut e.min_delta, 0.0, 60.0, &mut notes);
    clamp_f64("localized_events.max_gap", &mut e.max_gap, 0.0, 3600.0, &mut notes);
    clamp_f64("localized_events.min_duration", &mut e.min_duration, 0.0, 3600.0, &mut notes);
    at_least("localized_events.min_segments", &mut e.min_segments, 1, &mut notes);
    clamp_f64("localized_events.high_confidence", &mut e.high_confidence, 0.0, 1.0, &mut notes);
    clamp_f64("localized_events.drift_min_r_squared", &mut e.drift_min_r_squared, 0.0, 1.0, &mut notes);

    let g = &mut settings.global_alignment;
    clamp_f64("global_alignment.duration_ratio", &mut g.duration_ratio, 1.0, 100.0, &mut notes);
    clamp_f64("global_alignment.probe_seconds", &mut g.probe_seconds, 1.0, 600.0, &mut notes);
    clamp_f64("global_alignment.min_correlation", &mut g.min_correlation, 0.0, 1.0, &mut notes);
    if g.target_rate < 100 {
        notes.push(format!("global_alignment.target_rate {} -> 100", g.target_rate));
        g.target_rate = 100;
    }

    let c = &mut settings.consensus;
    clamp_f64("consensus.agreement_window_seconds", &mut c.agreement_window_seconds, 0.0, 60.0, &mut notes);
    clamp_f64("consensus.reliability_threshold", &mut c.reliability_threshold, 0.0, 1.0, &mut notes);
    clamp_f64("consensus.agreement_bonus", &mut c.agreement_bonus, 0.0, 1.0, &mut notes);

    let v = &mut settings.verification;
    clamp_f64("verification.severity_threshold", &mut v.severity_threshold, 0.0, 2.0, &mut notes);
    clamp_f64("verification.secondary_window_seconds", &mut v.secondary_window_seconds, 1.0, 600.0, &mut notes);

    notes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OffsetMethod;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn load_or_create_creates_default() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(".config").join("dubsync.toml");

        let mut manager = ConfigManager::new(&config_path);
        manager.load_or_create().unwrap();

        assert!(config_path.exists());
        let content = fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("[analysis]"));
        assert!(content.contains("[localized_events]"));
    }

    #[test]
    fn load_or_create_preserves_existing() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("dubsync.toml");

        fs::write(&config_path, "[analysis]\nchunk_size_seconds = 20.0\n").unwrap();

        let mut manager = ConfigManager::new(&config_path);
        manager.load_or_create().unwrap();

        assert_eq!(manager.settings().analysis.chunk_size_seconds, 20.0);
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let mut manager = ConfigManager::new(dir.path().join("absent.toml"));
        assert!(matches!(manager.load(), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("dubsync.toml");
        fs::write(&config_path, "[analysis\n").unwrap();

        let mut manager = ConfigManager::new(&config_path);
        assert!(matches!(manager.load(), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn out_of_range_values_are_clamped_and_saved() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("dubsync.toml");
        fs::write(
            &config_path,
            "[analysis]\noverlap_ratio = 1.5\nmax_chunks = 0\n\n[drift]\ngap_analysis_confidence_threshold = -1.0\n\n[legacy]\nfoo = 1\n",
        )
        .unwrap();

        let mut manager = ConfigManager::new(&config_path);
        manager.load_or_create().unwrap();
        let settings = manager.settings();
        assert_eq!(settings.analysis.overlap_ratio, 0.95);
        assert_eq!(settings.analysis.max_chunks, 1);
        assert_eq!(settings.drift.gap_analysis_confidence_threshold, 0.0);

        let content = fs::read_to_string(&config_path).unwrap();
        assert!(!content.contains("[legacy]"));
        assert!(content.contains("overlap_ratio = 0.95"));
    }

    #[test]
    fn duplicate_methods_are_removed() {
        let mut settings = Settings::default();
        settings.analysis.requested_methods =
            vec![OffsetMethod::Onset, OffsetMethod::Onset, OffsetMethod::Spectral];
        let notes = validate(&mut settings);
        assert_eq!(notes.len(), 1);
        assert_eq!(
            settings.analysis.requested_methods,
            vec![OffsetMethod::Onset, OffsetMethod::Spectral]
        );
        assert!(validate(&mut Settings::default()).is_empty());
    }

    #[test]
    fn save_round_trips() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("dubsync.toml");

        let mut manager = ConfigManager::new(&config_path);
        manager.settings_mut().runtime.threads = 3;
        manager.save().unwrap();

        let mut reloaded = ConfigManager::new(&config_path);
        reloaded.load().unwrap();
        assert_eq!(reloaded.settings(), manager.settings());

        // Temp file should not exist after successful write
        assert!(!config_path.with_extension("toml.tmp").exists());
    }
}
