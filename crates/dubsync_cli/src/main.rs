//! dubsync - command-line entry point
//!
//! Loads settings, decodes WAV inputs, runs the offset analyzer and writes
//! the JSON report to stdout or a file.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use dubsync_core::analysis::{AnalysisReport, AudioIngest, OffsetAnalyzer};
use dubsync_core::cancel::CancelHandle;
use dubsync_core::config::{validate, ConfigManager, Settings};
use dubsync_core::device::Device;
use dubsync_core::logging::{init_tracing, LogLevel};
use dubsync_core::models::OffsetMethod;

mod wav;

use wav::WavIngest;

#[derive(Parser, Debug)]
#[command(name = "dubsync")]
#[command(version, about = "Measure the offset between a master and dubbed audio tracks")]
struct Cli {
    /// Master (reference) WAV file
    master: PathBuf,

    /// Dub WAV file(s); several dubs are analyzed as one batch
    #[arg(required = true)]
    dubs: Vec<PathBuf>,

    /// Settings file (TOML); created with defaults when missing
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pass-1 chunk length in seconds
    #[arg(long)]
    chunk_size: Option<f64>,

    /// Maximum pass-1 chunks
    #[arg(long)]
    max_chunks: Option<usize>,

    /// Restrict consensus to these methods (cepstral, raw, onset, spectral)
    #[arg(short, long, value_delimiter = ',')]
    methods: Vec<OffsetMethod>,

    /// Write the JSON report here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Chunk worker threads (0 = one per core)
    #[arg(long)]
    threads: Option<usize>,
}

impl Cli {
    /// Settings from the config file with command-line overrides applied.
    fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => {
                let mut manager = ConfigManager::new(path);
                manager
                    .load_or_create()
                    .with_context(|| format!("Failed to load config {}", path.display()))?;
                manager.into_settings()
            }
            None => Settings::default(),
        };

        if let Some(chunk_size) = self.chunk_size {
            settings.analysis.chunk_size_seconds = chunk_size;
        }
        if let Some(max_chunks) = self.max_chunks {
            settings.analysis.max_chunks = max_chunks;
        }
        if !self.methods.is_empty() {
            settings.analysis.requested_methods = self.methods.clone();
        }
        if let Some(level) = self.log_level {
            settings.logging.level = level;
        }
        if let Some(threads) = self.threads {
            settings.runtime.threads = threads;
        }
        Ok(settings)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = cli.settings()?;

    init_tracing(settings.logging.level);
    for warning in validate(&mut settings) {
        tracing::warn!("{}", warning);
    }

    tracing::info!("dubsync core {}", dubsync_core::version());
    tracing::info!("Master: {}", cli.master.display());
    for dub in &cli.dubs {
        tracing::info!("Dub:    {}", dub.display());
    }

    let cancel = CancelHandle::new();
    let handler_cancel = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("Interrupt received, finishing current pass");
        handler_cancel.cancel();
    })
    .context("Failed to install Ctrl-C handler")?;

    let device = Device::resolve(settings.runtime.threads);
    tracing::info!("Using {} worker threads", device.threads());
    let analyzer = OffsetAnalyzer::new(&settings, device);

    let json = if let [dub] = cli.dubs.as_slice() {
        let report = analyzer
            .analyze_files(&cli.master, dub, &WavIngest, &cancel)
            .context("Analysis failed")?;
        log_summary(&report);
        serde_json::to_string_pretty(&report)?
    } else {
        let master = WavIngest
            .load(&cli.master, None)
            .with_context(|| format!("Failed to load {}", cli.master.display()))?;
        let dubs = cli
            .dubs
            .iter()
            .map(|path| {
                WavIngest
                    .load(path, Some(master.sample_rate()))
                    .with_context(|| format!("Failed to load {}", path.display()))
            })
            .collect::<Result<Vec<_>>>()?;
        let reports = analyzer
            .analyze_batch(&master, &dubs, &cancel)
            .context("Batch analysis failed")?;
        reports.iter().for_each(log_summary);
        serde_json::to_string_pretty(&reports)?
    };

    match &cli.output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!("Report written to {}", path.display());
        }
        None => println!("{}", json),
    }

    if cancel.is_cancelled() {
        bail!("Analysis cancelled; report is partial");
    }
    Ok(())
}

fn log_summary(report: &AnalysisReport) {
    match &report.consensus {
        Some(consensus) => tracing::info!(
            "Offset {:+.4}s via {} (confidence {:.3}){}",
            consensus.offset_seconds,
            consensus.primary_method,
            consensus.confidence,
            if report.needs_verification() {
                " - verification recommended"
            } else {
                ""
            }
        ),
        None => tracing::warn!("No offset determined"),
    }
    if report.drift.has_drift {
        tracing::warn!(
            "{} detected: {} regions, {} localized events",
            report.drift.pattern,
            report.drift.drift_regions.len(),
            report.drift.localized_events.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_on_top_of_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("dubsync.toml");
        fs::write(&config, "[analysis]\nmax_chunks = 7\nchunk_size_seconds = 20.0\n").unwrap();

        let cli = Cli::parse_from([
            "dubsync",
            "master.wav",
            "dub.wav",
            "--config",
            config.to_str().unwrap(),
            "--chunk-size",
            "15",
            "--methods",
            "onset,spectral",
            "--log-level",
            "debug",
        ]);
        let settings = cli.settings().unwrap();
        assert_eq!(settings.analysis.max_chunks, 7);
        assert_eq!(settings.analysis.chunk_size_seconds, 15.0);
        assert_eq!(
            settings.analysis.requested_methods,
            vec![OffsetMethod::Onset, OffsetMethod::Spectral]
        );
        assert_eq!(settings.logging.level, LogLevel::Debug);
    }

    #[test]
    fn several_dubs_are_accepted() {
        let cli = Cli::parse_from(["dubsync", "master.wav", "a.wav", "b.wav", "--threads", "2"]);
        assert_eq!(cli.dubs.len(), 2);
        assert_eq!(cli.settings().unwrap().runtime.threads, 2);
    }

    #[test]
    fn dub_is_required() {
        assert!(Cli::try_parse_from(["dubsync", "master.wav"]).is_err());
    }
}
