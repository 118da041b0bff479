//! Main analyzer for master/dub offset analysis.
//!
//! Orchestrates the full analysis pipeline:
//! 1. Validate inputs and run global pre-alignment when durations differ
//! 2. Multi-pass chunk analysis into a timeline with a drift report
//! 3. Whole-stream method estimates over a bounded span
//! 4. Consensus across methods
//! 5. Verification gate

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::alignment::{global_alignment, GlobalAlignment, GlobalAlignmentConfig};
use super::consensus::{resolve, ConsensusConfig, ConsensusResult};
use super::drift_detection::DriftReport;
use super::features::{frame_size, FeatureExtractor};
use super::ingest::AudioIngest;
use super::methods::{selected_methods, MethodInput};
use super::multipass::{
    ChunkAnalyzer, MultiPassConfig, MultiPassController, MultiPassState, RefinementDecision,
    TargetRegion,
};
use super::types::{AnalysisError, AnalysisResult, AudioSignal, OffsetEstimate, Timeline};
use super::verify::{SmartVerifier, VerificationInput, VerificationReport};
use crate::cancel::CancelHandle;
use crate::config::Settings;
use crate::device::Device;
use crate::models::OffsetMethod;

/// Chunk counts and refinement bookkeeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PassSummary {
    pub pass1_chunks: usize,
    pub pass2_chunks: usize,
    pub refinement: Option<RefinementDecision>,
    pub target_regions: Vec<TargetRegion>,
}

/// Complete result for one master/dub pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub generated_at: DateTime<Utc>,
    pub sample_rate: u32,
    pub master_duration: f64,
    pub dub_duration: f64,
    /// `None` only when the run was cancelled before any method finished.
    pub consensus: Option<ConsensusResult>,
    /// One estimate per whole-stream method that succeeded.
    pub method_estimates: Vec<OffsetEstimate>,
    /// Confidence-weighted timeline offset.
    pub weighted_offset: Option<f64>,
    pub overall_confidence: f64,
    pub drift: DriftReport,
    pub timeline: Timeline,
    pub global_alignment: GlobalAlignment,
    pub verification: VerificationReport,
    pub passes: PassSummary,
    pub cancelled: bool,
}

impl AnalysisReport {
    /// Final offset in seconds (dub minus master).
    pub fn offset_seconds(&self) -> Option<f64> {
        self.consensus.as_ref().map(|c| c.offset_seconds)
    }

    pub fn needs_verification(&self) -> bool {
        self.verification.needs_verification
    }
}

/// Offset analyzer.
///
/// Built once from settings and a resolved [`Device`]; every call runs the
/// full pipeline for one pair (or one master and several dubs).
pub struct OffsetAnalyzer {
    multipass: MultiPassConfig,
    alignment: GlobalAlignmentConfig,
    consensus: ConsensusConfig,
    verifier: SmartVerifier,
    requested_methods: Vec<OffsetMethod>,
    /// Span analyzed by the whole-stream methods.
    whole_stream_seconds: f64,
    device: Device,
}

impl OffsetAnalyzer {
    /// Create an analyzer from settings.
    pub fn new(settings: &Settings, device: Device) -> Self {
        Self {
            multipass: settings.multipass_config(),
            alignment: settings.alignment_config(),
            consensus: settings.consensus_config(),
            verifier: SmartVerifier::new(settings.verification_config()),
            requested_methods: settings.analysis.requested_methods.clone(),
            whole_stream_seconds: settings.analysis.whole_stream_seconds,
            device,
        }
    }

    /// Restrict consensus to the given methods (empty = automatic).
    pub fn with_requested_methods(mut self, methods: Vec<OffsetMethod>) -> Self {
        self.requested_methods = methods;
        self
    }

    /// Analyze one master/dub pair.
    pub fn analyze(
        &self,
        master: &AudioSignal,
        dub: &AudioSignal,
        cancel: &CancelHandle,
    ) -> AnalysisResult<AnalysisReport> {
        let mut report = self.analyze_component(master, dub, cancel)?;
        report.verification = self.verify(&report, master, dub, &[], false);
        Ok(report)
    }

    /// Analyze two media paths decoded by `ingest`.
    ///
    /// The dub is decoded at the master's sample rate.
    pub fn analyze_files(
        &self,
        master_path: &Path,
        dub_path: &Path,
        ingest: &dyn AudioIngest,
        cancel: &CancelHandle,
    ) -> AnalysisResult<AnalysisReport> {
        tracing::info!(
            "Loading master {} and dub {}",
            master_path.display(),
            dub_path.display()
        );
        let master = ingest.load(master_path, None)?;
        let dub = ingest.load(dub_path, Some(master.sample_rate()))?;
        self.analyze(&master, &dub, cancel)
    }

    /// Analyze several dub components against one master.
    ///
    /// Each report is verified with the other components' offsets as
    /// siblings. Cancellation stops after the component in progress.
    pub fn analyze_batch(
        &self,
        master: &AudioSignal,
        dubs: &[AudioSignal],
        cancel: &CancelHandle,
    ) -> AnalysisResult<Vec<AnalysisReport>> {
        let mut reports = Vec::with_capacity(dubs.len());
        for (i, dub) in dubs.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!("Batch cancelled after {} of {} components", i, dubs.len());
                break;
            }
            tracing::info!("Batch component {}/{}", i + 1, dubs.len());
            reports.push(self.analyze_component(master, dub, cancel)?);
        }

        let offsets: Vec<Option<f64>> = reports.iter().map(|r| r.offset_seconds()).collect();
        for (i, report) in reports.iter_mut().enumerate() {
            let siblings: Vec<f64> = offsets
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .filter_map(|(_, o)| *o)
                .collect();
            report.verification = self.verify(report, master, &dubs[i], &siblings, i == 0);
        }
        Ok(reports)
    }

    /// Everything except verification.
    fn analyze_component(
        &self,
        master: &AudioSignal,
        dub: &AudioSignal,
        cancel: &CancelHandle,
    ) -> AnalysisResult<AnalysisReport> {
        validate_inputs(master, dub)?;
        let master_duration = master.duration_secs();
        let dub_duration = dub.duration_secs();
        tracing::info!(
            "Analyzing master {:.2}s vs dub {:.2}s at {} Hz",
            master_duration,
            dub_duration,
            dub.sample_rate()
        );

        let alignment = if self.alignment.should_trigger(master_duration, dub_duration) {
            global_alignment(master, dub, &self.alignment)
        } else {
            GlobalAlignment::default()
        };

        let pool = self.device.thread_pool()?;
        let chunk_analyzer =
            ChunkAnalyzer::new(master, dub, &alignment, self.multipass.estimator.clone());
        let state = MultiPassController::new(&chunk_analyzer, &self.multipass, &pool, cancel)
            .run(MultiPassState::new())?;

        let cancelled = state.cancelled || cancel.is_cancelled();
        let timeline_raw = timeline_estimate(
            &state,
            dub.sample_rate(),
            self.multipass.drift.confidence_threshold,
        );
        let mut method_estimates = Vec::new();
        if !cancelled {
            let methods: Vec<OffsetMethod> = OffsetMethod::all()
                .iter()
                .copied()
                .filter(|&m| m != OffsetMethod::RawCorrelation || timeline_raw.is_none())
                .collect();
            method_estimates = self.whole_stream_estimates(&chunk_analyzer, master, dub, &methods);
        }
        method_estimates.extend(timeline_raw);
        method_estimates.sort_by_key(|e| e.method);

        let consensus = match resolve(&method_estimates, &self.requested_methods, &self.consensus) {
            Ok(result) => Some(result),
            Err(e) if cancelled => {
                tracing::warn!("No consensus after cancellation: {}", e);
                None
            }
            Err(e) => return Err(e),
        };

        Ok(AnalysisReport {
            generated_at: Utc::now(),
            sample_rate: dub.sample_rate(),
            master_duration,
            dub_duration,
            consensus,
            method_estimates,
            weighted_offset: state.weighted_offset,
            overall_confidence: state.overall_confidence,
            drift: state.drift.clone().unwrap_or_default(),
            passes: PassSummary {
                pass1_chunks: state.pass1.len(),
                pass2_chunks: state.pass2.len(),
                refinement: state.decision.clone(),
                target_regions: state.target_regions.clone(),
            },
            timeline: state.timeline,
            global_alignment: alignment,
            verification: VerificationReport::default(),
            cancelled,
        })
    }

    /// `methods` over a bounded span at the start of the analysis region.
    ///
    /// Raw correlation only runs here when the timeline has no baseline.
    fn whole_stream_estimates(
        &self,
        chunk_analyzer: &ChunkAnalyzer<'_>,
        master: &AudioSignal,
        dub: &AudioSignal,
        methods: &[OffsetMethod],
    ) -> Vec<OffsetEstimate> {
        let sample_rate = dub.sample_rate();
        let (start, end) = chunk_analyzer.analysis_region();
        let span = (end - start).min(self.whole_stream_seconds).max(0.0);
        let dub_start = dub.seconds_to_samples(start);
        let len = (span * sample_rate as f64).round() as usize;

        let (master_start, dub_start) = chunk_analyzer.addressing(dub_start).starts();
        let master_win = master.window_samples(master_start, len);
        let dub_win = dub.window_samples(dub_start, len);
        let base = dub_win.start_sample() as i64 - master_win.start_sample() as i64;

        let extractor = FeatureExtractor::with_hop(sample_rate, frame_size(sample_rate) / 8);
        let master_features = extractor.extract(&master_win);
        let dub_features = extractor.extract(&dub_win);
        let input = MethodInput {
            master: master_win,
            dub: dub_win,
            master_features: &master_features,
            dub_features: &dub_features,
        };

        selected_methods(methods)
            .iter()
            .filter_map(|implementation| {
                match implementation.estimate(&input) {
                    Ok(estimate) => {
                        let estimate = estimate.shifted(base);
                        tracing::info!(
                            "{}: {:+.4}s (confidence {:.3})",
                            implementation.name(),
                            estimate.precise_seconds(),
                            estimate.confidence
                        );
                        Some(estimate)
                    }
                    Err(e) => {
                        tracing::warn!("{} failed: {}", implementation.name(), e);
                        None
                    }
                }
            })
            .collect()
    }

    fn verify(
        &self,
        report: &AnalysisReport,
        master: &AudioSignal,
        dub: &AudioSignal,
        siblings: &[f64],
        first_in_batch: bool,
    ) -> VerificationReport {
        let Some(consensus) = &report.consensus else {
            return VerificationReport::default();
        };
        let input = VerificationInput {
            offset_seconds: consensus.offset_seconds,
            confidence: consensus.confidence,
            master_duration: report.master_duration,
            dub_duration: report.dub_duration,
            sibling_offsets: siblings.to_vec(),
            first_in_batch,
        };
        self.verifier.verify(&input, master, dub)
    }
}

fn validate_inputs(master: &AudioSignal, dub: &AudioSignal) -> AnalysisResult<()> {
    if master.is_empty() || dub.is_empty() {
        return Err(AnalysisError::InvalidInput("empty audio stream".to_string()));
    }
    if master.sample_rate() == 0 {
        return Err(AnalysisError::InvalidInput("sample rate is zero".to_string()));
    }
    if master.sample_rate() != dub.sample_rate() {
        return Err(AnalysisError::SampleRateMismatch {
            master: master.sample_rate(),
            dub: dub.sample_rate(),
        });
    }
    Ok(())
}

/// Raw-correlation entry from the chunk timeline baseline.
///
/// Confidence is the overall chunk confidence. The correlation peak is the
/// mean peak of the reliable chunks, falling back to every measured chunk.
fn timeline_estimate(
    state: &MultiPassState,
    sample_rate: u32,
    confidence_threshold: f64,
) -> Option<OffsetEstimate> {
    let offset = state.weighted_offset?;
    let exact = offset * sample_rate as f64;
    let whole = exact.round();

    let peaks = |reliable_only: bool| -> Vec<f64> {
        state
            .timeline
            .iter()
            .filter(|r| !reliable_only || r.is_reliable(confidence_threshold))
            .filter_map(|r| r.estimate.as_ref().map(|e| e.correlation_peak))
            .collect()
    };
    let mut chosen = peaks(true);
    if chosen.is_empty() {
        chosen = peaks(false);
    }
    let correlation_peak = if chosen.is_empty() {
        0.0
    } else {
        chosen.iter().sum::<f64>() / chosen.len() as f64
    };

    Some(
        OffsetEstimate::new(
            OffsetMethod::RawCorrelation,
            whole as i64,
            sample_rate,
            correlation_peak,
            state.overall_confidence,
        )
        .with_sub_sample(exact - whole),
    )
}
