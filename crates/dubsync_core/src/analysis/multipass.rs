//! Multi-pass chunk analysis.
//!
//! [`ChunkAnalyzer`] runs the per-chunk pipeline (features, classification,
//! offset estimation, confidence). [`MultiPassController`] drives it through
//! an explicit state machine:
//!
//! ```text
//! Pass1Coarse -> Decide -> (Pass2Refine) -> Combine -> Done
//! ```
//!
//! The whole state lives in a serializable [`MultiPassState`], so a caller
//! can step through the transitions one at a time or inspect a finished run.

use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::alignment::GlobalAlignment;
use super::chunks::{plan_region, ChunkConfig};
use super::classify::classify;
use super::confidence::{feature_similarity, score_chunk};
use super::correlation::{Addressing, EstimatorConfig, OffsetEstimator};
use super::drift_detection::{analyze_drift, DriftConfig, DriftReport};
use super::features::FeatureExtractor;
use super::types::{AnalysisError, AnalysisResult, AudioSignal, Chunk, ChunkResult, Timeline};
use crate::cancel::CancelHandle;
use crate::models::{BaselineSource, QualityLabel};

/// Settings for both passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiPassConfig {
    /// Pass-1 chunk planning.
    pub chunks: ChunkConfig,
    pub refinement_enabled: bool,
    /// Pass-2 window length in seconds.
    pub refinement_chunk_size: f64,
    /// Pass-2 window overlap.
    pub refinement_overlap: f64,
    /// Upper bound on pass-2 chunks per region.
    pub refinement_max_chunks: usize,
    /// Refine when more than this share of chunks is under threshold.
    pub max_low_confidence_share: f64,
    /// Refine when fewer than this share of chunks is Good or Excellent.
    pub min_good_share: f64,
    /// Target regions closer than this are merged (s).
    pub region_merge_gap: f64,
    pub estimator: EstimatorConfig,
    pub drift: DriftConfig,
}

impl Default for MultiPassConfig {
    fn default() -> Self {
        Self {
            chunks: ChunkConfig::default(),
            refinement_enabled: true,
            refinement_chunk_size: 10.0,
            refinement_overlap: 0.5,
            refinement_max_chunks: 20,
            max_low_confidence_share: 0.3,
            min_good_share: 0.7,
            region_merge_gap: 5.0,
            estimator: EstimatorConfig::default(),
            drift: DriftConfig::default(),
        }
    }
}

/// Runs the per-chunk pipeline for one master/dub pair.
pub struct ChunkAnalyzer<'a> {
    master: &'a AudioSignal,
    dub: &'a AudioSignal,
    /// Accepted global offset in samples.
    global_offset: Option<i64>,
    extractor: FeatureExtractor,
    estimator: OffsetEstimator,
}

impl<'a> ChunkAnalyzer<'a> {
    pub fn new(
        master: &'a AudioSignal,
        dub: &'a AudioSignal,
        alignment: &GlobalAlignment,
        estimator: EstimatorConfig,
    ) -> Self {
        Self {
            master,
            dub,
            global_offset: alignment.accepted.then_some(alignment.offset_samples),
            extractor: FeatureExtractor::new(dub.sample_rate()),
            estimator: OffsetEstimator::new(estimator),
        }
    }

    /// Region on the dub timeline where both streams have material.
    pub fn analysis_region(&self) -> (f64, f64) {
        let master_dur = self.master.duration_secs();
        let dub_dur = self.dub.duration_secs();
        match self.global_offset {
            Some(offset) => {
                let g = offset as f64 / self.dub.sample_rate().max(1) as f64;
                (g.max(0.0), dub_dur.min(master_dur + g))
            }
            None => (0.0, master_dur.min(dub_dur)),
        }
    }

    /// Window addressing for a dub position, aligned when a global offset was accepted.
    pub fn addressing(&self, dub_start: i64) -> Addressing {
        match self.global_offset {
            Some(global_offset) => Addressing::Aligned {
                dub_start,
                global_offset,
            },
            None => Addressing::Direct {
                master_start: dub_start,
                dub_start,
            },
        }
    }

    /// Analyze one chunk. Never fails; problems become a failed result.
    pub fn analyze(&self, chunk: Chunk) -> ChunkResult {
        let sample_rate = self.dub.sample_rate() as f64;
        let dub_start = (chunk.start_time * sample_rate).round() as i64;
        let len = (chunk.duration() * sample_rate).round().max(0.0) as usize;
        let addressing = self.addressing(dub_start);
        let (master_start, dub_start) = addressing.starts();

        let master_win = self.master.window_samples(master_start, len);
        let dub_win = self.dub.window_samples(dub_start, len);
        let master_features = self.extractor.extract(&master_win);
        let dub_features = self.extractor.extract(&dub_win);
        let master_class = classify(&master_features);
        let dub_class = classify(&dub_features);

        if master_class.is_silence() && dub_class.is_silence() {
            tracing::debug!("Chunk {} ({:.1}s): both sides silent, skipped", chunk.index, chunk.start_time);
            return ChunkResult {
                chunk,
                estimate: None,
                master_class,
                dub_class,
                quality: QualityLabel::Skipped,
                confidence: 0.0,
                similarity: 0.0,
                failure: None,
            };
        }

        let estimate = match self
            .estimator
            .estimate_at(self.master, self.dub, addressing, len)
        {
            Ok(estimate) => estimate,
            Err(e) => {
                tracing::warn!("Chunk {} ({:.1}s) failed: {}", chunk.index, chunk.start_time, e);
                return ChunkResult {
                    master_class,
                    dub_class,
                    ..ChunkResult::failed(chunk, e.to_string())
                };
            }
        };

        let base = dub_win.start_sample() as i64 - master_win.start_sample() as i64;
        let hop = master_features.hop_length.max(1) as f64;
        let lag_frames = ((estimate.offset_samples - base) as f64 / hop).round() as i64;
        let hints = master_class.weight_hints.blend(&dub_class.weight_hints);
        let similarity = feature_similarity(&master_features, &dub_features, &hints, lag_frames);
        let score = score_chunk(&estimate, &master_class, &dub_class, similarity);

        tracing::debug!(
            "Chunk {} ({:.1}s, pass {}): {:+.4}s conf={:.3} sim={:.3} {}",
            chunk.index,
            chunk.start_time,
            chunk.pass_number,
            estimate.precise_seconds(),
            score.ensemble,
            similarity,
            score.quality
        );

        ChunkResult {
            chunk,
            estimate: Some(estimate),
            master_class,
            dub_class,
            quality: score.quality,
            confidence: score.ensemble,
            similarity,
            failure: None,
        }
    }
}

/// Controller phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiPassPhase {
    #[default]
    Pass1Coarse,
    Decide,
    Pass2Refine,
    Combine,
    Done,
}

/// Why (or why not) pass 2 ran.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefinementDecision {
    pub needed: bool,
    pub has_drift: bool,
    /// Share of pass-1 chunks under the confidence threshold.
    pub low_confidence_share: f64,
    /// Share of pass-1 chunks rated Good or Excellent.
    pub good_share: f64,
}

/// Time range selected for targeted refinement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetRegion {
    pub start: f64,
    pub end: f64,
}

/// Complete controller state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiPassState {
    pub phase: MultiPassPhase,
    pub pass1: Timeline,
    pub pass2: Timeline,
    pub decision: Option<RefinementDecision>,
    pub target_regions: Vec<TargetRegion>,
    /// Union of both passes, filled by Combine.
    pub timeline: Timeline,
    pub drift: Option<DriftReport>,
    /// Drift baseline of the combined timeline.
    pub weighted_offset: Option<f64>,
    pub overall_confidence: f64,
    pub cancelled: bool,
}

impl MultiPassState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.phase == MultiPassPhase::Done
    }
}

/// Drives the chunk pipeline through both passes.
pub struct MultiPassController<'a> {
    analyzer: &'a ChunkAnalyzer<'a>,
    config: &'a MultiPassConfig,
    pool: &'a rayon::ThreadPool,
    cancel: &'a CancelHandle,
}

impl<'a> MultiPassController<'a> {
    pub fn new(
        analyzer: &'a ChunkAnalyzer<'a>,
        config: &'a MultiPassConfig,
        pool: &'a rayon::ThreadPool,
        cancel: &'a CancelHandle,
    ) -> Self {
        Self {
            analyzer,
            config,
            pool,
            cancel,
        }
    }

    /// Run from `state` until Done.
    pub fn run(&self, mut state: MultiPassState) -> AnalysisResult<MultiPassState> {
        while !state.is_done() {
            self.step(&mut state)?;
        }
        Ok(state)
    }

    /// Advance one transition.
    pub fn step(&self, state: &mut MultiPassState) -> AnalysisResult<()> {
        match state.phase {
            MultiPassPhase::Pass1Coarse => self.pass1(state),
            MultiPassPhase::Decide => self.decide(state),
            MultiPassPhase::Pass2Refine => self.pass2(state),
            MultiPassPhase::Combine => return self.combine(state),
            MultiPassPhase::Done => {}
        }
        Ok(())
    }

    fn pass1(&self, state: &mut MultiPassState) {
        let (start, end) = self.analyzer.analysis_region();
        let chunks = plan_region(
            start,
            end,
            self.config.chunks.chunk_size,
            self.config.chunks.overlap_ratio,
            self.config.chunks.max_chunks,
            1,
        );
        tracing::info!(
            "Pass 1: {} chunks of {:.1}s over {:.1}-{:.1}s",
            chunks.len(),
            self.config.chunks.chunk_size,
            start,
            end
        );

        state.pass1 = Timeline::from_results(self.run_chunks(&chunks));
        state.phase = if self.check_cancel(state) {
            MultiPassPhase::Combine
        } else {
            MultiPassPhase::Decide
        };
    }

    fn decide(&self, state: &mut MultiPassState) {
        let drift = analyze_drift(&state.pass1, &self.config.drift);
        let decision = decide_refinement(&state.pass1, &drift, self.config);

        if decision.needed {
            state.target_regions = target_regions(
                &state.pass1,
                self.config.drift.confidence_threshold,
                self.config.region_merge_gap,
            );
        }
        tracing::info!(
            "Refinement {}: drift={} low_conf={:.0}% good={:.0}% regions={}",
            if decision.needed { "needed" } else { "not needed" },
            decision.has_drift,
            decision.low_confidence_share * 100.0,
            decision.good_share * 100.0,
            state.target_regions.len()
        );

        state.phase = if decision.needed && !state.target_regions.is_empty() {
            MultiPassPhase::Pass2Refine
        } else {
            MultiPassPhase::Combine
        };
        state.decision = Some(decision);
    }

    fn pass2(&self, state: &mut MultiPassState) {
        if self.check_cancel(state) {
            state.phase = MultiPassPhase::Combine;
            return;
        }

        let mut next_index = state
            .pass1
            .iter()
            .map(|r| r.chunk.index + 1)
            .max()
            .unwrap_or(0);
        let mut chunks = Vec::new();
        for region in &state.target_regions {
            for mut chunk in plan_region(
                region.start,
                region.end,
                self.config.refinement_chunk_size,
                self.config.refinement_overlap,
                self.config.refinement_max_chunks,
                2,
            ) {
                chunk.index = next_index;
                next_index += 1;
                chunks.push(chunk);
            }
        }
        tracing::info!(
            "Pass 2: {} chunks of {:.1}s in {} regions",
            chunks.len(),
            self.config.refinement_chunk_size,
            state.target_regions.len()
        );

        state.pass2 = Timeline::from_results(self.run_chunks(&chunks));
        self.check_cancel(state);
        state.phase = MultiPassPhase::Combine;
    }

    fn combine(&self, state: &mut MultiPassState) -> AnalysisResult<()> {
        state.timeline = state
            .pass1
            .clone()
            .merge(state.pass2.chunks().iter().cloned());

        if state.timeline.measured_count() == 0 && !state.cancelled {
            return Err(AnalysisError::NoUsableChunks {
                attempted: state.timeline.len(),
            });
        }

        let drift = analyze_drift(&state.timeline, &self.config.drift);
        state.weighted_offset =
            (drift.baseline_source != BaselineSource::Empty).then_some(drift.baseline_offset);
        state.overall_confidence =
            overall_confidence(&state.timeline, self.config.drift.confidence_threshold);

        tracing::info!(
            "Combined {} chunks (pass 1: {}, pass 2: {}): offset {:?}, confidence {:.3}{}",
            state.timeline.len(),
            state.pass1.len(),
            state.pass2.len(),
            state.weighted_offset,
            state.overall_confidence,
            if state.cancelled { " [cancelled]" } else { "" }
        );

        state.drift = Some(drift);
        state.phase = MultiPassPhase::Done;
        Ok(())
    }

    /// Analyze chunks on the pool. A pass completes before this returns.
    fn run_chunks(&self, chunks: &[Chunk]) -> Vec<ChunkResult> {
        let results = Mutex::new(Vec::with_capacity(chunks.len()));
        self.pool.install(|| {
            chunks.par_iter().for_each(|&chunk| {
                if self.cancel.is_cancelled() {
                    return;
                }
                let result = self.analyzer.analyze(chunk);
                results.lock().push(result);
            });
        });
        results.into_inner()
    }

    fn check_cancel(&self, state: &mut MultiPassState) -> bool {
        if self.cancel.is_cancelled() && !state.cancelled {
            tracing::warn!("Analysis cancelled, keeping partial timeline");
            state.cancelled = true;
        }
        state.cancelled
    }
}

/// Pass 2 runs on drift, too many weak chunks or too few good ones.
pub fn decide_refinement(
    timeline: &Timeline,
    drift: &DriftReport,
    config: &MultiPassConfig,
) -> RefinementDecision {
    let total = timeline.len();
    if total == 0 {
        return RefinementDecision::default();
    }
    let low = timeline
        .iter()
        .filter(|r| r.confidence < config.drift.confidence_threshold)
        .count();
    let good = timeline.iter().filter(|r| r.quality.is_good()).count();
    let low_confidence_share = low as f64 / total as f64;
    let good_share = good as f64 / total as f64;

    RefinementDecision {
        needed: config.refinement_enabled
            && (drift.has_drift
                || low_confidence_share > config.max_low_confidence_share
                || good_share < config.min_good_share),
        has_drift: drift.has_drift,
        low_confidence_share,
        good_share,
    }
}

/// Weak chunks widened by one neighbour each side, merged across small gaps.
///
/// Skipped (silent) chunks are not targeted.
pub fn target_regions(timeline: &Timeline, confidence_threshold: f64, merge_gap: f64) -> Vec<TargetRegion> {
    let chunks = timeline.chunks();
    let mut regions: Vec<TargetRegion> = chunks
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            r.quality != QualityLabel::Skipped
                && (r.confidence < confidence_threshold || r.quality == QualityLabel::Poor)
        })
        .map(|(i, r)| {
            let before = i.checked_sub(1).map(|j| &chunks[j]).unwrap_or(r);
            let after = chunks.get(i + 1).unwrap_or(r);
            TargetRegion {
                start: before.chunk.start_time.min(r.chunk.start_time),
                end: after.chunk.end_time.max(r.chunk.end_time),
            }
        })
        .collect();
    regions.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut merged: Vec<TargetRegion> = Vec::with_capacity(regions.len());
    for region in regions {
        match merged.last_mut() {
            Some(last) if region.start - last.end <= merge_gap => {
                last.end = last.end.max(region.end);
            }
            _ => merged.push(region),
        }
    }
    merged
}

/// Mean confidence of reliable chunks, else of every measured chunk.
fn overall_confidence(timeline: &Timeline, threshold: f64) -> f64 {
    let mean = |values: Vec<f64>| -> Option<f64> {
        (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
    };
    mean(
        timeline
            .iter()
            .filter(|r| r.is_reliable(threshold))
            .map(|r| r.confidence)
            .collect(),
    )
    .or_else(|| {
        mean(
            timeline
                .iter()
                .filter(|r| !r.is_failed())
                .map(|r| r.confidence)
                .collect(),
        )
    })
    .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::{bursty_noise, delayed, measured_chunk, mix, noise};
    use crate::device::Device;

    const SR: u32 = 8000;

    fn pair(seconds: usize, delay: usize) -> (AudioSignal, AudioSignal) {
        let master = bursty_noise(seconds * SR as usize, SR, 5);
        let dub = mix(&delayed(&master, delay), &noise(master.len(), 77, 0.01));
        (AudioSignal::new(master, SR), AudioSignal::new(dub, SR))
    }

    fn config(chunk_size: f64, max_chunks: usize) -> MultiPassConfig {
        MultiPassConfig {
            chunks: ChunkConfig {
                chunk_size,
                max_chunks,
                ..ChunkConfig::default()
            },
            ..MultiPassConfig::default()
        }
    }

    #[test]
    fn chunk_analyzer_measures_delay() {
        let (master, dub) = pair(10, 800);
        let analyzer = ChunkAnalyzer::new(&master, &dub, &GlobalAlignment::default(), EstimatorConfig::default());
        let result = analyzer.analyze(Chunk {
            index: 0,
            start_time: 0.0,
            end_time: 10.0,
            pass_number: 1,
        });
        assert!(!result.is_failed());
        assert_eq!(result.estimate.as_ref().unwrap().offset_samples, 800);
        assert!(result.confidence > 0.5, "confidence was {}", result.confidence);
    }

    #[test]
    fn silent_chunk_is_skipped() {
        let master = AudioSignal::new(vec![0.0; 4 * SR as usize], SR);
        let dub = AudioSignal::new(vec![0.0; 4 * SR as usize], SR);
        let analyzer = ChunkAnalyzer::new(&master, &dub, &GlobalAlignment::default(), EstimatorConfig::default());
        let result = analyzer.analyze(Chunk {
            index: 0,
            start_time: 0.0,
            end_time: 2.0,
            pass_number: 1,
        });
        assert_eq!(result.quality, QualityLabel::Skipped);
        assert!(result.estimate.is_none());
        assert!(result.failure.is_none());
    }

    #[test]
    fn aligned_region_follows_global_offset() {
        let master = AudioSignal::new(vec![0.1; 100 * SR as usize], SR);
        let dub = AudioSignal::new(vec![0.1; 40 * SR as usize], SR);
        let alignment = GlobalAlignment {
            triggered: true,
            accepted: true,
            offset_seconds: -30.0,
            offset_samples: -30 * SR as i64,
            ..GlobalAlignment::default()
        };
        let analyzer = ChunkAnalyzer::new(&master, &dub, &alignment, EstimatorConfig::default());
        assert_eq!(analyzer.analysis_region(), (0.0, 40.0));

        let direct = ChunkAnalyzer::new(&master, &dub, &GlobalAlignment::default(), EstimatorConfig::default());
        assert_eq!(direct.analysis_region(), (0.0, 40.0));
    }

    #[test]
    fn controller_runs_to_done() {
        let (master, dub) = pair(20, 800);
        let analyzer = ChunkAnalyzer::new(&master, &dub, &GlobalAlignment::default(), EstimatorConfig::default());
        let config = config(10.0, 2);
        let pool = Device::resolve(2).thread_pool().unwrap();
        let cancel = CancelHandle::new();
        let controller = MultiPassController::new(&analyzer, &config, &pool, &cancel);

        let mut state = MultiPassState::new();
        controller.step(&mut state).unwrap();
        assert_eq!(state.phase, MultiPassPhase::Decide);
        assert_eq!(state.pass1.len(), 2);

        let state = controller.run(state).unwrap();
        assert!(state.is_done());
        assert!(!state.cancelled);
        let offset = state.weighted_offset.unwrap();
        assert!((offset - 0.1).abs() < 0.001, "offset was {}", offset);
        assert!(state.drift.is_some());
        assert!(state.timeline.len() >= 2);
    }

    #[test]
    fn cancelled_run_keeps_partial_state() {
        let (master, dub) = pair(20, 800);
        let analyzer = ChunkAnalyzer::new(&master, &dub, &GlobalAlignment::default(), EstimatorConfig::default());
        let config = config(10.0, 2);
        let pool = Device::single_threaded().thread_pool().unwrap();
        let cancel = CancelHandle::new();
        cancel.cancel();

        let state = MultiPassController::new(&analyzer, &config, &pool, &cancel)
            .run(MultiPassState::new())
            .unwrap();
        assert!(state.cancelled);
        assert!(state.timeline.is_empty());
        assert_eq!(state.weighted_offset, None);
    }

    #[test]
    fn all_silent_is_an_error() {
        let master = AudioSignal::new(vec![0.0; 20 * SR as usize], SR);
        let dub = AudioSignal::new(vec![0.0; 20 * SR as usize], SR);
        let analyzer = ChunkAnalyzer::new(&master, &dub, &GlobalAlignment::default(), EstimatorConfig::default());
        let config = config(10.0, 2);
        let pool = Device::single_threaded().thread_pool().unwrap();
        let cancel = CancelHandle::new();

        let err = MultiPassController::new(&analyzer, &config, &pool, &cancel)
            .run(MultiPassState::new())
            .unwrap_err();
        assert!(matches!(err, AnalysisError::NoUsableChunks { attempted: 2 }));
    }

    #[test]
    fn weak_chunks_trigger_refinement() {
        let timeline = Timeline::from_results(vec![
            measured_chunk(0, 0.0, 30.0, 0.25, 0.9, QualityLabel::Excellent),
            measured_chunk(1, 9.0, 39.0, 0.25, 0.2, QualityLabel::Poor),
            measured_chunk(2, 18.0, 48.0, 0.25, 0.9, QualityLabel::Excellent),
        ]);
        let drift = analyze_drift(&timeline, &DriftConfig::default());
        let decision = decide_refinement(&timeline, &drift, &MultiPassConfig::default());
        assert!(decision.needed);
        assert!(!decision.has_drift);
        assert!((decision.low_confidence_share - 1.0 / 3.0).abs() < 1e-12);

        let disabled = MultiPassConfig {
            refinement_enabled: false,
            ..MultiPassConfig::default()
        };
        assert!(!decide_refinement(&timeline, &drift, &disabled).needed);
    }

    #[test]
    fn strong_chunks_skip_refinement() {
        let timeline = Timeline::from_results(vec![
            measured_chunk(0, 0.0, 30.0, 0.25, 0.9, QualityLabel::Excellent),
            measured_chunk(1, 30.0, 60.0, 0.25, 0.85, QualityLabel::Good),
        ]);
        let drift = analyze_drift(&timeline, &DriftConfig::default());
        assert!(!decide_refinement(&timeline, &drift, &MultiPassConfig::default()).needed);
    }

    #[test]
    fn target_regions_expand_and_merge() {
        let results: Vec<ChunkResult> = (0..10)
            .map(|i| {
                let start = i as f64 * 10.0;
                let confidence = if i == 2 || i == 4 || i == 8 { 0.1 } else { 0.9 };
                measured_chunk(i, start, start + 10.0, 0.0, confidence, QualityLabel::Good)
            })
            .collect();
        let regions = target_regions(&Timeline::from_results(results), 0.5, 5.0);
        assert_eq!(
            regions,
            vec![
                TargetRegion { start: 10.0, end: 60.0 },
                TargetRegion { start: 70.0, end: 100.0 },
            ]
        );
    }

    #[test]
    fn state_serializes() {
        let json = serde_json::to_string(&MultiPassState::new()).unwrap();
        assert!(json.contains("\"phase\":\"pass1_coarse\""));
    }
}
