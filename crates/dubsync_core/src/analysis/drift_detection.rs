//! Drift detection across the chunk timeline.
//!
//! Turns a [`Timeline`] into a [`DriftReport`]:
//! - baseline offset (confidence-weighted lower median of reliable chunks,
//!   with single-chunk and whole-timeline fallbacks)
//! - drift magnitude and the chunks that deviate from the baseline
//! - localized events: clusters of same-sign deviations classified as
//!   extra content, missing content or drift
//! - overall pattern: uniform, linear drift or stepping
//!
//! All functions are pure - no I/O, no side effects.

use serde::{Deserialize, Serialize};

use super::types::{ChunkResult, Timeline};
use crate::models::{BaselineSource, DriftPattern, EventClassification};

/// Thresholds for localized event detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalizedEventConfig {
    /// Minimum |deviation| from baseline for a chunk to join a cluster (s).
    pub min_delta: f64,
    /// Maximum gap between consecutive cluster members (s).
    pub max_gap: f64,
    /// Minimum event duration unless the high-confidence rule applies (s).
    pub min_duration: f64,
    /// Minimum members per event.
    pub min_segments: usize,
    /// Chunks further than this from the baseline are outliers (s).
    pub outlier_limit: f64,
    /// Mean confidence that lets a short event with 3+ members through.
    pub high_confidence: f64,
    /// Minimum |slope| (s/s) for a cluster to count as drift.
    pub drift_min_slope: f64,
    /// Minimum R^2 for a cluster to count as drift.
    pub drift_min_r_squared: f64,
}

impl Default for LocalizedEventConfig {
    fn default() -> Self {
        Self {
            min_delta: 0.5,
            max_gap: 30.0,
            min_duration: 45.0,
            min_segments: 2,
            outlier_limit: 10.0,
            high_confidence: 0.8,
            drift_min_slope: 0.01,
            drift_min_r_squared: 0.7,
        }
    }
}

/// Configuration for drift analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    /// Minimum ensemble confidence for a reliable chunk.
    pub confidence_threshold: f64,
    /// Drift magnitude above which `has_drift` is set (s).
    pub significance_threshold: f64,
    /// Deviation from baseline that puts a chunk into `drift_regions` (s).
    pub region_deviation: f64,
    /// Minimum |slope| (s/s) for a linear pattern.
    pub linear_min_slope: f64,
    /// Minimum R^2 for a linear pattern.
    pub linear_min_r_squared: f64,
    /// DBSCAN epsilon for stepping detection (s).
    pub dbscan_epsilon: f64,
    /// DBSCAN minimum samples per cluster.
    pub dbscan_min_samples: usize,
    pub events: LocalizedEventConfig,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            significance_threshold: 0.1,
            region_deviation: 0.05,
            linear_min_slope: 0.001,
            linear_min_r_squared: 0.7,
            dbscan_epsilon: 0.05,
            dbscan_min_samples: 2,
            events: LocalizedEventConfig::default(),
        }
    }
}

/// A reliable chunk that deviates from the baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftRegion {
    pub chunk_index: usize,
    pub pass_number: u8,
    pub start: f64,
    pub end: f64,
    pub offset: f64,
    /// Offset minus baseline.
    pub deviation: f64,
}

/// Cluster of chunks that share a deviation from the baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalizedEvent {
    pub start: f64,
    pub end: f64,
    pub classification: EventClassification,
    pub avg_offset: f64,
    pub delta_from_baseline: f64,
    pub segment_count: usize,
    /// Mean ensemble confidence of the members.
    pub confidence: f64,
}

/// Drift analysis result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriftReport {
    pub has_drift: bool,
    /// Max minus min reliable offset (s).
    pub drift_magnitude: f64,
    pub baseline_offset: f64,
    pub baseline_source: BaselineSource,
    /// Baseline did not come from two or more reliable chunks.
    pub low_quality: bool,
    pub reliable_chunks: usize,
    pub drift_regions: Vec<DriftRegion>,
    pub localized_events: Vec<LocalizedEvent>,
    pub pattern: DriftPattern,
    /// Linear fit slope over reliable chunks (s/s).
    pub drift_rate: Option<f64>,
    pub r_squared: Option<f64>,
}

/// Analyze the timeline for drift.
pub fn analyze_drift(timeline: &Timeline, config: &DriftConfig) -> DriftReport {
    let reliable: Vec<&ChunkResult> = timeline
        .iter()
        .filter(|r| r.is_reliable(config.confidence_threshold))
        .collect();

    let (baseline_offset, baseline_source) = match reliable.len() {
        0 => {
            let measured: Vec<&ChunkResult> = timeline.iter().filter(|r| !r.is_failed()).collect();
            if measured.is_empty() {
                (0.0, BaselineSource::Empty)
            } else {
                (weighted_median_of(&measured), BaselineSource::FullTimeline)
            }
        }
        1 => (reliable[0].offset_seconds(), BaselineSource::SingleChunk),
        _ => (weighted_median_of(&reliable), BaselineSource::WeightedMedian),
    };
    let low_quality = baseline_source != BaselineSource::WeightedMedian;
    if low_quality {
        tracing::warn!(
            "Drift baseline from {:?} ({} reliable chunks)",
            baseline_source,
            reliable.len()
        );
    }

    let offsets: Vec<f64> = reliable.iter().map(|r| r.offset_seconds()).collect();
    let drift_magnitude = if offsets.len() >= 2 {
        let max = offsets.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min = offsets.iter().cloned().fold(f64::INFINITY, f64::min);
        max - min
    } else {
        0.0
    };
    let has_drift = drift_magnitude > config.significance_threshold;

    let drift_regions: Vec<DriftRegion> = reliable
        .iter()
        .filter_map(|r| {
            let deviation = r.offset_seconds() - baseline_offset;
            (deviation.abs() > config.region_deviation).then(|| DriftRegion {
                chunk_index: r.chunk.index,
                pass_number: r.chunk.pass_number,
                start: r.chunk.start_time,
                end: r.chunk.end_time,
                offset: r.offset_seconds(),
                deviation,
            })
        })
        .collect();

    let localized_events = detect_localized_events(&reliable, baseline_offset, &config.events);

    let (drift_rate, r_squared) = if offsets.len() >= 2 {
        let times: Vec<f64> = reliable.iter().map(|r| r.chunk.start_time).collect();
        let (slope, _, r2) = linear_regression(&times, &offsets);
        (Some(slope), Some(r2))
    } else {
        (None, None)
    };

    let pattern = if has_drift {
        diagnose_pattern(&reliable, config)
    } else {
        DriftPattern::Uniform
    };

    DriftReport {
        has_drift,
        drift_magnitude,
        baseline_offset,
        baseline_source,
        low_quality,
        reliable_chunks: reliable.len(),
        drift_regions,
        localized_events,
        pattern,
        drift_rate,
        r_squared,
    }
}

fn weighted_median_of(results: &[&ChunkResult]) -> f64 {
    let items: Vec<WeightedOffset> = results
        .iter()
        .map(|r| WeightedOffset {
            offset: r.offset_seconds(),
            weight: r.confidence,
            start: r.chunk.start_time,
            index: r.chunk.index,
        })
        .collect();
    weighted_median(&items).unwrap_or(0.0)
}

/// Input to [`weighted_median`].
#[derive(Debug, Clone, Copy)]
pub struct WeightedOffset {
    pub offset: f64,
    pub weight: f64,
    pub start: f64,
    pub index: usize,
}

/// Lower weighted median.
///
/// Sorted by offset (ties by start time, then index), the first value whose
/// cumulative weight reaches half the total is returned, so an exact 50%
/// crossing yields the lower value. Zero total weight falls back to unit
/// weights.
pub fn weighted_median(items: &[WeightedOffset]) -> Option<f64> {
    if items.is_empty() {
        return None;
    }
    let mut sorted = items.to_vec();
    sorted.sort_by(|a, b| {
        a.offset
            .total_cmp(&b.offset)
            .then(a.start.total_cmp(&b.start))
            .then(a.index.cmp(&b.index))
    });

    let total: f64 = sorted.iter().map(|i| i.weight.max(0.0)).sum();
    let unit = total <= 0.0;
    let total = if unit { sorted.len() as f64 } else { total };
    let half = total / 2.0;

    let mut cumulative = 0.0;
    for item in &sorted {
        cumulative += if unit { 1.0 } else { item.weight.max(0.0) };
        if cumulative >= half - 1e-12 * total {
            return Some(item.offset);
        }
    }
    sorted.last().map(|i| i.offset)
}

/// Cluster same-sign deviations into localized events.
fn detect_localized_events(
    reliable: &[&ChunkResult],
    baseline: f64,
    config: &LocalizedEventConfig,
) -> Vec<LocalizedEvent> {
    let mut events = Vec::new();
    let mut cluster: Vec<&ChunkResult> = Vec::new();
    let mut cluster_sign = 0.0;

    for &chunk in reliable {
        let deviation = chunk.offset_seconds() - baseline;
        if deviation.abs() > config.outlier_limit {
            continue;
        }

        if deviation.abs() < config.min_delta {
            flush_cluster(&mut cluster, baseline, config, &mut events);
            continue;
        }

        let sign = deviation.signum();
        let joins = cluster.last().is_some_and(|last| {
            sign == cluster_sign
                && (chunk.chunk.start_time - last.chunk.end_time).max(0.0) <= config.max_gap
        });
        if !joins {
            flush_cluster(&mut cluster, baseline, config, &mut events);
            cluster_sign = sign;
        }
        cluster.push(chunk);
    }
    flush_cluster(&mut cluster, baseline, config, &mut events);
    events
}

fn flush_cluster(
    cluster: &mut Vec<&ChunkResult>,
    baseline: f64,
    config: &LocalizedEventConfig,
    events: &mut Vec<LocalizedEvent>,
) {
    let members = std::mem::take(cluster);
    if let Some(event) = classify_cluster(&members, baseline, config) {
        tracing::info!(
            "Localized event {} at {:.1}-{:.1}s: {:+.3}s over {} chunks",
            event.classification,
            event.start,
            event.end,
            event.delta_from_baseline,
            event.segment_count
        );
        events.push(event);
    }
}

fn classify_cluster(
    members: &[&ChunkResult],
    baseline: f64,
    config: &LocalizedEventConfig,
) -> Option<LocalizedEvent> {
    let (first, _) = members.split_first()?;
    let count = members.len();
    if count < config.min_segments {
        return None;
    }

    let start = first.chunk.start_time;
    let end = members
        .iter()
        .map(|m| m.chunk.end_time)
        .fold(f64::NEG_INFINITY, f64::max);
    let duration = end - start;
    let confidence = members.iter().map(|m| m.confidence).sum::<f64>() / count as f64;

    let long_enough = duration >= config.min_duration;
    let confident = count >= 3 && confidence >= config.high_confidence;
    if !long_enough && !confident {
        return None;
    }

    let offsets: Vec<f64> = members.iter().map(|m| m.offset_seconds()).collect();
    let avg_offset = offsets.iter().sum::<f64>() / count as f64;
    let delta_from_baseline = avg_offset - baseline;

    let drifting = count >= 3 && {
        let times: Vec<f64> = members.iter().map(|m| m.chunk.start_time).collect();
        let (slope, _, r2) = linear_regression(&times, &offsets);
        slope.abs() >= config.drift_min_slope && r2 >= config.drift_min_r_squared
    };

    let classification = if drifting {
        EventClassification::Drift
    } else if delta_from_baseline > 0.0 {
        EventClassification::ExtraContent
    } else {
        EventClassification::MissingContent
    };

    Some(LocalizedEvent {
        start,
        end,
        classification,
        avg_offset,
        delta_from_baseline,
        segment_count: count,
        confidence,
    })
}

/// Stepping (multiple DBSCAN clusters) is checked before linear drift.
fn diagnose_pattern(reliable: &[&ChunkResult], config: &DriftConfig) -> DriftPattern {
    let offsets: Vec<f64> = reliable.iter().map(|r| r.offset_seconds()).collect();
    let labels = dbscan_cluster(&offsets, config.dbscan_epsilon, config.dbscan_min_samples);
    let clusters = labels
        .iter()
        .filter(|&&l| l >= 0)
        .collect::<std::collections::BTreeSet<_>>()
        .len();
    if clusters > 1 {
        return DriftPattern::Stepping;
    }

    let times: Vec<f64> = reliable.iter().map(|r| r.chunk.start_time).collect();
    let (slope, _, r2) = linear_regression(&times, &offsets);
    if slope.abs() >= config.linear_min_slope && r2 >= config.linear_min_r_squared {
        return DriftPattern::Linear;
    }
    DriftPattern::Uniform
}

/// Simple linear regression: y = slope * x + intercept
///
/// Returns (slope, intercept, r_squared).
pub fn linear_regression(x: &[f64], y: &[f64]) -> (f64, f64, f64) {
    if x.len() < 2 || x.len() != y.len() {
        return (0.0, 0.0, 0.0);
    }

    let n = x.len() as f64;
    let x_mean = x.iter().sum::<f64>() / n;
    let y_mean = y.iter().sum::<f64>() / n;

    let (numerator, denominator) = x.iter().zip(y).fold((0.0, 0.0), |(num, den), (xi, yi)| {
        let dx = xi - x_mean;
        (num + dx * (yi - y_mean), den + dx * dx)
    });

    if denominator.abs() < 1e-10 {
        return (0.0, y_mean, 0.0);
    }

    let slope = numerator / denominator;
    let intercept = y_mean - slope * x_mean;

    let (ss_res, ss_tot) = x.iter().zip(y).fold((0.0, 0.0), |(res, tot), (xi, yi)| {
        let predicted = slope * xi + intercept;
        (res + (yi - predicted).powi(2), tot + (yi - y_mean).powi(2))
    });

    let r_squared = if ss_tot.abs() < 1e-10 {
        1.0 // All y values are the same
    } else {
        1.0 - ss_res / ss_tot
    };

    (slope, intercept, r_squared.max(0.0))
}

/// Simple DBSCAN clustering for 1D data.
///
/// Returns cluster labels for each point. -1 means noise.
fn dbscan_cluster(values: &[f64], epsilon: f64, min_samples: usize) -> Vec<i32> {
    let n = values.len();
    let mut labels = vec![-1i32; n];
    let mut visited = vec![false; n];
    let mut cluster_id = 0i32;

    let neighbors = |i: usize| -> Vec<usize> {
        (0..n)
            .filter(|&j| (values[i] - values[j]).abs() <= epsilon)
            .collect()
    };

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        let seeds = neighbors(i);
        if seeds.len() < min_samples {
            continue;
        }

        labels[i] = cluster_id;
        let mut queue = seeds;
        let mut idx = 0;
        while idx < queue.len() {
            let j = queue[idx];
            idx += 1;
            if labels[j] < 0 {
                labels[j] = cluster_id;
            }
            if visited[j] {
                continue;
            }
            visited[j] = true;
            let more = neighbors(j);
            if more.len() >= min_samples {
                queue.extend(more);
            }
        }
        cluster_id += 1;
    }

    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::measured_chunk;
    use crate::models::QualityLabel;

    fn chunk_result(index: usize, start: f64, end: f64, offset: f64, confidence: f64) -> ChunkResult {
        measured_chunk(index, start, end, offset, confidence, QualityLabel::Good)
    }

    fn timeline(offsets: &[f64], chunk_len: f64, confidence: f64) -> Timeline {
        Timeline::from_results(
            offsets
                .iter()
                .enumerate()
                .map(|(i, &o)| {
                    let start = i as f64 * chunk_len;
                    chunk_result(i, start, start + chunk_len, o, confidence)
                })
                .collect(),
        )
    }

    #[test]
    fn step_in_offsets_is_drift() {
        let report = analyze_drift(
            &timeline(&[0.0, 0.0, 0.0, 0.5, 0.5, 0.5], 10.0, 0.9),
            &DriftConfig::default(),
        );
        assert!(report.has_drift);
        assert!((report.drift_magnitude - 0.5).abs() < 1e-9);
        assert_eq!(report.baseline_offset, 0.0, "lower weighted median");
        assert_eq!(report.baseline_source, BaselineSource::WeightedMedian);
        let indices: Vec<usize> = report.drift_regions.iter().map(|r| r.chunk_index).collect();
        assert_eq!(indices, vec![3, 4, 5]);
        assert_eq!(report.pattern, DriftPattern::Stepping);
    }

    #[test]
    fn constant_offsets_have_no_drift() {
        let report = analyze_drift(
            &timeline(&[0.25, 0.25, 0.25, 0.25], 30.0, 0.9),
            &DriftConfig::default(),
        );
        assert!(!report.has_drift);
        assert_eq!(report.baseline_offset, 0.25);
        assert!(report.drift_regions.is_empty());
        assert!(report.localized_events.is_empty());
        assert_eq!(report.pattern, DriftPattern::Uniform);
        assert!(!report.low_quality);
    }

    #[test]
    fn long_deviation_becomes_one_event() {
        let report = analyze_drift(
            &timeline(&[0.0, 0.0, 0.8, 0.8, 0.0, 0.0], 30.0, 0.9),
            &DriftConfig::default(),
        );
        assert_eq!(report.localized_events.len(), 1);
        let event = &report.localized_events[0];
        assert_eq!(event.classification, EventClassification::ExtraContent);
        assert_eq!((event.start, event.end), (60.0, 120.0));
        assert_eq!(event.segment_count, 2);
        assert!((event.delta_from_baseline - 0.8).abs() < 1e-9);
    }

    #[test]
    fn negative_deviation_is_missing_content() {
        let report = analyze_drift(
            &timeline(&[1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0], 30.0, 0.9),
            &DriftConfig::default(),
        );
        assert_eq!(report.localized_events.len(), 1);
        assert_eq!(
            report.localized_events[0].classification,
            EventClassification::MissingContent
        );
    }

    #[test]
    fn single_outlier_is_not_an_event() {
        let report = analyze_drift(
            &timeline(&[0.0, 0.0, 0.8, 0.0, 0.0], 30.0, 0.9),
            &DriftConfig::default(),
        );
        assert!(report.localized_events.is_empty());
    }

    #[test]
    fn short_confident_cluster_is_accepted() {
        // Three 10 s chunks = 30 s, below min_duration, but confident
        let report = analyze_drift(
            &timeline(&[0.0, 0.0, 0.0, 0.7, 0.7, 0.7, 0.0, 0.0, 0.0], 10.0, 0.9),
            &DriftConfig::default(),
        );
        assert_eq!(report.localized_events.len(), 1);
        assert_eq!(report.localized_events[0].segment_count, 3);
    }

    #[test]
    fn steady_ramp_inside_cluster_is_drift() {
        let report = analyze_drift(
            &timeline(&[0.0, 0.0, 0.0, 0.6, 1.0, 1.4, 1.8, 0.0, 0.0, 0.0], 10.0, 0.9),
            &DriftConfig::default(),
        );
        assert_eq!(report.localized_events.len(), 1);
        assert_eq!(
            report.localized_events[0].classification,
            EventClassification::Drift
        );
    }

    #[test]
    fn far_outliers_are_ignored_for_events() {
        let report = analyze_drift(
            &timeline(&[0.0, 0.0, 0.0, 20.0, 20.0, 0.0, 0.0], 30.0, 0.9),
            &DriftConfig::default(),
        );
        assert!(report.localized_events.is_empty());
    }

    #[test]
    fn single_reliable_chunk_is_low_quality() {
        let mut results = vec![chunk_result(0, 0.0, 10.0, 0.3, 0.9)];
        results.push(chunk_result(1, 10.0, 20.0, 0.1, 0.2));
        let report = analyze_drift(&Timeline::from_results(results), &DriftConfig::default());
        assert_eq!(report.baseline_source, BaselineSource::SingleChunk);
        assert_eq!(report.baseline_offset, 0.3);
        assert!(report.low_quality);
    }

    #[test]
    fn no_reliable_chunk_uses_whole_timeline() {
        let report = analyze_drift(
            &timeline(&[0.1, 0.2, 0.3], 10.0, 0.2),
            &DriftConfig::default(),
        );
        assert_eq!(report.baseline_source, BaselineSource::FullTimeline);
        assert_eq!(report.baseline_offset, 0.2);
        assert!(report.low_quality);
        assert!(!report.has_drift);
    }

    #[test]
    fn empty_timeline_has_empty_baseline() {
        let report = analyze_drift(&Timeline::default(), &DriftConfig::default());
        assert_eq!(report.baseline_source, BaselineSource::Empty);
        assert_eq!(report.baseline_offset, 0.0);
    }

    #[test]
    fn weighted_median_exact_half_returns_lower() {
        let items = [
            WeightedOffset { offset: 2.0, weight: 1.0, start: 0.0, index: 0 },
            WeightedOffset { offset: 1.0, weight: 1.0, start: 1.0, index: 1 },
        ];
        assert_eq!(weighted_median(&items), Some(1.0));
    }

    #[test]
    fn weighted_median_follows_weights() {
        let items = [
            WeightedOffset { offset: 0.0, weight: 0.1, start: 0.0, index: 0 },
            WeightedOffset { offset: 1.0, weight: 0.9, start: 1.0, index: 1 },
        ];
        assert_eq!(weighted_median(&items), Some(1.0));
    }

    #[test]
    fn weighted_median_zero_weights_fall_back_to_unit() {
        let items = [
            WeightedOffset { offset: 3.0, weight: 0.0, start: 0.0, index: 0 },
            WeightedOffset { offset: 1.0, weight: 0.0, start: 1.0, index: 1 },
            WeightedOffset { offset: 2.0, weight: 0.0, start: 2.0, index: 2 },
        ];
        assert_eq!(weighted_median(&items), Some(2.0));
        assert_eq!(weighted_median(&[]), None);
    }

    #[test]
    fn linear_drift_pattern() {
        let offsets: Vec<f64> = (0..10).map(|i| i as f64 * 0.03).collect();
        let report = analyze_drift(&timeline(&offsets, 10.0, 0.9), &DriftConfig::default());
        assert!(report.has_drift);
        assert_eq!(report.pattern, DriftPattern::Linear);
        assert!((report.drift_rate.unwrap() - 0.003).abs() < 1e-9);
    }

    #[test]
    fn regression_on_perfect_line() {
        let (slope, intercept, r2) = linear_regression(&[0.0, 1.0, 2.0], &[1.0, 3.0, 5.0]);
        assert!((slope - 2.0).abs() < 1e-12);
        assert!((intercept - 1.0).abs() < 1e-12);
        assert!((r2 - 1.0).abs() < 1e-12);
    }
}
