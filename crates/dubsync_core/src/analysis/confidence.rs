//! Chunk confidence scoring.
//!
//! Combines the correlation quality of an [`OffsetEstimate`] with content
//! classification and feature similarity into one bounded ensemble score
//! and a [`QualityLabel`].

use serde::{Deserialize, Serialize};

use super::classify::{ContentClassification, WeightHints};
use super::features::ChunkFeatures;
use super::types::OffsetEstimate;
use crate::models::QualityLabel;

/// Prominence (in standard deviations) that maps to full base confidence.
const PROMINENCE_SCALE: f64 = 12.0;
/// Onsets within this many frames count as matched.
const ONSET_MATCH_TOLERANCE: i64 = 2;

/// Individual factors behind an ensemble confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub base: f64,
    pub content_factor: f64,
    pub signal_quality_factor: f64,
    pub temporal_factor: f64,
    /// Product of the factors, clamped to 0..1.
    pub ensemble: f64,
    pub quality: QualityLabel,
}

/// Score one chunk measurement.
pub fn score_chunk(
    estimate: &OffsetEstimate,
    master_class: &ContentClassification,
    dub_class: &ContentClassification,
    similarity: f64,
) -> ConfidenceBreakdown {
    let base = (estimate.peak_prominence / PROMINENCE_SCALE).clamp(0.0, 1.0);

    let content_factor = if master_class.is_silence() || dub_class.is_silence() {
        0.5
    } else if master_class.content_type != dub_class.content_type {
        0.8
    } else {
        1.0
    };

    let peak = estimate.correlation_peak;
    let mut signal_quality_factor = if similarity < 0.3 && (0.3..=0.7).contains(&peak) {
        0.7
    } else if peak > 0.9 {
        1.1
    } else {
        1.0
    };
    if estimate.phase_coherence.is_some_and(|c| c < 0.05) {
        signal_quality_factor *= 0.9;
    }

    let temporal_factor = 0.5 + 0.5 * estimate.overlap_fraction.clamp(0.0, 1.0);

    let ensemble =
        (base * content_factor * signal_quality_factor * temporal_factor).clamp(0.0, 1.0);
    let both_silent = master_class.is_silence() && dub_class.is_silence();

    ConfidenceBreakdown {
        base,
        content_factor,
        signal_quality_factor,
        temporal_factor,
        ensemble,
        quality: quality_label(ensemble, similarity, both_silent),
    }
}

/// Map ensemble confidence and similarity to a quality label.
pub fn quality_label(ensemble: f64, similarity: f64, both_silent: bool) -> QualityLabel {
    if both_silent {
        QualityLabel::Skipped
    } else if ensemble >= 0.8 && similarity >= 0.7 {
        QualityLabel::Excellent
    } else if ensemble >= 0.6 && similarity >= 0.5 {
        QualityLabel::Good
    } else if ensemble >= 0.4 {
        QualityLabel::Fair
    } else {
        QualityLabel::Poor
    }
}

/// Weight-hint-weighted mean of the available feature similarities.
///
/// `lag_frames` aligns the dub onsets onto the master before matching.
/// Returns 0 when no feature pair is available.
pub fn feature_similarity(
    master: &ChunkFeatures,
    dub: &ChunkFeatures,
    hints: &WeightHints,
    lag_frames: i64,
) -> f64 {
    let parts = [
        (mfcc_similarity(master, dub), hints.mfcc),
        (onset_similarity(master, dub, lag_frames), hints.onset),
        (mel_similarity(master, dub), hints.spectral),
    ];

    let (sum, weight) = parts
        .iter()
        .filter_map(|(sim, w)| sim.map(|s| (s * w, *w)))
        .fold((0.0, 0.0), |(s, w), (sv, wv)| (s + sv, w + wv));

    if weight <= 0.0 {
        0.0
    } else {
        (sum / weight).clamp(0.0, 1.0)
    }
}

/// Cosine of the mean MFCC vectors.
fn mfcc_similarity(master: &ChunkFeatures, dub: &ChunkFeatures) -> Option<f64> {
    let a = mean_vector(master.mfcc.as_deref()?)?;
    let b = mean_vector(dub.mfcc.as_deref()?)?;
    cosine(&a, &b).map(|c| c.max(0.0))
}

/// Cosine of the mean-centered log-mel band energies.
fn mel_similarity(master: &ChunkFeatures, dub: &ChunkFeatures) -> Option<f64> {
    let a = centered(master.mel_energies.as_deref()?);
    let b = centered(dub.mel_energies.as_deref()?);
    cosine(&a, &b).map(|c| c.max(0.0))
}

/// Share of onsets that find a partner after shifting the dub by `lag_frames`.
fn onset_similarity(master: &ChunkFeatures, dub: &ChunkFeatures, lag_frames: i64) -> Option<f64> {
    let m = master.onset_frames.as_deref()?;
    let d = dub.onset_frames.as_deref()?;
    if m.is_empty() && d.is_empty() {
        return None;
    }
    let denom = m.len().max(d.len());
    let matched = m
        .iter()
        .filter(|&&mf| {
            d.iter()
                .any(|&df| (df as i64 - lag_frames - mf as i64).abs() <= ONSET_MATCH_TOLERANCE)
        })
        .count();
    Some(matched as f64 / denom as f64)
}

fn mean_vector(frames: &[Vec<f64>]) -> Option<Vec<f64>> {
    let width = frames.first()?.len();
    let n = frames.len() as f64;
    Some(
        (0..width)
            .map(|k| frames.iter().map(|f| f[k]).sum::<f64>() / n)
            .collect(),
    )
}

fn centered(values: &[f64]) -> Vec<f64> {
    let mean = values.iter().sum::<f64>() / values.len().max(1) as f64;
    values.iter().map(|v| v - mean).collect()
}

fn cosine(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na <= 1e-12 || nb <= 1e-12 {
        return None;
    }
    Some(dot / (na * nb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::features::FeatureExtractor;
    use crate::analysis::test_support::{bursty_noise, noise};
    use crate::analysis::types::AudioWindow;
    use crate::models::{ContentType, OffsetMethod};

    fn class(content_type: ContentType) -> ContentClassification {
        ContentClassification {
            content_type,
            confidence: 1.0,
            weight_hints: WeightHints::for_type(content_type),
        }
    }

    fn estimate(prominence: f64, peak: f64) -> OffsetEstimate {
        let mut e = OffsetEstimate::new(OffsetMethod::RawCorrelation, 0, 8000, peak, 1.0)
            .with_phase_coherence(0.8);
        e.peak_prominence = prominence;
        e.overlap_fraction = 1.0;
        e
    }

    #[test]
    fn strong_match_is_excellent() {
        let s = score_chunk(
            &estimate(40.0, 0.95),
            &class(ContentType::Dialogue),
            &class(ContentType::Dialogue),
            0.9,
        );
        assert_eq!(s.base, 1.0);
        assert_eq!(s.signal_quality_factor, 1.1);
        assert_eq!(s.ensemble, 1.0, "ensemble is clamped to 1");
        assert_eq!(s.quality, QualityLabel::Excellent);
    }

    #[test]
    fn silence_halves_confidence() {
        let s = score_chunk(
            &estimate(12.0, 0.8),
            &class(ContentType::Silence),
            &class(ContentType::Music),
            0.8,
        );
        assert_eq!(s.content_factor, 0.5);
        assert!((s.ensemble - 0.5).abs() < 1e-12);
        assert_eq!(s.quality, QualityLabel::Fair);
    }

    #[test]
    fn both_silent_is_skipped() {
        let s = score_chunk(
            &estimate(12.0, 0.8),
            &class(ContentType::Silence),
            &class(ContentType::Silence),
            0.8,
        );
        assert_eq!(s.quality, QualityLabel::Skipped);
    }

    #[test]
    fn weak_peak_with_low_similarity_is_penalized() {
        let mut e = estimate(12.0, 0.5);
        e.phase_coherence = Some(0.01);
        let s = score_chunk(&e, &class(ContentType::Music), &class(ContentType::Dialogue), 0.1);
        assert!((s.signal_quality_factor - 0.63).abs() < 1e-12);
        assert_eq!(s.content_factor, 0.8);
        assert!((s.ensemble - 0.504).abs() < 1e-9);
    }

    #[test]
    fn temporal_factor_tracks_overlap() {
        let mut e = estimate(12.0, 0.8);
        e.overlap_fraction = 0.5;
        let s = score_chunk(&e, &class(ContentType::Music), &class(ContentType::Music), 0.8);
        assert!((s.temporal_factor - 0.75).abs() < 1e-12);
    }

    #[test]
    fn label_thresholds() {
        assert_eq!(quality_label(0.8, 0.7, false), QualityLabel::Excellent);
        assert_eq!(quality_label(0.8, 0.6, false), QualityLabel::Good);
        assert_eq!(quality_label(0.6, 0.4, false), QualityLabel::Fair);
        assert_eq!(quality_label(0.39, 0.9, false), QualityLabel::Poor);
    }

    #[test]
    fn same_content_is_more_similar_than_unrelated() {
        let extractor = FeatureExtractor::new(8000);
        let a = bursty_noise(16000, 8000, 1);
        let b = noise(16000, 99, 0.05);
        let fa = extractor.extract(&AudioWindow::from_slice(&a, 8000));
        let fb = extractor.extract(&AudioWindow::from_slice(&b, 8000));
        let hints = WeightHints::default();

        let same = feature_similarity(&fa, &fa, &hints, 0);
        let different = feature_similarity(&fa, &fb, &hints, 0);
        assert!((same - 1.0).abs() < 1e-9, "self similarity was {}", same);
        assert!(different < same);
    }

    #[test]
    fn no_features_means_zero_similarity() {
        let empty = ChunkFeatures::default();
        assert_eq!(feature_similarity(&empty, &empty, &WeightHints::default(), 0), 0.0);
    }
}
