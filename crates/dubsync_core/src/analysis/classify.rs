//! Rule-based content classification.
//!
//! Labels a window as dialogue, music, silence or mixed from its features and
//! hands out weight hints that tell the confidence scorer which feature
//! similarities to trust for that kind of content.

use serde::{Deserialize, Serialize};

use super::features::ChunkFeatures;
use crate::models::ContentType;

/// Windows quieter than this are silence.
pub const SILENCE_RMS: f64 = 0.005;
/// Dialogue and music scores closer than this are `Mixed`.
const MIXED_MARGIN: f64 = 0.15;

/// Relative trust in each feature similarity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightHints {
    pub mfcc: f64,
    pub onset: f64,
    pub spectral: f64,
}

impl WeightHints {
    pub fn for_type(content_type: ContentType) -> Self {
        let (mfcc, onset, spectral) = match content_type {
            ContentType::Dialogue => (1.2, 1.3, 0.8),
            ContentType::Music => (0.9, 1.0, 1.3),
            ContentType::Silence => (0.5, 0.3, 0.5),
            ContentType::Mixed | ContentType::Unknown => (1.0, 1.0, 1.0),
        };
        Self {
            mfcc,
            onset,
            spectral,
        }
    }

    /// Element-wise mean of two hint sets.
    pub fn blend(&self, other: &WeightHints) -> WeightHints {
        WeightHints {
            mfcc: (self.mfcc + other.mfcc) / 2.0,
            onset: (self.onset + other.onset) / 2.0,
            spectral: (self.spectral + other.spectral) / 2.0,
        }
    }
}

impl Default for WeightHints {
    fn default() -> Self {
        Self::for_type(ContentType::Unknown)
    }
}

/// Content label of one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContentClassification {
    pub content_type: ContentType,
    /// Certainty of the label (0.0 - 1.0).
    pub confidence: f64,
    pub weight_hints: WeightHints,
}

impl Default for ContentClassification {
    fn default() -> Self {
        Self::labelled(ContentType::Unknown, 0.0)
    }
}

impl ContentClassification {
    fn labelled(content_type: ContentType, confidence: f64) -> Self {
        Self {
            content_type,
            confidence: confidence.clamp(0.0, 1.0),
            weight_hints: WeightHints::for_type(content_type),
        }
    }

    pub fn is_silence(&self) -> bool {
        self.content_type == ContentType::Silence
    }
}

/// Classify a window from its features.
pub fn classify(features: &ChunkFeatures) -> ContentClassification {
    let Some(rms) = features.rms else {
        return ContentClassification::default();
    };

    if rms < SILENCE_RMS {
        return ContentClassification::labelled(ContentType::Silence, 1.0 - 0.5 * rms / SILENCE_RMS);
    }

    let cv = features
        .rms_series
        .as_deref()
        .map(coefficient_of_variation)
        .unwrap_or(0.0);
    let zcr = features.zcr.unwrap_or(0.0);

    let frames = features.frame_count();
    let duration = frames as f64 * features.hop_seconds();
    let onset_density = match (&features.onset_frames, duration > 0.0) {
        (Some(onsets), true) => onsets.len() as f64 / duration,
        _ => 0.0,
    };

    let speech_band = if (0.02..=0.3).contains(&zcr) { 1.0 } else { 0.0 };
    let dialogue = 0.4 * cv.clamp(0.0, 1.0)
        + 0.3 * speech_band
        + 0.3 * (onset_density / 4.0).clamp(0.0, 1.0);

    let mfcc_stability = features
        .mfcc
        .as_deref()
        .map(|m| 1.0 / (1.0 + mean_coefficient_std(m) / 5.0))
        .unwrap_or(0.5);
    let music = 0.6 * (1.0 - cv.clamp(0.0, 1.0)) + 0.4 * mfcc_stability;

    let margin = (dialogue - music).abs();
    let content_type = if margin < MIXED_MARGIN {
        ContentType::Mixed
    } else if dialogue > music {
        ContentType::Dialogue
    } else {
        ContentType::Music
    };

    tracing::trace!(
        "classify: rms={:.4} cv={:.3} zcr={:.3} onsets/s={:.2} -> {}",
        rms,
        cv,
        zcr,
        onset_density,
        content_type
    );

    ContentClassification::labelled(content_type, 0.5 + margin)
}

fn coefficient_of_variation(series: &[f64]) -> f64 {
    if series.len() < 2 {
        return 0.0;
    }
    let n = series.len() as f64;
    let mean = series.iter().sum::<f64>() / n;
    if mean <= 1e-12 {
        return 0.0;
    }
    let var = series.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    var.sqrt() / mean
}

/// Mean over coefficients of the per-coefficient standard deviation.
fn mean_coefficient_std(mfcc: &[Vec<f64>]) -> f64 {
    let Some(width) = mfcc.first().map(Vec::len) else {
        return 0.0;
    };
    if width == 0 || mfcc.len() < 2 {
        return 0.0;
    }
    let n = mfcc.len() as f64;
    (0..width)
        .map(|k| {
            let mean = mfcc.iter().map(|f| f[k]).sum::<f64>() / n;
            (mfcc.iter().map(|f| (f[k] - mean).powi(2)).sum::<f64>() / n).sqrt()
        })
        .sum::<f64>()
        / width as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::features::FeatureExtractor;
    use crate::analysis::test_support::{bursty_noise, tone};
    use crate::analysis::types::AudioWindow;

    fn classify_samples(samples: &[f64]) -> ContentClassification {
        let extractor = FeatureExtractor::new(8000);
        classify(&extractor.extract(&AudioWindow::from_slice(samples, 8000)))
    }

    #[test]
    fn missing_rms_is_unknown() {
        let c = classify(&ChunkFeatures::default());
        assert_eq!(c.content_type, ContentType::Unknown);
        assert_eq!(c.weight_hints, WeightHints::default());
    }

    #[test]
    fn quiet_window_is_silence() {
        let c = classify_samples(&vec![0.001; 8000]);
        assert_eq!(c.content_type, ContentType::Silence);
        assert_eq!(c.weight_hints.onset, 0.3);
    }

    #[test]
    fn steady_tone_is_not_dialogue() {
        let c = classify_samples(&tone(440.0, 8000, 16000));
        assert_ne!(c.content_type, ContentType::Dialogue);
        assert_ne!(c.content_type, ContentType::Silence);
    }

    #[test]
    fn bursty_noise_is_not_music() {
        let c = classify_samples(&bursty_noise(32000, 8000, 11));
        assert_ne!(c.content_type, ContentType::Music);
        assert!(c.confidence > 0.0 && c.confidence <= 1.0);
    }

    #[test]
    fn weight_hint_table() {
        let d = WeightHints::for_type(ContentType::Dialogue);
        assert_eq!((d.mfcc, d.onset, d.spectral), (1.2, 1.3, 0.8));
        let m = WeightHints::for_type(ContentType::Music);
        assert_eq!((m.mfcc, m.onset, m.spectral), (0.9, 1.0, 1.3));
    }
}
