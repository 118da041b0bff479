//! Core types for offset analysis.

use serde::{Deserialize, Serialize};

use super::classify::ContentClassification;
use crate::models::{OffsetMethod, QualityLabel};

/// Decoded mono audio stream.
///
/// Immutable once built. Analysis windows borrow from it through
/// [`AudioSignal::window`] instead of copying.
#[derive(Debug, Clone)]
pub struct AudioSignal {
    samples: Vec<f64>,
    sample_rate: u32,
}

impl AudioSignal {
    /// Create a signal from mono samples.
    pub fn new(samples: Vec<f64>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// All samples.
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Get the number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the signal is empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Convert seconds to the nearest sample index (may be negative).
    pub fn seconds_to_samples(&self, secs: f64) -> i64 {
        (secs * self.sample_rate as f64).round() as i64
    }

    /// Borrow a window starting at `start_secs` lasting `duration_secs`.
    ///
    /// The window is clamped into the signal; a start past the end yields an
    /// empty window positioned at the end.
    pub fn window(&self, start_secs: f64, duration_secs: f64) -> AudioWindow<'_> {
        let start = self.seconds_to_samples(start_secs);
        let len = (duration_secs.max(0.0) * self.sample_rate as f64).round() as usize;
        self.window_samples(start, len)
    }

    /// Borrow a window by sample position, clamped into the signal.
    pub fn window_samples(&self, start_sample: i64, len: usize) -> AudioWindow<'_> {
        let start = start_sample.clamp(0, self.samples.len() as i64) as usize;
        let end = start.saturating_add(len).min(self.samples.len());
        AudioWindow {
            samples: &self.samples[start..end],
            sample_rate: self.sample_rate,
            start_sample: start,
        }
    }
}

/// Borrowed view into an [`AudioSignal`].
#[derive(Debug, Clone, Copy)]
pub struct AudioWindow<'a> {
    samples: &'a [f64],
    sample_rate: u32,
    start_sample: usize,
}

impl<'a> AudioWindow<'a> {
    /// Build a window over an arbitrary slice (positioned at sample 0).
    pub fn from_slice(samples: &'a [f64], sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            start_sample: 0,
        }
    }

    pub fn samples(&self) -> &'a [f64] {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// First sample of this window within its parent signal.
    pub fn start_sample(&self) -> usize {
        self.start_sample
    }

    pub fn start_secs(&self) -> f64 {
        self.start_sample as f64 / self.sample_rate.max(1) as f64
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate.max(1) as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One analysis window on the shared timeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Index within its pass (pass 2 continues after pass 1).
    pub index: usize,
    /// Start time in seconds (dub timeline).
    pub start_time: f64,
    /// End time in seconds, always greater than `start_time`.
    pub end_time: f64,
    /// 1 for the coarse pass, 2 for targeted refinement.
    pub pass_number: u8,
}

impl Chunk {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// Offset measurement produced by any detection method.
///
/// Sign convention: offset = dub position - master position of the same
/// content. Positive means the dub is late.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffsetEstimate {
    /// Method that produced this estimate.
    pub method: OffsetMethod,
    /// Integer offset in samples.
    pub offset_samples: i64,
    /// `offset_samples / sample_rate`, exactly.
    pub offset_seconds: f64,
    /// Sample rate the offset is expressed in.
    pub sample_rate: u32,
    /// Confidence score (0.0 - 1.0).
    pub confidence: f64,
    /// Normalized correlation value at the chosen lag.
    pub correlation_peak: f64,
    /// Peak height over the correlation curve, in standard deviations.
    #[serde(default)]
    pub peak_prominence: f64,
    /// Fraction of the window that overlaps at the chosen lag.
    #[serde(default)]
    pub overlap_fraction: f64,
    /// Fractional refinement in samples, within +/-0.5.
    pub sub_sample_offset: Option<f64>,
    /// Phase agreement of the aligned windows (0.0 - 1.0).
    pub phase_coherence: Option<f64>,
    /// More than one lag tied for the correlation maximum.
    #[serde(default)]
    pub ambiguous_peak: bool,
}

impl OffsetEstimate {
    /// Create a new estimate with no refinement attached.
    pub fn new(
        method: OffsetMethod,
        offset_samples: i64,
        sample_rate: u32,
        correlation_peak: f64,
        confidence: f64,
    ) -> Self {
        Self {
            method,
            offset_samples,
            offset_seconds: offset_samples as f64 / sample_rate.max(1) as f64,
            sample_rate,
            confidence: confidence.clamp(0.0, 1.0),
            correlation_peak,
            peak_prominence: 0.0,
            overlap_fraction: 1.0,
            sub_sample_offset: None,
            phase_coherence: None,
            ambiguous_peak: false,
        }
    }

    /// Attach a fractional sample refinement.
    pub fn with_sub_sample(mut self, fraction: f64) -> Self {
        self.sub_sample_offset = Some(fraction);
        self
    }

    /// Attach a phase coherence measurement.
    pub fn with_phase_coherence(mut self, coherence: f64) -> Self {
        self.phase_coherence = Some(coherence.clamp(0.0, 1.0));
        self
    }

    /// Set the confidence score.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Shift the integer offset, keeping `offset_seconds` consistent.
    pub fn shifted(mut self, extra_samples: i64) -> Self {
        self.offset_samples += extra_samples;
        self.offset_seconds = self.offset_samples as f64 / self.sample_rate.max(1) as f64;
        self
    }

    /// Offset in seconds including the sub-sample part.
    pub fn precise_seconds(&self) -> f64 {
        let fine = self.sub_sample_offset.unwrap_or(0.0);
        (self.offset_samples as f64 + fine) / self.sample_rate.max(1) as f64
    }
}

/// Result of analyzing a single chunk pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResult {
    pub chunk: Chunk,
    /// Offset estimate; `None` when the chunk failed.
    pub estimate: Option<OffsetEstimate>,
    pub master_class: ContentClassification,
    pub dub_class: ContentClassification,
    pub quality: QualityLabel,
    /// Ensemble confidence (0.0 - 1.0).
    pub confidence: f64,
    /// Weighted feature similarity between the two windows (0.0 - 1.0).
    pub similarity: f64,
    /// Reason this chunk produced no usable estimate.
    pub failure: Option<String>,
}

impl ChunkResult {
    /// Zero-confidence Poor result for a chunk that could not be measured.
    pub fn failed(chunk: Chunk, reason: impl Into<String>) -> Self {
        Self {
            chunk,
            estimate: None,
            master_class: ContentClassification::default(),
            dub_class: ContentClassification::default(),
            quality: QualityLabel::Poor,
            confidence: 0.0,
            similarity: 0.0,
            failure: Some(reason.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some() || self.estimate.is_none()
    }

    /// Measured offset in seconds (sub-sample precision), 0 when failed.
    pub fn offset_seconds(&self) -> f64 {
        self.estimate
            .as_ref()
            .map(|e| e.precise_seconds())
            .unwrap_or(0.0)
    }

    /// Reliable chunks feed the drift baseline.
    pub fn is_reliable(&self, confidence_threshold: f64) -> bool {
        !self.is_failed() && self.quality.is_usable() && self.confidence >= confidence_threshold
    }
}

/// Chunk results ordered by `(start_time, pass_number, index)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timeline {
    chunks: Vec<ChunkResult>,
}

impl Timeline {
    /// Build a timeline, sorting results deterministically.
    pub fn from_results(mut results: Vec<ChunkResult>) -> Self {
        sort_results(&mut results);
        Self { chunks: results }
    }

    /// Union with another set of results.
    pub fn merge(mut self, other: impl IntoIterator<Item = ChunkResult>) -> Self {
        self.chunks.extend(other);
        sort_results(&mut self.chunks);
        self
    }

    pub fn chunks(&self) -> &[ChunkResult] {
        &self.chunks
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChunkResult> {
        self.chunks.iter()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Results from one pass only.
    pub fn pass(&self, pass_number: u8) -> impl Iterator<Item = &ChunkResult> {
        self.chunks
            .iter()
            .filter(move |r| r.chunk.pass_number == pass_number)
    }

    /// Number of chunks that produced an estimate.
    pub fn measured_count(&self) -> usize {
        self.chunks.iter().filter(|r| !r.is_failed()).count()
    }
}

fn sort_results(results: &mut [ChunkResult]) {
    results.sort_by(|a, b| {
        a.chunk
            .start_time
            .total_cmp(&b.chunk.start_time)
            .then(a.chunk.pass_number.cmp(&b.chunk.pass_number))
            .then(a.chunk.index.cmp(&b.chunk.index))
    });
}

/// Error types for analysis operations.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// Input buffer or parameter is unusable.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Master and dub were decoded at different rates.
    #[error("Sample rate mismatch: master {master} Hz, dub {dub} Hz")]
    SampleRateMismatch { master: u32, dub: u32 },

    /// Not enough reliable chunks for a full-quality result.
    #[error("Insufficient reliable chunks: got {reliable} of {required} required")]
    InsufficientData { reliable: usize, required: usize },

    /// Every whole-stream detection method failed.
    #[error("All offset detection methods failed")]
    AllMethodsFailed,

    /// No chunk produced a result.
    #[error("No usable chunks out of {attempted} attempted")]
    NoUsableChunks { attempted: usize },

    /// Audio ingest collaborator failed.
    #[error("Audio ingest failed: {0}")]
    Ingest(String),

    /// Worker pool could not be built.
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for analysis results.
pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn result_at(start: f64, pass: u8, index: usize) -> ChunkResult {
        let chunk = Chunk {
            index,
            start_time: start,
            end_time: start + 1.0,
            pass_number: pass,
        };
        ChunkResult::failed(chunk, "test")
    }

    #[test]
    fn window_is_clamped_into_signal() {
        let signal = AudioSignal::new((0..1000).map(|i| i as f64).collect(), 1000);

        let window = signal.window(0.25, 0.5);
        assert_eq!(window.len(), 500);
        assert_eq!(window.samples()[0], 250.0);

        let tail = signal.window(0.8, 0.5);
        assert_eq!(tail.len(), 200, "window past the end should be truncated");

        let before = signal.window_samples(-100, 50);
        assert_eq!(before.start_sample(), 0);
        assert_eq!(before.len(), 50);

        let past = signal.window(5.0, 1.0);
        assert!(past.is_empty());
    }

    #[test]
    fn offset_seconds_is_exact_sample_ratio() {
        let est = OffsetEstimate::new(OffsetMethod::RawCorrelation, 2000, 8000, 0.9, 0.8);
        assert_eq!(est.offset_seconds, 0.25);

        let shifted = est.clone().shifted(-4000);
        assert_eq!(shifted.offset_samples, -2000);
        assert_eq!(shifted.offset_seconds, -0.25);

        let refined = est.with_sub_sample(0.5);
        assert!((refined.precise_seconds() - 2000.5 / 8000.0).abs() < 1e-12);
    }

    #[test]
    fn timeline_orders_by_start_pass_index() {
        let timeline = Timeline::from_results(vec![
            result_at(10.0, 1, 1),
            result_at(5.0, 2, 4),
            result_at(5.0, 1, 0),
            result_at(5.0, 2, 3),
        ]);
        let order: Vec<(u8, usize)> = timeline
            .iter()
            .map(|r| (r.chunk.pass_number, r.chunk.index))
            .collect();
        assert_eq!(order, vec![(1, 0), (2, 3), (2, 4), (1, 1)]);
    }

    #[test]
    fn failed_chunk_is_never_reliable() {
        let r = result_at(0.0, 1, 0);
        assert!(r.is_failed());
        assert_eq!(r.quality, QualityLabel::Poor);
        assert!(!r.is_reliable(0.0));
    }
}
