//! Deterministic synthetic signals for unit tests.

use std::f64::consts::PI;

use super::classify::ContentClassification;
use super::types::{Chunk, ChunkResult, OffsetEstimate};
use crate::models::{OffsetMethod, QualityLabel};

/// Small linear congruential generator (Numerical Recipes constants).
pub(crate) struct Lcg(u64);

impl Lcg {
    pub(crate) fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(2862933555777941757).wrapping_add(3037000493))
    }

    /// Uniform value in [-1, 1).
    pub(crate) fn next_f64(&mut self) -> f64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((self.0 >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
    }
}

/// White noise of the given amplitude.
pub(crate) fn noise(len: usize, seed: u64, amplitude: f64) -> Vec<f64> {
    let mut rng = Lcg::new(seed);
    (0..len).map(|_| rng.next_f64() * amplitude).collect()
}

/// Pure sine tone.
pub(crate) fn tone(freq: f64, sample_rate: u32, len: usize) -> Vec<f64> {
    (0..len)
        .map(|i| 0.5 * (2.0 * PI * freq * i as f64 / sample_rate as f64).sin())
        .collect()
}

/// Noise gated into irregular bursts (speech-like energy envelope).
pub(crate) fn bursty_noise(len: usize, sample_rate: u32, seed: u64) -> Vec<f64> {
    let mut gate_rng = Lcg::new(seed ^ 0x9E37_79B9);
    let mut rng = Lcg::new(seed);
    let segment = (sample_rate as usize / 8).max(1);
    let mut out = Vec::with_capacity(len);
    let mut gain = 0.0;
    for i in 0..len {
        if i % segment == 0 {
            gain = if gate_rng.next_f64() > -0.2 {
                0.3 + 0.4 * gate_rng.next_f64().abs()
            } else {
                0.02
            };
        }
        out.push(rng.next_f64() * gain);
    }
    out
}

/// `signal` delayed by `delay` samples (zeros in front), same length.
pub(crate) fn delayed(signal: &[f64], delay: usize) -> Vec<f64> {
    let mut out = vec![0.0; signal.len()];
    if delay < signal.len() {
        out[delay..].copy_from_slice(&signal[..signal.len() - delay]);
    }
    out
}

/// Element-wise sum, truncated to the shorter input.
pub(crate) fn mix(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| x + y).collect()
}

/// Measured pass-1 chunk result at 1 kHz resolution.
pub(crate) fn measured_chunk(
    index: usize,
    start: f64,
    end: f64,
    offset: f64,
    confidence: f64,
    quality: QualityLabel,
) -> ChunkResult {
    ChunkResult {
        chunk: Chunk {
            index,
            start_time: start,
            end_time: end,
            pass_number: 1,
        },
        estimate: Some(OffsetEstimate::new(
            OffsetMethod::RawCorrelation,
            (offset * 1000.0).round() as i64,
            1000,
            0.9,
            confidence,
        )),
        master_class: ContentClassification::default(),
        dub_class: ContentClassification::default(),
        quality,
        confidence,
        similarity: 0.8,
        failure: None,
    }
}
