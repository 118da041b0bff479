//! Chunk planning for offset analysis.
//!
//! Pure functions for partitioning a time range into overlapping analysis
//! windows. Both passes of the multi-pass controller plan through
//! [`plan_region`]; the coarse pass covers the whole overlap via
//! [`create_chunks`].

use serde::{Deserialize, Serialize};

use super::types::Chunk;

/// Default fraction of each window shared with its successor.
pub const DEFAULT_OVERLAP_RATIO: f64 = 0.7;

const EPSILON: f64 = 1e-9;

/// Configuration for chunk planning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Duration of each chunk in seconds.
    pub chunk_size: f64,
    /// Fraction of overlap between consecutive chunks (0.0 - <1.0).
    pub overlap_ratio: f64,
    /// Upper bound on the number of chunks.
    pub max_chunks: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 30.0,
            overlap_ratio: DEFAULT_OVERLAP_RATIO,
            max_chunks: 50,
        }
    }
}

/// Plan pass-1 chunks over `[0, duration]` with the default overlap.
pub fn create_chunks(duration: f64, chunk_size: f64, max_chunks: usize) -> Vec<Chunk> {
    plan_region(
        0.0,
        duration,
        chunk_size,
        DEFAULT_OVERLAP_RATIO,
        max_chunks,
        1,
    )
}

/// Plan chunks inside the absolute region `[start, end]`.
///
/// - A region no longer than `chunk_size` yields exactly three overlapping
///   sub-chunks: `[0, d/2]`, `[d/4, 3d/4]`, `[d/2, d]` (relative to `start`)
/// - Otherwise windows of `chunk_size` advance by `chunk_size * (1 - overlap)`,
///   with a final window anchored to `end` when the steps stop short of it
/// - More than `max_chunks` windows are thinned by uniform index subsampling
///   that always keeps the first and last window
///
/// Chunks are indexed from 0 in time order.
pub fn plan_region(
    start: f64,
    end: f64,
    chunk_size: f64,
    overlap_ratio: f64,
    max_chunks: usize,
    pass_number: u8,
) -> Vec<Chunk> {
    let duration = end - start;
    if !(duration > EPSILON) || !(chunk_size > 0.0) || max_chunks == 0 {
        return Vec::new();
    }

    let spans: Vec<(f64, f64)> = if duration <= chunk_size + EPSILON {
        vec![
            (0.0, duration / 2.0),
            (duration / 4.0, duration * 3.0 / 4.0),
            (duration / 2.0, duration),
        ]
    } else {
        stepped_spans(duration, chunk_size, overlap_ratio)
    };

    subsample(spans, max_chunks)
        .into_iter()
        .enumerate()
        .map(|(index, (s, e))| Chunk {
            index,
            start_time: start + s,
            end_time: start + e,
            pass_number,
        })
        .collect()
}

fn stepped_spans(duration: f64, chunk_size: f64, overlap_ratio: f64) -> Vec<(f64, f64)> {
    let overlap = overlap_ratio.clamp(0.0, 0.95);
    let step = chunk_size * (1.0 - overlap);

    let mut spans = Vec::new();
    let mut i = 0usize;
    loop {
        let s = i as f64 * step;
        if s + chunk_size > duration + EPSILON {
            break;
        }
        spans.push((s, s + chunk_size));
        i += 1;
    }

    let covered = spans.last().map(|&(_, e)| e).unwrap_or(0.0);
    if covered < duration - EPSILON {
        spans.push((duration - chunk_size, duration));
    }
    spans
}

/// Keep `max` items by uniform index subsampling (first and last kept).
fn subsample<T: Copy>(items: Vec<T>, max: usize) -> Vec<T> {
    let n = items.len();
    if n <= max {
        return items;
    }
    if max == 1 {
        return vec![items[(n - 1) / 2]];
    }
    (0..max)
        .map(|i| {
            let idx = ((i * (n - 1)) as f64 / (max - 1) as f64).round() as usize;
            items[idx.min(n - 1)]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_duration_gives_three_sub_chunks() {
        let chunks = create_chunks(20.0, 30.0, 10);
        assert_eq!(chunks.len(), 3);
        let spans: Vec<(f64, f64)> = chunks.iter().map(|c| (c.start_time, c.end_time)).collect();
        assert_eq!(spans, vec![(0.0, 10.0), (5.0, 15.0), (10.0, 20.0)]);
        assert!(chunks.iter().all(|c| c.pass_number == 1));
    }

    #[test]
    fn stepped_chunks_use_seventy_percent_overlap() {
        let chunks = create_chunks(100.0, 10.0, 1000);
        assert!((chunks[1].start_time - chunks[0].start_time - 3.0).abs() < 1e-9);
        for c in &chunks {
            assert!(c.start_time < c.end_time);
            assert!((c.duration() - 10.0).abs() < 1e-9);
        }
    }

    #[test]
    fn tail_chunk_is_anchored_to_end() {
        // 0, 9, 18, 27 fit; 36 does not, so [30, 60] is appended
        let chunks = create_chunks(60.0, 30.0, 100);
        assert_eq!(chunks.len(), 5);
        let last = chunks.last().unwrap();
        assert_eq!(last.start_time, 30.0);
        assert_eq!(last.end_time, 60.0);
    }

    #[test]
    fn max_chunks_keeps_first_and_last() {
        let chunks = create_chunks(60.0, 30.0, 2);
        assert_eq!(chunks.len(), 2);
        assert_eq!((chunks[0].start_time, chunks[0].end_time), (0.0, 30.0));
        assert_eq!((chunks[1].start_time, chunks[1].end_time), (30.0, 60.0));
        assert_eq!(chunks[1].index, 1, "subsampled chunks are re-indexed");
    }

    #[test]
    fn plan_region_offsets_and_tags_pass() {
        let chunks = plan_region(100.0, 130.0, 10.0, 0.5, 50, 2);
        assert_eq!(chunks.first().unwrap().start_time, 100.0);
        assert_eq!(chunks.last().unwrap().end_time, 130.0);
        assert!(chunks.iter().all(|c| c.pass_number == 2));
        assert_eq!(chunks.len(), 5);
    }

    #[test]
    fn empty_region_yields_nothing() {
        assert!(create_chunks(0.0, 30.0, 10).is_empty());
        assert!(plan_region(5.0, 5.0, 10.0, 0.5, 10, 2).is_empty());
    }
}
