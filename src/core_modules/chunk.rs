// THEORY:
// A `Chunk` is a contiguous run of linear pixel indices handed to exactly one
// worker. The `ChunkPlan` is the partition of the whole image into such runs, and
// `plan` is the pure function that builds it.
//
// Key architectural principles:
// 1.  **Exact Coverage**: The ranges are sorted, disjoint and their union is
//     `[0, total_pixels)`. Every pixel belongs to exactly one chunk.
// 2.  **Balanced Splits**: Every chunk holds `total / workers` pixels and the first
//     `total % workers` chunks hold one more, so no chunk differs from another by
//     more than one pixel regardless of divisibility.
// 3.  **Clamped Worker Count**: Never more chunks than pixels, never fewer than one.
//     An image of 9 pixels asked to split 20 ways gets 9 single-pixel chunks.
// 4.  **Purity**: No shared state and no randomness; the same inputs always produce
//     the same plan.

use std::ops::Range;

/// One contiguous run of linear pixel indices, `[start, end)`.
pub type Chunk = Range<usize>;

/// An ordered partition of `[0, total_pixels)` into contiguous chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    total_pixels: usize,
    chunks: Vec<Chunk>,
}

impl ChunkPlan {
    pub fn total_pixels(&self) -> usize {
        self.total_pixels
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Chunk> {
        self.chunks.iter()
    }
}

impl<'a> IntoIterator for &'a ChunkPlan {
    type Item = &'a Chunk;
    type IntoIter = std::slice::Iter<'a, Chunk>;

    fn into_iter(self) -> Self::IntoIter {
        self.chunks.iter()
    }
}

/// Clamps a requested worker count to `1 ..= total_pixels` (at least 1).
pub fn effective_workers(total_pixels: usize, worker_count: usize) -> usize {
    worker_count.min(total_pixels).max(1)
}

/// Splits `total_pixels` into `worker_count` nearly-equal contiguous chunks.
pub fn plan(total_pixels: usize, worker_count: usize) -> ChunkPlan {
    let workers = effective_workers(total_pixels, worker_count);
    let base_size = total_pixels / workers;
    let remainder = total_pixels % workers;

    let mut chunks = Vec::with_capacity(workers);
    let mut start = 0;
    for chunk_index in 0..workers {
        let size = base_size + usize::from(chunk_index < remainder);
        chunks.push(start..start + size);
        start += size;
    }
    debug_assert_eq!(start, total_pixels);

    ChunkPlan { total_pixels, chunks }
}
