// THEORY:
// The `pipeline` module is the top-level, synchronous API of the comparison engine.
// It wraps the `ParallelPixelProcessor` with the one analyzer a visual-regression
// suite actually needs: "do these two screenshots match within tolerance, and if
// not, where do they differ?"
//
// The analyzer runs concurrently on every chunk worker, so all of its shared state
// is synchronized: the mismatch count comes from the processor's per-chunk tallies,
// the largest delta and the divergence box are atomics, and the divergent positions
// go through a mutex. Positions are kept as an ordered set of linear indices trimmed
// to the lowest N, which makes the recorded sample identical for every worker count.
// The box is tracked over every mismatch, so it stays exact when the sample is cut.
//
// Atomics are only written when a value actually improves on what is stored, and
// the mutex is skipped once an index can no longer enter a full sample. Workers
// mostly read shared cache lines instead of fighting over them.

use crate::core_modules::error::ProcessorResult;
use crate::core_modules::parallel_processor::{ParallelPixelProcessor, ProcessorConfig};
use crate::core_modules::pixel_buffer::PixelBuffer;
use crate::core_modules::position::{Position, position_of};
use crate::core_modules::smart_pixel::SmartPixel;
use rayon::ThreadPool;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

// Re-export key data structures for the public API.
pub use crate::core_modules::smart_pixel::DeltaMetric;

const DEFAULT_MAX_RECORDED_POSITIONS: usize = 1024;

/// Configuration for a `VisualComparator`.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonConfig {
    /// How the difference between two pixels is measured.
    pub metric: DeltaMetric,
    /// A pixel mismatches when its delta is strictly greater than this.
    pub color_threshold: f64,
    /// Fraction of mismatching pixels (0.0-1.0) still accepted as a match.
    pub mismatch_tolerance: f64,
    /// Whether divergent positions are collected at all.
    pub record_positions: bool,
    /// Upper bound on collected positions; the lowest row-major ones are kept.
    pub max_recorded_positions: usize,
    pub processor: ProcessorConfig,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            metric: DeltaMetric::default(),
            color_threshold: 0.0,
            mismatch_tolerance: 0.0,
            record_positions: true,
            max_recorded_positions: DEFAULT_MAX_RECORDED_POSITIONS,
            processor: ProcessorConfig::default(),
        }
    }
}

impl ComparisonConfig {
    pub fn with_metric(mut self, metric: DeltaMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_color_threshold(mut self, threshold: f64) -> Self {
        self.color_threshold = threshold;
        self
    }

    pub fn with_mismatch_tolerance(mut self, tolerance: f64) -> Self {
        self.mismatch_tolerance = tolerance;
        self
    }

    pub fn with_record_positions(mut self, record: bool) -> Self {
        self.record_positions = record;
        self
    }

    pub fn with_max_recorded_positions(mut self, max: usize) -> Self {
        self.max_recorded_positions = max;
        self
    }

    pub fn with_workers(mut self, worker_ceiling: usize) -> Self {
        self.processor.worker_ceiling = worker_ceiling;
        self
    }
}

/// The smallest rectangle containing every divergent position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DivergenceBounds {
    pub min: Position,
    pub max: Position,
}

impl DivergenceBounds {
    pub fn width(&self) -> u32 {
        self.max.x - self.min.x + 1
    }

    pub fn height(&self) -> u32 {
        self.max.y - self.min.y + 1
    }
}

/// The result of comparing a current image against its baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonReport {
    pub width: u32,
    pub height: u32,
    pub total_pixels: usize,
    pub mismatched_pixels: usize,
    /// `mismatched_pixels / total_pixels`.
    pub mismatch_ratio: f64,
    /// Largest delta seen under the configured metric, mismatching or not.
    pub max_delta: f64,
    /// Divergent positions in row-major order, possibly truncated.
    pub divergent_positions: Vec<Position>,
    /// True when more pixels diverged than were recorded.
    pub positions_truncated: bool,
    /// Box around every mismatching pixel, recorded or not.
    pub bounds: Option<DivergenceBounds>,
    /// Whether the images match within tolerance.
    pub matches: bool,
}

impl ComparisonReport {
    pub fn is_identical(&self) -> bool {
        self.mismatched_pixels == 0
    }

    /// Bounding box of every divergent pixel, `None` when the images are identical.
    pub fn divergence_bounds(&self) -> Option<DivergenceBounds> {
        self.bounds
    }
}

/// Shared state the comparison analyzer writes into from every chunk worker.
struct DivergenceTracker {
    max_delta_bits: AtomicU64,
    min_x: AtomicU32,
    min_y: AtomicU32,
    max_x: AtomicU32,
    max_y: AtomicU32,
    recorded: Mutex<BTreeSet<usize>>,
    record_limit: usize,
    /// Largest recorded index once the sample is full. Only ever decreases.
    record_ceiling: AtomicUsize,
}

impl DivergenceTracker {
    fn new(record_limit: usize) -> Self {
        Self {
            // Deltas are non-negative, so their IEEE bit patterns order like the values.
            max_delta_bits: AtomicU64::new(0f64.to_bits()),
            min_x: AtomicU32::new(u32::MAX),
            min_y: AtomicU32::new(u32::MAX),
            max_x: AtomicU32::new(0),
            max_y: AtomicU32::new(0),
            recorded: Mutex::new(BTreeSet::new()),
            record_limit,
            record_ceiling: AtomicUsize::new(usize::MAX),
        }
    }

    fn observe_delta(&self, delta: f64) {
        let bits = delta.to_bits();
        if bits > self.max_delta_bits.load(Ordering::Relaxed) {
            self.max_delta_bits.fetch_max(bits, Ordering::Relaxed);
        }
    }

    fn observe_mismatch(&self, position: Position, width: u32) {
        lower(&self.min_x, position.x);
        lower(&self.min_y, position.y);
        raise(&self.max_x, position.x);
        raise(&self.max_y, position.y);

        if self.record_limit == 0 {
            return;
        }
        let index = position.linear_index(width);
        if index >= self.record_ceiling.load(Ordering::Relaxed) {
            return;
        }
        let mut recorded = self.recorded.lock().unwrap_or_else(PoisonError::into_inner);
        recorded.insert(index);
        if recorded.len() > self.record_limit {
            recorded.pop_last();
        }
        if recorded.len() == self.record_limit {
            if let Some(&largest) = recorded.last() {
                self.record_ceiling.store(largest, Ordering::Relaxed);
            }
        }
    }

    fn max_delta(&self) -> f64 {
        f64::from_bits(self.max_delta_bits.load(Ordering::Relaxed))
    }

    fn bounds(&self) -> Option<DivergenceBounds> {
        let min_x = self.min_x.load(Ordering::Relaxed);
        // x < width <= u32::MAX, so MAX means nothing diverged.
        if min_x == u32::MAX {
            return None;
        }
        Some(DivergenceBounds {
            min: Position::new(min_x, self.min_y.load(Ordering::Relaxed)),
            max: Position::new(self.max_x.load(Ordering::Relaxed), self.max_y.load(Ordering::Relaxed)),
        })
    }

    fn into_recorded(self) -> BTreeSet<usize> {
        self.recorded.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lower(slot: &AtomicU32, value: u32) {
    if value < slot.load(Ordering::Relaxed) {
        slot.fetch_min(value, Ordering::Relaxed);
    }
}

fn raise(slot: &AtomicU32, value: u32) {
    if value > slot.load(Ordering::Relaxed) {
        slot.fetch_max(value, Ordering::Relaxed);
    }
}

/// Compares baseline and current images on a shared, reusable worker pool.
#[derive(Debug)]
pub struct VisualComparator {
    config: ComparisonConfig,
    pool: Arc<ThreadPool>,
}

impl VisualComparator {
    pub fn new(config: ComparisonConfig) -> ProcessorResult<Self> {
        let pool = Arc::new(config.processor.build_pool()?);
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &ComparisonConfig {
        &self.config
    }

    /// Convenience for callers that only need the verdict.
    pub fn matches(&self, baseline: &dyn PixelBuffer, current: &dyn PixelBuffer) -> ProcessorResult<bool> {
        Ok(self.compare(baseline, current)?.matches)
    }

    pub fn compare(&self, baseline: &dyn PixelBuffer, current: &dyn PixelBuffer) -> ProcessorResult<ComparisonReport> {
        let config = &self.config;
        let processor = ParallelPixelProcessor::with_config(config.processor)
            .with_pool(self.pool.clone())
            .with_baseline(baseline)
            .with_current(current);

        let record_limit = if config.record_positions {
            config.max_recorded_positions
        } else {
            0
        };
        let tracker = DivergenceTracker::new(record_limit);
        let width = baseline.width();

        let stats = processor.analyze(|expected, actual, position| {
            let delta = SmartPixel::new(expected).delta(&SmartPixel::new(actual), config.metric);
            tracker.observe_delta(delta);

            let mismatch = delta > config.color_threshold;
            if mismatch {
                tracker.observe_mismatch(position, width);
            }
            !mismatch
        })?;

        let (width, height) = baseline.dimensions();
        let total_pixels = stats.visited;
        let mismatched_pixels = stats.rejected;
        let max_delta = tracker.max_delta();
        let bounds = tracker.bounds();
        let divergent_positions: Vec<Position> = tracker
            .into_recorded()
            .into_iter()
            .map(|index| position_of(index, width))
            .collect();
        let mismatch_ratio = mismatched_pixels as f64 / total_pixels as f64;
        let matches = mismatch_ratio <= config.mismatch_tolerance;

        let report = ComparisonReport {
            width,
            height,
            total_pixels,
            mismatched_pixels,
            mismatch_ratio,
            max_delta,
            positions_truncated: config.record_positions && divergent_positions.len() < mismatched_pixels,
            divergent_positions,
            bounds,
            matches,
        };

        debug!(chunks = stats.chunks, bounds = ?report.divergence_bounds(), "comparison traversal joined");
        info!(
            width,
            height,
            mismatched = report.mismatched_pixels,
            ratio = report.mismatch_ratio,
            matches = report.matches,
            "comparison finished"
        );
        Ok(report)
    }
}
