// THEORY:
// The `ParallelPixelProcessor` is the orchestrator of a comparison. It is not an
// analyzer itself; it owns the traversal. Given a baseline and a current buffer of
// identical dimensions, it cuts the pixel domain into a `ChunkPlan`, hands every
// chunk to one task on a bounded worker pool, and calls the caller's analyzer once
// for every pixel with both colors and the pixel's position.
//
// Key architectural principles:
// 1.  **Validate First**: Missing or mismatched buffers are rejected before a single
//     task is spawned.
// 2.  **Fan-Out / Join**: One task per chunk inside a rayon scope. The scope does not
//     return until every task has finished, so nothing outlives `analyze` and the
//     borrowed buffers never escape.
// 3.  **Ordered Within, Unordered Across**: Inside a chunk pixels are visited by
//     strictly increasing linear index. Chunks race each other freely; an analyzer
//     that aggregates state must synchronize it.
// 4.  **No Early Exit**: The analyzer's `bool` is tallied, not obeyed. Every chunk
//     runs to completion unless its own analyzer call fails.
// 5.  **Errors Survive the Join**: A failing chunk stops at the failing pixel and
//     reports it. After the join, the failure from the lowest chunk index is
//     surfaced and any others are counted as suppressed.
// 6.  **Reusable Pool**: The worker pool is built once per processor (or shared in
//     via `with_pool`) and reused by every traversal.

use crate::core_modules::chunk::{self, Chunk, ChunkPlan};
use crate::core_modules::error::{AnalyzerError, BoxError, ConfigurationError, ProcessorResult};
use crate::core_modules::pixel::Pixel;
use crate::core_modules::pixel_buffer::PixelBuffer;
use crate::core_modules::position::{Position, position_of};
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace, warn};

/// Environment variable consulted by `ProcessorConfig::from_env`.
pub const WORKERS_ENV_VAR: &str = "PIXEL_PARITY_WORKERS";

/// Tunable behaviour of a `ParallelPixelProcessor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Maximum number of chunks, and the size of the worker pool built for them.
    /// Values below one are treated as one.
    pub worker_ceiling: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            worker_ceiling: num_cpus::get().max(1),
        }
    }
}

impl ProcessorConfig {
    pub fn with_worker_ceiling(mut self, worker_ceiling: usize) -> Self {
        self.worker_ceiling = worker_ceiling;
        self
    }

    /// The default configuration, with the worker ceiling overridden by
    /// `PIXEL_PARITY_WORKERS` when that holds a positive integer.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self::default();
        let Some(raw) = lookup(WORKERS_ENV_VAR) else {
            return config;
        };
        match raw.trim().parse::<usize>() {
            Ok(workers) if workers > 0 => config.with_worker_ceiling(workers),
            _ => {
                warn!(value = %raw, var = WORKERS_ENV_VAR, "ignoring invalid worker ceiling");
                config
            }
        }
    }

    /// Builds a pool with one thread per allowed worker.
    pub fn build_pool(&self) -> Result<ThreadPool, ThreadPoolBuildError> {
        ThreadPoolBuilder::new()
            .num_threads(self.worker_ceiling.max(1))
            .thread_name(|index| format!("pixel-parity-{index}"))
            .build()
    }
}

/// What a completed traversal observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraversalStats {
    /// Number of analyzer invocations.
    pub visited: usize,
    /// Number of invocations that returned `false`.
    pub rejected: usize,
    /// Number of chunks the domain was split into.
    pub chunks: usize,
}

#[derive(Debug, Default)]
struct ChunkTally {
    visited: usize,
    rejected: usize,
}

struct ChunkFailure {
    position: Position,
    source: BoxError,
}

type ChunkOutcome = Result<ChunkTally, ChunkFailure>;

/// Walks two same-sized pixel buffers in parallel, pixel by pixel.
pub struct ParallelPixelProcessor<'a> {
    config: ProcessorConfig,
    baseline: Option<&'a dyn PixelBuffer>,
    current: Option<&'a dyn PixelBuffer>,
    pool: OnceLock<Arc<ThreadPool>>,
}

impl fmt::Debug for ParallelPixelProcessor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelPixelProcessor")
            .field("config", &self.config)
            .field("baseline", &self.baseline.map(|b| b.dimensions()))
            .field("current", &self.current.map(|c| c.dimensions()))
            .field("pool_ready", &self.pool.get().is_some())
            .finish()
    }
}

impl Default for ParallelPixelProcessor<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> ParallelPixelProcessor<'a> {
    /// An empty processor with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ProcessorConfig::default())
    }

    pub fn with_config(config: ProcessorConfig) -> Self {
        Self {
            config,
            baseline: None,
            current: None,
            pool: OnceLock::new(),
        }
    }

    /// Overrides the worker ceiling for this instance only.
    ///
    /// Drops a pool that was already built for the old ceiling; a pool shared in
    /// through `with_pool` should be attached after this call.
    pub fn with_workers(mut self, worker_ceiling: usize) -> Self {
        self.config.worker_ceiling = worker_ceiling;
        self.pool = OnceLock::new();
        self
    }

    /// Runs traversals on `pool` instead of building a private one.
    pub fn with_pool(mut self, pool: Arc<ThreadPool>) -> Self {
        self.pool = OnceLock::from(pool);
        self
    }

    pub fn with_baseline(mut self, buffer: &'a dyn PixelBuffer) -> Self {
        self.baseline = Some(buffer);
        self
    }

    pub fn with_current(mut self, buffer: &'a dyn PixelBuffer) -> Self {
        self.current = Some(buffer);
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn worker_ceiling(&self) -> usize {
        self.config.worker_ceiling
    }

    /// The chunk plan the next traversal will use.
    pub fn plan(&self) -> Result<ChunkPlan, ConfigurationError> {
        let (baseline, _) = self.validated_buffers()?;
        Ok(chunk::plan(baseline.total_pixels(), self.config.worker_ceiling))
    }

    /// Calls `analyzer` once for every pixel position.
    ///
    /// The analyzer may be invoked concurrently from several chunks; its return
    /// value is counted in `TraversalStats::rejected` and never stops traversal.
    pub fn analyze<F>(&self, analyzer: F) -> ProcessorResult<TraversalStats>
    where
        F: Fn(Pixel, Pixel, Position) -> bool + Sync,
    {
        self.try_analyze(|baseline, current, position| {
            Ok::<bool, Infallible>(analyzer(baseline, current, position))
        })
    }

    /// Like `analyze`, for analyzers that can fail.
    ///
    /// A failure ends its own chunk immediately; the remaining chunks still run to
    /// completion before the failure is returned.
    pub fn try_analyze<F, E>(&self, analyzer: F) -> ProcessorResult<TraversalStats>
    where
        F: Fn(Pixel, Pixel, Position) -> Result<bool, E> + Sync,
        E: Into<BoxError>,
    {
        let (baseline, current) = self.validated_buffers()?;
        let (width, height) = baseline.dimensions();
        let plan = chunk::plan(baseline.total_pixels(), self.config.worker_ceiling);
        let pool = self.pool()?;

        debug!(
            width,
            height,
            chunks = plan.len(),
            pool_threads = pool.current_num_threads(),
            "dispatching traversal"
        );

        let mut outcomes: Vec<Option<ChunkOutcome>> = Vec::with_capacity(plan.len());
        outcomes.resize_with(plan.len(), || None);

        let analyzer = &analyzer;
        let assignments = outcomes.iter_mut().zip(plan.iter()).enumerate();
        pool.scope(move |scope| {
            for (chunk_index, (slot, chunk)) in assignments {
                let chunk = chunk.clone();
                scope.spawn(move |_| {
                    *slot = Some(Self::run_chunk(chunk_index, chunk, width, baseline, current, analyzer));
                });
            }
        });

        Self::collect(outcomes, plan.len())
    }

    fn run_chunk<F, E>(
        chunk_index: usize,
        chunk: Chunk,
        width: u32,
        baseline: &dyn PixelBuffer,
        current: &dyn PixelBuffer,
        analyzer: &F,
    ) -> ChunkOutcome
    where
        F: Fn(Pixel, Pixel, Position) -> Result<bool, E>,
        E: Into<BoxError>,
    {
        let mut tally = ChunkTally::default();
        let (start, end) = (chunk.start, chunk.end);

        for index in chunk {
            let position = position_of(index, width);
            let expected = baseline.color_at(position.x, position.y);
            let actual = current.color_at(position.x, position.y);

            match analyzer(expected, actual, position) {
                Ok(true) => {}
                Ok(false) => tally.rejected += 1,
                Err(err) => {
                    return Err(ChunkFailure {
                        position,
                        source: err.into(),
                    });
                }
            }
            tally.visited += 1;
        }

        trace!(chunk = chunk_index, start, end, rejected = tally.rejected, "chunk complete");
        Ok(tally)
    }

    fn collect(outcomes: Vec<Option<ChunkOutcome>>, chunks: usize) -> ProcessorResult<TraversalStats> {
        let mut stats = TraversalStats {
            chunks,
            ..TraversalStats::default()
        };
        let mut first_failure: Option<(usize, ChunkFailure)> = None;
        let mut failures = 0usize;

        for (chunk_index, outcome) in outcomes.into_iter().enumerate() {
            // Every slot is filled once the scope has joined.
            match outcome {
                Some(Ok(tally)) => {
                    stats.visited += tally.visited;
                    stats.rejected += tally.rejected;
                }
                Some(Err(failure)) => {
                    failures += 1;
                    if first_failure.is_none() {
                        first_failure = Some((chunk_index, failure));
                    }
                }
                None => unreachable!("chunk {chunk_index} finished without an outcome"),
            }
        }

        match first_failure {
            None => Ok(stats),
            Some((chunk, failure)) => {
                if failures > 1 {
                    warn!(failures, reported_chunk = chunk, "multiple chunks failed; reporting the first");
                }
                Err(AnalyzerError {
                    chunk,
                    position: failure.position,
                    source: failure.source,
                    suppressed: failures - 1,
                }
                .into())
            }
        }
    }

    fn validated_buffers(&self) -> Result<(&'a dyn PixelBuffer, &'a dyn PixelBuffer), ConfigurationError> {
        let baseline = self.baseline.ok_or(ConfigurationError::MissingBaseline)?;
        let current = self.current.ok_or(ConfigurationError::MissingCurrent)?;

        let (baseline_width, baseline_height) = baseline.dimensions();
        let (current_width, current_height) = current.dimensions();
        if (baseline_width, baseline_height) != (current_width, current_height) {
            return Err(ConfigurationError::DimensionMismatch {
                baseline_width,
                baseline_height,
                current_width,
                current_height,
            });
        }
        if baseline_width == 0 || baseline_height == 0 {
            return Err(ConfigurationError::EmptyBuffer {
                width: baseline_width,
                height: baseline_height,
            });
        }
        Ok((baseline, current))
    }

    fn pool(&self) -> Result<&ThreadPool, ThreadPoolBuildError> {
        if let Some(pool) = self.pool.get() {
            return Ok(pool.as_ref());
        }
        let pool = Arc::new(self.config.build_pool()?);
        Ok(self.pool.get_or_init(|| pool).as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::error::ProcessorError;
    use crate::core_modules::pixel_buffer::RasterBuffer;
    use std::collections::HashSet;
    use std::panic::AssertUnwindSafe;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn gradient(width: u32, height: u32) -> RasterBuffer {
        RasterBuffer::from_fn(width, height, |x, y| Pixel::opaque(x as u8, y as u8, (x ^ y) as u8))
    }

    fn visited_positions(processor: &ParallelPixelProcessor<'_>) -> Vec<Position> {
        let seen = Mutex::new(Vec::new());
        processor
            .analyze(|_, _, position| {
                seen.lock().unwrap().push(position);
                true
            })
            .unwrap();
        seen.into_inner().unwrap()
    }

    #[test]
    fn three_by_three_over_two_workers_covers_every_position_once() {
        let baseline = gradient(3, 3);
        let current = gradient(3, 3);
        let processor = ParallelPixelProcessor::new()
            .with_workers(2)
            .with_baseline(&baseline)
            .with_current(&current);

        let positions = visited_positions(&processor);
        assert_eq!(positions.len(), 9);
        let unique: HashSet<Position> = positions.iter().copied().collect();
        assert_eq!(unique.len(), 9);
        for y in 0..3 {
            for x in 0..3 {
                assert!(unique.contains(&Position::new(x, y)));
            }
        }
    }

    #[test]
    fn invocation_count_is_independent_of_worker_count() {
        let baseline = RasterBuffer::filled(1080, 2220, Pixel::opaque(0, 0, 0));
        let current = RasterBuffer::filled(1080, 2220, Pixel::opaque(0, 0, 0));

        for workers in [1, 2, 7] {
            let count = AtomicUsize::new(0);
            let stats = ParallelPixelProcessor::new()
                .with_workers(workers)
                .with_baseline(&baseline)
                .with_current(&current)
                .analyze(|_, _, _| {
                    count.fetch_add(1, Ordering::Relaxed);
                    true
                })
                .unwrap();
            assert_eq!(count.load(Ordering::Relaxed), 2_397_600, "workers = {workers}");
            assert_eq!(stats.visited, 2_397_600);
            assert_eq!(stats.chunks, workers);
        }
    }

    #[test]
    fn analyzer_sees_colors_from_the_right_buffer_and_position() {
        let baseline = gradient(7, 5);
        let mut current = gradient(7, 5);
        current.set_color(4, 3, Pixel::opaque(200, 200, 200));

        let stats = ParallelPixelProcessor::new()
            .with_workers(3)
            .with_baseline(&baseline)
            .with_current(&current)
            .analyze(|expected, actual, position| {
                assert_eq!(expected, baseline.color_at(position.x, position.y));
                assert_eq!(actual, current.color_at(position.x, position.y));
                expected == actual
            })
            .unwrap();

        assert_eq!(stats.visited, 35);
        assert_eq!(stats.rejected, 1);
    }

    #[test]
    fn pixels_within_a_chunk_are_visited_in_increasing_order() {
        let baseline = gradient(13, 11);
        let current = gradient(13, 11);
        let processor = ParallelPixelProcessor::new()
            .with_workers(4)
            .with_baseline(&baseline)
            .with_current(&current);
        let plan = processor.plan().unwrap();

        let per_chunk: Vec<Mutex<Vec<usize>>> = plan.iter().map(|_| Mutex::new(Vec::new())).collect();
        processor
            .analyze(|_, _, position| {
                let index = position.linear_index(13);
                let chunk = plan.iter().position(|c| c.contains(&index)).unwrap();
                per_chunk[chunk].lock().unwrap().push(index);
                true
            })
            .unwrap();

        for (chunk, seen) in plan.iter().zip(per_chunk) {
            let seen = seen.into_inner().unwrap();
            assert_eq!(seen, chunk.clone().collect::<Vec<_>>());
        }
    }

    #[test]
    fn single_worker_serializes_the_traversal() {
        let baseline = gradient(6, 4);
        let current = gradient(6, 4);
        let processor = ParallelPixelProcessor::new()
            .with_workers(1)
            .with_baseline(&baseline)
            .with_current(&current);

        let positions = visited_positions(&processor);
        let indices: Vec<usize> = positions.iter().map(|p| p.linear_index(6)).collect();
        assert_eq!(indices, (0..24).collect::<Vec<_>>());
    }

    #[test]
    fn more_workers_than_pixels_is_clamped() {
        let baseline = gradient(2, 2);
        let current = gradient(2, 2);
        let processor = ParallelPixelProcessor::new()
            .with_workers(64)
            .with_baseline(&baseline)
            .with_current(&current);

        assert_eq!(processor.plan().unwrap().len(), 4);
        assert_eq!(visited_positions(&processor).len(), 4);
    }

    #[test]
    fn baseline_only_is_a_configuration_error_and_dispatches_nothing() {
        let baseline = gradient(4, 4);
        let calls = AtomicUsize::new(0);
        let err = ParallelPixelProcessor::new()
            .with_baseline(&baseline)
            .analyze(|_, _, _| {
                calls.fetch_add(1, Ordering::Relaxed);
                true
            })
            .unwrap_err();

        assert_eq!(err.as_configuration(), Some(&ConfigurationError::MissingCurrent));
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn no_buffers_is_a_configuration_error() {
        let err = ParallelPixelProcessor::new().analyze(|_, _, _| true).unwrap_err();
        assert_eq!(err.as_configuration(), Some(&ConfigurationError::MissingBaseline));
    }

    #[test]
    fn buffers_attach_in_either_order() {
        let baseline = gradient(3, 2);
        let current = gradient(3, 2);
        let stats = ParallelPixelProcessor::new()
            .with_current(&current)
            .with_baseline(&baseline)
            .analyze(|_, _, _| true)
            .unwrap();
        assert_eq!(stats.visited, 6);
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let baseline = gradient(4, 3);
        let current = gradient(3, 4);
        let err = ParallelPixelProcessor::new()
            .with_baseline(&baseline)
            .with_current(&current)
            .analyze(|_, _, _| true)
            .unwrap_err();

        assert_eq!(
            err.as_configuration(),
            Some(&ConfigurationError::DimensionMismatch {
                baseline_width: 4,
                baseline_height: 3,
                current_width: 3,
                current_height: 4,
            })
        );
    }

    #[test]
    fn empty_buffers_are_rejected() {
        let baseline = RasterBuffer::filled(0, 5, Pixel::default());
        let current = RasterBuffer::filled(0, 5, Pixel::default());
        let err = ParallelPixelProcessor::new()
            .with_baseline(&baseline)
            .with_current(&current)
            .analyze(|_, _, _| true)
            .unwrap_err();
        assert_eq!(
            err.as_configuration(),
            Some(&ConfigurationError::EmptyBuffer { width: 0, height: 5 })
        );
    }

    #[test]
    fn traversal_does_not_mutate_buffers() {
        let baseline = gradient(17, 9);
        let current = gradient(17, 9);
        let baseline_before = baseline.as_bytes().to_vec();
        let current_before = current.as_bytes().to_vec();

        ParallelPixelProcessor::new()
            .with_workers(5)
            .with_baseline(&baseline)
            .with_current(&current)
            .analyze(|_, _, _| true)
            .unwrap();

        assert_eq!(baseline.as_bytes(), baseline_before.as_slice());
        assert_eq!(current.as_bytes(), current_before.as_slice());
    }

    #[test]
    fn analyzer_failure_is_reported_after_other_chunks_finish() {
        let baseline = gradient(10, 10);
        let current = gradient(10, 10);
        let calls = AtomicUsize::new(0);

        let err = ParallelPixelProcessor::new()
            .with_workers(4)
            .with_baseline(&baseline)
            .with_current(&current)
            .try_analyze(|_, _, position| {
                calls.fetch_add(1, Ordering::Relaxed);
                if position == Position::new(5, 3) {
                    Err("unreadable pixel")
                } else {
                    Ok(true)
                }
            })
            .unwrap_err();

        let failure = match err {
            ProcessorError::Analyzer(failure) => failure,
            other => panic!("expected analyzer error, got {other:?}"),
        };
        // Chunks of 25: index 35 sits in chunk 1 at its 11th pixel.
        assert_eq!(failure.chunk, 1);
        assert_eq!(failure.position, Position::new(5, 3));
        assert_eq!(failure.suppressed, 0);
        assert_eq!(failure.source.to_string(), "unreadable pixel");
        assert_eq!(calls.load(Ordering::Relaxed), 25 * 3 + 11);
    }

    #[test]
    fn multiple_failures_report_the_lowest_chunk() {
        let baseline = gradient(8, 8);
        let current = gradient(8, 8);

        let err = ParallelPixelProcessor::new()
            .with_workers(4)
            .with_baseline(&baseline)
            .with_current(&current)
            .try_analyze(|_, _, position| {
                if position.x == 0 && position.y % 2 == 0 {
                    Err(format!("bad row {}", position.y))
                } else {
                    Ok(true)
                }
            })
            .unwrap_err();

        let failure = err.as_analyzer().expect("analyzer error");
        assert_eq!(failure.chunk, 0);
        assert_eq!(failure.position, Position::new(0, 0));
        assert_eq!(failure.suppressed, 3);
    }

    #[test]
    #[should_panic(expected = "analyzer gave up")]
    fn analyzer_panic_is_fatal() {
        let baseline = gradient(6, 6);
        let current = gradient(6, 6);

        let _ = ParallelPixelProcessor::new()
            .with_workers(3)
            .with_baseline(&baseline)
            .with_current(&current)
            .analyze(|_, _, position| {
                if position == Position::new(2, 4) {
                    panic!("analyzer gave up");
                }
                true
            });
    }

    #[test]
    fn analyzer_panic_surfaces_after_every_chunk_joins() {
        let baseline = gradient(10, 10);
        let current = gradient(10, 10);
        let calls = AtomicUsize::new(0);
        let processor = ParallelPixelProcessor::new()
            .with_workers(4)
            .with_baseline(&baseline)
            .with_current(&current);

        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            processor.analyze(|_, _, position| {
                calls.fetch_add(1, Ordering::Relaxed);
                if position == Position::new(5, 3) {
                    panic!("analyzer gave up");
                }
                true
            })
        }));

        assert!(result.is_err());
        // The panicking chunk stops at its 11th pixel, the other three finish.
        assert_eq!(calls.load(Ordering::Relaxed), 25 * 3 + 11);
    }

    #[test]
    fn pool_is_reused_across_traversals() {
        let baseline = gradient(5, 5);
        let current = gradient(5, 5);
        let processor = ParallelPixelProcessor::new()
            .with_workers(3)
            .with_baseline(&baseline)
            .with_current(&current);

        let first = processor.analyze(|_, _, _| true).unwrap();
        let pool_ptr = processor.pool.get().map(Arc::as_ptr);
        let second = processor.analyze(|_, _, _| true).unwrap();

        assert_eq!(first, second);
        assert!(pool_ptr.is_some());
        assert_eq!(processor.pool.get().map(Arc::as_ptr), pool_ptr);
    }

    #[test]
    fn shared_pool_is_used() {
        let pool = Arc::new(ProcessorConfig::default().with_worker_ceiling(2).build_pool().unwrap());
        let baseline = gradient(4, 4);
        let current = gradient(4, 4);
        let processor = ParallelPixelProcessor::new()
            .with_workers(6)
            .with_pool(pool.clone())
            .with_baseline(&baseline)
            .with_current(&current);

        let stats = processor.analyze(|_, _, _| true).unwrap();
        assert_eq!(stats.chunks, 6);
        assert_eq!(stats.visited, 16);
        assert!(Arc::ptr_eq(processor.pool.get().unwrap(), &pool));
    }

    #[test]
    fn env_override_for_worker_ceiling() {
        let config = ProcessorConfig::from_lookup(|key| (key == WORKERS_ENV_VAR).then(|| "3".to_string()));
        assert_eq!(config.worker_ceiling, 3);

        let fallback = ProcessorConfig::from_lookup(|_| Some("zero".to_string()));
        assert_eq!(fallback, ProcessorConfig::default());

        let zero = ProcessorConfig::from_lookup(|_| Some("0".to_string()));
        assert_eq!(zero, ProcessorConfig::default());

        let unset = ProcessorConfig::from_lookup(|_| None);
        assert_eq!(unset, ProcessorConfig::default());
    }

    #[test]
    fn default_ceiling_is_at_least_one() {
        assert!(ProcessorConfig::default().worker_ceiling >= 1);
    }
}
