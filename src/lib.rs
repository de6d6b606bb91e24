// THEORY:
// This file is the main entry point for the `pixel_parity` library crate.
//
// The public surface has three layers. `core_modules` holds the traversal engine
// itself: pixel buffers, the chunk planner, coordinate mapping and the
// `ParallelPixelProcessor` that walks two images with a caller-supplied analyzer.
// `pipeline` builds the tolerance-based `VisualComparator` on top of it, and
// `parallel_pipeline` wraps that comparator in an async job pool for suites that
// compare many screenshots at once.

pub mod core_modules;
pub mod parallel_pipeline;
pub mod pipeline;

pub use core_modules::chunk::{ChunkPlan, plan};
pub use core_modules::error::{AnalyzerError, ConfigurationError, ProcessorError, ProcessorResult};
pub use core_modules::parallel_processor::{ParallelPixelProcessor, ProcessorConfig, TraversalStats};
pub use core_modules::pixel::Pixel;
pub use core_modules::pixel_buffer::{PixelBuffer, RasterBuffer};
pub use core_modules::position::{Position, position_of};
