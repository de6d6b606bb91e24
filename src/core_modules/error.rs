//! Error types for the comparison engine.

use crate::core_modules::position::Position;
use std::error::Error as StdError;
use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type for processor and comparator operations.
pub type ProcessorResult<T> = Result<T, ProcessorError>;

/// The buffers handed to the processor cannot be traversed.
///
/// Always raised before any chunk is dispatched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("no baseline buffer attached")]
    MissingBaseline,

    #[error("no current buffer attached")]
    MissingCurrent,

    #[error("buffer dimensions differ: baseline {baseline_width}x{baseline_height}, current {current_width}x{current_height}")]
    DimensionMismatch {
        baseline_width: u32,
        baseline_height: u32,
        current_width: u32,
        current_height: u32,
    },

    #[error("buffer has an empty dimension: {width}x{height}")]
    EmptyBuffer { width: u32, height: u32 },

    #[error("raw buffer holds {actual} bytes, {width}x{height} RGBA needs {expected}")]
    BufferLength {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// A failure raised by the caller's analyzer during traversal.
#[derive(Debug, Error)]
#[error("analyzer failed in chunk {chunk} at {position}: {source}")]
pub struct AnalyzerError {
    /// Index of the chunk in the plan that reported this failure.
    pub chunk: usize,
    /// The pixel the analyzer was looking at when it failed.
    pub position: Position,
    #[source]
    pub source: BoxError,
    /// How many other chunks also failed during the same traversal.
    pub suppressed: usize,
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),

    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl ProcessorError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, ProcessorError::Configuration(_))
    }

    pub fn as_configuration(&self) -> Option<&ConfigurationError> {
        match self {
            ProcessorError::Configuration(err) => Some(err),
            _ => None,
        }
    }

    pub fn as_analyzer(&self) -> Option<&AnalyzerError> {
        match self {
            ProcessorError::Analyzer(err) => Some(err),
            _ => None,
        }
    }
}
