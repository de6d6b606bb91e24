// THEORY:
// A `Position` is the 2D coordinate of a pixel, always derived from its linear
// row-major index and the shared image width. It is never stored alongside the
// pixel data; every worker recomputes it with the same formula, which is why a
// chunked traversal and a single-threaded traversal assign identical coordinates.

use std::fmt;

/// A pixel coordinate, `x` along the row and `y` down the columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub x: u32,
    pub y: u32,
}

impl Position {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// The row-major linear index of this position: `y * width + x`.
    pub const fn linear_index(&self, width: u32) -> usize {
        self.y as usize * width as usize + self.x as usize
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Maps a linear pixel index to its coordinate in a row-major image of `width`.
///
/// `width` must be non-zero; the processor validates this before traversal.
#[inline]
pub fn position_of(linear_index: usize, width: u32) -> Position {
    let width = width as usize;
    Position {
        x: (linear_index % width) as u32,
        y: (linear_index / width) as u32,
    }
}
