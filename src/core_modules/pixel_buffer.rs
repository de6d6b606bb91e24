// THEORY:
// A `PixelBuffer` is the read-only view the processor traverses. It only needs to
// report its dimensions and hand out a `Pixel` for a coordinate; where the pixels
// came from (a screenshot, a decoded baseline, a synthetic test pattern) is the
// caller's business.
//
// Key architectural principles:
// 1.  **Read-Only Contract**: `color_at` takes `&self`. No traversal ever writes to a
//     buffer, so chunk workers may read the same buffer concurrently without locks.
//     The trait requires `Sync` to make that sharing explicit.
// 2.  **Fatal Out-Of-Range**: Reading outside `[0, width) x [0, height)` is a
//     programming error and panics. A correct `ChunkPlan` never produces one.
// 3.  **Adapters, Not Codecs**: `RasterBuffer` wraps raw RGBA8 bytes, and the
//     `image` crate's in-memory buffers implement the trait directly. Decoding files
//     is left to whoever produced those buffers.

use crate::core_modules::error::ConfigurationError;
use crate::core_modules::pixel::{CHANNELS, Pixel};
use image::{DynamicImage, GenericImageView, RgbaImage};

/// A rectangular, immutable image that can be sampled by coordinate.
pub trait PixelBuffer: Sync {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// The color at `(x, y)`. Panics when the coordinate is out of range.
    fn color_at(&self, x: u32, y: u32) -> Pixel;

    fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    fn total_pixels(&self) -> usize {
        self.width() as usize * self.height() as usize
    }
}

/// An owned, row-major RGBA8 pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl RasterBuffer {
    /// Wraps `data` as a `width` x `height` RGBA8 image.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, ConfigurationError> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(ConfigurationError::BufferLength {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { width, height, data })
    }

    /// A buffer where every pixel is `fill`.
    pub fn filled(width: u32, height: u32, fill: Pixel) -> Self {
        let total = width as usize * height as usize;
        let mut data = Vec::with_capacity(total * CHANNELS);
        for _ in 0..total {
            data.extend_from_slice(&fill.channels());
        }
        Self { width, height, data }
    }

    /// A buffer whose pixels are produced by `f(x, y)` in row-major order.
    pub fn from_fn<F>(width: u32, height: u32, mut f: F) -> Self
    where
        F: FnMut(u32, u32) -> Pixel,
    {
        let mut data = Vec::with_capacity(width as usize * height as usize * CHANNELS);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(x, y).channels());
            }
        }
        Self { width, height, data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Overwrites one pixel. Only available while the caller owns the buffer
    /// exclusively, never during a traversal.
    pub fn set_color(&mut self, x: u32, y: u32, pixel: Pixel) {
        let offset = self.byte_offset(x, y);
        self.data[offset..offset + CHANNELS].copy_from_slice(&pixel.channels());
    }

    fn byte_offset(&self, x: u32, y: u32) -> usize {
        assert!(
            x < self.width && y < self.height,
            "pixel ({x}, {y}) out of range for {}x{} buffer",
            self.width,
            self.height
        );
        (y as usize * self.width as usize + x as usize) * CHANNELS
    }
}

impl PixelBuffer for RasterBuffer {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn color_at(&self, x: u32, y: u32) -> Pixel {
        let offset = self.byte_offset(x, y);
        Pixel::from(&self.data[offset..offset + CHANNELS])
    }
}

impl From<RgbaImage> for RasterBuffer {
    fn from(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw(),
        }
    }
}

impl PixelBuffer for RgbaImage {
    fn width(&self) -> u32 {
        RgbaImage::width(self)
    }

    fn height(&self) -> u32 {
        RgbaImage::height(self)
    }

    fn color_at(&self, x: u32, y: u32) -> Pixel {
        Pixel::from(*self.get_pixel(x, y))
    }
}

impl PixelBuffer for DynamicImage {
    fn width(&self) -> u32 {
        GenericImageView::width(self)
    }

    fn height(&self) -> u32 {
        GenericImageView::height(self)
    }

    fn color_at(&self, x: u32, y: u32) -> Pixel {
        assert!(
            self.in_bounds(x, y),
            "pixel ({x}, {y}) out of range for {}x{} image",
            GenericImageView::width(self),
            GenericImageView::height(self)
        );
        Pixel::from(GenericImageView::get_pixel(self, x, y))
    }
}
