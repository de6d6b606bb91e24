// THEORY:
// The `Pixel` module is the most fundamental unit of the comparison engine. It is a
// "dumb" data container for a single RGBA8 color plus the single-pixel heuristics
// (sum, luminance) that the pairwise comparisons in `SmartPixel` build on.
//
// A `Pixel` is what a `PixelBuffer` hands out for a coordinate and what the
// analyzer receives for both images. It is `Copy` so that chunk workers can pass
// it around freely without touching the underlying buffers.

use image::Rgba;

pub type Channel = u8;
pub type Luminance = f64;
pub type Sum = u16;

pub const CHANNELS: usize = 4;

/// A single RGBA pixel as read from a baseline or current image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Pixel {
    /// The red channel value (0-255).
    pub red: Channel,
    /// The green channel value (0-255).
    pub green: Channel,
    /// The blue channel value (0-255).
    pub blue: Channel,
    /// The alpha (transparency) channel value (0-255).
    pub alpha: Channel,
}

impl Pixel {
    pub const fn new(red: Channel, green: Channel, blue: Channel, alpha: Channel) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }

    /// A fully opaque pixel.
    pub const fn opaque(red: Channel, green: Channel, blue: Channel) -> Self {
        Self::new(red, green, blue, u8::MAX)
    }

    /// Luminance estimate (Rec. 601 luma) on the 0..255 scale.
    pub fn luminance(&self) -> Luminance {
        0.299_f64 * f64::from(self.red) + 0.587_f64 * f64::from(self.green) + 0.114_f64 * f64::from(self.blue)
    }

    /// Raw RGB channel sum. Alpha is not included.
    pub fn sum(&self) -> Sum {
        Sum::from(self.red) + Sum::from(self.green) + Sum::from(self.blue)
    }

    pub const fn channels(&self) -> [Channel; CHANNELS] {
        [self.red, self.green, self.blue, self.alpha]
    }
}

impl From<Rgba<u8>> for Pixel {
    fn from(rgba: Rgba<u8>) -> Self {
        let Rgba([red, green, blue, alpha]) = rgba;
        Self::new(red, green, blue, alpha)
    }
}

impl From<Pixel> for Rgba<u8> {
    fn from(pixel: Pixel) -> Self {
        Rgba(pixel.channels())
    }
}

impl From<&[u8]> for Pixel {
    /// Reads one RGBA pixel from a 4-byte slice. Panics on any other length,
    /// which can only come from broken stride arithmetic in the caller.
    fn from(bytes: &[u8]) -> Self {
        assert_eq!(bytes.len(), CHANNELS, "cannot convert {} bytes into a pixel", bytes.len());
        Self::new(bytes[0], bytes[1], bytes[2], bytes[3])
    }
}
