// THEORY:
// The `SmartPixel` module provides the analytical capabilities for comparing a
// baseline pixel against a current pixel. It is a "smart" wrapper around a "dumb"
// `Pixel` and its whole purpose is to quantify the difference between two pixels.
//
// Key architectural principles:
// 1.  **Comparative Analysis**: Every measurement takes another pixel as input.
// 2.  **Multiple "Lenses"**: Each `DeltaMetric` answers a different question.
//     - `MaxChannel`: strictest, any single channel (alpha included) drifting.
//     - `ColorSum`: total RGB drift, tolerant of tiny spread-out changes.
//     - `Luminance`: perceived brightness only, ignores hue shifts.
// 3.  **Optimization**: `luminance` is computed once in the constructor.

use crate::core_modules::pixel::{Luminance, Pixel};

pub type ChannelDelta = u8;
pub type ColorDelta = u16;
pub type LuminanceDelta = f64;

/// Which measurement decides whether a pixel pair counts as a mismatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeltaMetric {
    /// Largest absolute difference of any channel, alpha included (0..=255).
    #[default]
    MaxChannel,
    /// Sum of absolute RGB differences (0..=765).
    ColorSum,
    /// Absolute difference in Rec. 601 luminance (0.0..=255.0).
    Luminance,
}

/// A `Pixel` with its comparison inputs precomputed.
#[derive(Debug, Clone, Copy)]
pub struct SmartPixel {
    pub pixel: Pixel,
    luminance: Luminance,
}

impl SmartPixel {
    pub fn new(pixel: Pixel) -> Self {
        Self {
            luminance: pixel.luminance(),
            pixel,
        }
    }

    pub fn delta_channel(&self, other: &SmartPixel) -> ChannelDelta {
        self.pixel
            .channels()
            .iter()
            .zip(other.pixel.channels().iter())
            .map(|(a, b)| a.abs_diff(*b))
            .max()
            .unwrap_or(0)
    }

    pub fn delta_color(&self, other: &SmartPixel) -> ColorDelta {
        let a = self.pixel;
        let b = other.pixel;
        ColorDelta::from(a.red.abs_diff(b.red))
            + ColorDelta::from(a.green.abs_diff(b.green))
            + ColorDelta::from(a.blue.abs_diff(b.blue))
    }

    pub fn delta_luminance(&self, other: &SmartPixel) -> LuminanceDelta {
        (self.luminance - other.luminance).abs()
    }

    /// Measures the delta under `metric`, widened to `f64` so thresholds can be
    /// expressed uniformly.
    pub fn delta(&self, other: &SmartPixel, metric: DeltaMetric) -> f64 {
        match metric {
            DeltaMetric::MaxChannel => f64::from(self.delta_channel(other)),
            DeltaMetric::ColorSum => f64::from(self.delta_color(other)),
            DeltaMetric::Luminance => self.delta_luminance(other),
        }
    }
}
