//! Frame geometry and pixel layout

use serde::{Deserialize, Serialize};

/// Pixel formats moved through the pipeline.
///
/// The core never converts between these; a stage that needs a different
/// layout is a producer/consumer pair outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Gray8,
    Gray16,
    GrayF32,
    Rgb8,
    RgbF32,
    Bgr8,
    Bgra8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Gray16 => 2,
            PixelFormat::GrayF32 => 4,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            PixelFormat::Bgra8 => 4,
            PixelFormat::RgbF32 => 12,
        }
    }

    pub const fn components_per_pixel(self) -> usize {
        match self {
            PixelFormat::Gray8 | PixelFormat::Gray16 | PixelFormat::GrayF32 => 1,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 | PixelFormat::RgbF32 => 3,
            PixelFormat::Bgra8 => 4,
        }
    }
}

/// Immutable description of a frame's geometry and pixel layout.
///
/// Two formats are compatible only if all fields match exactly; there is no
/// implicit conversion anywhere in the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageFormat {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl ImageFormat {
    pub const fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            pixel_format,
        }
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn height(&self) -> u32 {
        self.height
    }

    pub const fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub const fn bytes_per_pixel(&self) -> usize {
        self.pixel_format.bytes_per_pixel()
    }

    pub const fn bytes_per_image(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_pixel()
    }
}
