//! Built-in post-decode processors.

use image::DynamicImage;
use image::imageops::FilterType;

use crate::domain::ports::ImageProcessor;

/// Resizes to an exact pixel size, ignoring aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resize {
    width: u32,
    height: u32,
}

impl Resize {
    /// Creates a resize processor.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl ImageProcessor for Resize {
    fn identifier(&self) -> String {
        format!("resize({}x{})", self.width, self.height)
    }

    fn process(&self, image: DynamicImage) -> DynamicImage {
        image.resize_exact(self.width, self.height, FilterType::Triangle)
    }
}

/// Crops a centered region, clamped to the source size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CenterCrop {
    width: u32,
    height: u32,
}

impl CenterCrop {
    /// Creates a center crop processor.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl ImageProcessor for CenterCrop {
    fn identifier(&self) -> String {
        format!("crop(center,{}x{})", self.width, self.height)
    }

    fn process(&self, image: DynamicImage) -> DynamicImage {
        let width = self.width.min(image.width());
        let height = self.height.min(image.height());
        let x = (image.width() - width) / 2;
        let y = (image.height() - height) / 2;
        image.crop_imm(x, y, width, height)
    }
}

/// Gaussian blur.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blur {
    radius: f32,
}

impl Blur {
    /// Creates a blur processor with the given sigma.
    #[must_use]
    pub const fn new(radius: f32) -> Self {
        Self { radius }
    }
}

impl ImageProcessor for Blur {
    fn identifier(&self) -> String {
        format!("blur(r={:.2})", self.radius)
    }

    fn process(&self, image: DynamicImage) -> DynamicImage {
        image.blur(self.radius)
    }
}

/// Makes the corners outside a rounded rectangle transparent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundCorners {
    radius: f32,
}

impl RoundCorners {
    /// Creates a rounded-corner processor.
    #[must_use]
    pub const fn new(radius: f32) -> Self {
        Self { radius }
    }
}

impl ImageProcessor for RoundCorners {
    fn identifier(&self) -> String {
        format!("roundCorners(r={:.2})", self.radius)
    }

    #[allow(clippy::cast_precision_loss)]
    fn process(&self, image: DynamicImage) -> DynamicImage {
        let mut rgba = image.into_rgba8();
        let (w, h) = (rgba.width() as f32, rgba.height() as f32);
        let r = self.radius.min(w / 2.0).min(h / 2.0);
        if r <= 0.0 {
            return DynamicImage::ImageRgba8(rgba);
        }

        for (x, y, pixel) in rgba.enumerate_pixels_mut() {
            let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
            let cx = if px < r {
                r
            } else if px > w - r {
                w - r
            } else {
                continue;
            };
            let cy = if py < r {
                r
            } else if py > h - r {
                h - r
            } else {
                continue;
            };
            if (px - cx).powi(2) + (py - cy).powi(2) > r * r {
                pixel[3] = 0;
            }
        }
        DynamicImage::ImageRgba8(rgba)
    }
}
