//! Domain types for decoded images.

use std::sync::Arc;

use image::DynamicImage;

/// Requested render size in points, before scale is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetSize {
    /// Width in points.
    pub width: f32,
    /// Height in points.
    pub height: f32,
}

impl TargetSize {
    /// Creates a new target size.
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Returns the size rounded to whole points, half away from zero.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn rounded(self) -> (i64, i64) {
        (self.width.round() as i64, self.height.round() as i64)
    }

    /// Longest side in pixels for the given scale, never below one pixel.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn max_pixel_size(self, scale: f32) -> u32 {
        let longest = self.width.max(self.height) * scale.max(1.0);
        (longest.ceil() as u32).max(1)
    }
}

/// Estimates the memory footprint of a decoded image.
pub type CostFn = fn(&DynamicImage) -> usize;

/// Default cost estimate: bytes per row times height.
#[must_use]
pub fn estimate_cost(image: &DynamicImage) -> usize {
    let bytes_per_row = image.width() as usize * usize::from(image.color().bytes_per_pixel());
    bytes_per_row * image.height() as usize
}

/// A decoded, ready-to-render image.
///
/// Cheap to clone; every clone shares the same pixel buffer.
#[derive(Debug, Clone)]
pub struct DecodedImage(Arc<DynamicImage>);

impl DecodedImage {
    /// Wraps a decoded image.
    #[must_use]
    pub fn new(image: DynamicImage) -> Self {
        Self(Arc::new(image))
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.0.width()
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.0.height()
    }

    /// Returns the underlying image.
    #[must_use]
    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.0
    }

    /// Returns an owned copy of the pixels, avoiding the copy when this is the only handle.
    #[must_use]
    pub fn into_dynamic(self) -> DynamicImage {
        Arc::try_unwrap(self.0).unwrap_or_else(|shared| (*shared).clone())
    }

    /// Returns true if both handles share the same pixel buffer.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<DynamicImage> for DecodedImage {
    fn from(image: DynamicImage) -> Self {
        Self::new(image)
    }
}

/// Which tier satisfied a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageSource {
    /// Loaded from the in-memory LRU cache.
    Memory,
    /// Loaded from the disk cache, including 304 revalidations.
    Disk,
    /// Downloaded from the network.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Disk => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}
