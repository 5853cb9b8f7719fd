//! Port definition for post-decode image processing.

use image::DynamicImage;

/// A transformation applied to a decoded image before it is cached in memory.
///
/// The identifier becomes part of the memory cache key, so two processors
/// producing different pixels must never share an identifier.
pub trait ImageProcessor: Send + Sync {
    /// Stable identifier for this processor and its parameters.
    fn identifier(&self) -> String;

    /// Transforms the image.
    fn process(&self, image: DynamicImage) -> DynamicImage;
}
