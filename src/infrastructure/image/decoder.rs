//! Bounded-concurrency image decoding.

use std::sync::Arc;

use bytes::Bytes;
use image::DynamicImage;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, trace};

use crate::domain::entities::{DecodedImage, TargetSize};
use crate::domain::errors::{LoadError, LoadResult};

/// Max concurrent decodes to avoid CPU spikes.
pub const DEFAULT_MAX_CONCURRENT_DECODES: usize = 4;

/// Decodes encoded bytes on the blocking pool, admitting a fixed number of
/// decodes at a time. Waiters are served in FIFO order.
#[derive(Debug)]
pub struct ImageDecoder {
    semaphore: Arc<Semaphore>,
    limit: Mutex<usize>,
}

impl ImageDecoder {
    /// Creates a decoder admitting `max_concurrent` decodes at once (at least one).
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            limit: Mutex::new(max_concurrent),
        }
    }

    /// Decodes at the image's native resolution.
    ///
    /// # Errors
    /// Returns `LoadError::Decode` for malformed or unsupported data.
    pub async fn decode(&self, data: Bytes) -> LoadResult<DecodedImage> {
        self.decode_downsampled(data, None, 1.0).await
    }

    /// Decodes, shrinking the result so its longest side fits the target size
    /// at the given scale. Images already small enough are never upscaled.
    ///
    /// # Errors
    /// Returns `LoadError::Decode` for malformed or unsupported data.
    pub async fn decode_downsampled(
        &self,
        data: Bytes,
        target_size: Option<TargetSize>,
        scale: f32,
    ) -> LoadResult<DecodedImage> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| LoadError::Cancelled)?;
        let max_pixel_size = target_size.map(|size| size.max_pixel_size(scale));
        trace!(bytes = data.len(), max_pixel_size = ?max_pixel_size, "Decoding image");

        tokio::task::spawn_blocking(move || {
            let result = decode_sync(&data, max_pixel_size);
            drop(permit);
            result
        })
        .await
        .map_err(|e| LoadError::decode(format!("Decode task panicked: {e}")))?
        .map(DecodedImage::new)
    }

    /// Current concurrency limit.
    pub fn max_concurrent(&self) -> usize {
        *self.limit.lock()
    }

    /// Slots free right now.
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Changes the concurrency limit. Decodes already running are not interrupted;
    /// a lower limit takes effect as they finish.
    pub fn set_max_concurrent(&self, max_concurrent: usize) {
        let max_concurrent = max_concurrent.max(1);
        let mut limit = self.limit.lock();
        if max_concurrent > *limit {
            self.semaphore.add_permits(max_concurrent - *limit);
        } else if max_concurrent < *limit {
            let excess = *limit - max_concurrent;
            let forgotten = self.semaphore.forget_permits(excess);
            let outstanding = excess - forgotten;
            if outstanding > 0 {
                let semaphore = Arc::clone(&self.semaphore);
                #[allow(clippy::cast_possible_truncation)]
                tokio::spawn(async move {
                    if let Ok(permits) = semaphore.acquire_many_owned(outstanding as u32).await {
                        permits.forget();
                    }
                });
            }
        }
        debug!(from = *limit, to = max_concurrent, "Changed decode concurrency");
        *limit = max_concurrent;
    }
}

impl Default for ImageDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_DECODES)
    }
}

fn decode_sync(data: &[u8], max_pixel_size: Option<u32>) -> LoadResult<DynamicImage> {
    let image = image::load_from_memory(data)
        .map_err(|e| LoadError::decode(format!("Failed to decode image: {e}")))?;

    match max_pixel_size {
        Some(max) if image.width() > max || image.height() > max => Ok(image.thumbnail(max, max)),
        _ => Ok(image),
    }
}

/// Encodes a blank PNG of the given size.
#[cfg(test)]
pub(crate) fn png_bytes(width: u32, height: u32) -> Bytes {
    let mut buf = std::io::Cursor::new(Vec::new());
    DynamicImage::new_rgb8(width, height)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    Bytes::from(buf.into_inner())
}
