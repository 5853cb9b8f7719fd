//! Per-load timing and provenance.

use std::time::{Duration, Instant};

use super::image::{DecodedImage, ImageSource};

/// Measurements for one completed load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadMetrics {
    source: ImageSource,
    started_at: Instant,
    finished_at: Instant,
    network_time: Option<Duration>,
    decode_time: Option<Duration>,
    downloaded_bytes: Option<usize>,
}

impl LoadMetrics {
    /// Creates metrics for a load.
    #[must_use]
    pub const fn new(
        source: ImageSource,
        started_at: Instant,
        finished_at: Instant,
        network_time: Option<Duration>,
        decode_time: Option<Duration>,
        downloaded_bytes: Option<usize>,
    ) -> Self {
        Self {
            source,
            started_at,
            finished_at,
            network_time,
            decode_time,
            downloaded_bytes,
        }
    }

    /// Metrics for a memory hit: no network, zero decode time.
    #[must_use]
    pub fn memory_hit(started_at: Instant) -> Self {
        Self::new(
            ImageSource::Memory,
            started_at,
            Instant::now(),
            None,
            Some(Duration::ZERO),
            None,
        )
    }

    /// Tier that satisfied the load.
    #[must_use]
    pub const fn source(&self) -> ImageSource {
        self.source
    }

    /// When the load started.
    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    /// When the load finished.
    #[must_use]
    pub const fn finished_at(&self) -> Instant {
        self.finished_at
    }

    /// Wall-clock time of the whole load.
    #[must_use]
    pub fn total_time(&self) -> Duration {
        self.finished_at.saturating_duration_since(self.started_at)
    }

    /// Time spent waiting on the network, if it was contacted.
    #[must_use]
    pub const fn network_time(&self) -> Option<Duration> {
        self.network_time
    }

    /// Time spent decoding and post-processing.
    #[must_use]
    pub const fn decode_time(&self) -> Option<Duration> {
        self.decode_time
    }

    /// Size of the encoded body, when known.
    #[must_use]
    pub const fn downloaded_bytes(&self) -> Option<usize> {
        self.downloaded_bytes
    }
}

/// A decoded image together with how it was obtained.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// The ready-to-render image.
    pub image: DecodedImage,
    /// Measurements for the load that produced it.
    pub metrics: LoadMetrics,
}

impl std::fmt::Display for LoadMetrics {
    #[allow(clippy::cast_precision_loss)]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "source={} total={:.1}ms",
            self.source,
            self.total_time().as_secs_f64() * 1000.0
        )?;
        if let Some(network) = self.network_time {
            write!(f, " net={:.1}ms", network.as_secs_f64() * 1000.0)?;
        }
        if let Some(decode) = self.decode_time {
            write!(f, " decode={:.1}ms", decode.as_secs_f64() * 1000.0)?;
        }
        if let Some(bytes) = self.downloaded_bytes {
            write!(f, " bytes={bytes}")?;
        }
        Ok(())
    }
}
