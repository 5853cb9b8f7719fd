//! Cache identities for the memory and disk tiers.

use std::sync::Arc;

use reqwest::Url;
use sha2::{Digest, Sha256};

use super::image::TargetSize;
use crate::domain::ports::ImageProcessor;

/// Identity of a cached image.
///
/// Disk keys are built from the URL alone so raw bytes survive render-size
/// changes. Memory keys also carry the target size, scale and processor
/// signature, since each combination produces a different bitmap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Creates a key from a raw string.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Creates the coarse, URL-only key used by the disk tier and the request coordinator.
    #[must_use]
    pub fn for_url(url: &Url) -> Self {
        Self(url.as_str().to_string())
    }

    /// Creates a key for a URL rendered at a given size and scale.
    #[must_use]
    pub fn for_size(url: &Url, target_size: Option<TargetSize>, scale: f32) -> Self {
        match target_size {
            Some(size) => {
                let (w, h) = size.rounded();
                Self(format!("{}@{w}x{h}@{scale:.2}", url.as_str()))
            }
            None => Self::for_url(url),
        }
    }

    /// Creates the fine-grained key used by the memory tier.
    #[must_use]
    pub fn for_request(
        url: &Url,
        target_size: Option<TargetSize>,
        scale: f32,
        processors: &[Arc<dyn ImageProcessor>],
    ) -> Self {
        let base = Self::for_size(url, target_size, scale);
        if processors.is_empty() {
            return base;
        }
        let signature = processors
            .iter()
            .map(|p| p.identifier())
            .collect::<Vec<_>>()
            .join("+");
        Self(format!("{}|proc:{signature}", base.0))
    }

    /// Returns the raw key string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the lowercase hex SHA-256 digest of the key, used as a file name.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::image::processors::{Blur, Resize};
    use test_case::test_case;

    fn url() -> Url {
        Url::parse("https://example.com/a.png").unwrap()
    }

    #[test_case(None, 1.0, "https://example.com/a.png" ; "no_target_size")]
    #[test_case(Some(TargetSize::new(40.0, 30.0)), 2.0, "https://example.com/a.png@40x30@2.00" ; "sized")]
    #[test_case(Some(TargetSize::new(39.5, 29.4)), 1.5, "https://example.com/a.png@40x29@1.50" ; "rounded")]
    fn test_for_size(size: Option<TargetSize>, scale: f32, expected: &str) {
        assert_eq!(CacheKey::for_size(&url(), size, scale).as_str(), expected);
    }

    #[test]
    fn test_processor_signature_is_ordered() {
        let a: Vec<Arc<dyn ImageProcessor>> =
            vec![Arc::new(Resize::new(10, 10)), Arc::new(Blur::new(2.0))];
        let b: Vec<Arc<dyn ImageProcessor>> =
            vec![Arc::new(Blur::new(2.0)), Arc::new(Resize::new(10, 10))];

        let key_a = CacheKey::for_request(&url(), None, 1.0, &a);
        let key_b = CacheKey::for_request(&url(), None, 1.0, &b);

        assert_eq!(
            key_a.as_str(),
            "https://example.com/a.png|proc:resize(10x10)+blur(r=2.00)"
        );
        assert_ne!(key_a, key_b);
    }

    #[test]
    fn test_sizes_split_memory_but_share_disk_identity() {
        let small = CacheKey::for_request(&url(), Some(TargetSize::new(40.0, 40.0)), 1.0, &[]);
        let large = CacheKey::for_request(&url(), Some(TargetSize::new(80.0, 80.0)), 1.0, &[]);

        assert_ne!(small, large);
        assert_eq!(CacheKey::for_url(&url()), CacheKey::for_url(&url()));
    }

    #[test]
    fn test_digest_is_fixed_length_hex() {
        let digest = CacheKey::for_url(&url()).digest();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, CacheKey::for_url(&url()).digest());
    }
}
