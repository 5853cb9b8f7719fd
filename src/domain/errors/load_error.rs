//! Image load error types.

use thiserror::Error;

/// Result type for load operations.
pub type LoadResult<T> = Result<T, LoadError>;

/// Terminal outcome of a failed load.
///
/// Cloneable so one physical fetch can broadcast its failure to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum LoadError {
    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("request timed out: {message}")]
    Timeout { message: String },

    #[error("load cancelled")]
    Cancelled,

    #[error("unexpected HTTP status {status}")]
    BadStatus { status: u16 },

    #[error("failed to decode image: {message}")]
    Decode { message: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

impl LoadError {
    /// Creates transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates timeout error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Creates decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Returns whether another network attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }

    /// Returns whether the load was cancelled rather than failed.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
