//! pixfetch - image acquisition with two-tier caching.
//!
//! Loads go memory, then disk, then network. Concurrent requests for the same
//! URL share a single fetch, and decoding runs under a bounded concurrency
//! budget.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing caches and adapters for external services.
pub mod infrastructure;

/// Current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = "pixfetch";
