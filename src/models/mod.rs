//! Provider model registry.

pub mod cache;

pub use cache::{CacheEntry, CacheError, ModelCache, ModelFetcher};
