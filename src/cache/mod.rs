//! Memoization of step outputs on disk.

pub mod key;
pub mod manager;

pub use key::{config_digest, CacheKey, ConfigFilter, CACHE_FILE_EXTENSION};
pub use manager::{CacheManager, CacheStats};
