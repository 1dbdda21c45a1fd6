//! Page cache configuration.

use stor_common::constants::DEFAULT_CACHE_CAPACITY;
use stor_common::error::{StorageError, StorageResult};

/// Configuration for the page cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of resident pages. The cache may exceed this by one
    /// entry transiently while a new page is inserted.
    pub capacity: usize,
}

impl CacheConfig {
    /// Creates a configuration with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    /// Sets the capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> StorageResult<()> {
        if self.capacity == 0 {
            return Err(StorageError::invalid_argument(
                "cache capacity must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
