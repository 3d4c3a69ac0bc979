//! Configuration structures for Arbor.

use serde::{Deserialize, Serialize};

use crate::page::DEFAULT_PAGE_SIZE;

/// Storage configuration for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Page size in bytes for all data pages.
    ///
    /// Fixed once a file has been created with it; mixing page sizes within
    /// one file is not supported.
    pub page_size: usize,
    /// Page cache capacity in number of pages.
    pub cache_capacity: usize,
    /// Behavior when the page cache is full and a miss occurs.
    pub cache_policy: CachePolicy,
    /// Flush file writes to stable storage after each page write.
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_capacity: 500,
            cache_policy: CachePolicy::Fatal,
            sync_writes: false,
        }
    }
}

impl StorageConfig {
    /// Returns the total cache size in bytes.
    pub fn cache_size_bytes(&self) -> usize {
        self.cache_capacity * self.page_size
    }
}

/// Behavior of the page cache when a miss occurs at full capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CachePolicy {
    /// Treat a miss at full capacity as a fatal error.
    #[default]
    Fatal,
    /// Evict the oldest cached page to make room.
    Evict,
}
