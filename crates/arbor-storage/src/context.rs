//! Shared state threaded through storage operations.

use arbor_buffer::PageCache;
use arbor_common::StorageConfig;

use crate::btree::TreePage;
use crate::catalog::Catalog;

/// Configuration, page cache and table catalog for one engine instance.
///
/// Every tree operation borrows the context; tables share the one cache,
/// keyed by page identity.
pub struct StorageContext {
    config: StorageConfig,
    cache: PageCache<TreePage>,
    catalog: Catalog,
}

impl StorageContext {
    /// Creates a context with the cache capacity taken from `config`.
    pub fn new(config: StorageConfig) -> Self {
        let cache = PageCache::new(config.cache_capacity, config.cache_policy);
        Self {
            config,
            cache,
            catalog: Catalog::new(),
        }
    }

    /// Creates a context sizing the cache from available system memory.
    pub fn with_auto_sized_cache(config: StorageConfig) -> Self {
        let cache = PageCache::auto_sized(config.cache_policy, config.page_size);
        Self {
            config,
            cache,
            catalog: Catalog::new(),
        }
    }

    /// The configuration this context was built with.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// The shared page cache.
    pub fn cache(&self) -> &PageCache<TreePage> {
        &self.cache
    }

    /// The table catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_common::CachePolicy;

    #[test]
    fn test_context_uses_configured_capacity() {
        let config = StorageConfig {
            cache_capacity: 32,
            cache_policy: CachePolicy::Evict,
            ..StorageConfig::default()
        };
        let ctx = StorageContext::new(config);

        assert_eq!(ctx.cache().capacity(), 32);
        assert_eq!(ctx.cache().policy(), CachePolicy::Evict);
        assert_eq!(ctx.config().cache_capacity, 32);
        assert!(ctx.catalog().is_empty());
    }

    #[test]
    fn test_auto_sized_context() {
        let ctx = StorageContext::with_auto_sized_cache(StorageConfig::default());
        // sized from system memory, never below the floor
        assert!(ctx.cache().capacity() >= 1_000);
        assert_eq!(ctx.cache().policy(), CachePolicy::Fatal);
    }
}
