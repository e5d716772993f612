//! Per-provider caching of latest rate tables.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use exchanger_common::ProviderId;
use std::sync::Arc;
use tracing::debug;

use crate::table::RateTable;

/// Cached table entry.
#[derive(Debug, Clone)]
struct CacheEntry {
    table: Arc<RateTable>,
    cached_at: DateTime<Utc>,
    ttl: Option<Duration>,
}

impl CacheEntry {
    fn new(table: Arc<RateTable>, ttl: Option<Duration>) -> Self {
        Self {
            table,
            cached_at: Utc::now(),
            ttl,
        }
    }

    fn is_valid(&self) -> bool {
        match self.ttl {
            Some(ttl) => Utc::now().signed_duration_since(self.cached_at) < ttl,
            None => true,
        }
    }
}

/// Default upper bound on how long a cached table is served without a reload.
///
/// Invalidations only reach this process when the writer shares its bus or
/// the store relays notifications, so entries always expire eventually.
pub const DEFAULT_CACHE_TTL_SECS: i64 = 60;

/// Configuration for the table cache.
#[derive(Debug, Clone)]
pub struct RateTableCacheConfig {
    /// Upper bound on entry age. `None` keeps entries until invalidated.
    pub ttl: Option<Duration>,
    /// Maximum number of cached providers.
    pub max_entries: usize,
}

impl Default for RateTableCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Some(Duration::seconds(DEFAULT_CACHE_TTL_SECS)),
            max_entries: 64,
        }
    }
}

/// Thread-safe cache of latest tables keyed by provider.
pub struct RateTableCache {
    cache: DashMap<ProviderId, CacheEntry>,
    config: RateTableCacheConfig,
}

impl RateTableCache {
    /// Create a new cache with default configuration.
    pub fn new() -> Self {
        Self::with_config(RateTableCacheConfig::default())
    }

    pub fn with_config(config: RateTableCacheConfig) -> Self {
        Self {
            cache: DashMap::new(),
            config,
        }
    }

    /// Get a provider's table if cached and fresh.
    pub fn get(&self, provider: &ProviderId) -> Option<Arc<RateTable>> {
        if let Some(entry) = self.cache.get(provider) {
            if entry.is_valid() {
                debug!(provider = %provider, "Cache hit");
                return Some(Arc::clone(&entry.table));
            }
            debug!(provider = %provider, "Cache entry expired");
            drop(entry);
            self.cache.remove(provider);
        }

        debug!(provider = %provider, "Cache miss");
        None
    }

    /// Cache a provider's table.
    pub fn insert(&self, provider: ProviderId, table: Arc<RateTable>) {
        if self.cache.len() >= self.config.max_entries && !self.cache.contains_key(&provider) {
            self.evict_expired();
            if self.cache.len() >= self.config.max_entries {
                self.cache.clear();
            }
        }
        self.cache
            .insert(provider, CacheEntry::new(table, self.config.ttl));
    }

    /// Drop one provider's table.
    pub fn invalidate(&self, provider: &ProviderId) {
        if self.cache.remove(provider).is_some() {
            debug!(provider = %provider, "Cache invalidated");
        }
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Evict expired entries.
    pub fn evict_expired(&self) {
        self.cache.retain(|_, entry| entry.is_valid());
    }
}

impl Default for RateTableCache {
    fn default() -> Self {
        Self::new()
    }
}
