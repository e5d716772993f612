//! Rate persistence seam and the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use exchanger_common::{today, ProviderId, Timestamp};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::RateResult;
use crate::table::{DatedRateTable, RateTable};

/// Tag carried by invalidations of latest tables.
pub const LATEST_RATES_TAG: &str = "exchanger_latest";

/// Capacity of the invalidation channel before receivers lag.
const INVALIDATION_CAPACITY: usize = 256;

/// Fired after a provider's latest table was replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheInvalidation {
    pub tag: &'static str,
    pub provider: ProviderId,
}

impl CacheInvalidation {
    pub fn latest(provider: &ProviderId) -> Self {
        Self {
            tag: LATEST_RATES_TAG,
            provider: provider.clone(),
        }
    }
}

/// Broadcast side of the invalidation signal, shared by store implementations.
#[derive(Debug, Clone)]
pub struct InvalidationBus {
    sender: broadcast::Sender<CacheInvalidation>,
}

impl InvalidationBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(INVALIDATION_CAPACITY);
        Self { sender }
    }

    /// Announce that a provider's latest table changed.
    pub fn notify(&self, provider: &ProviderId) {
        // No receivers is fine: nothing is cached.
        let _ = self.sender.send(CacheInvalidation::latest(provider));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheInvalidation> {
        self.sender.subscribe()
    }
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Persistence for latest and historical rate tables.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Latest table for a provider; empty when none was stored.
    async fn get_latest(&self, provider: &ProviderId) -> RateResult<RateTable>;

    /// Atomically replace a provider's latest table, then invalidate caches.
    async fn set_latest(&self, provider: &ProviderId, table: &RateTable) -> RateResult<()>;

    /// Historical snapshots, optionally restricted to one date.
    async fn get_historical(
        &self,
        provider: &ProviderId,
        date: Option<NaiveDate>,
    ) -> RateResult<DatedRateTable>;

    /// Upsert a snapshot for `date` (today when `None`). Other rows are untouched.
    async fn set_historical(
        &self,
        provider: &ProviderId,
        table: &RateTable,
        date: Option<NaiveDate>,
    ) -> RateResult<()>;

    /// When the provider last completed an import.
    async fn last_refreshed(&self, provider: &ProviderId) -> RateResult<Option<Timestamp>>;

    /// Record a completed import.
    async fn record_refresh(&self, provider: &ProviderId, at: Timestamp) -> RateResult<()>;

    /// Subscribe to latest-table invalidations.
    fn invalidations(&self) -> broadcast::Receiver<CacheInvalidation>;
}

/// Shared rate store.
pub type SharedRateStore = Arc<dyn RateStore>;

/// Process-local store.
///
/// Each latest table lives behind an `Arc` that is swapped whole, so a
/// reader sees either the old or the new table.
pub struct MemoryRateStore {
    latest: DashMap<ProviderId, Arc<RateTable>>,
    historical: DashMap<ProviderId, DatedRateTable>,
    refreshed: DashMap<ProviderId, Timestamp>,
    bus: InvalidationBus,
    latest_reads: AtomicUsize,
}

impl MemoryRateStore {
    pub fn new() -> Self {
        Self {
            latest: DashMap::new(),
            historical: DashMap::new(),
            refreshed: DashMap::new(),
            bus: InvalidationBus::new(),
            latest_reads: AtomicUsize::new(0),
        }
    }

    /// Number of `get_latest` calls served.
    pub fn latest_reads(&self) -> usize {
        self.latest_reads.load(Ordering::Relaxed)
    }
}

impl Default for MemoryRateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateStore for MemoryRateStore {
    async fn get_latest(&self, provider: &ProviderId) -> RateResult<RateTable> {
        self.latest_reads.fetch_add(1, Ordering::Relaxed);
        let table = self.latest.get(provider).map(|t| Arc::clone(t.value()));
        Ok(table.map(|t| (*t).clone()).unwrap_or_default())
    }

    async fn set_latest(&self, provider: &ProviderId, table: &RateTable) -> RateResult<()> {
        self.latest.insert(provider.clone(), Arc::new(table.clone()));
        debug!(provider = %provider, rows = table.len(), "Replaced latest rates");
        self.bus.notify(provider);
        Ok(())
    }

    async fn get_historical(
        &self,
        provider: &ProviderId,
        date: Option<NaiveDate>,
    ) -> RateResult<DatedRateTable> {
        let Some(snapshots) = self.historical.get(provider) else {
            return Ok(DatedRateTable::new());
        };
        Ok(snapshots
            .iter()
            .filter(|(day, _)| date.map_or(true, |d| d == **day))
            .map(|(day, table)| (*day, table.clone()))
            .collect())
    }

    async fn set_historical(
        &self,
        provider: &ProviderId,
        table: &RateTable,
        date: Option<NaiveDate>,
    ) -> RateResult<()> {
        let date = date.unwrap_or_else(today);
        let mut snapshots = self.historical.entry(provider.clone()).or_default();
        let snapshot = snapshots.entry(date).or_default();
        for entry in table.entries() {
            snapshot.insert(entry.clone());
        }
        Ok(())
    }

    async fn last_refreshed(&self, provider: &ProviderId) -> RateResult<Option<Timestamp>> {
        Ok(self.refreshed.get(provider).map(|at| *at.value()))
    }

    async fn record_refresh(&self, provider: &ProviderId, at: Timestamp) -> RateResult<()> {
        self.refreshed.insert(provider.clone(), at);
        Ok(())
    }

    fn invalidations(&self) -> broadcast::Receiver<CacheInvalidation> {
        self.bus.subscribe()
    }
}
