//! Postgres-backed [`RateStore`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use exchanger_common::{now, today, ProviderId, Timestamp};
use exchanger_rates::{
    CacheInvalidation, DatedRateTable, InvalidationBus, RateResult, RateStore, RateTable,
};
use sqlx::postgres::{PgListener, PgNotification, PgPool, PgPoolOptions};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::error::StoreResult;
use crate::rows::{historical_tables, latest_table, HistoricalRateRow, LatestRateRow};
use crate::schema;

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct PgStoreConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PgStoreConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

/// Rate store persisting to Postgres.
///
/// Latest tables are replaced inside one transaction so readers never see
/// a partially written table. Invalidations are published after commit, to
/// this process directly and to other processes via `NOTIFY`.
pub struct PgRateStore {
    pool: PgPool,
    bus: InvalidationBus,
}

impl PgRateStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            bus: InvalidationBus::new(),
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, config: &PgStoreConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(database_url)
            .await?;
        info!(max_connections = config.max_connections, "Connected to rate database");
        Ok(Self::new(pool))
    }

    /// Create the rate tables when missing.
    pub async fn migrate(&self) -> StoreResult<()> {
        for statement in schema::MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Rate schema up to date");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Relay latest-table notifications from other processes onto this
    /// store's invalidation bus.
    pub async fn spawn_listener(&self) -> StoreResult<JoinHandle<()>> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(schema::LATEST_CHANNEL).await?;
        info!(channel = schema::LATEST_CHANNEL, "Listening for rate updates");

        let bus = self.bus.clone();
        Ok(tokio::spawn(async move {
            loop {
                match listener.try_recv().await {
                    Ok(Some(notification)) => relay_notification(&bus, &notification),
                    // Notifications sent while disconnected are lost; the cache TTL covers them.
                    Ok(None) => warn!("Rate notification connection lost, reconnecting"),
                    Err(e) => {
                        error!(error = %e, "Rate notification listener stopped");
                        break;
                    }
                }
            }
        }))
    }

    async fn load_latest(&self, provider: &ProviderId) -> StoreResult<RateTable> {
        let rows: Vec<LatestRateRow> = sqlx::query_as(schema::SELECT_LATEST)
            .bind(provider.as_str())
            .fetch_all(&self.pool)
            .await?;
        latest_table(provider.as_str(), rows)
    }

    async fn replace_latest(&self, provider: &ProviderId, table: &RateTable) -> StoreResult<()> {
        let updated_at = now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(schema::DELETE_LATEST)
            .bind(provider.as_str())
            .execute(&mut *tx)
            .await?;

        for entry in table.entries() {
            sqlx::query(schema::INSERT_LATEST)
                .bind(provider.as_str())
                .bind(entry.source.code())
                .bind(entry.target.code())
                .bind(entry.value)
                .bind(entry.manual)
                .bind(updated_at)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(schema::NOTIFY_LATEST)
            .bind(schema::LATEST_CHANNEL)
            .bind(provider.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn load_historical(
        &self,
        provider: &ProviderId,
        date: Option<NaiveDate>,
    ) -> StoreResult<DatedRateTable> {
        let rows: Vec<HistoricalRateRow> = sqlx::query_as(schema::SELECT_HISTORICAL)
            .bind(provider.as_str())
            .bind(date)
            .fetch_all(&self.pool)
            .await?;
        historical_tables(provider.as_str(), rows)
    }

    async fn upsert_historical(
        &self,
        provider: &ProviderId,
        table: &RateTable,
        date: NaiveDate,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for entry in table.entries() {
            sqlx::query(schema::UPSERT_HISTORICAL)
                .bind(provider.as_str())
                .bind(entry.source.code())
                .bind(entry.target.code())
                .bind(entry.value)
                .bind(entry.manual)
                .bind(date)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load_last_refreshed(&self, provider: &ProviderId) -> StoreResult<Option<Timestamp>> {
        let at: Option<(Timestamp,)> = sqlx::query_as(schema::SELECT_LAST_REFRESHED)
            .bind(provider.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(at.map(|(at,)| at))
    }

    async fn store_last_refreshed(&self, provider: &ProviderId, at: Timestamp) -> StoreResult<()> {
        sqlx::query(schema::UPSERT_LAST_REFRESHED)
            .bind(provider.as_str())
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn relay_notification(bus: &InvalidationBus, notification: &PgNotification) {
    relay_payload(bus, notification.payload());
}

fn relay_payload(bus: &InvalidationBus, payload: &str) {
    match ProviderId::parse(payload) {
        Ok(provider) => {
            debug!(provider = %provider, "Latest rates changed elsewhere");
            bus.notify(&provider);
        }
        Err(e) => warn!(payload, error = %e, "Ignoring malformed rate notification"),
    }
}

#[async_trait]
impl RateStore for PgRateStore {
    async fn get_latest(&self, provider: &ProviderId) -> RateResult<RateTable> {
        Ok(self.load_latest(provider).await?)
    }

    #[instrument(skip(self, table), fields(provider = %provider, rows = table.len()))]
    async fn set_latest(&self, provider: &ProviderId, table: &RateTable) -> RateResult<()> {
        self.replace_latest(provider, table).await?;
        debug!("Replaced latest rates");
        self.bus.notify(provider);
        Ok(())
    }

    async fn get_historical(
        &self,
        provider: &ProviderId,
        date: Option<NaiveDate>,
    ) -> RateResult<DatedRateTable> {
        Ok(self.load_historical(provider, date).await?)
    }

    async fn set_historical(
        &self,
        provider: &ProviderId,
        table: &RateTable,
        date: Option<NaiveDate>,
    ) -> RateResult<()> {
        let date = date.unwrap_or_else(today);
        self.upsert_historical(provider, table, date).await?;
        debug!(provider = %provider, %date, rows = table.len(), "Stored historical rates");
        Ok(())
    }

    async fn last_refreshed(&self, provider: &ProviderId) -> RateResult<Option<Timestamp>> {
        Ok(self.load_last_refreshed(provider).await?)
    }

    async fn record_refresh(&self, provider: &ProviderId, at: Timestamp) -> RateResult<()> {
        Ok(self.store_last_refreshed(provider, at).await?)
    }

    fn invalidations(&self) -> broadcast::Receiver<CacheInvalidation> {
        self.bus.subscribe()
    }
}
