//! Currency conversion against the active provider's latest rates.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use exchanger_common::{Currency, CurrencyPair, Money, ProviderId};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cache::{RateTableCache, RateTableCacheConfig};
use crate::error::{RateError, RateResult};
use crate::provider::ProviderRegistry;
use crate::store::{CacheInvalidation, RateStore, LATEST_RATES_TAG};
use crate::table::RateTable;

/// Represents a completed currency conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversion {
    /// Unique conversion ID.
    pub id: Uuid,
    /// Input amount.
    pub input: Money,
    /// Output amount, rounded to the target's minor units.
    pub output: Money,
    /// Rate applied; one for same-currency conversions.
    pub rate: Decimal,
    /// Provider whose rate was used, `None` for same-currency conversions.
    pub provider: Option<ProviderId>,
    /// When the conversion was executed.
    pub executed_at: DateTime<Utc>,
}

impl Conversion {
    /// Create a new conversion record.
    pub fn new(input: Money, output: Money, rate: Decimal, provider: Option<ProviderId>) -> Self {
        Self {
            id: Uuid::now_v7(),
            input,
            output,
            rate,
            provider,
            executed_at: Utc::now(),
        }
    }

    /// Get the currency pair.
    pub fn pair(&self) -> CurrencyPair {
        CurrencyPair::new(self.input.currency.clone(), self.output.currency.clone())
    }
}

/// One line of a provider's example conversion table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewLine {
    pub target: Currency,
    pub rate: Decimal,
    pub amount: Money,
}

/// Example conversions of `amount` units of `source` into every target of its row.
pub fn preview(table: &RateTable, source: &Currency, amount: Decimal) -> Vec<PreviewLine> {
    let input = Money::new(amount, source.clone());
    table
        .row(source)
        .map(|row| {
            row.values()
                .filter(|entry| entry.is_positive())
                .filter_map(|entry| {
                    let amount = input.convert(entry.value, entry.target.clone()).ok()?;
                    Some(PreviewLine {
                        target: entry.target.clone(),
                        rate: entry.value,
                        amount,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Converts amounts using the active provider's latest table.
pub struct ConversionService {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn RateStore>,
    cache: RateTableCache,
    invalidations: Mutex<broadcast::Receiver<CacheInvalidation>>,
}

impl ConversionService {
    /// Create a new conversion service.
    pub fn new(registry: Arc<ProviderRegistry>, store: Arc<dyn RateStore>) -> Self {
        Self::with_cache_config(registry, store, RateTableCacheConfig::default())
    }

    pub fn with_cache_config(
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn RateStore>,
        config: RateTableCacheConfig,
    ) -> Self {
        let invalidations = Mutex::new(store.invalidations());
        Self {
            registry,
            store,
            cache: RateTableCache::with_config(config),
            invalidations,
        }
    }

    /// Convert `price` into `target`.
    pub async fn convert(&self, price: &Money, target: &Currency) -> RateResult<Money> {
        self.convert_detailed(price, target).await.map(|c| c.output)
    }

    /// Convert and return the full conversion record.
    #[instrument(skip(self), fields(
        from_currency = %price.currency,
        to_currency = %target,
        amount = %price.value
    ))]
    pub async fn convert_detailed(&self, price: &Money, target: &Currency) -> RateResult<Conversion> {
        if &price.currency == target {
            return Ok(Conversion::new(price.clone(), price.clone(), Decimal::ONE, None));
        }

        let pair = CurrencyPair::new(price.currency.clone(), target.clone());
        let (provider, rate) = self.rate(&pair).await?;
        let output = price.convert(rate, target.clone())?;

        info!(
            provider = %provider,
            pair = %pair,
            rate = %rate,
            output = %output.value,
            "Conversion completed"
        );

        Ok(Conversion::new(price.clone(), output, rate, Some(provider)))
    }

    /// Current rate for a pair from the active provider.
    pub async fn rate(&self, pair: &CurrencyPair) -> RateResult<(ProviderId, Decimal)> {
        let provider = self.registry.active().ok_or(RateError::NoActiveProvider)?;
        let table = self.latest_table(&provider.id).await?;

        match table.value(&pair.source, &pair.target) {
            Some(rate) if rate > Decimal::ZERO => Ok((provider.id, rate)),
            _ => Err(RateError::MissingRate(pair.clone())),
        }
    }

    /// Latest table for a provider, through the cache.
    pub async fn latest_table(&self, provider: &ProviderId) -> RateResult<Arc<RateTable>> {
        self.drain_invalidations();

        if let Some(table) = self.cache.get(provider) {
            return Ok(table);
        }

        let table = Arc::new(self.store.get_latest(provider).await?);
        debug!(provider = %provider, rows = table.len(), "Loaded latest rates");
        self.cache.insert(provider.clone(), Arc::clone(&table));
        Ok(table)
    }

    fn drain_invalidations(&self) {
        let mut receiver = self.invalidations.lock();
        loop {
            match receiver.try_recv() {
                Ok(event) if event.tag == LATEST_RATES_TAG => self.cache.invalidate(&event.provider),
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed cache invalidations, clearing rate cache");
                    self.cache.clear();
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderConfig, Upstream};
    use crate::store::{InvalidationBus, MemoryRateStore};
    use crate::table::{DatedRateTable, RateEntry};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use exchanger_common::Timestamp;
    use rust_decimal_macros::dec;
    use std::time::Duration as StdDuration;

    /// Store whose writes never reach this process's invalidation bus, like
    /// an import running in another process against the same database.
    struct DetachedStore {
        inner: MemoryRateStore,
        bus: InvalidationBus,
    }

    #[async_trait]
    impl RateStore for DetachedStore {
        async fn get_latest(&self, provider: &ProviderId) -> RateResult<RateTable> {
            self.inner.get_latest(provider).await
        }

        async fn set_latest(&self, provider: &ProviderId, table: &RateTable) -> RateResult<()> {
            self.inner.set_latest(provider, table).await
        }

        async fn get_historical(
            &self,
            provider: &ProviderId,
            date: Option<NaiveDate>,
        ) -> RateResult<DatedRateTable> {
            self.inner.get_historical(provider, date).await
        }

        async fn set_historical(
            &self,
            provider: &ProviderId,
            table: &RateTable,
            date: Option<NaiveDate>,
        ) -> RateResult<()> {
            self.inner.set_historical(provider, table, date).await
        }

        async fn last_refreshed(&self, provider: &ProviderId) -> RateResult<Option<Timestamp>> {
            self.inner.last_refreshed(provider).await
        }

        async fn record_refresh(&self, provider: &ProviderId, at: Timestamp) -> RateResult<()> {
            self.inner.record_refresh(provider, at).await
        }

        fn invalidations(&self) -> broadcast::Receiver<CacheInvalidation> {
            self.bus.subscribe()
        }
    }

    fn registry(enabled: bool) -> Arc<ProviderRegistry> {
        let config = ProviderConfig {
            status: enabled,
            ..ProviderConfig::new("manual", Upstream::Manual)
        };
        Arc::new(ProviderRegistry::from_configs(vec![config]).unwrap())
    }

    async fn store_with(entries: Vec<RateEntry>) -> Arc<MemoryRateStore> {
        let store = Arc::new(MemoryRateStore::new());
        let table: RateTable = entries.into_iter().collect();
        store.set_latest(&ProviderId::new("manual"), &table).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_convert_usd_to_eur() {
        let store = store_with(vec![RateEntry::new(Currency::usd(), Currency::eur(), dec!(0.84))]).await;
        let service = ConversionService::new(registry(true), store);

        let price = Money::new(dec!(100), Currency::usd());
        let converted = service.convert(&price, &Currency::eur()).await.unwrap();

        assert_eq!(converted.value, dec!(84.00));
        assert_eq!(converted.currency, Currency::eur());
        assert_eq!(converted.to_string(), "84.00 EUR");
    }

    #[tokio::test]
    async fn test_identity_skips_lookup() {
        let store = Arc::new(MemoryRateStore::new());
        let empty = Arc::new(ProviderRegistry::new(Vec::new()).unwrap());
        let service = ConversionService::new(empty, store.clone());

        let price = Money::new(dec!(12.345), Currency::usd());
        let converted = service.convert(&price, &Currency::usd()).await.unwrap();

        assert_eq!(converted, price);
        assert_eq!(store.latest_reads(), 0);
    }

    #[tokio::test]
    async fn test_no_active_provider() {
        let store = store_with(vec![]).await;
        let service = ConversionService::new(registry(false), store);

        let price = Money::new(dec!(1), Currency::usd());
        let result = service.convert(&price, &Currency::eur()).await;
        assert!(matches!(result, Err(RateError::NoActiveProvider)));
    }

    #[tokio::test]
    async fn test_missing_rate() {
        let store = store_with(vec![RateEntry::new(Currency::usd(), Currency::eur(), dec!(0))]).await;
        let service = ConversionService::new(registry(true), store);
        let price = Money::new(dec!(1), Currency::usd());

        let zero = service.convert(&price, &Currency::eur()).await;
        assert!(matches!(zero, Err(RateError::MissingRate(_))));

        let absent = service.convert(&price, &Currency::gbp()).await;
        match absent {
            Err(RateError::MissingRate(pair)) => assert_eq!(pair.to_string(), "USD/GBP"),
            other => panic!("expected missing rate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_overflowing_amount_is_an_error() {
        let store = store_with(vec![RateEntry::new(Currency::usd(), Currency::jpy(), dec!(150))]).await;
        let service = ConversionService::new(registry(true), store);
        let price = Money::new(Decimal::MAX / dec!(100), Currency::usd());

        let result = service.convert(&price, &Currency::jpy()).await;
        assert!(matches!(result, Err(RateError::Validation(_))));
    }

    #[tokio::test]
    async fn test_rounds_to_target_minor_units() {
        let store = store_with(vec![
            RateEntry::new(Currency::usd(), Currency::jpy(), dec!(149.876543)),
            RateEntry::new(Currency::usd(), Currency::eur(), dec!(0.840336)),
        ])
        .await;
        let service = ConversionService::new(registry(true), store);
        let price = Money::new(dec!(10.5), Currency::usd());

        let yen = service.convert(&price, &Currency::jpy()).await.unwrap();
        assert_eq!(yen.value, dec!(1574));

        let conversion = service.convert_detailed(&price, &Currency::eur()).await.unwrap();
        assert_eq!(conversion.output.value, dec!(8.82));
        assert_eq!(conversion.rate, dec!(0.840336));
        assert_eq!(conversion.provider, Some(ProviderId::new("manual")));
        assert_eq!(conversion.pair().to_string(), "USD/EUR");
    }

    #[tokio::test]
    async fn test_cache_invalidated_on_set_latest() {
        let store = store_with(vec![RateEntry::new(Currency::usd(), Currency::eur(), dec!(0.84))]).await;
        let service = ConversionService::new(registry(true), store.clone());
        let price = Money::new(dec!(100), Currency::usd());

        service.convert(&price, &Currency::eur()).await.unwrap();
        service.convert(&price, &Currency::eur()).await.unwrap();
        assert_eq!(store.latest_reads(), 1);

        let updated: RateTable =
            vec![RateEntry::new(Currency::usd(), Currency::eur(), dec!(0.9))].into_iter().collect();
        store.set_latest(&ProviderId::new("manual"), &updated).await.unwrap();

        let converted = service.convert(&price, &Currency::eur()).await.unwrap();
        assert_eq!(converted.value, dec!(90.00));
        assert_eq!(store.latest_reads(), 2);
    }

    #[tokio::test]
    async fn test_cached_table_expires_without_invalidation() {
        let store = Arc::new(DetachedStore {
            inner: MemoryRateStore::new(),
            bus: InvalidationBus::new(),
        });
        let manual = ProviderId::new("manual");
        let first: RateTable =
            vec![RateEntry::new(Currency::usd(), Currency::eur(), dec!(0.84))].into_iter().collect();
        store.set_latest(&manual, &first).await.unwrap();

        let service = ConversionService::with_cache_config(
            registry(true),
            store.clone(),
            RateTableCacheConfig {
                ttl: Some(chrono::Duration::milliseconds(50)),
                ..Default::default()
            },
        );
        let price = Money::new(dec!(100), Currency::usd());
        assert_eq!(service.convert(&price, &Currency::eur()).await.unwrap().value, dec!(84.00));

        let updated: RateTable =
            vec![RateEntry::new(Currency::usd(), Currency::eur(), dec!(0.9))].into_iter().collect();
        store.set_latest(&manual, &updated).await.unwrap();
        assert_eq!(service.convert(&price, &Currency::eur()).await.unwrap().value, dec!(84.00));

        tokio::time::sleep(StdDuration::from_millis(60)).await;

        assert_eq!(service.convert(&price, &Currency::eur()).await.unwrap().value, dec!(90.00));
        assert_eq!(store.inner.latest_reads(), 2);
    }

    #[test]
    fn test_preview() {
        let table: RateTable = vec![
            RateEntry::new(Currency::eur(), Currency::usd(), dec!(1.19)),
            RateEntry::new(Currency::eur(), Currency::jpy(), dec!(160.123)),
            RateEntry::new(Currency::eur(), Currency::gbp(), dec!(0)),
        ]
        .into_iter()
        .collect();

        let lines = preview(&table, &Currency::eur(), dec!(100));

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].target, Currency::jpy());
        assert_eq!(lines[0].amount.value, dec!(16012));
        assert_eq!(lines[1].amount.value, dec!(119.00));
        assert!(preview(&table, &Currency::usd(), dec!(100)).is_empty());
    }
}
