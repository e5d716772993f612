//! Rate derivation: turns upstream payloads into a full pairwise table.

use std::collections::BTreeSet;
use std::sync::Arc;

use exchanger_common::Currency;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use crate::error::{RateError, RateResult};
use crate::fetch::{normalize_payload, RateFetcher};
use crate::provider::{Provider, ProviderMode};
use crate::rate_set::{round_rate, RateSet};
use crate::table::{RateEntry, RateTable};

/// Result of one derivation cycle.
#[derive(Debug, Default)]
pub struct Derivation {
    /// Merged table to persist. Empty means nothing should be written.
    pub table: RateTable,
    /// Fetch or normalization failures absorbed along the way.
    pub failures: Vec<RateError>,
}

impl Derivation {
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

fn is_enabled(enabled: &BTreeSet<Currency>, currency: &Currency) -> bool {
    enabled.is_empty() || enabled.contains(currency)
}

/// The row of a rate set: `base -> currency` for every quoted currency.
pub fn collect_row(rates: &RateSet) -> Vec<RateEntry> {
    rates
        .rates()
        .iter()
        .map(|(target, value)| RateEntry::new(rates.base().clone(), target.clone(), *value))
        .collect()
}

/// Triangulate a full table from rates quoted against one base.
///
/// For every enabled currency `T` with a quote, `T -> C` is
/// `rates[C] / rates[T]` and `T -> base` is `1 / rates[T]`, each rounded
/// once. A currency without a quote gets no row.
pub fn cross_sync(rates: &RateSet, enabled: &BTreeSet<Currency>) -> RateTable {
    let base = rates.base();
    let mut table = RateTable::new();

    let targets: Vec<&Currency> = if enabled.is_empty() {
        std::iter::once(base).chain(rates.rates().keys()).collect()
    } else {
        enabled.iter().collect()
    };

    for target in targets {
        if target == base {
            table.insert_row(collect_row(rates));
            continue;
        }

        let Some(quote) = rates.rate(target) else {
            warn!(base = %base, currency = %target, "No quote for enabled currency, leaving its row empty");
            continue;
        };
        let Some(factor) = Decimal::ONE.checked_div(quote) else {
            warn!(base = %base, currency = %target, quote = %quote, "Cannot invert quote, leaving its row empty");
            continue;
        };

        for (currency, value) in rates.rates() {
            if currency == target {
                continue;
            }
            let Some(cross) = value.checked_mul(factor) else {
                warn!(source = %target, target = %currency, "Cross rate overflowed, skipping");
                continue;
            };
            insert_positive(&mut table, target, currency, round_rate(cross));
        }
        insert_positive(&mut table, target, base, round_rate(factor));
    }

    table
}

fn insert_positive(table: &mut RateTable, source: &Currency, target: &Currency, value: Decimal) {
    if value.is_zero() {
        debug!(source = %source, target = %target, "Cross rate rounds to zero, skipping");
        return;
    }
    table.insert(RateEntry::new(source.clone(), target.clone(), value));
}

/// Fold freshly computed rates into the currently stored table.
///
/// Manual entries win over computed ones. Entries the new data does not
/// cover survive when they are manual, or when their whole source row
/// failed to import this cycle. Anything involving a disabled currency is
/// dropped.
pub fn merge_with_existing(
    computed: &RateTable,
    existing: &RateTable,
    enabled: &BTreeSet<Currency>,
) -> RateTable {
    let mut merged = RateTable::new();

    for entry in computed.entries() {
        match existing.get(&entry.source, &entry.target) {
            Some(current) if current.manual => {
                merged.insert(current.clone());
            }
            _ => {
                merged.insert(RateEntry::new(
                    entry.source.clone(),
                    entry.target.clone(),
                    entry.value,
                ));
            }
        }
    }

    for entry in existing.entries() {
        if !is_enabled(enabled, &entry.source) || !is_enabled(enabled, &entry.target) {
            continue;
        }
        if merged.get(&entry.source, &entry.target).is_some() {
            continue;
        }
        let source_missing = !computed.contains_source(&entry.source);
        if entry.manual || source_missing {
            merged.insert(entry.clone());
        }
    }

    merged
}

/// Builds a provider's table according to its mode.
pub struct RateDerivationEngine {
    fetcher: Arc<dyn RateFetcher>,
}

impl RateDerivationEngine {
    /// Create a new engine fetching through `fetcher`.
    pub fn new(fetcher: Arc<dyn RateFetcher>) -> Self {
        Self { fetcher }
    }

    /// Fetch, derive and merge a provider's table.
    ///
    /// Never fails as a whole: every fetch or validation error is logged
    /// and collected in [`Derivation::failures`].
    #[instrument(skip(self, provider, enabled, existing), fields(provider = %provider.id))]
    pub async fn derive(
        &self,
        provider: &Provider,
        enabled: &BTreeSet<Currency>,
        existing: &RateTable,
    ) -> Derivation {
        let mut failures = Vec::new();

        let computed = match &provider.mode {
            ProviderMode::Manual => {
                debug!("Manual provider, nothing to derive");
                return Derivation::default();
            }
            ProviderMode::CrossSync { base_currency } => {
                match self.fetch_rate_set(provider, base_currency, enabled).await {
                    Ok(rates) => cross_sync(&rates, enabled),
                    Err(e) => {
                        warn!(base = %base_currency, error = %e, "Cross-sync fetch failed");
                        failures.push(e);
                        RateTable::new()
                    }
                }
            }
            ProviderMode::Enterprise => self.collect_enterprise(provider, enabled, &mut failures).await,
        };

        if computed.is_empty() {
            warn!(failures = failures.len(), "No rates derived, keeping stored table");
            return Derivation {
                table: computed,
                failures,
            };
        }

        let table = merge_with_existing(&computed, existing, enabled);
        info!(
            rows = table.len(),
            computed = computed.len(),
            failures = failures.len(),
            "Derived rate table"
        );

        Derivation { table, failures }
    }

    async fn collect_enterprise(
        &self,
        provider: &Provider,
        enabled: &BTreeSet<Currency>,
        failures: &mut Vec<RateError>,
    ) -> RateTable {
        let mut table = RateTable::new();

        for currency in enabled {
            let rates = match self.fetch_rate_set(provider, currency, enabled).await {
                Ok(rates) => rates,
                Err(e) => {
                    warn!(base = %currency, error = %e, "Enterprise fetch failed");
                    failures.push(e);
                    continue;
                }
            };

            if table.contains_source(rates.base()) {
                debug!(base = %rates.base(), hint = %currency, "Duplicate base in enterprise results, ignoring");
                continue;
            }
            if rates.is_empty() {
                debug!(base = %rates.base(), "Empty rate set");
                continue;
            }
            table.insert_row(collect_row(&rates));
        }

        table
    }

    async fn fetch_rate_set(
        &self,
        provider: &Provider,
        base: &Currency,
        enabled: &BTreeSet<Currency>,
    ) -> RateResult<RateSet> {
        let payload = self.fetcher.fetch(provider, Some(base)).await?;
        let definition = normalize_payload(&provider.id, payload, Some(base))?
            .with_currencies(enabled.clone())
            .with_transform(provider.transform_rates);
        RateSet::try_from(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::StaticRateFetcher;
    use crate::provider::{ProviderConfig, Upstream};
    use proptest::prelude::*;
    use rust_decimal::RoundingStrategy;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn enabled(codes: &[&str]) -> BTreeSet<Currency> {
        codes.iter().map(|c| Currency::new(*c)).collect()
    }

    fn aud() -> Currency {
        Currency::aud()
    }

    fn cross_sync_provider() -> Provider {
        Provider::from_config(ProviderConfig {
            api_key: Some("key".to_string()),
            base_currency: Some("EUR".to_string()),
            ..ProviderConfig::new("fixer", Upstream::Fixer)
        })
        .unwrap()
    }

    fn enterprise_provider() -> Provider {
        Provider::from_config(ProviderConfig {
            api_key: Some("key".to_string()),
            enterprise: true,
            ..ProviderConfig::new("oxr", Upstream::OpenExchangeRates)
        })
        .unwrap()
    }

    fn worked_example() -> RateSet {
        let rates = BTreeMap::from([(Currency::usd(), dec!(1.19)), (aud(), dec!(1.66))]);
        RateSet::new(Currency::eur(), rates, Some(enabled(&["EUR", "USD", "AUD"])), false).unwrap()
    }

    #[test]
    fn test_cross_sync_worked_example() {
        let table = cross_sync(&worked_example(), &enabled(&["EUR", "USD", "AUD"]));
        let eur = Currency::eur();
        let usd = Currency::usd();

        assert_eq!(table.len(), 6);
        assert_eq!(table.value(&eur, &usd), Some(dec!(1.19)));
        assert_eq!(table.value(&eur, &aud()), Some(dec!(1.66)));
        assert_eq!(table.value(&usd, &eur), Some(dec!(0.840336)));
        assert_eq!(table.value(&usd, &aud()), Some(dec!(1.394958)));
        assert_eq!(table.value(&aud(), &eur), Some(dec!(0.602410)));
        assert_eq!(table.value(&aud(), &usd), Some(dec!(0.716867)));

        for currency in [&eur, &usd, &aud()] {
            assert!(table.get(currency, currency).is_none());
        }
        assert!(table.entries().all(|e| !e.manual));
    }

    #[test]
    fn test_cross_sync_missing_quote_leaves_row_absent() {
        let table = cross_sync(&worked_example(), &enabled(&["EUR", "USD", "AUD", "GBP"]));

        assert!(!table.contains_source(&Currency::gbp()));
        assert!(table.contains_source(&Currency::usd()));
    }

    #[test]
    fn test_cross_sync_unfiltered_covers_every_quote() {
        let rates = BTreeMap::from([(Currency::usd(), dec!(1.19)), (aud(), dec!(1.66))]);
        let rates = RateSet::new(Currency::eur(), rates, None, false).unwrap();
        let table = cross_sync(&rates, &BTreeSet::new());
        assert_eq!(table.len(), 6);
    }

    #[test]
    fn test_merge_keeps_manual_entries() {
        let computed = cross_sync(&worked_example(), &enabled(&["EUR", "USD", "AUD"]));
        let existing: RateTable = vec![
            RateEntry::manual(Currency::usd(), Currency::eur(), dec!(0.9)),
            RateEntry::new(Currency::eur(), Currency::usd(), dec!(1.5)),
        ]
        .into_iter()
        .collect();

        let merged = merge_with_existing(&computed, &existing, &enabled(&["EUR", "USD", "AUD"]));

        let pinned = merged.get(&Currency::usd(), &Currency::eur()).unwrap();
        assert!(pinned.manual);
        assert_eq!(pinned.value, dec!(0.9));
        assert_eq!(merged.value(&Currency::eur(), &Currency::usd()), Some(dec!(1.19)));
        assert_eq!(merged.len(), 6);
    }

    #[test]
    fn test_merge_carries_manual_entry_not_in_computed() {
        let computed = cross_sync(&worked_example(), &enabled(&["EUR", "USD", "AUD"]));
        let existing: RateTable = vec![
            RateEntry::manual(Currency::usd(), Currency::gbp(), dec!(0.79)),
            RateEntry::manual(Currency::usd(), Currency::jpy(), dec!(150)),
        ]
        .into_iter()
        .collect();

        let merged = merge_with_existing(&computed, &existing, &enabled(&["EUR", "USD", "AUD", "GBP"]));

        assert_eq!(merged.value(&Currency::usd(), &Currency::gbp()), Some(dec!(0.79)));
        assert!(merged.get(&Currency::usd(), &Currency::jpy()).is_none());
    }

    #[test]
    fn test_merge_drops_stale_entries_of_imported_rows() {
        let computed = cross_sync(&worked_example(), &enabled(&["EUR", "USD", "AUD"]));
        let existing: RateTable =
            vec![RateEntry::new(Currency::usd(), Currency::gbp(), dec!(0.79))].into_iter().collect();

        let merged = merge_with_existing(&computed, &existing, &enabled(&["EUR", "USD", "AUD", "GBP"]));
        assert!(merged.get(&Currency::usd(), &Currency::gbp()).is_none());
    }

    #[tokio::test]
    async fn test_derive_cross_sync() {
        let fetcher = Arc::new(StaticRateFetcher::new());
        fetcher.set_payload(
            "fixer",
            None,
            json!({ "success": true, "base": "EUR", "rates": { "USD": 1.19, "AUD": 1.66, "JPY": 160.1 } }),
        );
        let engine = RateDerivationEngine::new(fetcher.clone());

        let derivation = engine
            .derive(&cross_sync_provider(), &enabled(&["EUR", "USD", "AUD"]), &RateTable::new())
            .await;

        assert!(derivation.failures.is_empty());
        assert_eq!(derivation.table.len(), 6);
        assert_eq!(derivation.table.value(&aud(), &Currency::usd()), Some(dec!(0.716867)));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_derive_cross_sync_quote_rounding_to_zero() {
        let fetcher = Arc::new(StaticRateFetcher::new());
        fetcher.set_payload(
            "fixer",
            None,
            json!({ "base": "EUR", "rates": { "USD": 1.19, "XAU": 0.0000004 } }),
        );
        let engine = RateDerivationEngine::new(fetcher);
        let xau = Currency::new("XAU");

        let derivation = engine
            .derive(&cross_sync_provider(), &enabled(&["EUR", "USD", "XAU"]), &RateTable::new())
            .await;

        assert!(derivation.failures.is_empty());
        assert_eq!(derivation.table.len(), 2);
        assert!(!derivation.table.contains_source(&xau));
        assert!(derivation.table.get(&Currency::eur(), &xau).is_none());
        assert_eq!(derivation.table.value(&Currency::usd(), &Currency::eur()), Some(dec!(0.840336)));
    }

    #[test]
    fn test_cross_sync_skips_overflowing_cross_rate() {
        let xau = Currency::new("XAU");
        let rates = BTreeMap::from([
            (Currency::usd(), dec!(0.000001)),
            (xau.clone(), dec!(100000000000000000000000)),
        ]);
        let rates = RateSet::new(Currency::eur(), rates, None, false).unwrap();

        let table = cross_sync(&rates, &BTreeSet::new());

        assert!(table.get(&Currency::usd(), &xau).is_none());
        assert_eq!(table.value(&Currency::usd(), &Currency::eur()), Some(dec!(1000000)));
        assert!(!table.contains_source(&xau));
        assert!(table.entries().all(|entry| entry.is_positive()));
    }

    #[tokio::test]
    async fn test_derive_cross_sync_failure_writes_nothing() {
        let fetcher = Arc::new(StaticRateFetcher::new());
        fetcher.set_failure("fixer", None, "connection refused");
        let engine = RateDerivationEngine::new(fetcher);

        let existing: RateTable =
            vec![RateEntry::new(Currency::eur(), Currency::usd(), dec!(1.1))].into_iter().collect();
        let derivation = engine
            .derive(&cross_sync_provider(), &enabled(&["EUR", "USD"]), &existing)
            .await;

        assert!(derivation.is_empty());
        assert_eq!(derivation.failures.len(), 1);
        assert!(matches!(derivation.failures[0], RateError::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_derive_invalid_payload_is_absorbed() {
        let fetcher = Arc::new(StaticRateFetcher::new());
        fetcher.set_payload("fixer", None, json!({ "base": "EUR", "rates": { "USD": "abs" } }));
        let engine = RateDerivationEngine::new(fetcher);

        let derivation = engine
            .derive(&cross_sync_provider(), &enabled(&["EUR", "USD"]), &RateTable::new())
            .await;

        assert!(derivation.is_empty());
        assert!(matches!(derivation.failures[0], RateError::Validation(_)));
    }

    #[tokio::test]
    async fn test_derive_manual_pins_survive() {
        let fetcher = Arc::new(StaticRateFetcher::new());
        fetcher.set_payload("fixer", None, json!({ "base": "EUR", "rates": { "USD": 1.19 } }));
        let engine = RateDerivationEngine::new(fetcher);

        let existing: RateTable =
            vec![RateEntry::manual(Currency::eur(), Currency::usd(), dec!(1.25))].into_iter().collect();
        let derivation = engine
            .derive(&cross_sync_provider(), &enabled(&["EUR", "USD"]), &existing)
            .await;

        let entry = derivation.table.get(&Currency::eur(), &Currency::usd()).unwrap();
        assert!(entry.manual);
        assert_eq!(entry.value, dec!(1.25));
        assert_eq!(derivation.table.value(&Currency::usd(), &Currency::eur()), Some(dec!(0.840336)));
    }

    #[tokio::test]
    async fn test_derive_enterprise_keeps_failed_rows() {
        let fetcher = Arc::new(StaticRateFetcher::new());
        fetcher.set_payload(
            "oxr",
            Some(Currency::eur()),
            json!({ "base": "EUR", "rates": { "USD": 1.19, "AUD": 1.66 } }),
        );
        fetcher.set_payload(
            "oxr",
            Some(Currency::usd()),
            json!({ "base": "USD", "rates": { "EUR": 0.84, "AUD": 1.39 } }),
        );
        fetcher.set_failure("oxr", Some(aud()), "rate limited");
        let engine = RateDerivationEngine::new(fetcher.clone());

        let existing: RateTable = vec![
            RateEntry::new(aud(), Currency::eur(), dec!(0.6)),
            RateEntry::new(aud(), Currency::usd(), dec!(0.7)),
        ]
        .into_iter()
        .collect();

        let derivation = engine
            .derive(&enterprise_provider(), &enabled(&["EUR", "USD", "AUD"]), &existing)
            .await;

        assert_eq!(fetcher.calls(), 3);
        assert_eq!(derivation.failures.len(), 1);
        assert_eq!(derivation.table.len(), 6);
        assert_eq!(derivation.table.value(&aud(), &Currency::eur()), Some(dec!(0.6)));
        assert_eq!(derivation.table.value(&Currency::usd(), &Currency::eur()), Some(dec!(0.84)));
    }

    #[tokio::test]
    async fn test_derive_enterprise_ignores_duplicate_base() {
        let fetcher = Arc::new(StaticRateFetcher::new());
        // Free plans answer every request with the account's default base.
        fetcher.set_payload("oxr", None, json!({ "base": "EUR", "rates": { "USD": 1.19 } }));
        let engine = RateDerivationEngine::new(fetcher);

        let derivation = engine
            .derive(&enterprise_provider(), &enabled(&["EUR", "USD"]), &RateTable::new())
            .await;

        assert_eq!(derivation.table.len(), 1);
        assert!(derivation.failures.is_empty());
    }

    #[tokio::test]
    async fn test_enterprise_and_cross_sync_converge() {
        let currencies = enabled(&["EUR", "USD", "AUD"]);

        let cross = Arc::new(StaticRateFetcher::new());
        cross.set_payload("fixer", None, json!({ "base": "EUR", "rates": { "USD": 1.19, "AUD": 1.66 } }));
        let cross_table = RateDerivationEngine::new(cross)
            .derive(&cross_sync_provider(), &currencies, &RateTable::new())
            .await
            .table;

        let direct = Arc::new(StaticRateFetcher::new());
        direct.set_payload("oxr", Some(Currency::eur()), json!({ "base": "EUR", "rates": { "USD": "1.19", "AUD": "1.66" } }));
        direct.set_payload("oxr", Some(Currency::usd()), json!({ "base": "USD", "rates": { "EUR": "0.840336134", "AUD": "1.394957983" } }));
        direct.set_payload("oxr", Some(aud()), json!({ "base": "AUD", "rates": { "EUR": "0.602409639", "USD": "0.716867469" } }));
        let enterprise_table = RateDerivationEngine::new(direct)
            .derive(&enterprise_provider(), &currencies, &RateTable::new())
            .await
            .table;

        assert_eq!(cross_table.len(), enterprise_table.len());
        for entry in cross_table.entries() {
            let other = enterprise_table.value(&entry.source, &entry.target).unwrap();
            let round2 = |v: Decimal| v.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
            assert_eq!(round2(entry.value), round2(other), "{}", entry.pair());
        }
    }

    #[tokio::test]
    async fn test_manual_provider_derives_nothing() {
        let fetcher = Arc::new(StaticRateFetcher::new());
        let provider = Provider::from_config(ProviderConfig::new("manual", Upstream::Manual)).unwrap();
        let engine = RateDerivationEngine::new(fetcher.clone());

        let derivation = engine.derive(&provider, &enabled(&["EUR", "USD"]), &RateTable::new()).await;

        assert!(derivation.is_empty());
        assert_eq!(fetcher.calls(), 0);
    }

    proptest! {
        #[test]
        fn prop_cross_sync_is_self_consistent(usd in 5_000i64..20_000, aud in 5_000i64..20_000, gbp in 5_000i64..20_000) {
            let rates = BTreeMap::from([
                (Currency::usd(), Decimal::new(usd, 4)),
                (Currency::aud(), Decimal::new(aud, 4)),
                (Currency::gbp(), Decimal::new(gbp, 4)),
            ]);
            let currencies = enabled(&["EUR", "USD", "AUD", "GBP"]);
            let rates = RateSet::new(Currency::eur(), rates, Some(currencies.clone()), false).unwrap();
            let table = cross_sync(&rates, &currencies);

            prop_assert_eq!(table.len(), 12);
            for entry in table.entries() {
                let back = table.value(&entry.target, &entry.source).unwrap();
                let product = entry.value * back;
                prop_assert!((product - Decimal::ONE).abs() < dec!(0.00001), "{} -> {}", entry.pair(), product);
            }
        }
    }
}
