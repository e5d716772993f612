//! Administrator rate pins.

use exchanger_common::{Currency, CurrencyPair, ProviderId};
use rust_decimal::Decimal;
use tracing::info;

use crate::error::{RateError, RateResult};
use crate::rate_set::round_rate;
use crate::store::RateStore;
use crate::table::{RateEntry, RateTable};

fn check_pair(source: &Currency, target: &Currency) -> RateResult<CurrencyPair> {
    let pair = CurrencyPair::new(source.clone(), target.clone());
    if pair.is_identity() {
        return Err(RateError::Validation(format!("cannot set a rate for {pair}")));
    }
    Ok(pair)
}

/// Pin `1 source == value target` so imports leave it alone.
pub async fn pin_rate(
    store: &dyn RateStore,
    provider: &ProviderId,
    source: &Currency,
    target: &Currency,
    value: Decimal,
) -> RateResult<RateTable> {
    let pair = check_pair(source, target)?;
    if value <= Decimal::ZERO {
        return Err(RateError::Validation(format!(
            "rate for {pair} must be positive, got {value}"
        )));
    }

    let mut table = store.get_latest(provider).await?;
    table.insert(RateEntry::manual(source.clone(), target.clone(), round_rate(value)));
    store.set_latest(provider, &table).await?;

    info!(provider = %provider, pair = %pair, value = %value, "Pinned rate");
    Ok(table)
}

/// Release a pin. The value stays until the next import overwrites it.
pub async fn unpin_rate(
    store: &dyn RateStore,
    provider: &ProviderId,
    source: &Currency,
    target: &Currency,
) -> RateResult<RateTable> {
    let pair = check_pair(source, target)?;

    let mut table = store.get_latest(provider).await?;
    let Some(entry) = table.get(source, target).cloned() else {
        return Err(RateError::MissingRate(pair));
    };
    table.insert(RateEntry {
        manual: false,
        ..entry
    });
    store.set_latest(provider, &table).await?;

    info!(provider = %provider, pair = %pair, "Unpinned rate");
    Ok(table)
}
