//! Row types and their mapping to rate tables.

use chrono::NaiveDate;
use exchanger_common::Currency;
use exchanger_rates::{DatedRateTable, RateEntry, RateTable};
use rust_decimal::Decimal;

use crate::error::{StoreError, StoreResult};

/// One row of `exchanger_latest_rates`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LatestRateRow {
    pub source: String,
    pub target: String,
    pub value: Decimal,
    pub manual: bool,
}

/// One row of `exchanger_historical_rates`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HistoricalRateRow {
    pub source: String,
    pub target: String,
    pub value: Decimal,
    pub manual: bool,
    pub date: NaiveDate,
}

impl LatestRateRow {
    fn into_entry(self, exchanger: &str) -> StoreResult<RateEntry> {
        let corrupt = |reason: String| StoreError::CorruptRow {
            exchanger: exchanger.to_string(),
            reason,
        };
        let source = Currency::parse(&self.source).map_err(|e| corrupt(e.to_string()))?;
        let target = Currency::parse(&self.target).map_err(|e| corrupt(e.to_string()))?;
        Ok(RateEntry {
            source,
            target,
            value: self.value,
            manual: self.manual,
        })
    }
}

/// Rebuild a latest table from its rows.
pub fn latest_table(exchanger: &str, rows: Vec<LatestRateRow>) -> StoreResult<RateTable> {
    rows.into_iter().map(|row| row.into_entry(exchanger)).collect()
}

/// Rebuild dated snapshots from historical rows.
pub fn historical_tables(exchanger: &str, rows: Vec<HistoricalRateRow>) -> StoreResult<DatedRateTable> {
    let mut snapshots = DatedRateTable::new();
    for row in rows {
        let latest = LatestRateRow {
            source: row.source,
            target: row.target,
            value: row.value,
            manual: row.manual,
        };
        snapshots
            .entry(row.date)
            .or_default()
            .insert(latest.into_entry(exchanger)?);
    }
    Ok(snapshots)
}
