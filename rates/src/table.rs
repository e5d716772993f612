//! Directed pairwise rate tables.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use exchanger_common::{Currency, CurrencyPair};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One directed rate: `1 source == value target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateEntry {
    pub source: Currency,
    pub target: Currency,
    pub value: Decimal,
    /// Pinned by an administrator; imports leave it alone.
    #[serde(default)]
    pub manual: bool,
}

impl RateEntry {
    /// Create an imported (non-manual) entry.
    pub fn new(source: Currency, target: Currency, value: Decimal) -> Self {
        Self {
            source,
            target,
            value,
            manual: false,
        }
    }

    /// Create a manually pinned entry.
    pub fn manual(source: Currency, target: Currency, value: Decimal) -> Self {
        Self {
            manual: true,
            ..Self::new(source, target, value)
        }
    }

    pub fn pair(&self) -> CurrencyPair {
        CurrencyPair::new(self.source.clone(), self.target.clone())
    }

    /// Usable for conversion.
    pub fn is_positive(&self) -> bool {
        self.value > Decimal::ZERO
    }
}

/// Source currency -> target currency -> entry.
///
/// Directed and not necessarily symmetric: `A -> B` existing says nothing
/// about `B -> A`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateTable {
    rows: BTreeMap<Currency, BTreeMap<Currency, RateEntry>>,
}

impl RateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for one directed pair.
    pub fn get(&self, source: &Currency, target: &Currency) -> Option<&RateEntry> {
        self.rows.get(source).and_then(|row| row.get(target))
    }

    /// Rate value for one directed pair.
    pub fn value(&self, source: &Currency, target: &Currency) -> Option<Decimal> {
        self.get(source, target).map(|entry| entry.value)
    }

    /// Insert or replace an entry, returning the previous one.
    pub fn insert(&mut self, entry: RateEntry) -> Option<RateEntry> {
        self.rows
            .entry(entry.source.clone())
            .or_default()
            .insert(entry.target.clone(), entry)
    }

    /// Remove one directed pair, dropping the row when it becomes empty.
    pub fn remove(&mut self, source: &Currency, target: &Currency) -> Option<RateEntry> {
        let row = self.rows.get_mut(source)?;
        let removed = row.remove(target);
        if row.is_empty() {
            self.rows.remove(source);
        }
        removed
    }

    /// All entries for one source currency.
    pub fn row(&self, source: &Currency) -> Option<&BTreeMap<Currency, RateEntry>> {
        self.rows.get(source)
    }

    /// Insert a whole row, replacing any entries for the same targets.
    pub fn insert_row(&mut self, row: impl IntoIterator<Item = RateEntry>) {
        for entry in row {
            self.insert(entry);
        }
    }

    pub fn contains_source(&self, source: &Currency) -> bool {
        self.rows.contains_key(source)
    }

    pub fn sources(&self) -> impl Iterator<Item = &Currency> {
        self.rows.keys()
    }

    /// Iterate all entries ordered by `(source, target)`.
    pub fn entries(&self) -> impl Iterator<Item = &RateEntry> {
        self.rows.values().flat_map(|row| row.values())
    }

    /// Number of directed pairs.
    pub fn len(&self) -> usize {
        self.rows.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl FromIterator<RateEntry> for RateTable {
    fn from_iter<I: IntoIterator<Item = RateEntry>>(iter: I) -> Self {
        let mut table = RateTable::new();
        table.insert_row(iter);
        table
    }
}

/// Historical snapshots keyed by calendar date.
pub type DatedRateTable = BTreeMap<NaiveDate, RateTable>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_insert_and_get() {
        let mut table = RateTable::new();
        assert!(table.is_empty());

        table.insert(RateEntry::new(Currency::eur(), Currency::usd(), dec!(1.19)));
        table.insert(RateEntry::new(Currency::eur(), Currency::aud(), dec!(1.66)));

        assert_eq!(table.len(), 2);
        assert_eq!(table.value(&Currency::eur(), &Currency::usd()), Some(dec!(1.19)));
        assert!(table.get(&Currency::usd(), &Currency::eur()).is_none());
        assert!(table.contains_source(&Currency::eur()));
        assert!(!table.contains_source(&Currency::usd()));
    }

    #[test]
    fn test_insert_replaces() {
        let mut table = RateTable::new();
        table.insert(RateEntry::new(Currency::eur(), Currency::usd(), dec!(1.19)));
        let previous = table.insert(RateEntry::manual(Currency::eur(), Currency::usd(), dec!(1.2)));

        assert_eq!(previous.map(|e| e.value), Some(dec!(1.19)));
        assert_eq!(table.len(), 1);
        assert!(table.get(&Currency::eur(), &Currency::usd()).unwrap().manual);
    }

    #[test]
    fn test_remove_drops_empty_row() {
        let mut table: RateTable =
            vec![RateEntry::new(Currency::eur(), Currency::usd(), dec!(1.19))].into_iter().collect();

        assert!(table.remove(&Currency::eur(), &Currency::usd()).is_some());
        assert!(table.is_empty());
        assert!(table.remove(&Currency::eur(), &Currency::usd()).is_none());
    }

    #[test]
    fn test_entries_ordered() {
        let table: RateTable = vec![
            RateEntry::new(Currency::usd(), Currency::eur(), dec!(0.84)),
            RateEntry::new(Currency::eur(), Currency::usd(), dec!(1.19)),
            RateEntry::new(Currency::eur(), Currency::aud(), dec!(1.66)),
        ]
        .into_iter()
        .collect();

        let pairs: Vec<String> = table.entries().map(|e| e.pair().to_string()).collect();
        assert_eq!(pairs, vec!["EUR/AUD", "EUR/USD", "USD/EUR"]);
    }
}
