//! Validated snapshots of rates quoted against one base currency.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use exchanger_common::Currency;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{RateError, RateResult};

/// Decimal places every stored rate is rounded to.
pub const RATE_SCALE: u32 = 6;

/// Round a rate to [`RATE_SCALE`] places, midpoint away from zero.
///
/// Every derivation step goes through this, so chained derivations
/// (pivot, target, reverse) each lose at most half a unit in the sixth place.
pub fn round_rate(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(RATE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Parse a JSON number or numeric string into a decimal.
pub(crate) fn parse_decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    if text.is_empty() {
        return None;
    }
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// Untyped description of a rate set, as produced from a provider payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateSetDefinition {
    /// Currency the rates are quoted against.
    pub base: String,
    /// Expected to be an object of `currency code -> number or numeric string`.
    pub rates: Value,
    /// Enabled currencies to filter the rates down to.
    #[serde(default)]
    pub currencies: Option<BTreeSet<Currency>>,
    /// Whether the provider quotes the inverse ratio.
    #[serde(default)]
    pub transform: bool,
}

impl RateSetDefinition {
    /// Create a definition without filtering or transform.
    pub fn new(base: impl Into<String>, rates: Value) -> Self {
        Self {
            base: base.into(),
            rates,
            currencies: None,
            transform: false,
        }
    }

    /// Filter the rates to the given enabled currencies.
    pub fn with_currencies(mut self, currencies: BTreeSet<Currency>) -> Self {
        self.currencies = Some(currencies);
        self
    }

    /// Replace every rate with its reciprocal.
    pub fn with_transform(mut self, transform: bool) -> Self {
        self.transform = transform;
        self
    }
}

/// An immutable, validated set of rates against one base currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateSet {
    base: Currency,
    rates: BTreeMap<Currency, Decimal>,
    currencies: Option<BTreeSet<Currency>>,
    transform: bool,
}

impl RateSet {
    /// Build a rate set from already-typed rates.
    pub fn new(
        base: Currency,
        rates: BTreeMap<Currency, Decimal>,
        currencies: Option<BTreeSet<Currency>>,
        transform: bool,
    ) -> RateResult<Self> {
        let currencies = currencies.filter(|set| !set.is_empty());

        if let Some(enabled) = &currencies {
            if !enabled.contains(&base) {
                return Err(RateError::Validation(format!(
                    "base currency {base} must be among the enabled currencies"
                )));
            }
        }

        if let Some((currency, rate)) = rates.iter().find(|(_, rate)| rate.is_sign_negative() && !rate.is_zero()) {
            return Err(RateError::Validation(format!(
                "rate for {currency} must not be negative, got {rate}"
            )));
        }

        let mut normalized = BTreeMap::new();
        for (currency, rate) in rates {
            if let Some(enabled) = &currencies {
                if !enabled.contains(&currency) {
                    continue;
                }
            }

            if currency == base {
                debug!(base = %base, "Dropping base currency self-quote");
                continue;
            }

            let value = if transform {
                Decimal::ONE.checked_div(rate)
            } else {
                Some(rate)
            };
            let Some(value) = value.map(round_rate).filter(|v| !v.is_zero()) else {
                warn!(base = %base, currency = %currency, rate = %rate, "Dropping zero rate");
                continue;
            };
            normalized.insert(currency, value);
        }

        Ok(Self {
            base,
            rates: normalized,
            currencies,
            transform,
        })
    }

    /// Get base currency the rates are built upon.
    pub fn base(&self) -> &Currency {
        &self.base
    }

    /// All rates keyed by currency.
    pub fn rates(&self) -> &BTreeMap<Currency, Decimal> {
        &self.rates
    }

    /// Rate for one currency.
    pub fn rate(&self, currency: &Currency) -> Option<Decimal> {
        self.rates.get(currency).copied()
    }

    /// Enabled currencies the set was filtered with.
    pub fn currencies(&self) -> Option<&BTreeSet<Currency>> {
        self.currencies.as_ref()
    }

    /// Whether rates were inverted at construction.
    pub fn is_transformed(&self) -> bool {
        self.transform
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

impl TryFrom<RateSetDefinition> for RateSet {
    type Error = RateError;

    fn try_from(definition: RateSetDefinition) -> RateResult<Self> {
        let base = definition.base.trim();
        if base.is_empty() {
            return Err(RateError::Validation(
                "missing required property \"base\"".to_string(),
            ));
        }
        let base = Currency::parse(base)?;

        let Value::Object(raw) = definition.rates else {
            return Err(RateError::Validation(
                "the property \"rates\" must be an object".to_string(),
            ));
        };

        let mut rates = BTreeMap::new();
        for (code, value) in raw {
            let currency = Currency::parse(&code).map_err(|_| {
                RateError::Validation(format!("rate key {code:?} is not a currency code"))
            })?;
            let rate = parse_decimal(&value).ok_or_else(|| {
                RateError::Validation(format!("rate for {currency} must be numeric, got {value}"))
            })?;
            rates.insert(currency, rate);
        }

        RateSet::new(base, rates, definition.currencies, definition.transform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn currencies(codes: &[&str]) -> BTreeSet<Currency> {
        codes.iter().map(|c| Currency::new(*c)).collect()
    }

    #[test]
    fn test_non_numeric_rate_rejected() {
        let definition = RateSetDefinition::new("HRK", json!({ "EUR": "abs" }));
        let result = RateSet::try_from(definition);
        assert!(matches!(result, Err(RateError::Validation(_))));
    }

    #[test]
    fn test_empty_string_rate_rejected() {
        let definition = RateSetDefinition::new("HRK", json!({ "EUR": "" }));
        assert!(RateSet::try_from(definition).is_err());
    }

    #[test]
    fn test_missing_base_rejected() {
        let definition = RateSetDefinition::new("  ", json!({ "EUR": "7.55" }));
        assert!(matches!(RateSet::try_from(definition), Err(RateError::Validation(_))));
    }

    #[test]
    fn test_rates_must_be_object() {
        let definition = RateSetDefinition::new("HRK", json!(["7.55"]));
        assert!(matches!(RateSet::try_from(definition), Err(RateError::Validation(_))));
    }

    #[test]
    fn test_key_must_be_currency() {
        let definition = RateSetDefinition::new("HRK", json!({ "timestamp": 1700000000 }));
        assert!(matches!(RateSet::try_from(definition), Err(RateError::Validation(_))));
    }

    #[test]
    fn test_valid() {
        let definition = RateSetDefinition::new("HRK", json!({ "EUR": "7.55", "USD": "6.45" }));
        let rates = RateSet::try_from(definition).unwrap();

        assert_eq!(rates.base(), &Currency::new("HRK"));
        assert_eq!(rates.rate(&Currency::eur()), Some(dec!(7.55)));
        assert_eq!(rates.rate(&Currency::usd()), Some(dec!(6.45)));
        assert!(!rates.is_transformed());
        assert_eq!(rates.len(), 2);
        assert!(rates.currencies().is_none());
    }

    #[test]
    fn test_numbers_and_scientific_notation() {
        let definition = RateSetDefinition::new("BTC", json!({ "USD": 43125.5, "EUR": "2.5e-5" }));
        let rates = RateSet::try_from(definition).unwrap();
        assert_eq!(rates.rate(&Currency::usd()), Some(dec!(43125.5)));
        assert_eq!(rates.rate(&Currency::eur()), Some(dec!(0.000025)));
    }

    #[test]
    fn test_valid_filtered_and_transformed() {
        let definition = RateSetDefinition::new(
            "HRK",
            json!({ "EUR": "7.55", "USD": "6.45", "UAH": "5.40" }),
        )
        .with_currencies(currencies(&["EUR", "USD", "HRK"]))
        .with_transform(true);
        let rates = RateSet::try_from(definition).unwrap();

        assert!(rates.is_transformed());
        assert_eq!(rates.currencies().unwrap().len(), 3);
        assert_eq!(rates.len(), 2);
        assert_eq!(rates.rate(&Currency::eur()), Some(dec!(0.132450)));
        assert_eq!(rates.rate(&Currency::usd()), Some(dec!(0.155039)));
        assert!(rates.rate(&Currency::new("UAH")).is_none());
    }

    #[test]
    fn test_base_must_be_enabled() {
        let definition = RateSetDefinition::new("HRK", json!({ "EUR": "7.55" }))
            .with_currencies(currencies(&["EUR", "USD"]));
        assert!(matches!(RateSet::try_from(definition), Err(RateError::Validation(_))));
    }

    #[test]
    fn test_empty_enabled_set_means_unfiltered() {
        let definition =
            RateSetDefinition::new("EUR", json!({ "USD": 1.19 })).with_currencies(BTreeSet::new());
        let rates = RateSet::try_from(definition).unwrap();
        assert_eq!(rates.len(), 1);
        assert!(rates.currencies().is_none());
    }

    #[test]
    fn test_base_self_quote_and_zero_dropped() {
        let definition =
            RateSetDefinition::new("EUR", json!({ "EUR": 1, "USD": 1.19, "XAU": 0 }));
        let rates = RateSet::try_from(definition).unwrap();
        assert_eq!(rates.len(), 1);
        assert!(rates.rate(&Currency::eur()).is_none());
        assert!(rates.rate(&Currency::new("XAU")).is_none());
    }

    #[test]
    fn test_rate_rounding_to_zero_dropped() {
        let definition = RateSetDefinition::new("EUR", json!({ "USD": 1.19, "XAU": 0.0000004 }))
            .with_currencies(currencies(&["EUR", "USD", "XAU"]));
        let rates = RateSet::try_from(definition).unwrap();
        assert_eq!(rates.len(), 1);
        assert!(rates.rate(&Currency::new("XAU")).is_none());
    }

    #[test]
    fn test_transformed_large_rate_dropped() {
        let definition = RateSetDefinition::new("EUR", json!({ "USD": 0.84, "VEF": 2500000 }))
            .with_transform(true);
        let rates = RateSet::try_from(definition).unwrap();
        assert_eq!(rates.rate(&Currency::usd()), Some(dec!(1.190476)));
        assert!(rates.rate(&Currency::new("VEF")).is_none());
    }

    #[test]
    fn test_negative_rate_rejected() {
        let definition = RateSetDefinition::new("EUR", json!({ "USD": -1.19 }));
        assert!(matches!(RateSet::try_from(definition), Err(RateError::Validation(_))));
    }

    #[test]
    fn test_rates_rounded_to_six_places() {
        let definition = RateSetDefinition::new("EUR", json!({ "USD": "1.1900005", "AUD": "1.6599994" }));
        let rates = RateSet::try_from(definition).unwrap();
        assert_eq!(rates.rate(&Currency::usd()), Some(dec!(1.190001)));
        assert_eq!(rates.rate(&Currency::aud()), Some(dec!(1.659999)));
    }

    #[test]
    fn test_round_rate_midpoint() {
        assert_eq!(round_rate(dec!(0.0000005)), dec!(0.000001));
        assert_eq!(round_rate(dec!(0.0000015)), dec!(0.000002));
        assert_eq!(round_rate(dec!(0.60240963)), dec!(0.602410));
    }

    proptest! {
        #[test]
        fn prop_transform_is_rounded_reciprocal(raw in prop::collection::vec(1u64..100_000_000u64, 1..6)) {
            let codes = ["USD", "AUD", "GBP", "JPY", "CHF"];
            let original: BTreeMap<Currency, Decimal> = raw
                .iter()
                .zip(codes.iter())
                .map(|(n, code)| (Currency::new(*code), Decimal::new(*n as i64, 4)))
                .collect();

            let rates = RateSet::new(Currency::eur(), original.clone(), None, true).unwrap();

            for (currency, value) in &original {
                prop_assert_eq!(rates.rate(currency), Some(round_rate(Decimal::ONE / *value)));
            }
        }
    }
}
