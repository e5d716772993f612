//! Monetary types for the exchanger.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CommonError;

/// A monetary amount with currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// The amount value (high precision decimal).
    pub value: Decimal,
    /// ISO 4217 currency code.
    pub currency: Currency,
}

impl Money {
    /// Create a new Money instance.
    pub fn new(value: Decimal, currency: Currency) -> Self {
        Self { value, currency }
    }

    /// Create from a string value.
    pub fn from_str(value: &str, currency: Currency) -> Result<Self, CommonError> {
        let value = value
            .trim()
            .parse()
            .map_err(|_| CommonError::InvalidAmount(value.to_string()))?;
        Ok(Self { value, currency })
    }

    /// Create a zero amount in the given currency.
    pub fn zero(currency: Currency) -> Self {
        Self {
            value: Decimal::ZERO,
            currency,
        }
    }

    /// Check if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    /// Round to the currency's minor units, midpoint away from zero.
    pub fn round(&self) -> Self {
        let places = self.currency.decimal_places();
        Self {
            value: self
                .value
                .round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero),
            currency: self.currency.clone(),
        }
    }

    /// Multiply by `rate` and express the result in `target`, rounded to its minor units.
    pub fn convert(&self, rate: Decimal, target: Currency) -> Result<Self, CommonError> {
        let value = self
            .value
            .checked_mul(rate)
            .ok_or_else(|| CommonError::Overflow(format!("{self} at rate {rate}")))?;
        Ok(Money::new(value, target).round())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.currency)
    }
}

/// ISO 4217 currency code.
///
/// Always three upper-case ASCII letters; [`Currency::parse`] is the only
/// validating constructor and deserialization goes through it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Create a currency from a code known to be valid.
    ///
    /// The code is upper-cased but otherwise unchecked; use [`Currency::parse`]
    /// for untrusted input.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_uppercase())
    }

    /// Parse and validate a currency code.
    pub fn parse(code: &str) -> Result<Self, CommonError> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CommonError::InvalidCurrency(code.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Get the standard decimal places for this currency.
    pub fn decimal_places(&self) -> u32 {
        match self.0.as_str() {
            "JPY" | "KRW" | "VND" | "CLP" | "ISK" => 0,
            "BHD" | "KWD" | "OMR" | "JOD" | "TND" => 3,
            _ => 2,
        }
    }

    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }

    pub fn gbp() -> Self {
        Self::new("GBP")
    }

    pub fn jpy() -> Self {
        Self::new("JPY")
    }

    pub fn aud() -> Self {
        Self::new("AUD")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Currency {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = CommonError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

/// A directed currency pair: one unit of `source` is worth some amount of `target`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    /// Currency being converted from.
    pub source: Currency,
    /// Currency being converted to.
    pub target: Currency,
}

impl CurrencyPair {
    /// Create a new currency pair.
    pub fn new(source: Currency, target: Currency) -> Self {
        Self { source, target }
    }

    /// Get the inverse pair.
    pub fn inverse(&self) -> Self {
        Self {
            source: self.target.clone(),
            target: self.source.clone(),
        }
    }

    /// Whether both sides are the same currency.
    pub fn is_identity(&self) -> bool {
        self.source == self.target
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_currency_parse() {
        assert_eq!(Currency::parse("usd").unwrap(), Currency::usd());
        assert_eq!(Currency::parse(" EUR ").unwrap(), Currency::eur());
        assert!(Currency::parse("").is_err());
        assert!(Currency::parse("EURO").is_err());
        assert!(Currency::parse("E1R").is_err());
    }

    #[test]
    fn test_currency_serde_validates() {
        let parsed: Currency = serde_json::from_str("\"aud\"").unwrap();
        assert_eq!(parsed, Currency::aud());
        assert!(serde_json::from_str::<Currency>("\"dollars\"").is_err());
        assert_eq!(serde_json::to_string(&Currency::usd()).unwrap(), "\"USD\"");
    }

    #[test]
    fn test_currency_decimal_places() {
        assert_eq!(Currency::usd().decimal_places(), 2);
        assert_eq!(Currency::eur().decimal_places(), 2);
        assert_eq!(Currency::jpy().decimal_places(), 0);
        assert_eq!(Currency::new("KWD").decimal_places(), 3);
    }

    #[test]
    fn test_money_round_midpoint_away_from_zero() {
        let m = Money::new(dec!(10.125), Currency::usd());
        assert_eq!(m.round().value, dec!(10.13));

        let m = Money::new(dec!(-10.125), Currency::usd());
        assert_eq!(m.round().value, dec!(-10.13));

        let m = Money::new(dec!(1234.5), Currency::jpy());
        assert_eq!(m.round().value, dec!(1235));
    }

    #[test]
    fn test_money_convert() {
        let usd = Money::from_str("100", Currency::usd()).unwrap();
        let eur = usd.convert(dec!(0.84), Currency::eur()).unwrap();

        assert_eq!(eur.currency, Currency::eur());
        assert_eq!(eur.value, dec!(84.00));
        assert_eq!(eur.to_string(), "84.00 EUR");
    }

    #[test]
    fn test_money_convert_overflow() {
        let huge = Money::new(Decimal::MAX / dec!(100), Currency::usd());
        let result = huge.convert(dec!(150), Currency::jpy());
        assert!(matches!(result, Err(CommonError::Overflow(_))));
    }

    #[test]
    fn test_money_from_str_rejects_garbage() {
        assert!(Money::from_str("abs", Currency::usd()).is_err());
    }

    #[test]
    fn test_pair_inverse() {
        let pair = CurrencyPair::new(Currency::usd(), Currency::eur());
        assert_eq!(pair.inverse(), CurrencyPair::new(Currency::eur(), Currency::usd()));
        assert_eq!(pair.to_string(), "USD/EUR");
        assert!(!pair.is_identity());
    }
}
