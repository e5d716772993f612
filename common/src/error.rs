//! Error types shared by the exchanger crates.

use thiserror::Error;

/// Errors raised while parsing shared value types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// Not a three-letter ISO 4217 code.
    #[error("Invalid currency code: {0:?}")]
    InvalidCurrency(String),

    /// Provider ID does not follow the machine-name format.
    #[error("Invalid provider id: {0:?}")]
    InvalidProviderId(String),

    /// Amount is not a decimal number.
    #[error("Invalid amount: {0:?}")]
    InvalidAmount(String),

    /// Arithmetic left the representable decimal range.
    #[error("Amount overflow: {0}")]
    Overflow(String),
}
