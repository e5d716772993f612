//! Rate engine error types.

use exchanger_common::{CommonError, Currency, CurrencyPair, ProviderId};
use thiserror::Error;

/// Errors that can occur while importing, storing or converting rates.
#[derive(Debug, Error)]
pub enum RateError {
    /// Malformed rate set, manual rate or other caller input.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// No enabled provider exists to convert with.
    #[error("No active exchange rate provider")]
    NoActiveProvider,

    /// Rate absent or not positive for the requested pair.
    #[error("No exchange rate set for {0}")]
    MissingRate(CurrencyPair),

    /// Remote transport or payload failure for one fetch.
    #[error("Fetch failed for provider {provider}{}: {reason}", .base.as_ref().map(|b| format!(" (base {b})")).unwrap_or_default())]
    Fetch {
        provider: ProviderId,
        base: Option<Currency>,
        reason: String,
    },

    /// Persistence failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid provider configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RateError {
    /// Build a fetch error.
    pub fn fetch(provider: &ProviderId, base: Option<&Currency>, reason: impl Into<String>) -> Self {
        RateError::Fetch {
            provider: provider.clone(),
            base: base.cloned(),
            reason: reason.into(),
        }
    }

    /// Check if retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RateError::Fetch { .. } | RateError::Storage(_))
    }

    /// Get a stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            RateError::Validation(_) => "VALIDATION_ERROR",
            RateError::NoActiveProvider => "NO_ACTIVE_PROVIDER",
            RateError::MissingRate(_) => "MISSING_RATE",
            RateError::Fetch { .. } => "FETCH_ERROR",
            RateError::Storage(_) => "STORAGE_ERROR",
            RateError::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}

impl From<CommonError> for RateError {
    fn from(err: CommonError) -> Self {
        RateError::Validation(err.to_string())
    }
}

/// Result type for rate operations.
pub type RateResult<T> = Result<T, RateError>;
