//! Store error types.

use exchanger_rates::RateError;
use thiserror::Error;

/// Errors raised by the Postgres store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row does not map back to a rate entry.
    #[error("Corrupt row for {exchanger}: {reason}")]
    CorruptRow { exchanger: String, reason: String },
}

impl From<StoreError> for RateError {
    fn from(err: StoreError) -> Self {
        RateError::Storage(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
