//! Exchanger Rate Store
//!
//! Postgres persistence for latest and historical rate tables.

pub mod error;
pub mod postgres;
pub mod rows;
pub mod schema;

pub use error::{StoreError, StoreResult};
pub use postgres::{PgRateStore, PgStoreConfig};
pub use rows::{HistoricalRateRow, LatestRateRow};
