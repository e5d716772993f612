//! Exchanger Importer
//!
//! Keeps every provider's rate table fresh: decides which providers are due,
//! runs their derivation and writes the result to the rate store.

pub mod config;
pub mod metrics;
pub mod scheduler;
pub mod state;

pub use config::ImporterConfig;
pub use metrics::{ImportMetrics, ImportMetricsSnapshot, SharedMetrics};
pub use scheduler::{ImportOutcome, ImportReport, ImportScheduler, ProviderReport};
pub use state::ImportState;
