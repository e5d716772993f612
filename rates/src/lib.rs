//! Exchanger Rate Engine
//!
//! Normalizes upstream exchange-rate payloads, derives full pairwise rate
//! tables from them and converts amounts with the stored rates.
//!
//! # Features
//!
//! - Rate set validation, filtering and inversion
//! - Cross-sync triangulation from a single base, or per-base enterprise imports
//! - Manual rate pins that survive imports
//! - Latest and historical rate storage behind [`RateStore`]
//! - Cached conversion with invalidation on every table replacement
//!
//! # Example
//!
//! ```rust,ignore
//! use exchanger_rates::{ConversionService, MemoryRateStore, ProviderRegistry};
//! use exchanger_common::{Currency, Money};
//!
//! let service = ConversionService::new(registry, store);
//! let usd = Money::from_str("100.00", Currency::usd())?;
//! let eur = service.convert(&usd, &Currency::eur()).await?;
//! ```

pub mod cache;
pub mod conversion;
pub mod derivation;
pub mod error;
pub mod fetch;
pub mod manual;
pub mod provider;
pub mod rate_set;
pub mod remote;
pub mod store;
pub mod table;

pub use cache::{RateTableCache, RateTableCacheConfig, DEFAULT_CACHE_TTL_SECS};
pub use conversion::{preview, Conversion, ConversionService, PreviewLine};
pub use derivation::{cross_sync, merge_with_existing, Derivation, RateDerivationEngine};
pub use error::{RateError, RateResult};
pub use fetch::{normalize_payload, RateFetcher};
pub use manual::{pin_rate, unpin_rate};
pub use provider::{
    AuthConfig, Provider, ProviderConfig, ProviderMode, ProviderRegistry, Upstream,
    UpstreamDefinition,
};
pub use rate_set::{round_rate, RateSet, RateSetDefinition, RATE_SCALE};
pub use remote::{HttpRateFetcher, UpstreamEndpoints};
pub use store::{CacheInvalidation, InvalidationBus, MemoryRateStore, RateStore, SharedRateStore, LATEST_RATES_TAG};
pub use table::{DatedRateTable, RateEntry, RateTable};

#[cfg(any(test, feature = "test-utils"))]
pub use fetch::StaticRateFetcher;
