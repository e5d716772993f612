//! Provider configuration, upstream definitions and the provider registry.

use std::collections::HashSet;
use std::fmt;

use exchanger_common::{constants::REFRESH_TIMES_PER_DAY, Currency, ProviderId, Timestamp};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RateError, RateResult};

/// Upstream rate source a provider pulls from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Upstream {
    /// Rates are only ever entered by hand.
    Manual,
    #[serde(rename = "ecb")]
    EuropeanCentralBank,
    Fixer,
    Currencylayer,
    OpenExchangeRates,
    #[serde(rename = "transferwise")]
    TransferWise,
}

/// Static capabilities of an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamDefinition {
    pub label: &'static str,
    /// Requests need an API key.
    pub api_key: bool,
    /// The upstream only quotes against this base.
    pub base_currency: Option<&'static str>,
    /// Can be queried once per base currency.
    pub enterprise: bool,
    /// Snapshots are worth keeping per day.
    pub historical_rates: bool,
    /// Publishes once a day; more frequent refreshes are pointless.
    pub refresh_once: bool,
    /// Quotes are `1 target == x base` and must be inverted.
    pub transform_rates: bool,
}

impl Upstream {
    pub const ALL: [Upstream; 6] = [
        Upstream::Manual,
        Upstream::EuropeanCentralBank,
        Upstream::Fixer,
        Upstream::Currencylayer,
        Upstream::OpenExchangeRates,
        Upstream::TransferWise,
    ];

    /// Get the static definition for this upstream.
    pub fn definition(self) -> UpstreamDefinition {
        let base = UpstreamDefinition {
            label: "",
            api_key: false,
            base_currency: None,
            enterprise: false,
            historical_rates: false,
            refresh_once: false,
            transform_rates: false,
        };
        match self {
            Upstream::Manual => UpstreamDefinition {
                label: "Manual",
                ..base
            },
            Upstream::EuropeanCentralBank => UpstreamDefinition {
                label: "European Central Bank",
                base_currency: Some("EUR"),
                historical_rates: true,
                refresh_once: true,
                ..base
            },
            Upstream::Fixer => UpstreamDefinition {
                label: "Fixer.io",
                api_key: true,
                enterprise: true,
                ..base
            },
            Upstream::Currencylayer => UpstreamDefinition {
                label: "Currencylayer",
                api_key: true,
                enterprise: true,
                historical_rates: true,
                ..base
            },
            Upstream::OpenExchangeRates => UpstreamDefinition {
                label: "Open Exchange Rates",
                api_key: true,
                enterprise: true,
                historical_rates: true,
                ..base
            },
            Upstream::TransferWise => UpstreamDefinition {
                label: "TransferWise",
                api_key: true,
                enterprise: true,
                historical_rates: true,
                ..base
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Upstream::Manual => "manual",
            Upstream::EuropeanCentralBank => "ecb",
            Upstream::Fixer => "fixer",
            Upstream::Currencylayer => "currencylayer",
            Upstream::OpenExchangeRates => "open_exchange_rates",
            Upstream::TransferWise => "transferwise",
        }
    }

    pub fn is_manual(self) -> bool {
        self == Upstream::Manual
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a provider's table is built on import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderMode {
    /// Never imported; every entry is hand-edited.
    Manual,
    /// One fetch against `base_currency`, every other row triangulated.
    CrossSync { base_currency: Currency },
    /// One fetch per enabled currency.
    Enterprise,
}

impl ProviderMode {
    pub fn is_manual(&self) -> bool {
        matches!(self, ProviderMode::Manual)
    }

    pub fn base_currency(&self) -> Option<&Currency> {
        match self {
            ProviderMode::CrossSync { base_currency } => Some(base_currency),
            _ => None,
        }
    }
}

/// Basic auth credentials passed to the upstream.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

fn default_status() -> bool {
    true
}

/// Provider entry as written in the providers file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub weight: i32,
    #[serde(default = "default_status")]
    pub status: bool,
    pub upstream: Upstream,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    /// Imports per day.
    #[serde(default)]
    pub cron: Option<u32>,
    #[serde(default)]
    pub enterprise: bool,
    #[serde(default)]
    pub use_cross_sync: bool,
    #[serde(default)]
    pub base_currency: Option<String>,
    #[serde(default)]
    pub transform_rates: Option<bool>,
    #[serde(default)]
    pub historical_rates: Option<bool>,
    #[serde(default)]
    pub demo_amount: Option<Decimal>,
    #[serde(default)]
    pub last_refreshed_at: Option<Timestamp>,
}

impl ProviderConfig {
    /// Minimal enabled config for an upstream.
    pub fn new(id: impl Into<String>, upstream: Upstream) -> Self {
        Self {
            id: id.into(),
            label: None,
            weight: 0,
            status: true,
            upstream,
            api_key: None,
            auth: None,
            cron: None,
            enterprise: false,
            use_cross_sync: false,
            base_currency: None,
            transform_rates: None,
            historical_rates: None,
            demo_amount: None,
            last_refreshed_at: None,
        }
    }
}

/// Imports per day when not configured.
pub const DEFAULT_REFRESH_TIMES_PER_DAY: u32 = 1;

/// Amount shown in example conversions when not configured.
pub const DEFAULT_DEMO_AMOUNT: Decimal = Decimal::ONE_HUNDRED;

/// A normalized, ready-to-run provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    pub id: ProviderId,
    pub label: String,
    pub weight: i32,
    pub enabled: bool,
    pub upstream: Upstream,
    pub mode: ProviderMode,
    pub refresh_times_per_day: u32,
    pub last_refreshed_at: Option<Timestamp>,
    pub transform_rates: bool,
    pub historical_rates: bool,
    pub api_key: Option<String>,
    pub auth: Option<AuthConfig>,
    pub demo_amount: Decimal,
}

impl Provider {
    /// Normalize a raw config against its upstream's definition.
    ///
    /// Fixed-base upstreams are forced to cross-sync on their base,
    /// refresh-once upstreams to one import per day, and enterprise is
    /// cleared for upstreams that cannot be queried per base.
    pub fn from_config(config: ProviderConfig) -> RateResult<Self> {
        let id = ProviderId::parse(&config.id)
            .map_err(|e| RateError::Configuration(e.to_string()))?;
        let definition = config.upstream.definition();

        let api_key = config.api_key.filter(|key| !key.trim().is_empty());
        if definition.api_key && api_key.is_none() {
            return Err(RateError::Configuration(format!(
                "provider {id} needs an API key for {}",
                config.upstream
            )));
        }

        let mut refresh_times_per_day = config.cron.unwrap_or(DEFAULT_REFRESH_TIMES_PER_DAY);
        if !REFRESH_TIMES_PER_DAY.contains(&refresh_times_per_day) {
            return Err(RateError::Configuration(format!(
                "provider {id} refresh frequency {refresh_times_per_day} is not one of {REFRESH_TIMES_PER_DAY:?}"
            )));
        }
        if definition.refresh_once && refresh_times_per_day != 1 {
            debug!(provider = %id, "Upstream publishes daily, refreshing once a day");
            refresh_times_per_day = 1;
        }

        let mut enterprise = config.enterprise;
        let mut use_cross_sync = config.use_cross_sync;
        let mut base_currency = config
            .base_currency
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(Currency::parse)
            .transpose()
            .map_err(|e| RateError::Configuration(e.to_string()))?;

        if let Some(fixed) = definition.base_currency {
            enterprise = false;
            use_cross_sync = true;
            base_currency = Some(Currency::new(fixed));
        }
        if enterprise && !definition.enterprise {
            warn!(provider = %id, upstream = %config.upstream, "Upstream cannot do enterprise imports, using cross-sync");
            enterprise = false;
        }

        let mode = if config.upstream.is_manual() {
            ProviderMode::Manual
        } else if enterprise && !use_cross_sync {
            ProviderMode::Enterprise
        } else {
            let base_currency = base_currency.ok_or_else(|| {
                RateError::Configuration(format!("provider {id} needs a base currency for cross-sync"))
            })?;
            ProviderMode::CrossSync { base_currency }
        };

        let demo_amount = config.demo_amount.unwrap_or(DEFAULT_DEMO_AMOUNT);
        if demo_amount <= Decimal::ZERO {
            return Err(RateError::Configuration(format!(
                "provider {id} demo amount must be positive"
            )));
        }

        Ok(Self {
            label: config
                .label
                .filter(|label| !label.trim().is_empty())
                .unwrap_or_else(|| definition.label.to_string()),
            id,
            weight: config.weight,
            enabled: config.status,
            upstream: config.upstream,
            mode,
            refresh_times_per_day,
            last_refreshed_at: config.last_refreshed_at,
            transform_rates: config.transform_rates.unwrap_or(definition.transform_rates),
            historical_rates: definition.historical_rates && config.historical_rates.unwrap_or(true),
            api_key,
            auth: config.auth,
            demo_amount,
        })
    }

    pub fn definition(&self) -> UpstreamDefinition {
        self.upstream.definition()
    }

    pub fn is_manual(&self) -> bool {
        self.mode.is_manual()
    }

    pub fn is_enterprise(&self) -> bool {
        matches!(self.mode, ProviderMode::Enterprise)
    }

    /// Base currency for cross-sync imports.
    pub fn base_currency(&self) -> Option<&Currency> {
        self.mode.base_currency()
    }
}

/// Ordered set of configured providers.
///
/// Ordered by `(weight, id)`; the first enabled provider is the one
/// conversions use.
#[derive(Debug)]
pub struct ProviderRegistry {
    providers: RwLock<Vec<Provider>>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Provider>) -> RateResult<Self> {
        let registry = Self {
            providers: RwLock::new(Vec::new()),
        };
        registry.replace(providers)?;
        Ok(registry)
    }

    /// Normalize every config and build a registry.
    pub fn from_configs(configs: Vec<ProviderConfig>) -> RateResult<Self> {
        let providers = configs
            .into_iter()
            .map(Provider::from_config)
            .collect::<RateResult<Vec<_>>>()?;
        Self::new(providers)
    }

    /// Replace the whole provider list.
    pub fn replace(&self, mut providers: Vec<Provider>) -> RateResult<()> {
        let mut seen = HashSet::new();
        for provider in &providers {
            if !seen.insert(provider.id.clone()) {
                return Err(RateError::Configuration(format!(
                    "duplicate provider id {}",
                    provider.id
                )));
            }
        }
        providers.sort_by(|a, b| (a.weight, &a.id).cmp(&(b.weight, &b.id)));
        *self.providers.write() = providers;
        Ok(())
    }

    /// The provider conversions use.
    pub fn active(&self) -> Option<Provider> {
        self.providers.read().iter().find(|p| p.enabled).cloned()
    }

    pub fn enabled(&self) -> Vec<Provider> {
        self.providers.read().iter().filter(|p| p.enabled).cloned().collect()
    }

    pub fn all(&self) -> Vec<Provider> {
        self.providers.read().clone()
    }

    pub fn get(&self, id: &ProviderId) -> Option<Provider> {
        self.providers.read().iter().find(|p| &p.id == id).cloned()
    }

    /// Remember when a provider last finished an import.
    pub fn record_refresh(&self, id: &ProviderId, at: Timestamp) -> bool {
        let mut providers = self.providers.write();
        match providers.iter_mut().find(|p| &p.id == id) {
            Some(provider) => {
                provider.last_refreshed_at = Some(at);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }
}
