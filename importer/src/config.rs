//! Importer configuration.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use exchanger_common::Currency;
use exchanger_rates::{ProviderConfig, ProviderRegistry, RateError, RateResult};

/// Main importer configuration.
#[derive(Debug, Clone)]
pub struct ImporterConfig {
    /// JSON file holding the provider list.
    pub providers_file: PathBuf,
    /// Currencies the deployment works with.
    pub currencies: BTreeSet<Currency>,
    /// Postgres URL; the in-memory store is used when absent.
    pub database_url: Option<String>,
    /// Interval between scheduler ticks.
    pub tick_interval: Duration,
    /// Timeout for upstream HTTP requests.
    pub http_timeout: Duration,
    /// Log level used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Emit JSON logs, otherwise human-readable ones.
    pub json_logs: bool,
    /// Print import metrics after each cycle.
    pub metrics_enabled: bool,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            providers_file: PathBuf::from("exchanger-providers.json"),
            currencies: [Currency::eur(), Currency::usd()].into_iter().collect(),
            database_url: None,
            tick_interval: Duration::from_secs(300),
            http_timeout: Duration::from_secs(30),
            log_level: "info".to_string(),
            json_logs: true,
            metrics_enabled: false,
        }
    }
}

impl ImporterConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("EXCHANGER_PROVIDERS_FILE") {
            config.providers_file = PathBuf::from(path);
        }

        if let Ok(codes) = std::env::var("EXCHANGER_CURRENCIES") {
            config.currencies = parse_currencies(&codes);
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                config.database_url = Some(url);
            }
        }

        if let Ok(secs) = std::env::var("EXCHANGER_TICK_SECS") {
            if let Ok(secs) = secs.parse() {
                config.tick_interval = Duration::from_secs(secs);
            }
        }

        if let Ok(secs) = std::env::var("EXCHANGER_HTTP_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                config.http_timeout = Duration::from_secs(secs);
            }
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        if let Ok(format) = std::env::var("LOG_FORMAT") {
            config.json_logs = !format.eq_ignore_ascii_case("pretty");
        }

        if let Ok(enabled) = std::env::var("EXCHANGER_METRICS") {
            config.metrics_enabled = matches!(enabled.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_interval.is_zero() {
            return Err("Tick interval cannot be 0".to_string());
        }

        if self.http_timeout.is_zero() {
            return Err("HTTP timeout cannot be 0".to_string());
        }

        if self.currencies.is_empty() {
            return Err("At least one currency must be enabled".to_string());
        }

        Ok(())
    }

    /// Read and normalize the provider list.
    pub fn load_providers(&self) -> RateResult<ProviderRegistry> {
        load_providers(&self.providers_file)
    }
}

/// Parse a comma separated currency list, skipping invalid codes.
pub fn parse_currencies(codes: &str) -> BTreeSet<Currency> {
    codes
        .split(',')
        .filter_map(|code| Currency::parse(code).ok())
        .collect()
}

/// Build a registry from a JSON array of provider configs.
pub fn load_providers(path: &Path) -> RateResult<ProviderRegistry> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        RateError::Configuration(format!("cannot read {}: {e}", path.display()))
    })?;
    parse_providers(&raw)
}

pub fn parse_providers(raw: &str) -> RateResult<ProviderRegistry> {
    let configs: Vec<ProviderConfig> = serde_json::from_str(raw)
        .map_err(|e| RateError::Configuration(format!("invalid provider list: {e}")))?;
    ProviderRegistry::from_configs(configs)
}
