//! Remote fetch seam and payload normalization.

use async_trait::async_trait;
use exchanger_common::{Currency, ProviderId};
use serde_json::{Map, Value};

use crate::error::{RateError, RateResult};
use crate::provider::Provider;
use crate::rate_set::RateSetDefinition;

/// Source of raw upstream payloads.
#[async_trait]
pub trait RateFetcher: Send + Sync {
    /// Fetch the raw payload for a provider.
    ///
    /// `base` is the base currency hint: the row being collected in
    /// enterprise mode, the configured base in cross-sync mode.
    async fn fetch(&self, provider: &Provider, base: Option<&Currency>) -> RateResult<Value>;
}

/// Keys upstreams put next to flat rate maps.
const METADATA_KEYS: [&str; 7] = [
    "success",
    "timestamp",
    "date",
    "license",
    "disclaimer",
    "historical",
    "privacy",
];

/// Coerce an upstream payload into a rate set definition.
///
/// Accepted shapes:
/// - `{"base": "EUR", "rates": {...}}`
/// - `{"source": "USD", "quotes": {"USDEUR": ...}}`
/// - `[{"source": "EUR", "target": "USD", "rate": ...}, ...]`
/// - a flat `{"USD": ..., "AUD": ...}` map quoted against `fallback_base`
pub fn normalize_payload(
    provider: &ProviderId,
    payload: Value,
    fallback_base: Option<&Currency>,
) -> RateResult<RateSetDefinition> {
    let fail = |reason: String| RateError::fetch(provider, fallback_base, reason);

    match payload {
        Value::Object(mut object) => {
            if object.get("success") == Some(&Value::Bool(false)) {
                let info = object
                    .get("error")
                    .and_then(|e| e.get("info").or_else(|| e.get("type")))
                    .and_then(Value::as_str)
                    .unwrap_or("upstream reported failure")
                    .to_string();
                return Err(fail(info));
            }

            if let Some(rates) = object.remove("rates") {
                let base = base_from(object.get("base"), fallback_base)
                    .ok_or_else(|| fail("payload has no base currency".to_string()))?;
                return Ok(RateSetDefinition::new(base, rates));
            }

            if let Some(Value::Object(quotes)) = object.remove("quotes") {
                let base = base_from(object.get("source"), fallback_base)
                    .ok_or_else(|| fail("payload has no source currency".to_string()))?;
                let rates: Map<String, Value> = quotes
                    .into_iter()
                    .map(|(key, value)| {
                        let target = key.strip_prefix(base.as_str()).unwrap_or(key.as_str()).to_string();
                        (target, value)
                    })
                    .collect();
                return Ok(RateSetDefinition::new(base, Value::Object(rates)));
            }

            for key in METADATA_KEYS {
                object.remove(key);
            }
            let explicit_base = object.remove("base");
            if object.is_empty() {
                return Err(fail("payload contains no rates".to_string()));
            }
            let base = base_from(explicit_base.as_ref(), fallback_base)
                .ok_or_else(|| fail("payload has no base currency".to_string()))?;
            Ok(RateSetDefinition::new(base, Value::Object(object)))
        }
        Value::Array(items) => {
            let mut base = fallback_base.map(|c| c.code().to_string());
            let mut rates = Map::new();
            for item in items {
                let Some(target) = item.get("target").and_then(Value::as_str) else {
                    return Err(fail(format!("list entry without target: {item}")));
                };
                let Some(rate) = item.get("rate") else {
                    return Err(fail(format!("list entry for {target} without rate")));
                };
                if base.is_none() {
                    base = item.get("source").and_then(Value::as_str).map(str::to_string);
                }
                rates.insert(target.to_string(), rate.clone());
            }
            let base = base.ok_or_else(|| fail("payload has no base currency".to_string()))?;
            Ok(RateSetDefinition::new(base, Value::Object(rates)))
        }
        Value::Null => Err(fail("empty payload".to_string())),
        other => Err(fail(format!("unexpected payload: {other}"))),
    }
}

fn base_from(value: Option<&Value>, fallback: Option<&Currency>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| fallback.map(|c| c.code().to_string()))
}

/// In-memory fetcher returning canned payloads.
#[cfg(any(test, feature = "test-utils"))]
pub struct StaticRateFetcher {
    payloads: dashmap::DashMap<(ProviderId, Option<Currency>), Result<Value, String>>,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(any(test, feature = "test-utils"))]
impl StaticRateFetcher {
    pub fn new() -> Self {
        Self {
            payloads: dashmap::DashMap::new(),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Serve `payload` for a provider and base hint; `None` matches any hint.
    pub fn set_payload(&self, provider: &str, base: Option<Currency>, payload: Value) {
        self.payloads.insert((ProviderId::new(provider), base), Ok(payload));
    }

    /// Fail fetches for a provider and base hint.
    pub fn set_failure(&self, provider: &str, base: Option<Currency>, reason: &str) {
        self.payloads
            .insert((ProviderId::new(provider), base), Err(reason.to_string()));
    }

    /// Number of fetches served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for StaticRateFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateFetcher for StaticRateFetcher {
    async fn fetch(&self, provider: &Provider, base: Option<&Currency>) -> RateResult<Value> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let specific = (provider.id.clone(), base.cloned());
        let any = (provider.id.clone(), None);
        let entry = self
            .payloads
            .get(&specific)
            .or_else(|| self.payloads.get(&any))
            .map(|entry| entry.value().clone());

        match entry {
            Some(Ok(payload)) => Ok(payload),
            Some(Err(reason)) => Err(RateError::fetch(&provider.id, base, reason)),
            None => Err(RateError::fetch(&provider.id, base, "no payload configured")),
        }
    }
}
