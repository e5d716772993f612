//! HTTP fetchers for the supported upstream rate APIs.

mod currencylayer;
mod ecb;
mod fixer;
mod open_exchange_rates;
mod transferwise;

use std::time::Duration;

use async_trait::async_trait;
use exchanger_common::Currency;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tracing::debug;

use crate::error::{RateError, RateResult};
use crate::fetch::RateFetcher;
use crate::provider::{Provider, Upstream};

/// Default request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Request URLs of every upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamEndpoints {
    pub ecb: String,
    pub fixer: String,
    pub currencylayer: String,
    /// Currencylayer over TLS, only available on enterprise plans.
    pub currencylayer_secure: String,
    pub open_exchange_rates: String,
    pub transferwise: String,
}

impl Default for UpstreamEndpoints {
    fn default() -> Self {
        Self {
            ecb: "http://www.ecb.europa.eu/stats/eurofxref/eurofxref-daily.xml".to_string(),
            fixer: "http://data.fixer.io/api/latest".to_string(),
            currencylayer: "http://api.currencylayer.com/live".to_string(),
            currencylayer_secure: "https://api.currencylayer.com/live".to_string(),
            open_exchange_rates: "https://openexchangerates.org/api/latest.json".to_string(),
            transferwise: "https://api.transferwise.com/v1/rates".to_string(),
        }
    }
}

impl UpstreamEndpoints {
    /// Point every upstream at one host, keeping the real paths.
    pub fn with_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            ecb: format!("{base}/stats/eurofxref/eurofxref-daily.xml"),
            fixer: format!("{base}/api/latest"),
            currencylayer: format!("{base}/live"),
            currencylayer_secure: format!("{base}/live"),
            open_exchange_rates: format!("{base}/api/latest.json"),
            transferwise: format!("{base}/v1/rates"),
        }
    }
}

/// [`RateFetcher`] talking to the real upstream APIs.
pub struct HttpRateFetcher {
    client: Client,
    endpoints: UpstreamEndpoints,
}

impl HttpRateFetcher {
    /// Create a fetcher with the given request timeout.
    pub fn new(timeout: Duration) -> RateResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("exchanger/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RateError::Configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoints: UpstreamEndpoints::default(),
        })
    }

    /// Use different upstream URLs.
    pub fn with_endpoints(mut self, endpoints: UpstreamEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn endpoints(&self) -> &UpstreamEndpoints {
        &self.endpoints
    }

    fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url)
    }

    /// Send a request with the provider's credentials and return the body.
    async fn send(
        &self,
        provider: &Provider,
        base: Option<&Currency>,
        request: RequestBuilder,
    ) -> RateResult<String> {
        let request = match &provider.auth {
            Some(auth) => request.basic_auth(&auth.username, Some(&auth.password)),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| RateError::fetch(&provider.id, base, format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RateError::fetch(
                &provider.id,
                base,
                format!("{} returned error: {status}", provider.upstream),
            ));
        }

        response
            .text()
            .await
            .map_err(|e| RateError::fetch(&provider.id, base, format!("Failed to read response: {e}")))
    }

    async fn send_json(
        &self,
        provider: &Provider,
        base: Option<&Currency>,
        request: RequestBuilder,
    ) -> RateResult<Value> {
        let body = self.send(provider, base, request).await?;
        serde_json::from_str(&body)
            .map_err(|e| RateError::fetch(&provider.id, base, format!("JSON parse error: {e}")))
    }
}

/// Description of a `{"success": false, "error": {...}}` style failure.
fn upstream_error(json: &Value) -> String {
    json.get("error")
        .and_then(|e| e.get("info").or_else(|| e.get("type")).or_else(|| e.get("message")))
        .and_then(Value::as_str)
        .or_else(|| json.get("description").and_then(Value::as_str))
        .unwrap_or("upstream reported failure")
        .to_string()
}

#[async_trait]
impl RateFetcher for HttpRateFetcher {
    async fn fetch(&self, provider: &Provider, base: Option<&Currency>) -> RateResult<Value> {
        debug!(provider = %provider.id, upstream = %provider.upstream, base = ?base, "Fetching rates");

        match provider.upstream {
            Upstream::Manual => Err(RateError::Configuration(format!(
                "provider {} has no upstream to fetch from",
                provider.id
            ))),
            Upstream::EuropeanCentralBank => ecb::fetch(self, provider).await,
            Upstream::Fixer => fixer::fetch(self, provider, base).await,
            Upstream::Currencylayer => currencylayer::fetch(self, provider, base).await,
            Upstream::OpenExchangeRates => open_exchange_rates::fetch(self, provider, base).await,
            Upstream::TransferWise => transferwise::fetch(self, provider, base).await,
        }
    }
}
