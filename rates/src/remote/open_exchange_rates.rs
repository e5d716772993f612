//! Open Exchange Rates latest rates.

use exchanger_common::Currency;
use serde_json::Value;

use super::{upstream_error, HttpRateFetcher};
use crate::error::{RateError, RateResult};
use crate::provider::Provider;

pub(super) async fn fetch(
    http: &HttpRateFetcher,
    provider: &Provider,
    base: Option<&Currency>,
) -> RateResult<Value> {
    let mut query = vec![("app_id", provider.api_key.clone().unwrap_or_default())];
    if provider.is_enterprise() {
        if let Some(base) = base {
            query.push(("base", base.code().to_string()));
        }
    }

    let request = http.get(&http.endpoints().open_exchange_rates).query(&query);
    let mut json = http.send_json(provider, base, request).await?;

    let has_rates = json
        .get("rates")
        .and_then(Value::as_object)
        .map_or(false, |rates| !rates.is_empty());
    if !has_rates {
        return Err(RateError::fetch(&provider.id, base, upstream_error(&json)));
    }
    if let Some(object) = json.as_object_mut() {
        object.remove("timestamp");
        object.remove("license");
        object.remove("disclaimer");
    }
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{fetcher, provider};
    use super::*;
    use crate::fetch::RateFetcher;
    use crate::provider::Upstream;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_latest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/latest.json"))
            .and(query_param("app_id", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"disclaimer":"Usage subject to terms","license":"https://openexchangerates.org/license","timestamp":1709546400,"base":"EUR","rates":{"USD":1.0842,"GBP":0.8554}}"#,
            ))
            .mount(&server)
            .await;

        let oxr = provider(Upstream::OpenExchangeRates, false);
        let payload = fetcher(&server).fetch(&oxr, Some(&Currency::eur())).await.unwrap();

        assert_eq!(payload["base"], "EUR");
        assert!(payload.get("disclaimer").is_none());
    }

    #[tokio::test]
    async fn test_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/latest.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"error":true,"status":401,"message":"invalid_app_id","description":"Invalid App ID provided."}"#,
            ))
            .mount(&server)
            .await;

        let oxr = provider(Upstream::OpenExchangeRates, true);
        let err = fetcher(&server).fetch(&oxr, Some(&Currency::usd())).await.unwrap_err();
        assert!(err.to_string().contains("Invalid App ID"));
    }
}
