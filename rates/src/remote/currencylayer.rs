//! Currencylayer live quotes.

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
    let endpoints = http.endpoints();
    // TLS and source switching are enterprise features.
    let url = if provider.is_enterprise() {
        &endpoints.currencylayer_secure
    } else {
        &endpoints.currencylayer
    };

    let mut query = vec![("access_key", provider.api_key.clone().unwrap_or_default())];
    if provider.is_enterprise() {
        if let Some(base) = base {
            query.push(("source", base.code().to_string()));
        }
    }

    let request = http.get(url).query(&query);
    let json = http.send_json(provider, base, request).await?;

    if json.get("success").and_then(Value::as_bool) != Some(true) {
        return Err(RateError::fetch(&provider.id, base, upstream_error(&json)));
    }
    if !json.get("quotes").map_or(false, Value::is_object) {
        return Err(RateError::fetch(&provider.id, base, "response has no quotes"));
    }
    Ok(json)
}
