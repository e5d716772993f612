//! TransferWise rates.

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
    let source = if provider.is_enterprise() {
        base
    } else {
        provider.base_currency()
    };
    let Some(source) = source else {
        return Err(RateError::fetch(&provider.id, base, "no source currency to query"));
    };

    let request = http
        .get(&http.endpoints().transferwise)
        .query(&[("source", source.code())])
        .bearer_auth(provider.api_key.as_deref().unwrap_or_default());
    let json = http.send_json(provider, Some(source), request).await?;

    if !json.is_array() {
        return Err(RateError::fetch(&provider.id, Some(source), upstream_error(&json)));
    }
    Ok(json)
}
