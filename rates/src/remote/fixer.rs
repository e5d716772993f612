//! Fixer.io latest rates.

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
    let mut query = vec![("access_key", provider.api_key.clone().unwrap_or_default())];
    // Free plans are pinned to the account's base currency.
    if provider.is_enterprise() {
        if let Some(base) = base {
            query.push(("base", base.code().to_string()));
        }
    }

    let request = http.get(&http.endpoints().fixer).query(&query);
    let mut json = http.send_json(provider, base, request).await?;

    if json.get("success").and_then(Value::as_bool) != Some(true) {
        return Err(RateError::fetch(&provider.id, base, upstream_error(&json)));
    }
    if let Some(object) = json.as_object_mut() {
        object.remove("success");
        object.remove("timestamp");
        object.remove("date");
    }
    Ok(json)
}
