//! European Central Bank daily reference rates.

use serde_json::{json, Map, Value};

use super::HttpRateFetcher;
use crate::error::{RateError, RateResult};
use crate::provider::Provider;

/// The feed always quotes against the euro.
const BASE: &str = "EUR";

pub(super) async fn fetch(http: &HttpRateFetcher, provider: &Provider) -> RateResult<Value> {
    let request = http.get(&http.endpoints().ecb);
    let body = http.send(provider, None, request).await?;
    let rates = parse_daily(&body).map_err(|reason| RateError::fetch(&provider.id, None, reason))?;
    Ok(json!({ "base": BASE, "rates": rates }))
}

/// Extract `currency -> rate` from `<Cube currency='USD' rate='1.08'/>` elements.
///
/// Elements are matched on their local name, so any namespace prefix the feed
/// declares is accepted. Comments, CDATA and declarations are skipped.
fn parse_daily(xml: &str) -> Result<Map<String, Value>, String> {
    let mut envelope = false;
    let mut rates = Map::new();

    for tag in StartTags::new(xml) {
        let tag = tag?;
        match tag.local_name() {
            "Envelope" => envelope = true,
            "Cube" => {
                let currency = tag.attribute("currency")?;
                let rate = tag.attribute("rate")?;
                if let (Some(currency), Some(rate)) = (currency, rate) {
                    rates.insert(currency, Value::String(rate));
                }
            }
            _ => {}
        }
    }

    if !envelope {
        return Err("response is not an ECB envelope".to_string());
    }
    if rates.is_empty() {
        return Err("no rates in ECB feed".to_string());
    }
    Ok(rates)
}

/// One start (or empty-element) tag: its qualified name and raw attribute text.
#[derive(Debug, PartialEq, Eq)]
struct StartTag<'a> {
    name: &'a str,
    attributes: &'a str,
}

impl<'a> StartTag<'a> {
    fn local_name(&self) -> &'a str {
        self.name.rsplit(':').next().unwrap_or(self.name)
    }

    /// Decoded value of the attribute whose local name is `name`.
    fn attribute(&self, name: &str) -> Result<Option<String>, String> {
        let mut rest = self.attributes.trim_start();
        while !rest.is_empty() {
            let Some(eq) = rest.find('=') else {
                break;
            };
            let key = rest[..eq].trim();
            let after = rest[eq + 1..].trim_start();
            let quote = after
                .chars()
                .next()
                .filter(|c| *c == '\'' || *c == '"')
                .ok_or_else(|| format!("unquoted attribute {key} in {}", self.name))?;
            let value = &after[1..];
            let close = value
                .find(quote)
                .ok_or_else(|| format!("unterminated attribute {key} in {}", self.name))?;

            if key.rsplit(':').next() == Some(name) {
                return unescape(&value[..close]).map(Some);
            }
            rest = value[close + 1..].trim_start();
        }
        Ok(None)
    }
}

/// Iterates over the start tags of a document, skipping markup with no attributes of interest.
struct StartTags<'a> {
    rest: &'a str,
}

impl<'a> StartTags<'a> {
    fn new(xml: &'a str) -> Self {
        Self { rest: xml }
    }

    fn skip_past(&mut self, terminator: &str, what: &str) -> Result<(), String> {
        match self.rest.find(terminator) {
            Some(end) => {
                self.rest = &self.rest[end + terminator.len()..];
                Ok(())
            }
            None => {
                self.rest = "";
                Err(format!("unterminated {what}"))
            }
        }
    }
}

impl<'a> Iterator for StartTags<'a> {
    type Item = Result<StartTag<'a>, String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let open = self.rest.find('<')?;
            self.rest = &self.rest[open..];

            let skipped = if self.rest.starts_with("<!--") {
                Some(self.skip_past("-->", "comment"))
            } else if self.rest.starts_with("<![CDATA[") {
                Some(self.skip_past("]]>", "CDATA section"))
            } else if self.rest.starts_with("<?") {
                Some(self.skip_past("?>", "processing instruction"))
            } else if self.rest.starts_with("<!") || self.rest.starts_with("</") {
                Some(self.skip_past(">", "tag"))
            } else {
                None
            };
            match skipped {
                Some(Ok(())) => continue,
                Some(Err(e)) => return Some(Err(e)),
                None => {}
            }

            let body = &self.rest[1..];
            let Some(end) = tag_end(body) else {
                self.rest = "";
                return Some(Err("unterminated element".to_string()));
            };
            self.rest = &body[end + 1..];

            let inner = body[..end].strip_suffix('/').unwrap_or(&body[..end]);
            let name_end = inner
                .find(|c: char| c.is_whitespace())
                .unwrap_or(inner.len());
            return Some(Ok(StartTag {
                name: &inner[..name_end],
                attributes: &inner[name_end..],
            }));
        }
    }
}

/// Offset of the `>` closing a tag, ignoring any inside quoted attribute values.
fn tag_end(body: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in body.char_indices() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), _) if c == q => quote = None,
            (None, '>') => return Some(i),
            _ => {}
        }
    }
    None
}

/// Resolve the predefined entities and character references in an attribute value.
fn unescape(raw: &str) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let semi = after
            .find(';')
            .ok_or_else(|| format!("unterminated entity in {raw:?}"))?;
        let entity = &after[..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .map(|hex| u32::from_str_radix(hex, 16))
                .or_else(|| entity.strip_prefix('#').map(str::parse::<u32>))
                .and_then(Result::ok)
                .and_then(char::from_u32),
        };
        out.push(decoded.ok_or_else(|| format!("unknown entity &{entity};"))?);
        rest = &after[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
