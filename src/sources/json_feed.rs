//! Generic cursor-paginated JSON feed.
//!
//! Each configured `[[sources]]` entry becomes one `JsonFeedAdapter`. The
//! feed returns a JSON document holding an array of records and, optionally,
//! a cursor for the next page:
//!
//! ```json
//! { "events": [ { "id": "acc-1", "event_type": "insider_buy", ... } ],
//!   "next_cursor": "abc" }
//! ```
//!
//! Pointer paths for both are configurable. Records are mapped field by
//! field; anything not recognised stays in the payload.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::warn;

use super::{parse_event_time, SourceAdapter};
use crate::config::{AppConfig, SourceConfig};
use crate::fetch::{FetchRequest, Page};
use crate::scoring::taxonomy::normalize_event_type;
use crate::types::SourceEvent;

pub struct JsonFeedAdapter {
    name: String,
    url: String,
    records_pointer: String,
    next_cursor_pointer: String,
    cursor_param: String,
    bearer_token: Option<String>,
}

impl JsonFeedAdapter {
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let bearer_token = match &config.api_key_env {
            Some(env) => Some(
                AppConfig::resolve_env(env)
                    .with_context(|| format!("API key for source {}", config.name))?,
            ),
            None => None,
        };
        Ok(Self {
            name: config.name.clone(),
            url: config.url.clone(),
            records_pointer: config.records_pointer.clone(),
            next_cursor_pointer: config.next_cursor_pointer.clone(),
            cursor_param: config.cursor_param.clone(),
            bearer_token,
        })
    }
}

impl SourceAdapter for JsonFeedAdapter {
    fn source_system(&self) -> &str {
        &self.name
    }

    fn request(&self, cursor: Option<&str>) -> FetchRequest {
        let url = match cursor {
            Some(c) => {
                let sep = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{sep}{}={}", self.url, self.cursor_param, urlencoding::encode(c))
            }
            None => self.url.clone(),
        };
        let request = FetchRequest::get(url).with_header("Accept", "application/json");
        match &self.bearer_token {
            Some(token) => request.with_header("Authorization", format!("Bearer {token}")),
            None => request,
        }
    }

    fn parse_page(&self, body: &str) -> Result<Page> {
        let doc: Value = serde_json::from_str(body).context("Page body is not valid JSON")?;

        let records = match doc.pointer(&self.records_pointer) {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => anyhow::bail!(
                "{} must be an array, got {}",
                self.records_pointer,
                json_kind(other)
            ),
        };

        let next_cursor = match doc.pointer(&self.next_cursor_pointer) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        Ok(Page { records, next_cursor })
    }

    fn normalize(&self, record: &Value) -> Result<SourceEvent> {
        let obj = record.as_object().context("record is not a JSON object")?;

        let event_type = first_str(record, &["event_type", "type"])
            .map(normalize_event_type)
            .filter(|t| !t.is_empty())
            .context("record has no event_type")?;

        let source_event_id = ["source_event_id", "id", "accession_number"]
            .iter()
            .find_map(|k| match obj.get(*k) {
                Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            });

        let event_time = match first_str(record, &["event_time", "date", "filed_at"]) {
            Some(raw) => {
                let parsed = parse_event_time(raw);
                if parsed.is_none() {
                    warn!(source = %self.name, value = raw, "Unparseable event_time; falling back to ingest time");
                }
                parsed
            }
            None => None,
        };

        let payload = match obj.get("payload") {
            Some(p @ Value::Object(_)) => p.clone(),
            _ => record.clone(),
        };

        Ok(SourceEvent {
            source_system: self.name.clone(),
            source_event_id,
            event_type,
            event_time,
            company_id: first_str(record, &["company_id", "ticker"]).map(str::to_string),
            asset_id: first_str(record, &["asset_id"]).map(str::to_string),
            payload,
        })
    }
}

/// First non-blank string among `keys`.
fn first_str<'a>(record: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| record.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
