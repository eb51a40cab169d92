//! Deterministic hashing for event and alert identity.
//!
//! Every identifier in the system is a digest over an ordered tuple of
//! fields rendered as compact JSON with sorted object keys, so the same
//! inputs always produce the same id regardless of map iteration order.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Length of the hex prefix used for canonical event ids.
const CANONICAL_ID_HEX_LEN: usize = 16;

/// Length of the hex prefix used for alert ids.
const ALERT_ID_HEX_LEN: usize = 24;

/// Recursively sort object keys. Arrays keep their order.
fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for k in keys {
                out.insert(k.clone(), normalize(&map[k]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}

/// Compact JSON with sorted keys.
pub fn stable_json(value: &Value) -> String {
    // Map order depends on serde_json's `preserve_order` feature.
    normalize(value).to_string()
}

pub fn sha256_hex(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Digest of an event payload.
pub fn content_hash(payload: &Value) -> String {
    sha256_hex(&stable_json(payload))
}

/// Fixed-width RFC 3339 rendering so lexical and chronological order agree.
pub fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Canonical id over `(source_system, source_event_id | content digest, event_type, event_time)`.
pub fn canonical_id(
    source_system: &str,
    source_event_id: Option<&str>,
    content_hash: &str,
    event_type: &str,
    event_time: Option<&DateTime<Utc>>,
) -> String {
    let identity = match source_event_id {
        Some(id) => id.to_string(),
        None => format!("content:{content_hash}"),
    };
    let tuple = Value::Array(vec![
        Value::from(source_system),
        Value::from(identity),
        Value::from(event_type),
        event_time.map(|t| Value::from(format_time(t))).unwrap_or(Value::Null),
    ]);
    let digest = sha256_hex(&stable_json(&tuple));
    format!("{source_system}:{}", &digest[..CANONICAL_ID_HEX_LEN])
}

/// Alert id over `(canonical_doc_id, company_id, asset_id, event_type, score_bucket)`.
pub fn alert_id(
    canonical_doc_id: &str,
    company_id: Option<&str>,
    asset_id: Option<&str>,
    event_type: &str,
    score_bucket: i64,
) -> String {
    let base = format!(
        "{canonical_doc_id}|{}|{}|{event_type}|{score_bucket}",
        company_id.unwrap_or(""),
        asset_id.unwrap_or(""),
    );
    sha256_hex(&base)[..ALERT_ID_HEX_LEN].to_string()
}
