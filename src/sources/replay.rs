//! JSONL replay of pre-normalized events.
//!
//! One `SourceEvent` per line. Blank lines and `#` comments are ignored;
//! lines that fail to parse are logged and skipped.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::scoring::taxonomy::normalize_event_type;
use crate::types::SourceEvent;

pub fn load_jsonl(path: impl AsRef<Path>) -> Result<Vec<SourceEvent>> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read replay file: {}", path.display()))?;

    let events = parse_jsonl(&contents);
    info!(path = %path.display(), events = events.len(), "Loaded replay events");
    Ok(events)
}

pub fn parse_jsonl(contents: &str) -> Vec<SourceEvent> {
    let mut events = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<SourceEvent>(line) {
            Ok(mut event) => {
                event.event_type = normalize_event_type(&event.event_type);
                events.push(event);
            }
            Err(e) => warn!(line = idx + 1, error = %e, "Skipping unparseable replay line"),
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_jsonl_skips_bad_lines() {
        let text = r#"
# seed events
{"source_system": "permits", "source_event_id": "P-1", "event_type": "permit_issued", "asset_id": "W-1"}
{not json}
{"source_system": "sec_edgar", "event_type": "Purchase", "company_id": "ACME", "payload": {"filer_name": "Dana"}}
"#;
        let events = parse_jsonl(text);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].source_event_id.as_deref(), Some("P-1"));
        assert_eq!(events[1].event_type, "insider_buy");
        assert_eq!(events[1].payload["filer_name"], "Dana");
    }

    #[test]
    fn test_load_jsonl_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"source_system": "s", "event_type": "spud_reported", "event_time": "2026-02-01T00:00:00Z"}}"#
        )
        .unwrap();
        let events = load_jsonl(file.path()).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].event_time.is_some());
    }

    #[test]
    fn test_load_jsonl_missing_file() {
        assert!(load_jsonl("/nonexistent/replay.jsonl").is_err());
    }
}
