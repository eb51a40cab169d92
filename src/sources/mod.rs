//! Source adapters.
//!
//! Defines the `SourceAdapter` trait and provides:
//! - `JsonFeedAdapter`: cursor-paginated JSON feeds configured in `config.toml`
//! - `replay`: pre-normalized events loaded from a JSONL file

pub mod json_feed;
pub mod replay;

pub use json_feed::JsonFeedAdapter;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::fetch::{FetchRequest, Page};
use crate::types::SourceEvent;

/// Abstraction over an external event source.
///
/// Adapters are pure translators: they build requests and parse bodies, but
/// never perform I/O themselves. The `SafeFetcher` owns all network access.
pub trait SourceAdapter: Send + Sync {
    /// Recorded as `source_system` on every event from this source.
    fn source_system(&self) -> &str;

    /// Request for the page at `cursor` (`None` for the first page).
    fn request(&self, cursor: Option<&str>) -> FetchRequest;

    /// Split a response body into raw records and the next cursor.
    fn parse_page(&self, body: &str) -> Result<Page>;

    /// Turn one raw record into a `SourceEvent`. Errors mean the record is skipped.
    fn normalize(&self, record: &serde_json::Value) -> Result<SourceEvent>;
}

/// Parse the date formats seen across filings and feeds.
///
/// Accepts RFC 3339, naive `YYYY-MM-DDTHH:MM:SS`, `YYYY-MM-DD` and
/// `MM/DD/YYYY`. Naive values are taken as UTC.
pub fn parse_event_time(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for fmt in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_time_formats() {
        let expected = Utc.with_ymd_and_hms(2026, 2, 7, 0, 0, 0).unwrap();
        assert_eq!(parse_event_time("2026-02-07T00:00:00Z"), Some(expected));
        assert_eq!(parse_event_time("2026-02-07T09:00:00+09:00"), Some(expected));
        assert_eq!(parse_event_time("2026-02-07"), Some(expected));
        assert_eq!(parse_event_time("02/07/2026"), Some(expected));
        assert_eq!(parse_event_time("2026-02-07T00:00:00"), Some(expected));
    }

    #[test]
    fn test_parse_event_time_rejects_garbage() {
        assert_eq!(parse_event_time(""), None);
        assert_eq!(parse_event_time("next tuesday"), None);
        assert_eq!(parse_event_time("2026-13-40"), None);
    }
}
