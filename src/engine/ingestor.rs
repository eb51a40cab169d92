//! Event ingestion.
//!
//! Turns normalized `SourceEvent`s into immutable `RawEvent` rows. Identity
//! is derived here (content hash, canonical id, dedup key) and the store's
//! insert-if-absent does the rest, so several ingestors can write the same
//! store concurrently without coordination.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::IngestConfig;
use crate::fetch::{FetchDiagnostics, FetchError, SafeFetcher};
use crate::hashing;
use crate::sources::SourceAdapter;
use crate::storage::EventStore;
use crate::types::{AppendOutcome, NewRawEvent, SourceEvent};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),
}

/// Outcome of one fetch session against one source.
#[derive(Debug)]
pub struct SessionReport {
    pub source: String,
    pub pages: usize,
    pub diagnostics: FetchDiagnostics,
    pub created: u64,
    pub duplicates: u64,
    /// Set when the session stopped early. Counters still reflect the work
    /// done before the failure.
    pub error: Option<SessionError>,
}

impl SessionReport {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            pages: 0,
            diagnostics: FetchDiagnostics::default(),
            created: 0,
            duplicates: 0,
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub created: u64,
    pub duplicates: u64,
}

pub struct EventIngestor {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    content_fallback_dedup: bool,
}

impl EventIngestor {
    pub fn new(store: Arc<dyn EventStore>, clock: Arc<dyn Clock>, config: &IngestConfig) -> Self {
        Self {
            store,
            clock,
            content_fallback_dedup: config.content_fallback_dedup,
        }
    }

    /// Derive identity fields and stamp the ingest time.
    pub fn prepare(&self, mut event: SourceEvent) -> NewRawEvent {
        event.source_event_id = event
            .source_event_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        let content_hash = hashing::content_hash(&event.payload);
        let canonical_id = hashing::canonical_id(
            &event.source_system,
            event.source_event_id.as_deref(),
            &content_hash,
            &event.event_type,
            event.event_time.as_ref(),
        );
        let dedup_key = match &event.source_event_id {
            Some(id) => Some(id.clone()),
            None if self.content_fallback_dedup => Some(format!("content:{canonical_id}")),
            None => None,
        };

        NewRawEvent {
            event,
            ingest_time: self.clock.now(),
            content_hash,
            canonical_id,
            dedup_key,
        }
    }

    /// Append one event. Returns the existing row when it was already stored.
    pub async fn append(&self, event: SourceEvent) -> Result<AppendOutcome> {
        let new = self.prepare(event);
        let outcome = self.store.insert_event_if_absent(&new).await?;
        if outcome.created {
            debug!(
                source = %new.event.source_system,
                event_type = %new.event.event_type,
                canonical_id = %outcome.canonical_id,
                "Event appended"
            );
        }
        Ok(outcome)
    }

    /// Append an already-normalized batch (e.g. a JSONL replay).
    pub async fn ingest_batch(&self, events: Vec<SourceEvent>) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        for event in events {
            if self.append(event).await?.created {
                report.created += 1;
            } else {
                report.duplicates += 1;
            }
        }
        info!(created = report.created, duplicates = report.duplicates, "Batch ingested");
        Ok(report)
    }

    /// Page through `source` until it runs out of cursors, `max_pages` is
    /// reached, or a fetch fails. Each record is committed as soon as it is
    /// normalized.
    pub async fn run_session(
        &self,
        fetcher: &mut SafeFetcher,
        source: &dyn SourceAdapter,
        max_pages: usize,
    ) -> SessionReport {
        let name = source.source_system().to_string();
        let mut report = SessionReport::new(&name);
        let mut cursor: Option<String> = None;
        let mut seen_cursors: HashSet<String> = HashSet::new();

        while report.pages < max_pages {
            let page = match fetcher.fetch(source, cursor.as_deref()).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(source = %name, error = %e, diagnostics = %report.diagnostics, "Fetch session aborted");
                    report.error = Some(e.into());
                    return report;
                }
            };
            report.pages += 1;

            for record in &page.records {
                report.diagnostics.record_seen();
                let event = match source.normalize(record) {
                    Ok(event) => {
                        report.diagnostics.record_parsed();
                        event
                    }
                    Err(e) => {
                        report.diagnostics.record_skipped();
                        debug!(source = %name, error = %e, "Skipping record");
                        continue;
                    }
                };

                match self.append(event).await {
                    Ok(outcome) => {
                        report.diagnostics.record_emitted();
                        if outcome.created {
                            report.created += 1;
                        } else {
                            report.duplicates += 1;
                        }
                    }
                    Err(e) => {
                        warn!(source = %name, error = %e, "Store rejected event, aborting session");
                        report.error = Some(SessionError::Storage(e));
                        return report;
                    }
                }
            }

            match page.next_cursor {
                Some(next) if seen_cursors.insert(next.clone()) => cursor = Some(next),
                Some(next) => {
                    warn!(source = %name, cursor = %next, "Source repeated a cursor, stopping");
                    break;
                }
                None => break,
            }
        }

        info!(
            source = %name,
            pages = report.pages,
            created = report.created,
            duplicates = report.duplicates,
            diagnostics = %report.diagnostics,
            "Fetch session complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{FetchConfig, SourceConfig};
    use crate::fetch::{MockTransport, TransportResponse};
    use crate::sources::JsonFeedAdapter;
    use crate::storage::MemoryStore;
    use crate::types::tests::t0;
    use serde_json::json;

    fn event(id: Option<&str>) -> SourceEvent {
        SourceEvent {
            source_system: "permits".to_string(),
            source_event_id: id.map(String::from),
            event_type: "permit_issued".to_string(),
            event_time: Some(t0()),
            company_id: None,
            asset_id: Some("W-1".to_string()),
            payload: json!({"permit_number": "P-100"}),
        }
    }

    fn ingestor(store: Arc<MemoryStore>, fallback: bool) -> EventIngestor {
        EventIngestor::new(
            store,
            Arc::new(ManualClock::new(t0())),
            &IngestConfig { content_fallback_dedup: fallback },
        )
    }

    fn fetch_config() -> FetchConfig {
        FetchConfig {
            request_delay_s: 0.0,
            max_retries: 0,
            backoff_base_s: 1.0,
            timeout_s: 5.0,
            jitter_ratio: 0.0,
            user_agent: "test".to_string(),
        }
    }

    fn feed() -> JsonFeedAdapter {
        JsonFeedAdapter::from_config(&SourceConfig {
            name: "permits".to_string(),
            url: "https://feeds.example.com/permits".to_string(),
            enabled: true,
            records_pointer: "/events".to_string(),
            next_cursor_pointer: "/next_cursor".to_string(),
            cursor_param: "cursor".to_string(),
            api_key_env: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_reappend_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let ingestor = ingestor(store.clone(), true);

        let first = ingestor.append(event(Some("P-100"))).await.unwrap();
        let second = ingestor.append(event(Some("P-100"))).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.id, second.id);
        assert_eq!(first.canonical_id, second.canonical_id);
        assert_eq!(store.event_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_blank_source_id_treated_as_missing() {
        let store = Arc::new(MemoryStore::new());
        let prepared = ingestor(store, true).prepare(event(Some("   ")));
        assert!(prepared.event.source_event_id.is_none());
        assert!(prepared.dedup_key.unwrap().starts_with("content:permits:"));
    }

    #[tokio::test]
    async fn test_null_id_content_fallback_dedups() {
        let store = Arc::new(MemoryStore::new());
        let ingestor = ingestor(store.clone(), true);
        ingestor.append(event(None)).await.unwrap();
        let again = ingestor.append(event(None)).await.unwrap();
        assert!(!again.created);
        assert_eq!(store.event_count().await.unwrap(), 1);

        let mut different = event(None);
        different.payload = json!({"permit_number": "P-101"});
        assert!(ingestor.append(different).await.unwrap().created);
    }

    #[tokio::test]
    async fn test_null_id_without_fallback_allows_duplicates() {
        let store = Arc::new(MemoryStore::new());
        let ingestor = ingestor(store.clone(), false);
        let a = ingestor.append(event(None)).await.unwrap();
        let b = ingestor.append(event(None)).await.unwrap();
        assert!(a.created && b.created);
        assert_eq!(a.canonical_id, b.canonical_id);
        assert_eq!(store.event_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_ingest_batch_counts() {
        let store = Arc::new(MemoryStore::new());
        let report = ingestor(store, true)
            .ingest_batch(vec![event(Some("a")), event(Some("b")), event(Some("a"))])
            .await
            .unwrap();
        assert_eq!(report, BatchReport { created: 2, duplicates: 1 });
    }

    #[tokio::test]
    async fn test_session_pages_through_cursors() {
        let mut transport = MockTransport::new();
        transport.expect_get().times(2).returning(|req, _| {
            let body = if req.url.contains("cursor=p2") {
                json!({"events": [{"id": "P-2", "event_type": "spud_reported", "asset_id": "W-1"}]})
            } else {
                json!({
                    "events": [{"id": "P-1", "event_type": "permit_issued", "asset_id": "W-1"}],
                    "next_cursor": "p2"
                })
            };
            Ok(TransportResponse::new(200, body.to_string()))
        });
        let clock = Arc::new(ManualClock::new(t0()));
        let mut fetcher = SafeFetcher::new(&fetch_config(), Arc::new(transport), clock).unwrap();
        let store = Arc::new(MemoryStore::new());

        let report = ingestor(store.clone(), true).run_session(&mut fetcher, &feed(), 10).await;
        assert!(report.is_ok());
        assert_eq!(report.pages, 2);
        assert_eq!(report.created, 2);
        assert_eq!(report.diagnostics.emitted(), 2);
        assert_eq!(store.event_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_progress() {
        let mut transport = MockTransport::new();
        transport.expect_get().times(2).returning(|req, _| {
            if req.url.contains("cursor=p2") {
                return Ok(TransportResponse::new(403, "forbidden"));
            }
            let body = json!({
                "events": [
                    {"id": "P-1", "event_type": "permit_issued", "asset_id": "W-1"},
                    {"id": "P-bad"}
                ],
                "next_cursor": "p2"
            });
            Ok(TransportResponse::new(200, body.to_string()))
        });
        let clock = Arc::new(ManualClock::new(t0()));
        let mut fetcher = SafeFetcher::new(&fetch_config(), Arc::new(transport), clock).unwrap();
        let store = Arc::new(MemoryStore::new());

        let report = ingestor(store.clone(), true).run_session(&mut fetcher, &feed(), 10).await;

        assert!(matches!(
            report.error,
            Some(SessionError::Fetch(FetchError::Permanent { status: 403, .. }))
        ));
        let d = report.diagnostics;
        assert_eq!((d.seen(), d.parsed(), d.skipped(), d.emitted()), (2, 1, 1, 1));
        assert_eq!(store.event_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_repeated_cursor_stops_session() {
        let mut transport = MockTransport::new();
        transport.expect_get().times(2).returning(|_, _| {
            Ok(TransportResponse::new(200, r#"{"events": [], "next_cursor": "same"}"#))
        });
        let clock = Arc::new(ManualClock::new(t0()));
        let mut fetcher = SafeFetcher::new(&fetch_config(), Arc::new(transport), clock).unwrap();

        let report = ingestor(Arc::new(MemoryStore::new()), true)
            .run_session(&mut fetcher, &feed(), 10)
            .await;
        assert!(report.is_ok());
        assert_eq!(report.pages, 2);
    }

    #[tokio::test]
    async fn test_max_pages_bounds_session() {
        let mut transport = MockTransport::new();
        let mut n = 0;
        transport.expect_get().times(3).returning(move |_, _| {
            n += 1;
            Ok(TransportResponse::new(200, json!({"events": [], "next_cursor": format!("c{n}")}).to_string()))
        });
        let clock = Arc::new(ManualClock::new(t0()));
        let mut fetcher = SafeFetcher::new(&fetch_config(), Arc::new(transport), clock).unwrap();

        let report = ingestor(Arc::new(MemoryStore::new()), true)
            .run_session(&mut fetcher, &feed(), 3)
            .await;
        assert_eq!(report.pages, 3);
    }
}
