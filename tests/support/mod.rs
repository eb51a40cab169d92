//! Offline fixtures for integration tests.
//!
//! `FeedTransport` serves canned JSON pages keyed by exact URL and records
//! every request, so full pipeline cycles run with no network.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ogree::clock::ManualClock;
use ogree::config::{FetchConfig, SourceConfig};
use ogree::engine::SourceSession;
use ogree::fetch::{FetchRequest, SafeFetcher, Transport, TransportError, TransportResponse};
use ogree::sources::JsonFeedAdapter;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
}

/// Serves a fixed response per URL. Unknown URLs get a 404.
#[derive(Default)]
pub struct FeedTransport {
    routes: Mutex<HashMap<String, TransportResponse>>,
    calls: Mutex<Vec<String>>,
}

impl FeedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, url: &str, status: u16, body: Value) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), TransportResponse::new(status, body.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FeedTransport {
    async fn get(
        &self,
        request: &FetchRequest,
        _timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        self.calls.lock().unwrap().push(request.url.clone());
        let routes = self.routes.lock().unwrap();
        Ok(routes
            .get(&request.url)
            .cloned()
            .unwrap_or_else(|| TransportResponse::new(404, "not found")))
    }
}

pub fn source_config(name: &str, url: &str) -> SourceConfig {
    SourceConfig {
        name: name.to_string(),
        url: url.to_string(),
        enabled: true,
        records_pointer: "/events".to_string(),
        next_cursor_pointer: "/next_cursor".to_string(),
        cursor_param: "cursor".to_string(),
        api_key_env: None,
    }
}

/// Fast fetch settings: no pacing and a single retry.
pub fn fetch_config() -> FetchConfig {
    FetchConfig {
        request_delay_s: 0.0,
        max_retries: 1,
        backoff_base_s: 0.01,
        ..FetchConfig::default()
    }
}

pub fn session(
    name: &str,
    url: &str,
    transport: Arc<FeedTransport>,
    clock: Arc<ManualClock>,
) -> SourceSession {
    let adapter = JsonFeedAdapter::from_config(&source_config(name, url)).unwrap();
    let fetcher = SafeFetcher::new(&fetch_config(), transport, clock).unwrap();
    SourceSession {
        adapter: Box::new(adapter),
        fetcher,
    }
}

/// A regulator feed with a permit and a completion for asset ACME-1,
/// split over two pages.
pub fn permits_transport() -> FeedTransport {
    FeedTransport::new()
        .route(
            "https://feeds.test/permits",
            200,
            json!({
                "events": [{
                    "id": "permit-1",
                    "event_type": "Permit Issued",
                    "date": "2026-02-01",
                    "ticker": "ACME",
                    "asset_id": "ACME-1",
                    "permit_no": "P-77"
                }],
                "next_cursor": "p2"
            }),
        )
        .route(
            "https://feeds.test/permits?cursor=p2",
            200,
            json!({
                "events": [{
                    "id": "completion-1",
                    "event_type": "completion_reported",
                    "date": "2026-02-11",
                    "ticker": "ACME",
                    "asset_id": "ACME-1"
                }],
                "next_cursor": null
            }),
        )
}

/// An insider-filing feed with one open-market buy at company level.
pub fn insiders_transport() -> FeedTransport {
    FeedTransport::new().route(
        "https://feeds.test/insiders",
        200,
        json!({
            "events": [{
                "accession_number": "0001-26-000042",
                "type": "insider_buy",
                "filed_at": "2026-02-21T14:30:00Z",
                "ticker": "ACME",
                "filer_name": "Dana Morgan",
                "shares": 25000
            }]
        }),
    )
}
