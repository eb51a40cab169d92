//! Rate-limited access to external sources.
//!
//! Defines the `Transport` trait (one HTTP GET), the `Page` a source returns,
//! the error classes a fetch can end in, and the per-session diagnostic
//! counters. The retry/pacing logic itself lives in `safe_fetcher`.

pub mod http;
pub mod safe_fetcher;

pub use safe_fetcher::{RetryPolicy, SafeFetcher};

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Requests and responses
// ---------------------------------------------------------------------------

/// A single GET against a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Raw HTTP response as seen by the fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 429 and 5xx are worth retrying.
    pub fn is_transient(&self) -> bool {
        self.status == 429 || self.status >= 500
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
}

/// Abstraction over the HTTP layer so the fetcher can be exercised offline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(
        &self,
        request: &FetchRequest,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;
}

/// One page of raw records from a source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<serde_json::Value>,
    /// `None` when the source has no further pages.
    pub next_cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    /// Bad fetch-safety configuration. Raised before any network call.
    #[error("invalid fetch configuration: {0}")]
    Validation(String),

    /// 429 / 5xx / timeout that outlasted the retry budget.
    #[error("transient failure from {source_name} after {attempts} attempts: {message}")]
    Transient {
        source_name: String,
        attempts: u32,
        message: String,
    },

    /// Any other non-success status. Never retried.
    #[error("permanent failure from {source_name} (HTTP {status}): {message}")]
    Permanent {
        source_name: String,
        status: u16,
        message: String,
    },

    /// The page body could not be parsed.
    #[error("malformed page from {source_name}: {message}")]
    Malformed {
        source_name: String,
        message: String,
    },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    /// The source should be skipped for the rest of the run.
    pub fn is_permanent(&self) -> bool {
        matches!(self, FetchError::Permanent { .. } | FetchError::Malformed { .. })
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Per-session progress counters. Only ever incremented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchDiagnostics {
    seen: u64,
    parsed: u64,
    skipped: u64,
    emitted: u64,
}

impl FetchDiagnostics {
    /// Records received from the source.
    pub fn seen(&self) -> u64 {
        self.seen
    }

    /// Records that normalized into an event.
    pub fn parsed(&self) -> u64 {
        self.parsed
    }

    /// Records dropped during normalization.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Events committed to the store (new or already present).
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn record_seen(&mut self) {
        self.seen += 1;
    }

    pub fn record_parsed(&mut self) {
        self.parsed += 1;
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn record_emitted(&mut self) {
        self.emitted += 1;
    }
}

impl std::fmt::Display for FetchDiagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "seen={} parsed={} skipped={} emitted={}",
            self.seen, self.parsed, self.skipped, self.emitted
        )
    }
}
