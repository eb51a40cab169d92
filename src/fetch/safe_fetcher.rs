//! Paced, retrying fetcher.
//!
//! One `SafeFetcher` serves one source. `fetch` takes `&mut self`, so a
//! fetcher can never have two requests in flight; concurrency across
//! sources comes from running several fetchers side by side.
//!
//! Retry policy:
//! - 429, 5xx, timeouts and connection failures are transient and retried
//!   up to `max_retries` times, waiting `backoff_base * 2^(attempt-1)`.
//! - Any other non-success status is permanent and returned at once.
//! - Every request (retries included) starts at least `request_delay`
//!   after the previous one.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{FetchError, FetchRequest, Page, Transport, TransportError};
use crate::clock::Clock;
use crate::config::FetchConfig;
use crate::sources::SourceAdapter;

/// Longest accepted single wait, to keep `Duration::from_secs_f64` in range.
const MAX_WAIT_SECS: f64 = 24.0 * 3600.0;

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Validated retry and pacing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub request_delay: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub timeout: Duration,
    pub jitter_ratio: f64,
}

impl RetryPolicy {
    /// Validate raw configuration. Nothing touches the network here.
    pub fn from_config(cfg: &FetchConfig) -> Result<Self, FetchError> {
        let secs = |name: &str, v: f64, allow_zero: bool| -> Result<Duration, FetchError> {
            let lower_ok = if allow_zero { v >= 0.0 } else { v > 0.0 };
            let ok = v.is_finite() && v <= MAX_WAIT_SECS && lower_ok;
            if !ok {
                let bound = if allow_zero { ">= 0" } else { "> 0" };
                return Err(FetchError::Validation(format!(
                    "{name} must be {bound} and <= {MAX_WAIT_SECS}, got {v}"
                )));
            }
            Ok(Duration::from_secs_f64(v))
        };

        let request_delay = secs("request_delay_s", cfg.request_delay_s, true)?;
        let backoff_base = secs("backoff_base_s", cfg.backoff_base_s, false)?;
        let timeout = secs("timeout_s", cfg.timeout_s, false)?;

        let max_retries = u32::try_from(cfg.max_retries).map_err(|_| {
            FetchError::Validation(format!(
                "max_retries must be within [0, {}], got {}",
                u32::MAX,
                cfg.max_retries
            ))
        })?;

        if !(cfg.jitter_ratio.is_finite() && (0.0..=1.0).contains(&cfg.jitter_ratio)) {
            return Err(FetchError::Validation(format!(
                "jitter_ratio must be within [0, 1], got {}",
                cfg.jitter_ratio
            )));
        }

        Ok(Self {
            request_delay,
            max_retries,
            backoff_base,
            timeout,
            jitter_ratio: cfg.jitter_ratio,
        })
    }

    /// Un-jittered wait before retry number `attempt` (starting at 1).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.backoff_base.saturating_mul(1u32 << exp)
    }

    /// Total attempts a permanently failing-transiently source receives.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_ratio <= 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.0..=self.jitter_ratio);
        delay + delay.mul_f64(factor)
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

pub struct SafeFetcher {
    policy: RetryPolicy,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    last_request_at: Option<DateTime<Utc>>,
    requests_made: u64,
}

impl SafeFetcher {
    /// Validate `config` and build a fetcher. Fails fast with
    /// `FetchError::Validation` before any transport call.
    pub fn new(
        config: &FetchConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, FetchError> {
        let policy = RetryPolicy::from_config(config)?;
        Ok(Self::with_policy(policy, transport, clock))
    }

    pub fn with_policy(policy: RetryPolicy, transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            transport,
            clock,
            last_request_at: None,
            requests_made: 0,
        }
    }

    /// Transport calls issued so far, retries included.
    pub fn requests_made(&self) -> u64 {
        self.requests_made
    }

    /// Fetch and parse one page from `source`.
    pub async fn fetch(
        &mut self,
        source: &dyn SourceAdapter,
        cursor: Option<&str>,
    ) -> Result<Page, FetchError> {
        let name = source.source_system().to_string();
        let request = source.request(cursor);
        let body = self.get_with_retry(&name, &request).await?;
        source.parse_page(&body).map_err(|e| FetchError::Malformed {
            source_name: name,
            message: format!("{e:#}"),
        })
    }

    /// GET with pacing and exponential backoff.
    pub async fn get_with_retry(
        &mut self,
        source_name: &str,
        request: &FetchRequest,
    ) -> Result<String, FetchError> {
        let mut last_error = String::new();

        for attempt in 0..=self.policy.max_retries {
            let backoff = if attempt > 0 {
                self.policy.jittered(self.policy.backoff_for(attempt))
            } else {
                Duration::ZERO
            };
            self.wait_turn(backoff).await;
            if attempt > 0 {
                debug!(source = source_name, attempt, delay_ms = backoff.as_millis() as u64, "Retrying fetch");
            }

            self.requests_made += 1;

            let outcome = tokio::time::timeout(
                self.policy.timeout,
                self.transport.get(request, self.policy.timeout),
            )
            .await
            .unwrap_or(Err(TransportError::Timeout));
            // Pacing runs from the end of one request to the start of the next.
            self.last_request_at = Some(self.clock.now());

            match outcome {
                Ok(response) if response.is_success() => {
                    debug!(source = source_name, url = %request.url, status = response.status, "Fetched page");
                    return Ok(response.body);
                }
                Ok(response) if response.is_transient() => {
                    warn!(source = source_name, status = response.status, attempt, "Retryable fetch error");
                    last_error = format!("HTTP {}: {}", response.status, truncate(&response.body));
                }
                Ok(response) => {
                    warn!(source = source_name, status = response.status, url = %request.url, "Permanent fetch error");
                    return Err(FetchError::Permanent {
                        source_name: source_name.to_string(),
                        status: response.status,
                        message: truncate(&response.body),
                    });
                }
                Err(e) => {
                    warn!(source = source_name, attempt, error = %e, "Fetch request failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(FetchError::Transient {
            source_name: source_name.to_string(),
            attempts: self.policy.max_attempts(),
            message: last_error,
        })
    }

    /// Sleep for `max(min_wait, time left in the pacing interval)`.
    async fn wait_turn(&self, min_wait: Duration) {
        let pacing = match self.last_request_at {
            Some(last) => {
                let elapsed = (self.clock.now() - last).to_std().unwrap_or(Duration::ZERO);
                self.policy.request_delay.saturating_sub(elapsed)
            }
            None => Duration::ZERO,
        };
        let wait = pacing.max(min_wait);
        if !wait.is_zero() {
            self.clock.sleep(wait).await;
        }
    }
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 200;
    if body.len() <= LIMIT {
        return body.to_string();
    }
    let mut end = LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
