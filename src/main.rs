//! OGREE: catalyst scoring and alerting engine
//!
//! Entry point. Loads configuration, initialises structured logging, opens
//! the event store and runs the fetch→ingest→score→alert→rank cycle, either
//! once or on an interval with graceful shutdown.

use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use ogree::clock::{Clock, SystemClock};
use ogree::config::AppConfig;
use ogree::engine::{CycleReport, Pipeline, SourceSession};
use ogree::fetch::http::HttpTransport;
use ogree::fetch::{RetryPolicy, SafeFetcher, Transport};
use ogree::sources::{replay, JsonFeedAdapter};
use ogree::storage::{EventStore, SqliteStore};
use ogree::types::SourceEvent;

const BANNER: &str = r#"
  ___   ____ ____  _____ _____
 / _ \ / ___|  _ \| ____| ____|
| | | | |  _| |_) |  _| |  _|
| |_| | |_| |  _ <| |___| |___
 \___/ \____|_| \_\_____|_____|

  Catalyst progression & convergence engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        sources = cfg.sources.len(),
        window_days = cfg.pipeline.window_days,
        database = %cfg.storage.database_url,
        "OGREE starting up"
    );

    // Reject bad fetch settings before anything touches the network.
    let policy = RetryPolicy::from_config(&cfg.fetch)?;

    let store: Arc<dyn EventStore> = Arc::new(SqliteStore::connect(&cfg.storage.database_url).await?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&cfg.fetch.user_agent)?);

    let mut sessions = Vec::new();
    for source in cfg.sources.iter().filter(|s| s.enabled) {
        match JsonFeedAdapter::from_config(source) {
            Ok(adapter) => {
                info!(source = %source.name, url = %source.url, "Source enabled");
                sessions.push(SourceSession {
                    adapter: Box::new(adapter),
                    fetcher: SafeFetcher::with_policy(policy.clone(), transport.clone(), clock.clone()),
                });
            }
            Err(e) => warn!(source = %source.name, error = %e, "Source disabled: bad configuration"),
        }
    }

    let pipeline = Pipeline::new(&cfg, store, clock);

    let Some(interval_secs) = cfg.pipeline.run_interval_secs else {
        let report = run_once(&cfg, &pipeline, &mut sessions).await?;
        log_cycle_report(&report);
        return Ok(());
    };

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(interval_secs, "Entering main loop. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match run_once(&cfg, &pipeline, &mut sessions).await {
                    Ok(report) => log_cycle_report(&report),
                    Err(e) => error!(error = %format!("{e:#}"), "Cycle failed, continuing to next"),
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    info!("OGREE shut down cleanly.");
    Ok(())
}

/// Load the optional replay file and regime snapshot, then run one cycle.
async fn run_once(
    cfg: &AppConfig,
    pipeline: &Pipeline,
    sessions: &mut [SourceSession],
) -> Result<CycleReport> {
    let replay_events: Vec<SourceEvent> = match &cfg.pipeline.replay_path {
        Some(path) => replay::load_jsonl(path)?,
        None => Vec::new(),
    };
    let regime = match &cfg.pipeline.regime_context_path {
        Some(path) => Some(load_regime(path)?),
        None => None,
    };
    pipeline.run_cycle(sessions, replay_events, regime.as_ref()).await
}

fn load_regime(path: &str) -> Result<Value> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read regime context: {path}"))?;
    serde_json::from_str(&contents).with_context(|| format!("Invalid regime context JSON: {path}"))
}

fn log_cycle_report(report: &CycleReport) {
    if let Some(replay) = &report.replay {
        info!(created = replay.created, duplicates = replay.duplicates, "Replay ingested");
    }
    for session in &report.sessions {
        info!(
            source = %session.source,
            pages = session.pages,
            created = session.created,
            duplicates = session.duplicates,
            diagnostics = %session.diagnostics,
            ok = session.is_ok(),
            "Source session"
        );
    }

    info!(
        run_id = %report.run_id,
        as_of = %report.as_of,
        entities = report.evaluations.len(),
        alerts_created = report.alerts_created.len(),
        "Cycle summary"
    );
    for opp in &report.opportunities {
        info!("{opp}");
    }
    match serde_json::to_string(&report.health) {
        Ok(json) => info!(health = %json, "Health snapshot"),
        Err(e) => warn!(error = %e, "Failed to serialize health snapshot"),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ogree=info"));

    let json_logging = std::env::var("OGREE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
