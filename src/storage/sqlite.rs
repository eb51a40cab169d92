//! SQLite event store.
//!
//! `event_log` is append-only. A partial unique index on
//! `(source_system, dedup_key)` makes insert-if-absent a single statement,
//! so concurrent ingestion sessions never race on an existence check.
//! Timestamps are stored as fixed-width RFC 3339 text, which keeps
//! `ORDER BY` on them chronological.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::{entity_keys_from_pairs, EventStore};
use crate::hashing::format_time;
use crate::types::{Alert, AppendOutcome, EntityKey, NewRawEvent, RawEvent, Tier};

const EVENT_COLUMNS: &str = "id, source_system, source_event_id, event_type, event_time, ingest_time, \
     company_id, asset_id, payload, content_hash, canonical_id";

const ALERT_COLUMNS: &str = "alert_id, tier, event_type, event_time, ingest_time, company_id, asset_id, \
     canonical_doc_id, score_summary, convergence_categories, summary, details, regime_context";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and run migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database url: {url}"))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every in-memory connection is its own database, so keep exactly one alive.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database: {url}"))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_system TEXT NOT NULL,
                source_event_id TEXT,
                dedup_key TEXT,
                event_type TEXT NOT NULL,
                event_time TEXT,
                ingest_time TEXT NOT NULL,
                effective_time TEXT NOT NULL,
                company_id TEXT,
                asset_id TEXT,
                payload TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                canonical_id TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS ux_event_log_dedup
             ON event_log(source_system, dedup_key) WHERE dedup_key IS NOT NULL",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_event_log_order
             ON event_log(effective_time, ingest_time, canonical_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_event_log_asset ON event_log(asset_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_event_log_company ON event_log(company_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                alert_id TEXT PRIMARY KEY,
                tier TEXT NOT NULL,
                event_type TEXT NOT NULL,
                event_time TEXT,
                ingest_time TEXT NOT NULL,
                company_id TEXT,
                asset_id TEXT,
                canonical_doc_id TEXT NOT NULL,
                total_score TEXT NOT NULL,
                score_summary TEXT NOT NULL,
                convergence_categories TEXT NOT NULL,
                summary TEXT NOT NULL,
                details TEXT NOT NULL,
                regime_context TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_alerts_created ON alerts(created_at)")
            .execute(&self.pool)
            .await?;

        info!("Event store migration complete");
        Ok(())
    }

    async fn event_by_dedup_key(&self, source_system: &str, dedup_key: &str) -> Result<Option<RawEvent>> {
        let row = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM event_log WHERE source_system = ? AND dedup_key = ?"
        ))
        .bind(source_system)
        .bind(dedup_key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| row_to_event(&r)).transpose()
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn insert_event_if_absent(&self, new: &NewRawEvent) -> Result<AppendOutcome> {
        let ev = &new.event;
        let event_time = ev.event_time.as_ref().map(format_time);
        let ingest_time = format_time(&new.ingest_time);
        let effective_time = event_time.clone().unwrap_or_else(|| ingest_time.clone());
        let payload = serde_json::to_string(&ev.payload).context("Failed to serialise payload")?;

        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO event_log (
                source_system, source_event_id, dedup_key, event_type, event_time,
                ingest_time, effective_time, company_id, asset_id, payload,
                content_hash, canonical_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (source_system, dedup_key) WHERE dedup_key IS NOT NULL DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&ev.source_system)
        .bind(&ev.source_event_id)
        .bind(&new.dedup_key)
        .bind(&ev.event_type)
        .bind(&event_time)
        .bind(&ingest_time)
        .bind(&effective_time)
        .bind(&ev.company_id)
        .bind(&ev.asset_id)
        .bind(&payload)
        .bind(&new.content_hash)
        .bind(&new.canonical_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to insert event {}", new.canonical_id))?;

        if let Some(id) = inserted {
            return Ok(AppendOutcome {
                id,
                canonical_id: new.canonical_id.clone(),
                created: true,
            });
        }

        // Conflict: the key is non-null and a row with it already exists.
        let dedup_key = new.dedup_key.as_deref().unwrap_or_default();
        let existing = self
            .event_by_dedup_key(&ev.source_system, dedup_key)
            .await?
            .with_context(|| format!("Conflicting event vanished for {}/{}", ev.source_system, dedup_key))?;
        debug!(canonical_id = %existing.canonical_id, "Event already stored");
        Ok(AppendOutcome {
            id: existing.id,
            canonical_id: existing.canonical_id,
            created: false,
        })
    }

    async fn events_for_entity(&self, entity: &EntityKey, up_to: DateTime<Utc>) -> Result<Vec<RawEvent>> {
        let up_to = format_time(&up_to);
        let rows = match &entity.asset_id {
            Some(asset) => {
                sqlx::query(&format!(
                    "SELECT {EVENT_COLUMNS} FROM event_log
                     WHERE (asset_id = ? OR (asset_id IS NULL AND company_id = ?))
                       AND effective_time <= ?
                     ORDER BY effective_time, ingest_time, canonical_id"
                ))
                .bind(asset)
                .bind(&entity.company_id)
                .bind(&up_to)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {EVENT_COLUMNS} FROM event_log
                     WHERE company_id = ? AND effective_time <= ?
                     ORDER BY effective_time, ingest_time, canonical_id"
                ))
                .bind(&entity.company_id)
                .bind(&up_to)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(row_to_event).collect()
    }

    async fn all_events(&self) -> Result<Vec<RawEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM event_log ORDER BY effective_time, ingest_time, canonical_id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_event).collect()
    }

    async fn entities(&self) -> Result<Vec<EntityKey>> {
        let rows = sqlx::query(
            "SELECT DISTINCT company_id, asset_id FROM event_log
             WHERE company_id IS NOT NULL OR asset_id IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut pairs = Vec::with_capacity(rows.len());
        for row in &rows {
            let company: Option<String> = row.try_get("company_id")?;
            let asset: Option<String> = row.try_get("asset_id")?;
            pairs.push((company, asset));
        }
        Ok(entity_keys_from_pairs(pairs))
    }

    async fn event_count(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM event_log")
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }

    async fn source_counts(&self, since: DateTime<Utc>) -> Result<BTreeMap<String, u64>> {
        let rows = sqlx::query(
            "SELECT source_system, COUNT(*) AS n FROM event_log
             WHERE ingest_time >= ? GROUP BY source_system",
        )
        .bind(format_time(&since))
        .fetch_all(&self.pool)
        .await?;

        let mut counts = BTreeMap::new();
        for row in &rows {
            let source: String = row.try_get("source_system")?;
            let n: i64 = row.try_get("n")?;
            counts.insert(source, n.max(0) as u64);
        }
        Ok(counts)
    }

    async fn insert_alert_if_absent(&self, alert: &Alert, created_at: DateTime<Utc>) -> Result<bool> {
        let score_summary =
            serde_json::to_string(&alert.score_summary).context("Failed to serialise score summary")?;
        let categories = serde_json::to_string(&alert.convergence_categories)?;
        let details = serde_json::to_string(&alert.details)?;
        let regime = alert
            .regime_context
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO alerts (
                alert_id, tier, event_type, event_time, ingest_time, company_id, asset_id,
                canonical_doc_id, total_score, score_summary, convergence_categories,
                summary, details, regime_context, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(alert_id) DO NOTHING
            "#,
        )
        .bind(&alert.alert_id)
        .bind(alert.tier.as_str())
        .bind(&alert.event_type)
        .bind(alert.event_time.as_ref().map(format_time))
        .bind(format_time(&alert.ingest_time))
        .bind(&alert.company_id)
        .bind(&alert.asset_id)
        .bind(&alert.canonical_doc_id)
        .bind(alert.total_score().to_string())
        .bind(&score_summary)
        .bind(&categories)
        .bind(&alert.summary)
        .bind(&details)
        .bind(&regime)
        .bind(format_time(&created_at))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert alert {}", alert.alert_id))?;

        Ok(result.rows_affected() == 1)
    }

    async fn alerts_since(&self, since: DateTime<Utc>) -> Result<Vec<Alert>> {
        let rows = sqlx::query(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE created_at >= ? ORDER BY created_at, alert_id"
        ))
        .bind(format_time(&since))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_alert).collect()
    }

    async fn alert_count(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alerts")
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Bad stored timestamp: {raw}"))
}

fn parse_opt_time(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_time).transpose()
}

fn row_to_event(row: &SqliteRow) -> Result<RawEvent> {
    let payload: String = row.try_get("payload")?;
    let ingest_time: String = row.try_get("ingest_time")?;
    let canonical_id: String = row.try_get("canonical_id")?;
    Ok(RawEvent {
        id: row.try_get("id")?,
        source_system: row.try_get("source_system")?,
        source_event_id: row.try_get("source_event_id")?,
        event_type: row.try_get("event_type")?,
        event_time: parse_opt_time(row.try_get("event_time")?)?,
        ingest_time: parse_time(&ingest_time)?,
        company_id: row.try_get("company_id")?,
        asset_id: row.try_get("asset_id")?,
        payload: serde_json::from_str(&payload)
            .with_context(|| format!("Bad payload JSON for {canonical_id}"))?,
        content_hash: row.try_get("content_hash")?,
        canonical_id,
    })
}

fn row_to_alert(row: &SqliteRow) -> Result<Alert> {
    let alert_id: String = row.try_get("alert_id")?;
    let tier: String = row.try_get("tier")?;
    let ingest_time: String = row.try_get("ingest_time")?;
    let score_summary: String = row.try_get("score_summary")?;
    let categories: String = row.try_get("convergence_categories")?;
    let details: String = row.try_get("details")?;
    let regime: Option<String> = row.try_get("regime_context")?;

    Ok(Alert {
        tier: Tier::from_str(&tier)?,
        event_type: row.try_get("event_type")?,
        event_time: parse_opt_time(row.try_get("event_time")?)?,
        ingest_time: parse_time(&ingest_time)?,
        company_id: row.try_get("company_id")?,
        asset_id: row.try_get("asset_id")?,
        canonical_doc_id: row.try_get("canonical_doc_id")?,
        score_summary: serde_json::from_str(&score_summary)
            .with_context(|| format!("Bad score summary for alert {alert_id}"))?,
        convergence_categories: serde_json::from_str(&categories)?,
        summary: row.try_get("summary")?,
        details: serde_json::from_str(&details)?,
        regime_context: regime.as_deref().map(|s| serde_json::from_str(s)).transpose()?,
        alert_id,
    })
}
