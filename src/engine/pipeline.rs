//! Pipeline orchestration.
//!
//! One cycle runs the stages strictly forward:
//! fetch → ingest → score → convergence → alert → rank.
//! Sources are ingested concurrently (one sequential fetcher each); every
//! later stage reads history back from the store, so a cycle can be re-run
//! at any time and only new alerts are written.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::alerts::AlertGenerator;
use super::health::{self, HealthInputs, HealthSnapshot};
use super::ingestor::{BatchReport, EventIngestor, SessionError, SessionReport};
use super::ranker::OpportunityRanker;
use crate::clock::Clock;
use crate::config::{AppConfig, PipelineConfig};
use crate::fetch::SafeFetcher;
use crate::scoring::{ConvergenceEngine, ScoringEngine};
use crate::sources::SourceAdapter;
use crate::storage::EventStore;
use crate::types::{Alert, ConvergenceResult, Opportunity, ScoreSummary, SourceEvent};

/// Score and convergence for one entity at one `as_of`.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub score: ScoreSummary,
    pub convergence: ConvergenceResult,
}

/// A source paired with the fetcher that paces it.
pub struct SourceSession {
    pub adapter: Box<dyn SourceAdapter>,
    pub fetcher: SafeFetcher,
}

#[derive(Debug)]
pub struct CycleReport {
    pub run_id: Uuid,
    pub as_of: DateTime<Utc>,
    pub replay: Option<BatchReport>,
    pub sessions: Vec<SessionReport>,
    pub evaluations: Vec<Evaluation>,
    pub alerts_created: Vec<Alert>,
    pub opportunities: Vec<Opportunity>,
    pub health: HealthSnapshot,
}

pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    ingestor: EventIngestor,
    scoring: ScoringEngine,
    convergence: ConvergenceEngine,
    alerts: AlertGenerator,
}

impl Pipeline {
    pub fn new(config: &AppConfig, store: Arc<dyn EventStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: config.pipeline.clone(),
            ingestor: EventIngestor::new(store.clone(), clock.clone(), &config.ingest),
            scoring: ScoringEngine::new(config.scoring.clone(), config.pipeline.window_days),
            convergence: ConvergenceEngine::new(config.pipeline.window_days),
            alerts: AlertGenerator::new(&config.pipeline, store.clone(), clock.clone()),
            store,
            clock,
        }
    }

    /// Run one fetch session per source, concurrently.
    pub async fn ingest_sources(&self, sessions: &mut [SourceSession]) -> Vec<SessionReport> {
        let max_pages = self.config.max_pages_per_source;
        let runs = sessions
            .iter_mut()
            .map(|s| self.ingestor.run_session(&mut s.fetcher, s.adapter.as_ref(), max_pages));
        let reports = join_all(runs).await;

        for report in &reports {
            if let Some(e) = &report.error {
                let transient = matches!(e, SessionError::Fetch(f) if f.is_transient());
                warn!(source = %report.source, error = %e, transient, "Source skipped for this run");
            }
        }
        reports
    }

    /// Score every known entity as of `as_of` and persist any new alerts.
    pub async fn evaluate(
        &self,
        as_of: DateTime<Utc>,
        regime_context: Option<&Value>,
    ) -> Result<(Vec<Evaluation>, Vec<Alert>)> {
        let entities = self.store.entities().await?;
        let mut evaluations = Vec::with_capacity(entities.len());
        let mut created = Vec::new();

        for entity in &entities {
            let history = self.store.events_for_entity(entity, as_of).await?;
            let score = self.scoring.score(entity, as_of, &history);
            let convergence = self.convergence.convergence(entity, as_of, &history);

            if let Some(alert) = self.alerts.generate(&score, &convergence, regime_context).await? {
                created.push(alert);
            }
            evaluations.push(Evaluation { score, convergence });
        }

        info!(
            entities = evaluations.len(),
            alerts_created = created.len(),
            "Evaluation pass complete"
        );
        Ok((evaluations, created))
    }

    fn lookback_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::hours(self.config.alert_lookback_hours)
    }

    /// Rank alerts created within the lookback window.
    pub async fn rank_recent(&self, now: DateTime<Utc>) -> Result<Vec<Opportunity>> {
        let alerts = self.store.alerts_since(self.lookback_start(now)).await?;
        Ok(OpportunityRanker::rank(&alerts, self.config.top_n))
    }

    pub async fn health(&self, now: DateTime<Utc>, evaluations: &[Evaluation]) -> Result<HealthSnapshot> {
        let since = self.lookback_start(now);
        let recent_alerts = self.store.alerts_since(since).await?;
        Ok(health::summarize(HealthInputs {
            generated_at: now,
            events_total: self.store.event_count().await?,
            source_counts: self.store.source_counts(since).await?,
            evaluations,
            recent_alerts: &recent_alerts,
            alerts_total: self.store.alert_count().await?,
        }))
    }

    /// One full pass: replay, fetch, evaluate, rank, summarize.
    pub async fn run_cycle(
        &self,
        sessions: &mut [SourceSession],
        replay: Vec<SourceEvent>,
        regime_context: Option<&Value>,
    ) -> Result<CycleReport> {
        let run_id = Uuid::new_v4();
        info!(%run_id, sources = sessions.len(), replay = replay.len(), "Cycle starting");

        let replay = if replay.is_empty() {
            None
        } else {
            Some(self.ingestor.ingest_batch(replay).await?)
        };
        let session_reports = self.ingest_sources(sessions).await;

        let as_of = self.clock.now();
        let (evaluations, alerts_created) = self.evaluate(as_of, regime_context).await?;
        let opportunities = self.rank_recent(as_of).await?;
        let health = self.health(as_of, &evaluations).await?;

        info!(%run_id, %health, opportunities = opportunities.len(), "Cycle complete");

        Ok(CycleReport {
            run_id,
            as_of,
            replay,
            sessions: session_reports,
            evaluations,
            alerts_created,
            opportunities,
            health,
        })
    }
}
