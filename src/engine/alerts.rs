//! Alert generation.
//!
//! An alert pins a score to the event that triggered it. Its id is a hash of
//! `(canonical_doc_id, company_id, asset_id, event_type, score_bucket)`, so
//! re-running the pipeline over the same history produces the same ids and
//! the store's insert-if-absent turns repeats into no-ops. Small score drift
//! inside one bucket never creates a new alert.

use anyhow::Result;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::PipelineConfig;
use crate::hashing;
use crate::storage::EventStore;
use crate::types::{Alert, ConvergenceResult, ScoreSummary, Tier};

pub struct AlertGenerator {
    tier_threshold: Decimal,
    score_bucket_size: Decimal,
    min_alert_score: Decimal,
    high_signal_types: BTreeSet<String>,
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
}

impl AlertGenerator {
    pub fn new(config: &PipelineConfig, store: Arc<dyn EventStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tier_threshold: config.tier_threshold,
            score_bucket_size: config.score_bucket_size,
            min_alert_score: config.min_alert_score,
            high_signal_types: config.high_signal_types.clone(),
            store,
            clock,
        }
    }

    /// TIER1 when the score clears the threshold or the type is high-signal.
    pub fn tier_for(&self, total_score: Decimal, event_type: &str) -> Tier {
        if total_score >= self.tier_threshold || self.high_signal_types.contains(event_type) {
            Tier::Tier1
        } else {
            Tier::Tier2
        }
    }

    /// `floor(total_score / score_bucket_size)`.
    pub fn score_bucket(&self, total_score: Decimal) -> i64 {
        (total_score / self.score_bucket_size)
            .floor()
            .to_i64()
            .unwrap_or_default()
    }

    /// Build the alert for a score without touching the store.
    ///
    /// Returns `None` when the score has no trigger event, or when it is
    /// below `min_alert_score` and neither converging nor high-signal.
    pub fn build(
        &self,
        score: &ScoreSummary,
        convergence: &ConvergenceResult,
        regime_context: Option<&Value>,
    ) -> Option<Alert> {
        let trigger = score.trigger.as_ref()?;
        let total = score.total_score;
        let high_signal = self.high_signal_types.contains(&trigger.event_type);

        if total < self.min_alert_score && !convergence.is_converging && !high_signal {
            debug!(entity = %score.entity, total = %total, "Below alert floor");
            return None;
        }

        let tier = self.tier_for(total, &trigger.event_type);
        let bucket = self.score_bucket(total);
        let company_id = score.entity.company_id.clone().or_else(|| trigger.company_id.clone());
        let asset_id = score.entity.asset_id.clone();

        let alert_id = hashing::alert_id(
            &trigger.canonical_id,
            company_id.as_deref(),
            asset_id.as_deref(),
            &trigger.event_type,
            bucket,
        );

        let mut summary = format!("[{tier}] {} {} score={:.2}", trigger.event_type, score.entity, total);
        if convergence.is_converging {
            summary.push_str(&format!(
                " convergence={} [{}]",
                convergence.category_count(),
                convergence.labels()
            ));
        }

        let details = json!({
            "score_bucket": bucket,
            "base_score": score.base_score,
            "additive_score": score.additive_score,
            "highest_stage": score.highest_stage,
            "insider_buy": score.insider_buy,
            "insider_cluster": score.insider_cluster,
            "features_used": score.features_used,
            "explanations": score.explanations,
            "convergence": {
                "window_days": convergence.window_days,
                "score": convergence.convergence_score,
                "categories": convergence.categories_present,
                "contributing_events": convergence.contributing_events,
            },
        });

        Some(Alert {
            alert_id,
            tier,
            event_type: trigger.event_type.clone(),
            event_time: trigger.event_time,
            ingest_time: trigger.ingest_time,
            company_id,
            asset_id,
            canonical_doc_id: trigger.canonical_id.clone(),
            score_summary: score.clone(),
            convergence_categories: convergence.categories_present.clone(),
            summary,
            details,
            regime_context: regime_context.cloned(),
        })
    }

    /// Build and persist. `None` when nothing qualifies or an alert with the
    /// same id is already stored; stored alerts are never modified.
    pub async fn generate(
        &self,
        score: &ScoreSummary,
        convergence: &ConvergenceResult,
        regime_context: Option<&Value>,
    ) -> Result<Option<Alert>> {
        let Some(alert) = self.build(score, convergence, regime_context) else {
            return Ok(None);
        };

        if !self.store.insert_alert_if_absent(&alert, self.clock.now()).await? {
            debug!(alert_id = %alert.alert_id, "Alert already exists");
            return Ok(None);
        }

        info!(alert_id = %alert.alert_id, tier = %alert.tier, summary = %alert.summary, "Alert created");
        Ok(Some(alert))
    }
}
