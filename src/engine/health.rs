//! Run health snapshot.
//!
//! A read-only summary of one pipeline pass: what was ingested, how the
//! scored entities are distributed, and what alerts came out.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::pipeline::Evaluation;
use crate::scoring::CONVERGENCE_MIN_CATEGORIES;
use crate::types::{Alert, Tier};

/// Entities at or above this total count as high-score.
const HIGH_SCORE: Decimal = dec!(0.8);

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TierCounts {
    pub tier1: u64,
    pub tier2: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub generated_at: DateTime<Utc>,
    pub events_total: u64,
    /// Events per source ingested within the lookback.
    pub source_counts: BTreeMap<String, u64>,

    pub entities: u64,
    pub avg_score: Decimal,
    pub entities_high_score: u64,
    pub entities_with_insider_signal: u64,
    /// Exactly one category short of converging.
    pub entities_convergence_watch: u64,
    pub entities_converging: u64,
    pub entities_with_company_id: u64,
    pub company_resolution_rate_pct: Decimal,

    pub alerts_recent: u64,
    pub alerts_total: u64,
    pub alerts_converging: u64,
    pub tier_counts: TierCounts,
}

pub struct HealthInputs<'a> {
    pub generated_at: DateTime<Utc>,
    pub events_total: u64,
    pub source_counts: BTreeMap<String, u64>,
    pub evaluations: &'a [Evaluation],
    pub recent_alerts: &'a [Alert],
    pub alerts_total: u64,
}

fn pct(numerator: u64, denominator: u64) -> Decimal {
    if denominator == 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(numerator) * dec!(100) / Decimal::from(denominator)).round_dp(2)
}

fn count_where(evals: &[Evaluation], pred: impl Fn(&Evaluation) -> bool) -> u64 {
    evals.iter().filter(|e| pred(e)).count() as u64
}

pub fn summarize(inputs: HealthInputs<'_>) -> HealthSnapshot {
    let evals = inputs.evaluations;
    let entities = evals.len() as u64;

    let avg_score = if evals.is_empty() {
        Decimal::ZERO
    } else {
        let sum: Decimal = evals.iter().map(|e| e.score.total_score).sum();
        (sum / Decimal::from(entities)).round_dp(4)
    };

    let entities_with_company_id = count_where(evals, |e| e.score.entity.company_id.is_some());

    let mut tier_counts = TierCounts::default();
    for alert in inputs.recent_alerts {
        match alert.tier {
            Tier::Tier1 => tier_counts.tier1 += 1,
            Tier::Tier2 => tier_counts.tier2 += 1,
        }
    }

    HealthSnapshot {
        generated_at: inputs.generated_at,
        events_total: inputs.events_total,
        source_counts: inputs.source_counts,
        entities,
        avg_score,
        entities_high_score: count_where(evals, |e| e.score.total_score >= HIGH_SCORE),
        entities_with_insider_signal: count_where(evals, |e| e.score.insider_buy),
        entities_convergence_watch: count_where(evals, |e| {
            e.convergence.category_count() + 1 == CONVERGENCE_MIN_CATEGORIES
        }),
        entities_converging: count_where(evals, |e| e.convergence.is_converging),
        entities_with_company_id,
        company_resolution_rate_pct: pct(entities_with_company_id, entities),
        alerts_recent: inputs.recent_alerts.len() as u64,
        alerts_total: inputs.alerts_total,
        alerts_converging: inputs
            .recent_alerts
            .iter()
            .filter(|a| a.convergence_categories.len() >= CONVERGENCE_MIN_CATEGORIES)
            .count() as u64,
        tier_counts,
    }
}

impl fmt::Display for HealthSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "events={} entities={} avg_score={} high={} converging={} watch={} alerts={} (T1={} T2={}) resolved={}%",
            self.events_total,
            self.entities,
            self.avg_score,
            self.entities_high_score,
            self.entities_converging,
            self.entities_convergence_watch,
            self.alerts_recent,
            self.tier_counts.tier1,
            self.tier_counts.tier2,
            self.company_resolution_rate_pct,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;
    use crate::scoring::{ConvergenceEngine, ScoringEngine};
    use crate::types::tests::{raw, t0};
    use crate::types::{EntityKey, RawEvent};
    use chrono::Duration;

    fn evaluation(key: EntityKey, history: &[RawEvent]) -> Evaluation {
        let as_of = t0() + Duration::days(10);
        Evaluation {
            score: ScoringEngine::new(ScoringConfig::default(), 30).score(&key, as_of, history),
            convergence: ConvergenceEngine::new(30).convergence(&key, as_of, history),
        }
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = summarize(HealthInputs {
            generated_at: t0(),
            events_total: 0,
            source_counts: BTreeMap::new(),
            evaluations: &[],
            recent_alerts: &[],
            alerts_total: 0,
        });
        assert_eq!(snap.entities, 0);
        assert_eq!(snap.avg_score, Decimal::ZERO);
        assert_eq!(snap.company_resolution_rate_pct, Decimal::ZERO);
    }

    #[test]
    fn test_snapshot_counts() {
        let mut orphan = raw(10, "drill_assay", 1);
        orphan.company_id = None;
        orphan.asset_id = Some("W-9".to_string());

        let evals = vec![
            evaluation(
                EntityKey::asset(Some("ACME"), "ACME-1"),
                &[raw(1, "permit_issued", 0), raw(2, "spud_reported", 1)],
            ),
            evaluation(EntityKey::asset(None, "W-9"), &[orphan]),
        ];
        let snap = summarize(HealthInputs {
            generated_at: t0(),
            events_total: 3,
            source_counts: BTreeMap::from([("test".to_string(), 3)]),
            evaluations: &evals,
            recent_alerts: &[],
            alerts_total: 0,
        });

        assert_eq!(snap.entities, 2);
        // (0.4 + 0.8) / 2
        assert_eq!(snap.avg_score, dec!(0.6));
        assert_eq!(snap.entities_high_score, 1);
        assert_eq!(snap.entities_convergence_watch, 1);
        assert_eq!(snap.entities_with_company_id, 1);
        assert_eq!(snap.company_resolution_rate_pct, dec!(50));
    }

    #[test]
    fn test_pct_rounding() {
        assert_eq!(pct(1, 3), dec!(33.33));
        assert_eq!(pct(0, 0), Decimal::ZERO);
    }
}
