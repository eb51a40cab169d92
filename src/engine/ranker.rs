//! Deterministic top-N ranking of alerts.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::types::{Alert, Opportunity};

pub struct OpportunityRanker;

impl OpportunityRanker {
    /// Rank `alerts` and keep the first `top_n`, numbered from 1.
    ///
    /// Order: total score desc, TIER1 before TIER2, event time desc (missing
    /// last), canonical doc id asc, alert id asc. Alerts sharing an id count
    /// once, keeping whichever ranks first, so the result does not depend on
    /// input order or repetition.
    pub fn rank(alerts: &[Alert], top_n: usize) -> Vec<Opportunity> {
        let mut unique: BTreeMap<&str, &Alert> = BTreeMap::new();
        for alert in alerts {
            unique
                .entry(alert.alert_id.as_str())
                .and_modify(|kept| {
                    let order = compare(alert, *kept).then_with(|| alert.summary.cmp(&kept.summary));
                    if order == Ordering::Less {
                        *kept = alert;
                    }
                })
                .or_insert(alert);
        }
        let mut ordered: Vec<&Alert> = unique.into_values().collect();
        ordered.sort_by(|a, b| compare(a, b));

        ordered
            .into_iter()
            .take(top_n)
            .enumerate()
            .map(|(i, a)| Opportunity {
                rank: i + 1,
                score: a.total_score(),
                tier: a.tier,
                company_id: a.company_id.clone(),
                asset_id: a.asset_id.clone(),
                event_type: a.event_type.clone(),
                event_time: a.event_time,
                canonical_doc_id: a.canonical_doc_id.clone(),
                alert_id: a.alert_id.clone(),
                summary: a.summary.clone(),
            })
            .collect()
    }
}

fn compare(a: &Alert, b: &Alert) -> Ordering {
    b.total_score()
        .cmp(&a.total_score())
        .then_with(|| a.tier.priority().cmp(&b.tier.priority()))
        .then_with(|| match (a.event_time, b.event_time) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.canonical_doc_id.cmp(&b.canonical_doc_id))
        .then_with(|| a.alert_id.cmp(&b.alert_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tests::t0;
    use crate::types::{EntityKey, ScoreSummary, Tier};
    use chrono::{DateTime, Duration, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn alert(id: &str, score: Decimal, tier: Tier, event_time: Option<DateTime<Utc>>, doc: &str) -> Alert {
        Alert {
            alert_id: id.to_string(),
            tier,
            event_type: "permit_issued".to_string(),
            event_time,
            ingest_time: t0(),
            company_id: Some("ACME".to_string()),
            asset_id: None,
            canonical_doc_id: doc.to_string(),
            score_summary: ScoreSummary {
                entity: EntityKey::company("ACME"),
                as_of: t0(),
                base_score: score,
                additive_score: Decimal::ZERO,
                total_score: score,
                highest_stage: None,
                insider_buy: false,
                insider_cluster: false,
                features_used: vec![],
                explanations: vec![],
                trigger: None,
            },
            convergence_categories: vec![],
            summary: format!("alert {id}"),
            details: serde_json::json!({}),
            regime_context: None,
        }
    }

    fn fixture() -> Vec<Alert> {
        let day = |d| Some(t0() + Duration::days(d));
        vec![
            alert("a1", dec!(0.6), Tier::Tier2, day(1), "doc-c"),
            alert("a2", dec!(0.8), Tier::Tier1, day(1), "doc-b"),
            alert("a3", dec!(0.6), Tier::Tier1, day(1), "doc-a"),
            alert("a4", dec!(0.6), Tier::Tier1, day(3), "doc-z"),
            alert("a5", dec!(0.6), Tier::Tier1, None, "doc-0"),
            alert("a6", dec!(0.6), Tier::Tier1, day(1), "doc-a"),
        ]
    }

    fn ids(ops: &[Opportunity]) -> Vec<&str> {
        ops.iter().map(|o| o.alert_id.as_str()).collect()
    }

    #[test]
    fn test_rank_total_order() {
        let ranked = OpportunityRanker::rank(&fixture(), 10);
        assert_eq!(ids(&ranked), vec!["a2", "a4", "a3", "a6", "a5", "a1"]);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[5].rank, 6);
    }

    #[test]
    fn test_rank_independent_of_input_order() {
        let forward = OpportunityRanker::rank(&fixture(), 10);
        let mut reversed = fixture();
        reversed.reverse();
        assert_eq!(forward, OpportunityRanker::rank(&reversed, 10));
        let mut rotated = fixture();
        rotated.rotate_left(2);
        assert_eq!(forward, OpportunityRanker::rank(&rotated, 10));
    }

    #[test]
    fn test_rank_collapses_duplicate_ids() {
        let mut alerts = fixture();
        alerts.extend(fixture());
        assert_eq!(OpportunityRanker::rank(&alerts, 10).len(), 6);
    }

    #[test]
    fn test_rank_shared_id_keeps_best_in_any_order() {
        let low = alert("same", dec!(0.71), Tier::Tier1, Some(t0()), "doc-a");
        let high = alert("same", dec!(0.79), Tier::Tier1, Some(t0()), "doc-a");

        let forward = OpportunityRanker::rank(&[low.clone(), high.clone()], 10);
        let backward = OpportunityRanker::rank(&[high, low], 10);
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 1);
        assert_eq!(forward[0].score, dec!(0.79));
    }

    #[test]
    fn test_rank_top_n() {
        let ranked = OpportunityRanker::rank(&fixture(), 2);
        assert_eq!(ids(&ranked), vec!["a2", "a4"]);
        assert!(OpportunityRanker::rank(&[], 5).is_empty());
    }
}
