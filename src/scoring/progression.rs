//! Chain-progression scoring.
//!
//! `base_score` is the highest stage weight an entity has reached (stages
//! never add up). `additive_score` collects one-off bonuses: resource/study,
//! financing/deal and policy categories, an insider buy, and an insider
//! cluster. Both are recomputed from raw history on every call.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use tracing::debug;

use super::taxonomy::{self, INSIDER_BUY};
use crate::config::ScoringConfig;
use crate::types::{Category, ChainStage, EntityKey, EventPointer, RawEvent, ScoreSummary};

/// Categories whose presence adds a flat bonus. E is handled via insider buys.
const BONUS_CATEGORIES: &[Category] = &[Category::C, Category::D, Category::F];

pub struct ScoringEngine {
    config: ScoringConfig,
    window_days: u32,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig, window_days: u32) -> Self {
        Self { config, window_days }
    }

    /// Score `entity` using events with effective time `<= as_of`.
    ///
    /// `history` may contain other entities' events and may be in any order.
    pub fn score(&self, entity: &EntityKey, as_of: DateTime<Utc>, history: &[RawEvent]) -> ScoreSummary {
        let events = super::entity_history(entity, history, |t| t <= as_of);

        let mut base = Decimal::ZERO;
        let mut highest_stage: Option<(ChainStage, String)> = None;
        let mut categories: BTreeSet<Category> = BTreeSet::new();
        let mut insider_buys: Vec<(DateTime<Utc>, String)> = Vec::new();
        let mut features_used = Vec::new();
        let mut explanations = Vec::new();
        let mut trigger: Option<&RawEvent> = None;

        for event in &events {
            let event_type = event.event_type.trim();
            if event_type.is_empty() {
                explanations.push(format!("skipped {}: missing event_type", event.canonical_id));
                continue;
            }

            let mut contributed = false;

            if let Some(stage) = taxonomy::stage_for(event_type) {
                let weight = self.config.stage_weights.weight_for(stage);
                if highest_stage.is_none() || weight > base {
                    base = weight;
                    highest_stage = Some((stage, event_type.to_string()));
                }
                contributed = true;
            }

            match taxonomy::category_for(event_type) {
                Some(category) if BONUS_CATEGORIES.contains(&category) => {
                    categories.insert(category);
                    contributed = true;
                }
                Some(Category::E) if event_type == INSIDER_BUY => {
                    match event.payload_str("filer_name") {
                        Some(name) => {
                            insider_buys.push((event.effective_time(), taxonomy::normalize_name(name)));
                            contributed = true;
                        }
                        None => {
                            explanations.push(format!(
                                "skipped {}: insider_buy missing filer_name",
                                event.canonical_id
                            ));
                            continue;
                        }
                    }
                }
                _ => {}
            }

            if contributed {
                features_used.push(event.canonical_id.clone());
                trigger = Some(event);
            }
        }

        if let Some((stage, via)) = &highest_stage {
            explanations.push(format!("stage {stage} reached via {via} (+{base})"));
        }

        let mut additive = Decimal::ZERO;
        for category in &categories {
            let delta = self.config.category_weights.weight_for(*category);
            additive += delta;
            explanations.push(format!("category {category} ({}) +{delta}", category.description()));
        }

        let insider_buy = !insider_buys.is_empty();
        if insider_buy {
            let delta = self.config.category_weights.weight_for(Category::E);
            additive += delta;
            explanations.push(format!("insider buy +{delta}"));
        }

        let window = Duration::days(i64::from(self.window_days));
        let recent_buys: Vec<_> = insider_buys
            .iter()
            .filter(|(t, _)| *t > as_of - window)
            .cloned()
            .collect();
        let insider_cluster = has_insider_cluster(&recent_buys, window);
        if insider_cluster {
            let delta = self.config.insider_cluster_bonus;
            additive += delta;
            explanations.push(format!(
                "insider cluster (2+ distinct insiders within {}d) +{delta}",
                self.window_days
            ));
        }

        let additive_score = clamp_unit(additive);
        let total_score = clamp_unit(base + additive_score);

        debug!(
            entity = %entity,
            base = %base,
            additive = %additive_score,
            total = %total_score,
            features = features_used.len(),
            "Scored entity"
        );

        ScoreSummary {
            entity: entity.clone(),
            as_of,
            base_score: base,
            additive_score,
            total_score,
            highest_stage: highest_stage.map(|(stage, _)| stage),
            insider_buy,
            insider_cluster,
            features_used,
            explanations,
            trigger: trigger.map(EventPointer::from),
        }
    }
}

fn clamp_unit(v: Decimal) -> Decimal {
    v.max(Decimal::ZERO).min(Decimal::ONE)
}

/// True when two distinct insiders bought within `window` of each other.
/// `buys` must be in time order.
fn has_insider_cluster(buys: &[(DateTime<Utc>, String)], window: Duration) -> bool {
    for (i, (t_i, name_i)) in buys.iter().enumerate() {
        for (t_j, name_j) in &buys[i + 1..] {
            if *t_j - *t_i > window {
                break;
            }
            if name_i != name_j {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tests::{raw, t0};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn engine() -> ScoringEngine {
        ScoringEngine::new(ScoringConfig::default(), 30)
    }

    fn key() -> EntityKey {
        EntityKey::asset(Some("ACME"), "ACME-1")
    }

    fn insider(id: i64, filer: &str, days: i64) -> RawEvent {
        let mut e = raw(id, "insider_buy", days);
        e.asset_id = None;
        e.payload = json!({ "filer_name": filer });
        e
    }

    #[test]
    fn test_base_is_max_stage_not_sum() {
        let history = vec![
            raw(1, "permit_issued", 0),
            raw(2, "spud_reported", 5),
            raw(3, "completion_reported", 10),
        ];
        let s = engine().score(&key(), t0() + Duration::days(20), &history);
        assert_eq!(s.base_score, dec!(0.6));
        assert_eq!(s.highest_stage, Some(ChainStage::Completion));
        assert_eq!(s.additive_score, Decimal::ZERO);
        assert_eq!(s.total_score, dec!(0.6));
        assert_eq!(s.features_used.len(), 3);
    }

    #[test]
    fn test_base_does_not_regress() {
        let history = vec![raw(1, "drill_assay", 0), raw(2, "permit_filed", 5)];
        let s = engine().score(&key(), t0() + Duration::days(10), &history);
        assert_eq!(s.base_score, dec!(0.8));
        assert_eq!(s.highest_stage, Some(ChainStage::Assay));
    }

    #[test]
    fn test_as_of_excludes_future_events() {
        let history = vec![raw(1, "permit_issued", 0), raw(2, "production_reported", 30)];
        let s = engine().score(&key(), t0() + Duration::days(10), &history);
        assert_eq!(s.base_score, dec!(0.2));
        assert_eq!(s.features_used, vec![history[0].canonical_id.clone()]);

        let later = engine().score(&key(), t0() + Duration::days(30), &history);
        assert_eq!(later.base_score, dec!(1.0));
    }

    #[test]
    fn test_bonus_categories_counted_once() {
        let history = vec![
            raw(1, "permit_issued", 0),
            raw(2, "resource_estimate", 1),
            raw(3, "pea_published", 2),
            raw(4, "financing_closed", 3),
            raw(5, "policy_designation", 4),
        ];
        let s = engine().score(&key(), t0() + Duration::days(5), &history);
        // C 0.15 (once) + D 0.15 + F 0.10
        assert_eq!(s.additive_score, dec!(0.40));
        assert_eq!(s.total_score, dec!(0.60));
    }

    #[test]
    fn test_insider_cluster_beats_single_insider() {
        let single = vec![insider(1, "Dana Morgan", 0)];
        let pair = vec![insider(1, "Dana Morgan", 0), insider(2, "Ryan Cole", 14)];
        let as_of = t0() + Duration::days(20);

        let s1 = engine().score(&key(), as_of, &single);
        let s2 = engine().score(&key(), as_of, &pair);
        assert_eq!(s1.additive_score, dec!(0.15));
        assert!(!s1.insider_cluster);
        assert_eq!(s2.additive_score, dec!(0.25));
        assert!(s2.insider_cluster);
        assert!(s2.additive_score > s1.additive_score);
    }

    #[test]
    fn test_cluster_requires_distinct_insiders() {
        let history = vec![insider(1, "Sarah Patel", 0), insider(2, "sarah  patel", 10)];
        let s = engine().score(&key(), t0() + Duration::days(20), &history);
        assert!(s.insider_buy);
        assert!(!s.insider_cluster);
        assert_eq!(s.additive_score, dec!(0.15));
    }

    #[test]
    fn test_cluster_requires_window_proximity() {
        let history = vec![insider(1, "Dana Morgan", 0), insider(2, "Ryan Cole", 45)];
        let s = engine().score(&key(), t0() + Duration::days(50), &history);
        assert!(!s.insider_cluster);
    }

    #[test]
    fn test_stale_cluster_outside_window_ignored() {
        let history = vec![insider(1, "Dana Morgan", 0), insider(2, "Ryan Cole", 5)];
        let s = engine().score(&key(), t0() + Duration::days(400), &history);
        assert!(s.insider_buy);
        assert!(!s.insider_cluster);
        assert_eq!(s.additive_score, dec!(0.15));
    }

    #[test]
    fn test_missing_filer_name_is_skipped_and_explained() {
        let mut bad = insider(1, "x", 0);
        bad.payload = json!({});
        let history = vec![bad, raw(2, "permit_issued", 1)];
        let s = engine().score(&key(), t0() + Duration::days(5), &history);

        assert!(!s.insider_buy);
        assert_eq!(s.base_score, dec!(0.2));
        assert_eq!(s.features_used.len(), 1);
        assert!(s.explanations.iter().any(|e| e.contains("missing filer_name")));
    }

    #[test]
    fn test_empty_event_type_is_skipped() {
        let history = vec![raw(1, "  ", 0), raw(2, "spud_reported", 1)];
        let s = engine().score(&key(), t0() + Duration::days(5), &history);
        assert_eq!(s.base_score, dec!(0.4));
        assert!(s.explanations.iter().any(|e| e.contains("missing event_type")));
    }

    #[test]
    fn test_total_clamped_to_one() {
        let history = vec![
            raw(1, "production_reported", 0),
            raw(2, "feasibility_study", 1),
            raw(3, "offtake_agreement", 2),
        ];
        let s = engine().score(&key(), t0() + Duration::days(5), &history);
        assert_eq!(s.total_score, Decimal::ONE);
        assert_eq!(s.additive_score, dec!(0.30));
    }

    #[test]
    fn test_other_entities_ignored() {
        let mut other = raw(1, "production_reported", 0);
        other.company_id = Some("OTHER".into());
        other.asset_id = Some("OTHER-1".into());
        let s = engine().score(&key(), t0() + Duration::days(5), &[other]);
        assert_eq!(s.total_score, Decimal::ZERO);
        assert!(s.trigger.is_none());
    }

    #[test]
    fn test_trigger_is_latest_contributor() {
        let history = vec![
            raw(3, "insider_sell", 9),
            raw(2, "completion_reported", 5),
            raw(1, "permit_issued", 0),
        ];
        let s = engine().score(&key(), t0() + Duration::days(10), &history);
        let trigger = s.trigger.unwrap();
        assert_eq!(trigger.event_type, "completion_reported");
        assert_eq!(s.features_used, vec![history[2].canonical_id.clone(), history[1].canonical_id.clone()]);
    }

    #[test]
    fn test_custom_weights_flow_through() {
        let mut cfg = ScoringConfig::default();
        cfg.stage_weights.permit = dec!(0.3);
        cfg.category_weights.f = dec!(0.2);
        let engine = ScoringEngine::new(cfg, 30);
        let history = vec![raw(1, "permit_issued", 0), raw(2, "policy_final_rule", 1)];
        let s = engine.score(&key(), t0() + Duration::days(2), &history);
        assert_eq!(s.total_score, dec!(0.5));
    }
}
