//! Multi-category convergence detection.
//!
//! An entity converges when independent kinds of evidence (permits, drilling,
//! studies, financing, insider buying, policy) land inside one trailing window.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeSet;

use super::taxonomy;
use crate::types::{Category, ConvergenceResult, EntityKey, RawEvent};

/// Distinct categories needed before an entity counts as converging.
pub const CONVERGENCE_MIN_CATEGORIES: usize = 3;

/// Counts distinct signal categories inside a trailing window `(as_of - N days, as_of]`.
pub struct ConvergenceEngine {
    window_days: u32,
}

impl ConvergenceEngine {
    pub fn new(window_days: u32) -> Self {
        Self { window_days }
    }

    pub fn convergence(&self, entity: &EntityKey, as_of: DateTime<Utc>, history: &[RawEvent]) -> ConvergenceResult {
        self.convergence_with_window(entity, as_of, history, self.window_days)
    }

    pub fn convergence_with_window(
        &self,
        entity: &EntityKey,
        as_of: DateTime<Utc>,
        history: &[RawEvent],
        window_days: u32,
    ) -> ConvergenceResult {
        let start = as_of - Duration::days(i64::from(window_days));
        let events = super::entity_history(entity, history, |t| t > start && t <= as_of);

        let mut categories = BTreeSet::new();
        let mut contributing_events = Vec::new();
        for event in &events {
            if let Some(category) = taxonomy::category_for(&event.event_type) {
                categories.insert(category);
                contributing_events.push(event.canonical_id.clone());
            }
        }

        let categories_present: Vec<Category> = categories.into_iter().collect();
        let n = categories_present.len();
        let convergence_score = Decimal::from(n as u64) / Decimal::from(Category::ALL.len() as u64);

        ConvergenceResult {
            entity: entity.clone(),
            window_days,
            as_of,
            categories_present,
            convergence_score,
            is_converging: n >= CONVERGENCE_MIN_CATEGORIES,
            contributing_events,
        }
    }
}
