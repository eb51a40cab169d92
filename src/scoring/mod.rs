//! Deterministic scoring over raw event history.
//!
//! Nothing in this module reads from storage or keeps state between calls:
//! every result is a pure function of `(entity, as_of, history)`.

pub mod convergence;
pub mod progression;
pub mod taxonomy;

pub use convergence::{ConvergenceEngine, CONVERGENCE_MIN_CATEGORIES};
pub use progression::ScoringEngine;

use chrono::{DateTime, Utc};

use crate::types::{sort_canonical, EntityKey, RawEvent};

/// Events for `entity` whose effective time passes `keep`, in canonical order.
pub(crate) fn entity_history(
    entity: &EntityKey,
    history: &[RawEvent],
    keep: impl Fn(DateTime<Utc>) -> bool,
) -> Vec<RawEvent> {
    let mut events: Vec<RawEvent> = history
        .iter()
        .filter(|e| entity.matches(e) && keep(e.effective_time()))
        .cloned()
        .collect();
    sort_canonical(&mut events);
    events
}
