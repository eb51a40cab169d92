//! Persistence layer.
//!
//! Defines the `EventStore` trait and provides two implementations:
//! - `SqliteStore`: the production store (sqlx + SQLite)
//! - `MemoryStore`: an in-process store for tests and dry runs
//!
//! The store owns the only atomic primitive the pipeline relies on:
//! insert-if-absent, for both raw events and alerts. Nothing else in the
//! crate keeps mutable state between runs.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{Alert, AppendOutcome, EntityKey, NewRawEvent, RawEvent};

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert `event` unless a row with the same `(source_system, dedup_key)`
    /// exists. Returns the stored row's id either way.
    async fn insert_event_if_absent(&self, event: &NewRawEvent) -> Result<AppendOutcome>;

    /// Events for `entity` with effective time `<= up_to`, in canonical order.
    async fn events_for_entity(&self, entity: &EntityKey, up_to: DateTime<Utc>) -> Result<Vec<RawEvent>>;

    /// Every stored event, in canonical order.
    async fn all_events(&self) -> Result<Vec<RawEvent>>;

    /// Distinct entities that have at least one resolved event.
    async fn entities(&self) -> Result<Vec<EntityKey>>;

    async fn event_count(&self) -> Result<u64>;

    /// Event counts per `source_system` for rows ingested at or after `since`.
    async fn source_counts(&self, since: DateTime<Utc>) -> Result<BTreeMap<String, u64>>;

    /// Persist `alert` unless its `alert_id` exists. Returns true when inserted.
    async fn insert_alert_if_absent(&self, alert: &Alert, created_at: DateTime<Utc>) -> Result<bool>;

    /// Alerts created at or after `since`.
    async fn alerts_since(&self, since: DateTime<Utc>) -> Result<Vec<Alert>>;

    async fn alert_count(&self) -> Result<u64>;
}

/// Collapse distinct `(company_id, asset_id)` pairs into entity keys.
///
/// Each asset becomes one key, attached to the first company it was seen
/// with in sorted order. A company gets its own key only when none of its
/// events are tied to an asset.
pub fn entity_keys_from_pairs<I>(pairs: I) -> Vec<EntityKey>
where
    I: IntoIterator<Item = (Option<String>, Option<String>)>,
{
    let pairs: BTreeSet<(Option<String>, Option<String>)> = pairs.into_iter().collect();

    let mut assets: BTreeMap<String, Option<String>> = BTreeMap::new();
    let mut companies: BTreeSet<String> = BTreeSet::new();
    for (company, asset) in &pairs {
        match (company, asset) {
            (_, Some(asset)) => {
                let slot = assets.entry(asset.clone()).or_insert(None);
                if slot.is_none() {
                    slot.clone_from(company);
                }
            }
            (Some(company), None) => {
                companies.insert(company.clone());
            }
            (None, None) => {}
        }
    }

    let asset_companies: BTreeSet<&String> = assets.values().flatten().collect();
    let mut keys: Vec<EntityKey> = companies
        .iter()
        .filter(|c| !asset_companies.contains(c))
        .map(|c| EntityKey::company(c.clone()))
        .collect();
    keys.extend(
        assets
            .iter()
            .map(|(asset, company)| EntityKey::asset(company.as_deref(), asset.clone())),
    );
    keys.sort();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(c: Option<&str>, a: Option<&str>) -> (Option<String>, Option<String>) {
        (c.map(String::from), a.map(String::from))
    }

    #[test]
    fn test_entity_keys_collapse_company_into_assets() {
        let keys = entity_keys_from_pairs(vec![
            pair(Some("ACME"), Some("ACME-1")),
            pair(Some("ACME"), None),
            pair(None, Some("ACME-1")),
            pair(Some("SOLO"), None),
            pair(None, None),
        ]);
        assert_eq!(
            keys,
            vec![
                EntityKey::asset(Some("ACME"), "ACME-1"),
                EntityKey::company("SOLO"),
            ]
        );
    }

    #[test]
    fn test_entity_keys_unowned_asset() {
        let keys = entity_keys_from_pairs(vec![pair(None, Some("W-9"))]);
        assert_eq!(keys, vec![EntityKey::asset(None, "W-9")]);
    }
}
