//! In-process event store.
//!
//! Same contract as `SqliteStore`; insert-if-absent is atomic because the
//! existence check and the insert happen under one lock.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{entity_keys_from_pairs, EventStore};
use crate::types::{sort_canonical, Alert, AppendOutcome, EntityKey, NewRawEvent, RawEvent};

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    events: Vec<RawEvent>,
    /// `(source_system, dedup_key)` → index into `events`.
    dedup: HashMap<(String, String), usize>,
    alerts: BTreeMap<String, (Alert, DateTime<Utc>)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn insert_event_if_absent(&self, new: &NewRawEvent) -> Result<AppendOutcome> {
        let mut state = self.lock();

        let key = new
            .dedup_key
            .as_ref()
            .map(|k| (new.event.source_system.clone(), k.clone()));
        if let Some(idx) = key.as_ref().and_then(|k| state.dedup.get(k)) {
            let existing = &state.events[*idx];
            return Ok(AppendOutcome {
                id: existing.id,
                canonical_id: existing.canonical_id.clone(),
                created: false,
            });
        }

        let id = state.events.len() as i64 + 1;
        let ev = &new.event;
        state.events.push(RawEvent {
            id,
            source_system: ev.source_system.clone(),
            source_event_id: ev.source_event_id.clone(),
            event_type: ev.event_type.clone(),
            event_time: ev.event_time,
            ingest_time: new.ingest_time,
            company_id: ev.company_id.clone(),
            asset_id: ev.asset_id.clone(),
            payload: ev.payload.clone(),
            content_hash: new.content_hash.clone(),
            canonical_id: new.canonical_id.clone(),
        });
        if let Some(key) = key {
            let idx = state.events.len() - 1;
            state.dedup.insert(key, idx);
        }

        Ok(AppendOutcome {
            id,
            canonical_id: new.canonical_id.clone(),
            created: true,
        })
    }

    async fn events_for_entity(&self, entity: &EntityKey, up_to: DateTime<Utc>) -> Result<Vec<RawEvent>> {
        let mut events: Vec<RawEvent> = self
            .lock()
            .events
            .iter()
            .filter(|e| entity.matches(e) && e.effective_time() <= up_to)
            .cloned()
            .collect();
        sort_canonical(&mut events);
        Ok(events)
    }

    async fn all_events(&self) -> Result<Vec<RawEvent>> {
        let mut events = self.lock().events.clone();
        sort_canonical(&mut events);
        Ok(events)
    }

    async fn entities(&self) -> Result<Vec<EntityKey>> {
        let pairs: Vec<_> = self
            .lock()
            .events
            .iter()
            .map(|e| (e.company_id.clone(), e.asset_id.clone()))
            .collect();
        Ok(entity_keys_from_pairs(pairs))
    }

    async fn event_count(&self) -> Result<u64> {
        Ok(self.lock().events.len() as u64)
    }

    async fn source_counts(&self, since: DateTime<Utc>) -> Result<BTreeMap<String, u64>> {
        let mut counts = BTreeMap::new();
        for e in self.lock().events.iter().filter(|e| e.ingest_time >= since) {
            *counts.entry(e.source_system.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn insert_alert_if_absent(&self, alert: &Alert, created_at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.lock();
        if state.alerts.contains_key(&alert.alert_id) {
            return Ok(false);
        }
        state
            .alerts
            .insert(alert.alert_id.clone(), (alert.clone(), created_at));
        Ok(true)
    }

    async fn alerts_since(&self, since: DateTime<Utc>) -> Result<Vec<Alert>> {
        let state = self.lock();
        let mut alerts: Vec<(&Alert, &DateTime<Utc>)> = state
            .alerts
            .values()
            .filter(|(_, created)| *created >= since)
            .map(|(a, created)| (a, created))
            .collect();
        alerts.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.alert_id.cmp(&b.0.alert_id)));
        Ok(alerts.into_iter().map(|(a, _)| a.clone()).collect())
    }

    async fn alert_count(&self) -> Result<u64> {
        Ok(self.lock().alerts.len() as u64)
    }
}
