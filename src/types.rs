//! Shared types for the OGREE catalyst engine.
//!
//! These types form the data model used across all modules. Raw events are
//! the only authoritative record; every other type here is a view derived
//! from event history and can be recomputed at any time.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

// ---------------------------------------------------------------------------
// Signal taxonomy
// ---------------------------------------------------------------------------

/// Independent signal categories used for convergence detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Permits, leases and claims.
    A,
    /// Drill results, assays and well completions.
    B,
    /// Resource estimates and economic studies.
    C,
    /// Financing, offtake and deals.
    D,
    /// Insider buying and institutional accumulation.
    E,
    /// Policy or macro tailwind.
    F,
}

impl Category {
    pub const ALL: &'static [Category] = &[
        Category::A,
        Category::B,
        Category::C,
        Category::D,
        Category::E,
        Category::F,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Category::A => "A",
            Category::B => "B",
            Category::C => "C",
            Category::D => "D",
            Category::E => "E",
            Category::F => "F",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Category::A => "permits/claims",
            Category::B => "drill/results",
            Category::C => "resource/study",
            Category::D => "financing/deals",
            Category::E => "insider/institutional",
            Category::F => "policy/macro",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl std::str::FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "A" => Ok(Category::A),
            "B" => Ok(Category::B),
            "C" => Ok(Category::C),
            "D" => Ok(Category::D),
            "E" => Ok(Category::E),
            "F" => Ok(Category::F),
            other => anyhow::bail!("Unknown signal category: {other}"),
        }
    }
}

/// Stages of the rights → activity → results chain, in progression order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStage {
    Permit,
    Spud,
    Completion,
    Assay,
    Production,
}

impl ChainStage {
    pub const ALL: &'static [ChainStage] = &[
        ChainStage::Permit,
        ChainStage::Spud,
        ChainStage::Completion,
        ChainStage::Assay,
        ChainStage::Production,
    ];
}

impl fmt::Display for ChainStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainStage::Permit => write!(f, "permit"),
            ChainStage::Spud => write!(f, "spud"),
            ChainStage::Completion => write!(f, "completion"),
            ChainStage::Assay => write!(f, "assay"),
            ChainStage::Production => write!(f, "production"),
        }
    }
}

/// Alert priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    /// High signal, review first.
    Tier1,
    /// Watchlist.
    Tier2,
}

impl Tier {
    /// Sort rank: lower is more important.
    pub fn priority(&self) -> u8 {
        match self {
            Tier::Tier1 => 0,
            Tier::Tier2 => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Tier1 => "TIER1",
            Tier::Tier2 => "TIER2",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "TIER1" => Ok(Tier::Tier1),
            "TIER2" => Ok(Tier::Tier2),
            other => anyhow::bail!("Unknown tier: {other}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Identifies the company or asset a score is computed for.
///
/// An asset key with a known parent company also picks up company-level
/// events (those with no `asset_id`), so an insider buy filed against the
/// company counts toward each of its assets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub company_id: Option<String>,
    pub asset_id: Option<String>,
}

impl EntityKey {
    pub fn company(company_id: impl Into<String>) -> Self {
        Self {
            company_id: Some(company_id.into()),
            asset_id: None,
        }
    }

    pub fn asset(company_id: Option<&str>, asset_id: impl Into<String>) -> Self {
        Self {
            company_id: company_id.map(str::to_string),
            asset_id: Some(asset_id.into()),
        }
    }

    /// Whether an event belongs to this entity's history.
    pub fn matches(&self, event: &RawEvent) -> bool {
        match &self.asset_id {
            Some(asset) => {
                event.asset_id.as_deref() == Some(asset.as_str())
                    || (event.asset_id.is_none()
                        && self.company_id.is_some()
                        && event.company_id == self.company_id)
            }
            None => self.company_id.is_some() && event.company_id == self.company_id,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.company_id, &self.asset_id) {
            (Some(c), Some(a)) => write!(f, "asset={a} company={c}"),
            (None, Some(a)) => write!(f, "asset={a}"),
            (Some(c), None) => write!(f, "company={c}"),
            (None, None) => write!(f, "unresolved"),
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A normalized event produced by a source adapter, not yet stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEvent {
    pub source_system: String,
    #[serde(default)]
    pub source_event_id: Option<String>,
    pub event_type: String,
    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub company_id: Option<String>,
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default = "empty_payload")]
    pub payload: serde_json::Value,
}

fn empty_payload() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Row handed to the store for insert-if-absent.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRawEvent {
    pub event: SourceEvent,
    pub ingest_time: DateTime<Utc>,
    pub content_hash: String,
    pub canonical_id: String,
    /// Uniqueness key within `source_system`; `None` disables deduplication.
    pub dedup_key: Option<String>,
}

/// A stored, immutable event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: i64,
    pub source_system: String,
    pub source_event_id: Option<String>,
    pub event_type: String,
    pub event_time: Option<DateTime<Utc>>,
    pub ingest_time: DateTime<Utc>,
    pub company_id: Option<String>,
    pub asset_id: Option<String>,
    pub payload: serde_json::Value,
    pub content_hash: String,
    pub canonical_id: String,
}

impl RawEvent {
    /// Time used for windows and ordering: `event_time`, falling back to ingest.
    pub fn effective_time(&self) -> DateTime<Utc> {
        self.event_time.unwrap_or(self.ingest_time)
    }

    /// Canonical consumption order: effective time, then ingest time, then id.
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.effective_time()
            .cmp(&other.effective_time())
            .then_with(|| self.ingest_time.cmp(&other.ingest_time))
            .then_with(|| self.canonical_id.cmp(&other.canonical_id))
    }

    /// String field from the payload, trimmed; empty strings count as missing.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Sort a slice of events into canonical consumption order.
pub fn sort_canonical(events: &mut [RawEvent]) {
    events.sort_by(|a, b| a.canonical_cmp(b));
}

impl fmt::Display for RawEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} @ {}",
            self.source_system,
            self.event_type,
            self.canonical_id,
            self.effective_time().format("%Y-%m-%d %H:%M UTC"),
        )
    }
}

/// Result of an idempotent append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    pub id: i64,
    pub canonical_id: String,
    /// False when the event already existed.
    pub created: bool,
}

// ---------------------------------------------------------------------------
// Derived views
// ---------------------------------------------------------------------------

/// Pointer to the event that anchors a score (the latest contributor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPointer {
    pub canonical_id: String,
    pub event_type: String,
    pub event_time: Option<DateTime<Utc>>,
    pub ingest_time: DateTime<Utc>,
    pub company_id: Option<String>,
    pub asset_id: Option<String>,
}

impl From<&RawEvent> for EventPointer {
    fn from(e: &RawEvent) -> Self {
        Self {
            canonical_id: e.canonical_id.clone(),
            event_type: e.event_type.clone(),
            event_time: e.event_time,
            ingest_time: e.ingest_time,
            company_id: e.company_id.clone(),
            asset_id: e.asset_id.clone(),
        }
    }
}

/// Chain-progression score for one entity as of a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub entity: EntityKey,
    pub as_of: DateTime<Utc>,
    pub base_score: Decimal,
    pub additive_score: Decimal,
    pub total_score: Decimal,
    pub highest_stage: Option<ChainStage>,
    pub insider_buy: bool,
    pub insider_cluster: bool,
    /// Canonical ids of contributing events, in canonical order.
    pub features_used: Vec<String>,
    pub explanations: Vec<String>,
    pub trigger: Option<EventPointer>,
}

impl fmt::Display for ScoreSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} total={} (base={} + additive={}, {} features)",
            self.entity,
            self.total_score,
            self.base_score,
            self.additive_score,
            self.features_used.len(),
        )
    }
}

/// Cross-category convergence within a lookback window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceResult {
    pub entity: EntityKey,
    pub window_days: u32,
    pub as_of: DateTime<Utc>,
    /// Sorted, distinct.
    pub categories_present: Vec<Category>,
    pub convergence_score: Decimal,
    pub is_converging: bool,
    pub contributing_events: Vec<String>,
}

impl ConvergenceResult {
    pub fn category_count(&self) -> usize {
        self.categories_present.len()
    }

    pub fn labels(&self) -> String {
        self.categories_present
            .iter()
            .map(Category::label)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A persisted alert for human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub tier: Tier,
    pub event_type: String,
    pub event_time: Option<DateTime<Utc>>,
    pub ingest_time: DateTime<Utc>,
    pub company_id: Option<String>,
    pub asset_id: Option<String>,
    pub canonical_doc_id: String,
    pub score_summary: ScoreSummary,
    pub convergence_categories: Vec<Category>,
    pub summary: String,
    pub details: serde_json::Value,
    pub regime_context: Option<serde_json::Value>,
}

impl Alert {
    pub fn total_score(&self) -> Decimal {
        self.score_summary.total_score
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.summary, self.alert_id)
    }
}

/// A ranked, non-persistent projection of an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub rank: usize,
    pub score: Decimal,
    pub tier: Tier,
    pub company_id: Option<String>,
    pub asset_id: Option<String>,
    pub event_type: String,
    pub event_time: Option<DateTime<Utc>>,
    pub canonical_doc_id: String,
    pub alert_id: String,
    pub summary: String,
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>3} | {:<5} | {} | {}",
            self.rank,
            self.score.round_dp(2),
            self.tier,
            self.summary,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
