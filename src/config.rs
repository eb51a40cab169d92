//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! section has defaults, so a minimal file only needs the sources it wants
//! to poll. Secrets (source API keys) are referenced by env-var name and
//! resolved at runtime.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;

use crate::types::{Category, ChainStage};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub scoring: ScoringConfig,
    pub fetch: FetchConfig,
    pub ingest: IngestConfig,
    pub storage: StorageConfig,
    pub sources: Vec<SourceConfig>,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    /// Convergence lookback window (also bounds insider clusters).
    pub window_days: u32,
    /// Minimum total score for TIER1.
    pub tier_threshold: Decimal,
    /// Width of the score quantization step used in alert identity.
    pub score_bucket_size: Decimal,
    /// Scores below this only alert when converging or high-signal.
    pub min_alert_score: Decimal,
    /// Event types that are always TIER1.
    pub high_signal_types: BTreeSet<String>,
    /// How far back the ranker looks for alerts.
    pub alert_lookback_hours: i64,
    pub top_n: usize,
    pub max_pages_per_source: usize,
    /// Re-run the cycle on this interval; one-shot when unset.
    pub run_interval_secs: Option<u64>,
    /// Optional JSON snapshot attached to alerts as regime context.
    pub regime_context_path: Option<String>,
    /// Optional JSONL file of pre-normalized events to replay before fetching.
    pub replay_path: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            tier_threshold: dec!(0.6),
            score_bucket_size: dec!(0.1),
            min_alert_score: dec!(0.3),
            high_signal_types: [
                "permit_issued",
                "spud_reported",
                "completion_reported",
                "drill_assay",
                "financing_closed",
                "offtake_agreement",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            alert_lookback_hours: 24,
            top_n: 15,
            max_pages_per_source: 10,
            run_interval_secs: None,
            regime_context_path: None,
            replay_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring weights
// ---------------------------------------------------------------------------

/// Base progression value for each chain stage.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StageWeights {
    pub permit: Decimal,
    pub spud: Decimal,
    pub completion: Decimal,
    pub assay: Decimal,
    pub production: Decimal,
}

impl Default for StageWeights {
    fn default() -> Self {
        Self {
            permit: dec!(0.2),
            spud: dec!(0.4),
            completion: dec!(0.6),
            assay: dec!(0.8),
            production: dec!(1.0),
        }
    }
}

impl StageWeights {
    pub fn weight_for(&self, stage: ChainStage) -> Decimal {
        match stage {
            ChainStage::Permit => self.permit,
            ChainStage::Spud => self.spud,
            ChainStage::Completion => self.completion,
            ChainStage::Assay => self.assay,
            ChainStage::Production => self.production,
        }
    }
}

/// Additive delta per signal category. A and B feed the base score through
/// stage weights, so their defaults are zero.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CategoryWeights {
    #[serde(rename = "A")]
    pub a: Decimal,
    #[serde(rename = "B")]
    pub b: Decimal,
    #[serde(rename = "C")]
    pub c: Decimal,
    #[serde(rename = "D")]
    pub d: Decimal,
    #[serde(rename = "E")]
    pub e: Decimal,
    #[serde(rename = "F")]
    pub f: Decimal,
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            a: Decimal::ZERO,
            b: Decimal::ZERO,
            c: dec!(0.15),
            d: dec!(0.15),
            e: dec!(0.15),
            f: dec!(0.10),
        }
    }
}

impl CategoryWeights {
    pub fn weight_for(&self, category: Category) -> Decimal {
        match category {
            Category::A => self.a,
            Category::B => self.b,
            Category::C => self.c,
            Category::D => self.d,
            Category::E => self.e,
            Category::F => self.f,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    pub stage_weights: StageWeights,
    pub category_weights: CategoryWeights,
    /// Extra boost when two or more distinct insiders buy within the window.
    pub insider_cluster_bonus: Decimal,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            stage_weights: StageWeights::default(),
            category_weights: CategoryWeights::default(),
            insider_cluster_bonus: dec!(0.10),
        }
    }
}

// ---------------------------------------------------------------------------
// Fetch safety
// ---------------------------------------------------------------------------

/// Raw fetch-safety knobs, validated by `RetryPolicy::from_config`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    pub request_delay_s: f64,
    pub max_retries: i64,
    pub backoff_base_s: f64,
    pub timeout_s: f64,
    /// Fraction of each backoff added as random jitter (0 disables).
    pub jitter_ratio: f64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_delay_s: 0.5,
            max_retries: 3,
            backoff_base_s: 1.0,
            timeout_s: 30.0,
            jitter_ratio: 0.0,
            user_agent: "OGREE/0.1.0 (catalyst-engine)".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Ingest / storage / sources
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    /// Deduplicate events without a `source_event_id` by content digest.
    pub content_fallback_dedup: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            content_fallback_dedup: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://ogree.db".to_string(),
        }
    }
}

/// A paginated JSON feed polled through the `JsonFeedAdapter`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SourceConfig {
    /// Recorded as `source_system` on every event.
    pub name: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// JSON pointer to the record array in a page body.
    #[serde(default = "default_records_pointer")]
    pub records_pointer: String,
    /// JSON pointer to the next-page cursor.
    #[serde(default = "default_next_cursor_pointer")]
    pub next_cursor_pointer: String,
    /// Query parameter the cursor is sent back in.
    #[serde(default = "default_cursor_param")]
    pub cursor_param: String,
    /// Env var holding a bearer token, if the feed needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_records_pointer() -> String {
    "/events".to_string()
}

fn default_next_cursor_pointer() -> String {
    "/next_cursor".to_string()
}

fn default_cursor_param() -> String {
    "cursor".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Sanity-check scoring and pipeline values. Fetch values are checked
    /// separately by `RetryPolicy::from_config`.
    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        anyhow::ensure!(p.window_days > 0, "pipeline.window_days must be > 0");
        anyhow::ensure!(
            p.score_bucket_size > Decimal::ZERO,
            "pipeline.score_bucket_size must be > 0"
        );
        anyhow::ensure!(p.top_n > 0, "pipeline.top_n must be > 0");
        anyhow::ensure!(
            p.max_pages_per_source > 0,
            "pipeline.max_pages_per_source must be > 0"
        );
        anyhow::ensure!(
            p.alert_lookback_hours > 0,
            "pipeline.alert_lookback_hours must be > 0"
        );

        let unit = |name: &str, v: Decimal| -> Result<()> {
            anyhow::ensure!(
                v >= Decimal::ZERO && v <= Decimal::ONE,
                "{name} must be within [0, 1], got {v}"
            );
            Ok(())
        };
        unit("pipeline.tier_threshold", p.tier_threshold)?;
        unit("pipeline.min_alert_score", p.min_alert_score)?;
        for stage in ChainStage::ALL {
            unit(
                &format!("scoring.stage_weights.{stage}"),
                self.scoring.stage_weights.weight_for(*stage),
            )?;
        }
        for cat in Category::ALL {
            unit(
                &format!("scoring.category_weights.{cat}"),
                self.scoring.category_weights.weight_for(*cat),
            )?;
        }
        unit("scoring.insider_cluster_bonus", self.scoring.insider_cluster_bonus)?;

        let mut names = BTreeSet::new();
        for s in &self.sources {
            anyhow::ensure!(!s.name.trim().is_empty(), "source name must not be empty");
            anyhow::ensure!(names.insert(s.name.as_str()), "duplicate source name: {}", s.name);
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
