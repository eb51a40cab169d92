//! Core engine: ingest → score → converge → alert → rank.

pub mod alerts;
pub mod health;
pub mod ingestor;
pub mod pipeline;
pub mod ranker;

pub use alerts::AlertGenerator;
pub use ingestor::{BatchReport, EventIngestor, SessionError, SessionReport};
pub use pipeline::{CycleReport, Evaluation, Pipeline, SourceSession};
pub use ranker::OpportunityRanker;
