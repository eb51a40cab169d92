//! OGREE: catalyst scoring and alerting for small-cap resource companies
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod clock;
pub mod config;
pub mod engine;
pub mod fetch;
pub mod hashing;
pub mod scoring;
pub mod sources;
pub mod storage;
pub mod types;
