//! Ingest statistics.
//!
//! Counters describing what the agent accepted, dropped and persisted, so an
//! operator can see at a glance whether the sensor feed is healthy.

pub mod log;

pub use log::{create_shared_stats, Counter, IngestSnapshot, IngestStats, SharedIngestStats};
