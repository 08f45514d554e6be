//! Presence Analytics Agent - shelf occupancy analytics from radar samples.
//!
//! This library turns a stream of proximity-radar readings (position, speed
//! and optional heart/breath rate) into per-shopper presence sessions with
//! engagement and satisfaction estimates.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     Presence Analytics Agent                     │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌──────────┐   ┌───────────────────────────┐    │
//! │  │ Ingress  │──▶│  Worker  │──▶│      DevicePipeline       │    │
//! │  │ (JSONL)  │   │(per dev.)│   │ gate → smooth → region →  │    │
//! │  └──────────┘   └──────────┘   │ score → session tracker   │    │
//! │                      │         └───────────────────────────┘    │
//! │                      ▼                      │                   │
//! │               ┌────────────┐        ┌──────────────┐            │
//! │               │   Stats    │        │ Persistence  │            │
//! │               │ (counters) │        │    port      │            │
//! │               └────────────┘        └──────────────┘            │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use presence_analytics_agent::{Config, IngestionOrchestrator, Region, Sample};
//! use chrono::Utc;
//!
//! let regions = vec![Region::new(1, "Snacks", (-1.0, 1.0), (0.0, 1.0))];
//! let mut orchestrator = IngestionOrchestrator::new(Config::default(), regions);
//!
//! let sample = Sample::new("RADAR_1", 0.1, 0.5, 3.0, Utc::now());
//! let outcome = orchestrator.process(&sample).expect("valid sample");
//! if let Some(summary) = outcome.summary() {
//!     println!("session {} lasted {:.1}s", summary.session_id, summary.duration_secs);
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod ingress;
pub mod persistence;
pub mod stats;
pub mod worker;

// Re-export key types at crate root for convenience
pub use config::Config;
pub use core::{
    IngestionOrchestrator, ProcessOutcome, ProcessedRecord, Region, SessionEvent, SessionSummary,
};
pub use error::{DispatchError, PersistenceError, PipelineError, ValidationError};
pub use ingress::{RawSample, Sample};
pub use persistence::{JsonLinesStore, MemoryStore, PersistencePort, RetryPolicy, RetryingStore};
pub use stats::{IngestStats, SharedIngestStats};
pub use worker::{IngestDispatcher, OutcomeSink};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
