//! Analytics core for the presence agent.
//!
//! This module contains:
//! - Region lookup and the adaptive sampling gate
//! - Satisfaction scoring, vitals smoothing and interaction depth
//! - Engagement classification and the presence session tracker
//! - The orchestrator composing all of the above per sample

pub mod behavior;
pub mod engagement;
pub mod pipeline;
pub mod sampling;
pub mod satisfaction;
pub mod session;
pub mod smoothing;
pub mod spatial;

// Re-export commonly used types
pub use behavior::{InteractionDepth, InterestLevel};
pub use engagement::{Engagement, EngagementClassifier, EngagementLevel};
pub use pipeline::{DevicePipeline, IngestionOrchestrator, ProcessOutcome, ProcessedRecord, SharedStages};
pub use sampling::{AdaptiveSampleGate, SamplingDecision, SamplingReason, SamplingState};
pub use satisfaction::{SatisfactionClass, SatisfactionScore, SatisfactionScorer, FALLBACK_SCORE};
pub use session::{
    EndReason, Observation, PresenceSessionTracker, SessionEvent, SessionState, SessionSummary,
};
pub use smoothing::{SmoothedVitals, VitalsSmoother};
pub use spatial::{Region, RegionMatch, SpatialIndex};
