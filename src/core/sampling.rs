//! Adaptive sampling gate.
//!
//! Decides per device whether a reading is worth running through the rest of
//! the pipeline, based on how fast the subject is moving. Fast movement is
//! sampled densely; a subject standing still for a while is sampled rarely.

use crate::config::SamplingConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-device gate state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingState {
    pub current_interval_ms: u64,
    pub last_sample_time: Option<DateTime<Utc>>,
    pub last_move_speed: f64,
    pub consecutive_idle_count: u32,
}

impl SamplingState {
    /// Fresh state starting in the medium band.
    pub fn new(config: &SamplingConfig) -> Self {
        Self {
            current_interval_ms: config.medium_activity_interval_ms,
            last_sample_time: None,
            last_move_speed: 0.0,
            consecutive_idle_count: 0,
        }
    }
}

/// Why the gate decided the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingReason {
    FirstSample,
    IntervalElapsed,
    AbruptChange,
    TooSoon,
}

/// Outcome of one gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingDecision {
    pub should_sample: bool,
    pub next_interval_ms: u64,
    pub reason: SamplingReason,
}

/// Activity-banded rate limiter.
#[derive(Debug, Clone)]
pub struct AdaptiveSampleGate {
    config: SamplingConfig,
}

impl Default for AdaptiveSampleGate {
    fn default() -> Self {
        Self::new(SamplingConfig::default())
    }
}

impl AdaptiveSampleGate {
    pub fn new(config: SamplingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    /// A new state for a device seen for the first time.
    pub fn new_state(&self) -> SamplingState {
        SamplingState::new(&self.config)
    }

    /// Reinitialise a device's state to the medium band.
    pub fn reset(&self, state: &mut SamplingState) {
        *state = SamplingState::new(&self.config);
    }

    /// Evaluate one reading.
    ///
    /// The band and idle streak are updated on every call. `last_sample_time`
    /// and `last_move_speed` only move on a positive decision so elapsed time
    /// is measured from the last accepted sample.
    pub fn should_sample(
        &self,
        now: DateTime<Utc>,
        move_speed: f64,
        state: &mut SamplingState,
    ) -> SamplingDecision {
        let Some(last_sample_time) = state.last_sample_time else {
            state.last_sample_time = Some(now);
            state.last_move_speed = move_speed;
            return SamplingDecision {
                should_sample: true,
                next_interval_ms: state.current_interval_ms,
                reason: SamplingReason::FirstSample,
            };
        };

        let cfg = &self.config;
        if move_speed > cfg.high_activity_threshold {
            state.current_interval_ms = cfg.high_activity_interval_ms;
            state.consecutive_idle_count = 0;
        } else if move_speed > cfg.low_activity_threshold {
            state.current_interval_ms = cfg.medium_activity_interval_ms;
            state.consecutive_idle_count = 0;
        } else {
            state.consecutive_idle_count = state.consecutive_idle_count.saturating_add(1);
            state.current_interval_ms = if state.consecutive_idle_count >= cfg.max_idle_count {
                cfg.idle_interval_ms
            } else {
                cfg.low_activity_interval_ms
            };
        }

        let elapsed_ms = (now - last_sample_time).num_milliseconds();
        let reason = if (move_speed - state.last_move_speed).abs() > cfg.high_activity_threshold {
            SamplingReason::AbruptChange
        } else if elapsed_ms >= state.current_interval_ms as i64 {
            SamplingReason::IntervalElapsed
        } else {
            SamplingReason::TooSoon
        };
        let should_sample = reason != SamplingReason::TooSoon;

        if should_sample {
            state.last_sample_time = Some(now);
            state.last_move_speed = move_speed;
        }

        tracing::debug!(
            move_speed,
            elapsed_ms,
            interval_ms = state.current_interval_ms,
            ?reason,
            "sampling decision"
        );

        SamplingDecision {
            should_sample,
            next_interval_ms: state.current_interval_ms,
            reason,
        }
    }
}
