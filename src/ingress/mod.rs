//! Ingress adapter for the presence analytics agent.
//!
//! Turns loosely-typed sensor payloads (JSON objects, one per reading) into
//! validated samples. Reading the radar's serial protocol is left to the
//! bridge that produces these payloads.

pub mod types;

// Re-export commonly used types
pub use types::{RawSample, Sample, MAX_BREATH_RATE, MAX_HEART_RATE};

use crate::error::ValidationError;
use chrono::{DateTime, Utc};

/// Parse one JSON line into a validated sample.
pub fn parse_line(
    line: &str,
    received_at: DateTime<Utc>,
    default_device_id: &str,
) -> Result<Sample, ValidationError> {
    let raw: RawSample =
        serde_json::from_str(line).map_err(|e| ValidationError::MalformedPayload(e.to_string()))?;
    raw.validate(received_at, default_device_id)
}
