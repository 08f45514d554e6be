//! Sample types handed from the ingress adapter to the analytics core.
//!
//! Raw payloads are accepted loosely (numbers or numeric strings) and turned
//! into a validated [`Sample`]. Nothing downstream of [`RawSample::validate`]
//! has to deal with missing or non-finite coordinates.

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Heart rates above this (bpm) are treated as sensor noise.
pub const MAX_HEART_RATE: f64 = 300.0;

/// Breath rates above this (rpm) are treated as sensor noise.
pub const MAX_BREATH_RATE: f64 = 100.0;

/// One validated radar reading.
///
/// Positions are metres relative to the sensor, speed is cm/s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub x: f64,
    pub y: f64,
    pub move_speed: f64,
    pub heart_rate: Option<f64>,
    pub breath_rate: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
}

impl Sample {
    /// Build a sample without vitals.
    pub fn new(
        device_id: impl Into<String>,
        x: f64,
        y: f64,
        move_speed: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            x,
            y,
            move_speed,
            heart_rate: None,
            breath_rate: None,
            timestamp,
            device_id: device_id.into(),
        }
    }

    /// Attach vital signs.
    pub fn with_vitals(mut self, heart_rate: Option<f64>, breath_rate: Option<f64>) -> Self {
        self.heart_rate = heart_rate;
        self.breath_rate = breath_rate;
        self
    }

    /// Straight-line distance from the sensor's reference point.
    pub fn distance_from_origin(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Distance between this sample's position and another point.
    pub fn distance_to(&self, (x, y): (f64, f64)) -> f64 {
        (self.x - x).hypot(self.y - y)
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    /// Re-check the invariants of a constructed sample.
    pub fn check(&self) -> Result<(), ValidationError> {
        for (field, value) in [("x", self.x), ("y", self.y), ("move_speed", self.move_speed)] {
            if !value.is_finite() {
                return Err(ValidationError::NonFinite { field });
            }
        }
        if self.move_speed < 0.0 {
            return Err(ValidationError::NegativeSpeed(self.move_speed));
        }
        if self.device_id.trim().is_empty() {
            return Err(ValidationError::EmptyDeviceId);
        }
        Ok(())
    }
}

/// An unvalidated payload as it arrives from the sensor bridge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSample {
    #[serde(default)]
    pub x: Option<Value>,
    #[serde(default)]
    pub y: Option<Value>,
    #[serde(default)]
    pub move_speed: Option<Value>,
    #[serde(default)]
    pub heart_rate: Option<Value>,
    #[serde(default)]
    pub breath_rate: Option<Value>,
    /// RFC 3339 timestamp; the receive time is used when absent
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

impl RawSample {
    /// Validate the payload into a [`Sample`].
    pub fn validate(
        self,
        received_at: DateTime<Utc>,
        default_device_id: &str,
    ) -> Result<Sample, ValidationError> {
        let x = required_number("x", self.x.as_ref())?;
        let y = required_number("y", self.y.as_ref())?;
        let move_speed = required_number("move_speed", self.move_speed.as_ref())?;

        let timestamp = match self.timestamp.as_deref().map(str::trim) {
            Some(ts) if !ts.is_empty() => DateTime::parse_from_rfc3339(ts)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| ValidationError::InvalidTimestamp(format!("{ts}: {e}")))?,
            _ => received_at,
        };

        let device_id = self
            .device_id
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| default_device_id.to_string());

        let sample = Sample {
            x,
            y,
            move_speed,
            heart_rate: optional_vital(self.heart_rate.as_ref(), MAX_HEART_RATE),
            breath_rate: optional_vital(self.breath_rate.as_ref(), MAX_BREATH_RATE),
            timestamp,
            device_id,
        };
        sample.check()?;
        Ok(sample)
    }
}

fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn required_number(field: &'static str, value: Option<&Value>) -> Result<f64, ValidationError> {
    let value = match value {
        None | Some(Value::Null) => return Err(ValidationError::MissingField(field)),
        Some(v) => v,
    };
    let number = parse_number(value).ok_or_else(|| ValidationError::NonNumeric {
        field,
        value: value.to_string(),
    })?;
    if !number.is_finite() {
        return Err(ValidationError::NonFinite { field });
    }
    Ok(number)
}

/// The radar reports 0 when it has no vital reading, so non-positive and
/// absurd values become `None`.
fn optional_vital(value: Option<&Value>, max: f64) -> Option<f64> {
    value
        .and_then(parse_number)
        .filter(|v| v.is_finite() && *v > 0.0 && *v <= max)
}
