//! Engagement classification over a sliding window of recent samples.
//!
//! Walking back from the newest sample, every reading at or below the
//! movement threshold extends a lingering streak. The first fast reading ends
//! the walk: abrupt movement resets the window entirely.

use crate::config::EngagementConfig;
use crate::ingress::Sample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How engaged a subject is with the shelf.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum EngagementLevel {
    /// Passing by
    #[default]
    None = 0,
    /// Brief low-movement streak
    Initial = 1,
    /// Sustained low movement for at least the minimum duration
    Full = 2,
}

impl EngagementLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_engaged(self) -> bool {
        self == EngagementLevel::Full
    }
}

impl From<EngagementLevel> for u8 {
    fn from(level: EngagementLevel) -> Self {
        level.as_u8()
    }
}

impl TryFrom<u8> for EngagementLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EngagementLevel::None),
            1 => Ok(EngagementLevel::Initial),
            2 => Ok(EngagementLevel::Full),
            other => Err(format!("invalid engagement level {other}")),
        }
    }
}

/// Level plus the length of the lingering streak behind it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Engagement {
    pub level: EngagementLevel,
    pub duration_secs: f64,
}

impl Engagement {
    pub fn none() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct EngagementClassifier {
    config: EngagementConfig,
}

impl Default for EngagementClassifier {
    fn default() -> Self {
        Self::new(EngagementConfig::default())
    }
}

impl EngagementClassifier {
    pub fn new(config: EngagementConfig) -> Self {
        Self { config }
    }

    /// Classify the recent history of one subject.
    ///
    /// Samples with a non-finite or negative speed, or stamped after `now`,
    /// are ignored. Order of `history` does not matter.
    pub fn classify<'a, I>(&self, history: I, now: DateTime<Utc>) -> Engagement
    where
        I: IntoIterator<Item = &'a Sample>,
    {
        let mut valid: Vec<&Sample> = history
            .into_iter()
            .filter(|s| s.move_speed.is_finite() && s.move_speed >= 0.0 && s.timestamp <= now)
            .collect();
        valid.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let streak: Vec<&Sample> = valid
            .into_iter()
            .take_while(|s| s.move_speed <= self.config.movement_threshold)
            .collect();

        if streak.len() < self.config.min_streak {
            return Engagement::none();
        }

        let (Some(newest), Some(oldest)) = (streak.first(), streak.last()) else {
            return Engagement::none();
        };
        let duration_secs = (newest.timestamp - oldest.timestamp).num_milliseconds() as f64 / 1000.0;

        let level = if duration_secs >= self.config.min_duration_secs {
            EngagementLevel::Full
        } else {
            EngagementLevel::Initial
        };

        Engagement {
            level,
            duration_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn at(secs: i64, speed: f64) -> Sample {
        Sample::new("d", 0.0, 0.5, speed, t0() + Duration::seconds(secs))
    }

    #[test]
    fn test_empty_and_single_sample() {
        let classifier = EngagementClassifier::default();
        let empty: Vec<Sample> = Vec::new();
        assert_eq!(classifier.classify(&empty, t0()), Engagement::none());
        assert_eq!(classifier.classify(&[at(0, 1.0)], t0()), Engagement::none());
    }

    #[test]
    fn test_initial_engagement() {
        let classifier = EngagementClassifier::default();
        let history = vec![at(0, 5.0), at(1, 3.0), at(2, 2.0)];
        let result = classifier.classify(&history, t0() + Duration::seconds(2));
        assert_eq!(result.level, EngagementLevel::Initial);
        assert_eq!(result.duration_secs, 2.0);
    }

    #[test]
    fn test_full_engagement_after_min_duration() {
        let classifier = EngagementClassifier::default();
        let history = vec![at(0, 5.0), at(1, 3.0), at(2, 2.0), at(6, 2.0)];
        let result = classifier.classify(&history, t0() + Duration::seconds(6));
        assert_eq!(result.level, EngagementLevel::Full);
        assert_eq!(result.duration_secs, 6.0);
    }

    #[test]
    fn test_fast_sample_breaks_streak() {
        let classifier = EngagementClassifier::default();
        // Unordered input; the fast reading at t=5 cuts the streak to t=6..7.
        let history = vec![at(7, 1.0), at(0, 1.0), at(5, 80.0), at(6, 1.0), at(1, 1.0)];
        let result = classifier.classify(&history, t0() + Duration::seconds(7));
        assert_eq!(result.level, EngagementLevel::Initial);
        assert_eq!(result.duration_secs, 1.0);

        // A fast newest reading means no engagement at all.
        let history = vec![at(0, 1.0), at(6, 1.0), at(7, 90.0)];
        let result = classifier.classify(&history, t0() + Duration::seconds(7));
        assert_eq!(result, Engagement::none());
    }

    #[test]
    fn test_invalid_samples_ignored() {
        let classifier = EngagementClassifier::default();
        let history = vec![at(0, 1.0), at(1, f64::NAN), at(3, 1.0), at(60, 1.0)];
        let result = classifier.classify(&history, t0() + Duration::seconds(3));
        assert_eq!(result.level, EngagementLevel::Initial);
        assert_eq!(result.duration_secs, 3.0);
    }

    #[test]
    fn test_level_serializes_as_number() {
        assert_eq!(serde_json::to_string(&EngagementLevel::Full).unwrap(), "2");
        let level: EngagementLevel = serde_json::from_str("1").unwrap();
        assert_eq!(level, EngagementLevel::Initial);
        assert!(serde_json::from_str::<EngagementLevel>("7").is_err());
        assert!(EngagementLevel::Full > EngagementLevel::Initial);
    }
}
