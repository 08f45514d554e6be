//! Satisfaction scoring from heart and breath rate.
//!
//! Each vital contributes a component score: 100 inside its ideal range,
//! decaying linearly past the ideal boundary and floored at 0. A vital that
//! is missing or outside its acceptable range is left out and the weights are
//! renormalised over what remains. With no usable vital the score falls back
//! to a neutral 50 and is marked invalid.

use crate::config::{SatisfactionConfig, VitalRange};
use serde::{Deserialize, Serialize};

/// Score reported when no vital sign is usable.
pub const FALLBACK_SCORE: f64 = 50.0;

/// Three-way satisfaction classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SatisfactionClass {
    Positive,
    Neutral,
    Negative,
}

impl std::fmt::Display for SatisfactionClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SatisfactionClass::Positive => "positive",
            SatisfactionClass::Neutral => "neutral",
            SatisfactionClass::Negative => "negative",
        };
        write!(f, "{label}")
    }
}

/// Result of scoring one pair of vitals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatisfactionScore {
    /// Combined score (0-100)
    pub score: f64,
    pub class: SatisfactionClass,
    /// Heart component (0-100) if the heart rate was usable
    pub heart_component: Option<f64>,
    /// Breath component (0-100) if the breath rate was usable
    pub breath_component: Option<f64>,
    /// False when the score is the neutral fallback
    pub is_valid: bool,
    /// True when at least one vital was missing or unusable
    pub degraded: bool,
}

/// Pure scorer over a fixed configuration.
#[derive(Debug, Clone)]
pub struct SatisfactionScorer {
    config: SatisfactionConfig,
}

impl Default for SatisfactionScorer {
    fn default() -> Self {
        Self::new(SatisfactionConfig::default())
    }
}

impl SatisfactionScorer {
    pub fn new(config: SatisfactionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SatisfactionConfig {
        &self.config
    }

    /// Score a pair of vitals. Never fails.
    pub fn score(&self, heart_rate: Option<f64>, breath_rate: Option<f64>) -> SatisfactionScore {
        let heart_component = heart_rate.and_then(|hr| component_score(hr, &self.config.heart));
        let breath_component = breath_rate.and_then(|br| component_score(br, &self.config.breath));

        let weighted = [
            heart_component.map(|c| (c, self.config.heart_weight)),
            breath_component.map(|c| (c, self.config.breath_weight)),
        ];
        let (sum, weight) = weighted
            .iter()
            .flatten()
            .fold((0.0, 0.0), |(sum, weight), (c, w)| (sum + c * w, weight + w));

        let degraded = heart_component.is_none() || breath_component.is_none();

        if weight <= 0.0 {
            return SatisfactionScore {
                score: FALLBACK_SCORE,
                class: SatisfactionClass::Neutral,
                heart_component,
                breath_component,
                is_valid: false,
                degraded,
            };
        }

        let score = (sum / weight).clamp(0.0, 100.0);
        SatisfactionScore {
            score,
            class: self.classify(score),
            heart_component,
            breath_component,
            is_valid: true,
            degraded,
        }
    }

    /// Classify a score against the configured thresholds.
    pub fn classify(&self, score: f64) -> SatisfactionClass {
        if score >= self.config.positive_threshold {
            SatisfactionClass::Positive
        } else if score <= self.config.negative_threshold {
            SatisfactionClass::Negative
        } else {
            SatisfactionClass::Neutral
        }
    }
}

/// Component score for one vital, `None` when outside the acceptable range.
fn component_score(value: f64, range: &VitalRange) -> Option<f64> {
    if !value.is_finite() || value < range.acceptable_min || value > range.acceptable_max {
        return None;
    }
    let past_ideal = if value < range.ideal_min {
        range.ideal_min - value
    } else if value > range.ideal_max {
        value - range.ideal_max
    } else {
        0.0
    };
    Some((100.0 * (1.0 - past_ideal / range.falloff)).max(0.0))
}
