//! Configuration for the presence analytics agent.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Adaptive sampling bands
    pub sampling: SamplingConfig,

    /// Presence/absence detection and session bookkeeping
    pub presence: PresenceConfig,

    /// Low-movement engagement window
    pub engagement: EngagementConfig,

    /// Vital-sign satisfaction scoring
    pub satisfaction: SatisfactionConfig,

    /// Region lookup
    pub spatial: SpatialConfig,

    /// Vital-sign smoothing and anomaly flags
    pub smoothing: SmoothingConfig,

    /// Interaction depth bands
    pub behavior: BehaviorConfig,

    /// Per-device worker queues
    pub worker: WorkerConfig,

    /// Backoff for persistence retries
    pub retry: RetryConfig,

    /// Device id assigned to samples that arrive without one
    pub default_device_id: String,

    /// Path for exported records and session summaries
    pub export_path: PathBuf,

    /// Path for storing stats and region definitions
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("presence-agent");

        Self {
            sampling: SamplingConfig::default(),
            presence: PresenceConfig::default(),
            engagement: EngagementConfig::default(),
            satisfaction: SatisfactionConfig::default(),
            spatial: SpatialConfig::default(),
            smoothing: SmoothingConfig::default(),
            behavior: BehaviorConfig::default(),
            worker: WorkerConfig::default(),
            retry: RetryConfig::default(),
            default_device_id: "RADAR_1".to_string(),
            export_path: data_dir.join("exports"),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit path, falling back to defaults
    /// when the file does not exist.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
            let config: Config =
                serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to an explicit path.
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("presence-agent")
            .join("config.json")
    }

    /// Path of the persisted ingest counters.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }

    /// Default location of the region definitions.
    pub fn regions_path(&self) -> PathBuf {
        self.data_path.join("regions.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path).map_err(|e| ConfigError::Io(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }

    /// Reject threshold combinations the state machines cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.sampling.low_activity_threshold >= self.sampling.high_activity_threshold {
            return invalid("sampling.low_activity_threshold must be below high_activity_threshold");
        }
        if self.presence.absence_threshold_m <= self.presence.presence_threshold_m {
            return invalid("presence.absence_threshold_m must exceed presence_threshold_m");
        }
        if self.presence.confirmations == 0 {
            return invalid("presence.confirmations must be at least 1");
        }
        if self.presence.history_limit == 0 || self.worker.device_history_limit == 0 {
            return invalid("history limits must be at least 1");
        }
        if self.engagement.min_streak == 0 {
            return invalid("engagement.min_streak must be at least 1");
        }
        if self.smoothing.window == 0 {
            return invalid("smoothing.window must be at least 1");
        }
        if self.worker.queue_capacity == 0 {
            return invalid("worker.queue_capacity must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if self.satisfaction.heart_weight + self.satisfaction.breath_weight <= 0.0 {
            return invalid("satisfaction weights must sum to a positive value");
        }
        if self.satisfaction.negative_threshold >= self.satisfaction.positive_threshold {
            return invalid("satisfaction.negative_threshold must be below positive_threshold");
        }
        for (name, range) in [
            ("heart", &self.satisfaction.heart),
            ("breath", &self.satisfaction.breath),
        ] {
            if !range.is_consistent() {
                return Err(ConfigError::Invalid(format!(
                    "satisfaction.{name}: ideal range must lie inside the acceptable range"
                )));
            }
        }
        Ok(())
    }
}

/// Activity bands for the adaptive sample gate (speeds in cm/s).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub high_activity_threshold: f64,
    pub low_activity_threshold: f64,
    pub high_activity_interval_ms: u64,
    pub medium_activity_interval_ms: u64,
    pub low_activity_interval_ms: u64,
    pub idle_interval_ms: u64,
    /// Consecutive low-activity samples before dropping to the idle interval
    pub max_idle_count: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            high_activity_threshold: 30.0,
            low_activity_threshold: 10.0,
            high_activity_interval_ms: 200,
            medium_activity_interval_ms: 500,
            low_activity_interval_ms: 1000,
            idle_interval_ms: 2000,
            max_idle_count: 5,
        }
    }
}

/// Session detection thresholds (distances in metres from the sensor).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub presence_threshold_m: f64,
    pub absence_threshold_m: f64,
    /// Sessions shorter than this are discarded as noise
    pub min_session_secs: f64,
    /// Maximum jump between consecutive positions of the same subject
    pub match_distance_m: f64,
    /// Consecutive qualifying samples required before a session starts
    pub confirmations: u32,
    /// A session with no sample for this long is closed by the sweep
    pub idle_grace_secs: f64,
    /// Hard upper bound on a session's lifetime
    pub max_session_lifetime_secs: f64,
    /// Samples kept per session for the engagement window
    pub history_limit: usize,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            presence_threshold_m: 2.0,
            absence_threshold_m: 3.0,
            min_session_secs: 2.0,
            match_distance_m: 1.0,
            confirmations: 2,
            idle_grace_secs: 5.0,
            max_session_lifetime_secs: 1800.0,
            history_limit: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementConfig {
    /// Speeds at or below this (cm/s) count as lingering
    pub movement_threshold: f64,
    pub min_streak: usize,
    pub min_duration_secs: f64,
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            movement_threshold: 20.0,
            min_streak: 2,
            min_duration_secs: 5.0,
        }
    }
}

/// Ideal and acceptable bounds for one vital sign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalRange {
    pub ideal_min: f64,
    pub ideal_max: f64,
    pub acceptable_min: f64,
    pub acceptable_max: f64,
    /// Distance past the ideal boundary at which the component reaches zero
    pub falloff: f64,
}

impl VitalRange {
    fn is_consistent(&self) -> bool {
        self.acceptable_min <= self.ideal_min
            && self.ideal_min <= self.ideal_max
            && self.ideal_max <= self.acceptable_max
            && self.falloff > 0.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SatisfactionConfig {
    pub heart: VitalRange,
    pub breath: VitalRange,
    pub heart_weight: f64,
    pub breath_weight: f64,
    pub positive_threshold: f64,
    pub negative_threshold: f64,
}

impl Default for SatisfactionConfig {
    fn default() -> Self {
        Self {
            heart: VitalRange {
                ideal_min: 65.0,
                ideal_max: 75.0,
                acceptable_min: 60.0,
                acceptable_max: 100.0,
                falloff: 40.0,
            },
            breath: VitalRange {
                ideal_min: 12.0,
                ideal_max: 16.0,
                acceptable_min: 12.0,
                acceptable_max: 20.0,
                falloff: 8.0,
            },
            heart_weight: 0.6,
            breath_weight: 0.4,
            positive_threshold: 70.0,
            negative_threshold: 40.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// Tolerance added to every region bound (metres)
    pub margin_m: f64,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self { margin_m: 0.05 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub enabled: bool,
    pub window: usize,
    /// Readings further than this many standard deviations from the window
    /// mean are flagged
    pub anomaly_sigma: f64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: 5,
            anomaly_sigma: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Base speed band (cm/s); depth bands are multiples of it
    pub hesitation_speed: f64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            hesitation_speed: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Bounded queue size per device
    pub queue_capacity: usize,
    /// How often a worker sweeps idle sessions
    #[serde(with = "duration_millis")]
    pub sweep_interval: Duration,
    /// Recent samples kept per device for engagement outside a session
    pub device_history_limit: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            sweep_interval: Duration::from_secs(1),
            device_history_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 8000,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration as milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.presence.presence_threshold_m, 2.0);
        assert_eq!(config.presence.absence_threshold_m, 3.0);
        assert_eq!(config.sampling.idle_interval_ms, 2000);
        assert_eq!(config.worker.sweep_interval, Duration::from_secs(1));
        assert_eq!(config.default_device_id, "RADAR_1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{ "presence": { "presence_threshold_m": 1.5 }, "worker": { "sweep_interval": 250 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.presence.presence_threshold_m, 1.5);
        assert_eq!(config.presence.absence_threshold_m, 3.0);
        assert_eq!(config.worker.sweep_interval, Duration::from_millis(250));
        assert_eq!(config.sampling.high_activity_threshold, 30.0);
    }

    #[test]
    fn test_validate_rejects_inverted_hysteresis() {
        let mut config = Config::default();
        config.presence.absence_threshold_m = 1.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_ideal_outside_acceptable() {
        let mut config = Config::default();
        config.satisfaction.heart.ideal_max = 120.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_save_and_load_roundtrip_file() {
        let dir = std::env::temp_dir().join(format!("presence-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");

        let mut config = Config::default();
        config.default_device_id = "RADAR_7".to_string();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.default_device_id, "RADAR_7");

        let _ = std::fs::remove_dir_all(dir);
    }
}
