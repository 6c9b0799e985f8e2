use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

// ============================================================
// Ingest Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Max entries per (entity, metric type) sliding window.
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
    /// Events older than this are rejected as a data-quality error.
    #[serde(default = "default_max_event_age_secs")]
    pub max_event_age_secs: u64,
    /// Events further in the future than this are rejected.
    #[serde(default = "default_max_future_skew_secs")]
    pub max_future_skew_secs: u64,
    /// Per-entity capacity of the duplicate transaction-id window.
    #[serde(default = "default_recent_id_capacity")]
    pub recent_id_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            window_capacity: default_window_capacity(),
            max_event_age_secs: default_max_event_age_secs(),
            max_future_skew_secs: default_max_future_skew_secs(),
            recent_id_capacity: default_recent_id_capacity(),
        }
    }
}

fn default_window_capacity() -> usize {
    200
}

fn default_max_event_age_secs() -> u64 {
    30 * 24 * 3600
}

fn default_max_future_skew_secs() -> u64 {
    300
}

fn default_recent_id_capacity() -> usize {
    512
}

// ============================================================
// Detection Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct DetectionConfig {
    /// Standard deviations beyond which an amount is anomalous.
    #[serde(default = "default_z_score_threshold")]
    pub z_score_threshold: f64,
    /// Minimum window entries before the frequency detector fires.
    #[serde(default = "default_min_data_points")]
    pub min_data_points: usize,
    /// Minimum anomaly score that produces an alert.
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,
    /// Recent-vs-historical rate ratio beyond which frequency fires.
    #[serde(default = "default_frequency_ratio")]
    pub frequency_ratio: f64,
    /// Observed-vs-baseline velocity ratio beyond which velocity fires.
    #[serde(default = "default_velocity_ratio")]
    pub velocity_ratio: f64,
    /// Samples the velocity detector looks back over.
    #[serde(default = "default_velocity_samples")]
    pub velocity_samples: usize,
    /// Moving-average window recorded on statistical thresholds.
    #[serde(default = "default_moving_average_window")]
    pub moving_average_window: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            z_score_threshold: default_z_score_threshold(),
            min_data_points: default_min_data_points(),
            alert_threshold: default_alert_threshold(),
            frequency_ratio: default_frequency_ratio(),
            velocity_ratio: default_velocity_ratio(),
            velocity_samples: default_velocity_samples(),
            moving_average_window: default_moving_average_window(),
        }
    }
}

fn default_z_score_threshold() -> f64 {
    3.0
}

fn default_min_data_points() -> usize {
    10
}

fn default_alert_threshold() -> f64 {
    0.7
}

fn default_frequency_ratio() -> f64 {
    3.0
}

fn default_velocity_ratio() -> f64 {
    5.0
}

fn default_velocity_samples() -> usize {
    10
}

fn default_moving_average_window() -> usize {
    100
}

// ============================================================
// Alert Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct AlertConfig {
    /// Minimum seconds between two alerts of the same type for one entity.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Alerts older than this many days are deleted.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_retention_days() -> u32 {
    30
}

impl AlertConfig {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_secs as i64)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days as i64)
    }
}

// ============================================================
// Lifecycle Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct LifecycleConfig {
    #[serde(default = "default_recalibrate_secs")]
    pub recalibrate_secs: u64,
    #[serde(default = "default_retrain_secs")]
    pub retrain_secs: u64,
    #[serde(default = "default_expire_secs")]
    pub expire_secs: u64,
    #[serde(default = "default_checkpoint_secs")]
    pub checkpoint_secs: u64,
    /// Days of history sampled for recalibration and retraining.
    #[serde(default = "default_sample_window_days")]
    pub sample_window_days: u32,
    /// Cap on samples pulled from the store per job run.
    #[serde(default = "default_max_sample_size")]
    pub max_sample_size: usize,
    /// Below this, recalibration keeps the previous threshold.
    #[serde(default = "default_min_calibration_samples")]
    pub min_calibration_samples: usize,
    /// Below this, retraining keeps the previous model.
    #[serde(default = "default_min_training_samples")]
    pub min_training_samples: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            recalibrate_secs: default_recalibrate_secs(),
            retrain_secs: default_retrain_secs(),
            expire_secs: default_expire_secs(),
            checkpoint_secs: default_checkpoint_secs(),
            sample_window_days: default_sample_window_days(),
            max_sample_size: default_max_sample_size(),
            min_calibration_samples: default_min_calibration_samples(),
            min_training_samples: default_min_training_samples(),
        }
    }
}

fn default_recalibrate_secs() -> u64 {
    3600
}

fn default_retrain_secs() -> u64 {
    24 * 3600
}

fn default_expire_secs() -> u64 {
    24 * 3600
}

fn default_checkpoint_secs() -> u64 {
    6 * 3600
}

fn default_sample_window_days() -> u32 {
    7
}

fn default_max_sample_size() -> usize {
    10_000
}

fn default_min_calibration_samples() -> usize {
    30
}

fn default_min_training_samples() -> usize {
    50
}

// ============================================================
// Storage Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Bound on any single durable-store call.
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_store_timeout_secs(),
        }
    }
}

fn default_store_timeout_secs() -> u64 {
    5
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ============================================================
// Realtime Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct RealtimeConfig {
    /// Per-subscriber channel buffer; messages beyond it are dropped.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

fn default_subscriber_buffer() -> usize {
    64
}

// ============================================================
// API Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_api_host")]
    pub host: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_api_port(),
            host: default_api_host(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_api_port() -> u16 {
    3000
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

impl Config {
    pub fn load(path: &str) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("Failed to read config file '{}': {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("Failed to parse config file '{}': {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if self.ingest.window_capacity == 0 {
            return Err(eyre::eyre!("ingest.window_capacity must be positive"));
        }
        if self.ingest.recent_id_capacity == 0 {
            return Err(eyre::eyre!("ingest.recent_id_capacity must be positive"));
        }
        if self.detection.z_score_threshold <= 0.0 {
            return Err(eyre::eyre!("detection.z_score_threshold must be positive"));
        }
        if !(0.0..=1.0).contains(&self.detection.alert_threshold) {
            return Err(eyre::eyre!(
                "detection.alert_threshold must be within [0, 1], got {}",
                self.detection.alert_threshold
            ));
        }
        if self.detection.velocity_samples < 2 {
            return Err(eyre::eyre!("detection.velocity_samples must be at least 2"));
        }
        if self.alerts.retention_days == 0 {
            return Err(eyre::eyre!("alerts.retention_days must be at least 1"));
        }
        if self.realtime.subscriber_buffer == 0 {
            return Err(eyre::eyre!("realtime.subscriber_buffer must be positive"));
        }
        if self.storage.timeout_secs == 0 {
            return Err(eyre::eyre!("storage.timeout_secs must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_defaults() {
        let toml_str = r#"
[ingest]
window_capacity = 50

[alerts]
cooldown_secs = 60
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.ingest.window_capacity, 50);
        assert_eq!(config.alerts.cooldown_secs, 60);
        assert_eq!(config.detection.z_score_threshold, 3.0); // default
        assert_eq!(config.detection.min_data_points, 10); // default
        assert_eq!(config.alerts.retention_days, 30); // default
        assert_eq!(config.lifecycle.checkpoint_secs, 6 * 3600); // default
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.ingest.window_capacity, 200);
        assert_eq!(config.detection.alert_threshold, 0.7);
    }

    #[test]
    fn test_validate_zero_window() {
        let mut config = Config::default();
        config.ingest.window_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_alert_threshold_range() {
        let mut config = Config::default();
        config.detection.alert_threshold = 1.5;
        assert!(config.validate().is_err());
    }
}
