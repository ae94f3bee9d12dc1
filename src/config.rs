//! Configuration for the lighttrace engine.

use crate::engine::AggregationOptions;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration: reconstruction thresholds and day-bucketing timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Largest heartbeat gap (in seconds) still considered connected
    pub max_delay_secs: u64,

    /// Step (in seconds) for forward-fill resampling of state series
    pub resample_step_secs: u64,

    /// IANA timezone name used for calendar-day bucketing
    pub timezone: String,

    /// Day exclusion thresholds
    pub exclusion: ExclusionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_delay_secs: 120, // 2 minutes
            resample_step_secs: 1,
            timezone: "UTC".to_string(),
            exclusion: ExclusionConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lighttrace")
            .join("config.json")
    }

    /// Reject values that would make downstream computations degenerate.
    ///
    /// A zero resampling step would make forward-fill loop forever.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resample_step_secs == 0 {
            return Err(ConfigError::ParseError(
                "resample_step_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn max_delay(&self) -> Duration {
        Duration::seconds(self.max_delay_secs as i64)
    }

    pub fn resample_step(&self) -> Duration {
        Duration::seconds(self.resample_step_secs as i64)
    }

    /// Resolve into engine aggregation options.
    pub fn aggregation_options(&self) -> Result<AggregationOptions, ConfigError> {
        let timezone: chrono_tz::Tz = self
            .timezone
            .parse()
            .map_err(|_| ConfigError::ParseError(format!("unknown timezone: {}", self.timezone)))?;

        Ok(AggregationOptions {
            max_delay: self.max_delay(),
            timezone,
            max_disconnected: Duration::seconds(self.exclusion.max_disconnected_secs as i64),
            max_gaze: Duration::seconds(self.exclusion.max_gaze_secs as i64),
        })
    }
}

/// Thresholds deciding which days are excluded from aggregate statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionConfig {
    /// A day with more disconnected seconds than this is excluded
    pub max_disconnected_secs: u64,

    /// A day whose summed gaze durations exceed this many seconds is excluded
    pub max_gaze_secs: u64,
}

impl Default for ExclusionConfig {
    fn default() -> Self {
        Self {
            max_disconnected_secs: 6 * 3600,  // 6 hours
            max_gaze_secs: 30 * 3600,         // 30 hours
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}
