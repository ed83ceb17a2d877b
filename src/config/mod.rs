//! Configuration management

use crate::domain::call::tone::ToneSettings;
use crate::domain::call::value_object::AnonymityModes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub tones: ToneConfig,
    pub call: CallConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToneConfig {
    pub enabled: bool,
    pub ringback_volume: i32,
    pub error_duration_ms: u64,
    pub dial_error_duration_ms: u64,
    pub dropped_duration_ms: u64,
    pub dropped_volume: i32,
    pub stale_threshold_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CallConfig {
    /// Default anonymity modes for outgoing calls
    pub anonymity_modes: u32,
    pub event_capacity: usize,
    pub control_queue: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ringback_volume: 0,
            error_duration_ms: 5000,
            dial_error_duration_ms: 4000,
            dropped_duration_ms: 1200,
            dropped_volume: -3,
            stale_threshold_ms: 1200,
        }
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            anonymity_modes: 0,
            event_capacity: 1000,
            control_queue: 64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "0.0.0.0:9090".to_string(),
        }
    }
}

impl Config {
    /// Load from an optional file plus `CALLGATE__SECTION__KEY` overrides
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("CALLGATE").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }
}

impl ToneConfig {
    pub fn settings(&self) -> ToneSettings {
        ToneSettings {
            enabled: self.enabled,
            ringback_volume: self.ringback_volume,
            error_duration: Duration::from_millis(self.error_duration_ms),
            dial_error_duration: Duration::from_millis(self.dial_error_duration_ms),
            dropped_duration: Duration::from_millis(self.dropped_duration_ms),
            dropped_volume: self.dropped_volume,
            stale_threshold: Duration::from_millis(self.stale_threshold_ms),
        }
    }
}

impl CallConfig {
    pub fn anonymity(&self) -> AnonymityModes {
        AnonymityModes::from_bits(self.anonymity_modes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_tone_settings() {
        let config = Config::default();
        assert_eq!(config.tones.settings(), ToneSettings::default());
        assert_eq!(config.call.event_capacity, 1000);
        assert_eq!(config.logging.level, "info");
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml_str(
            r#"
            [tones]
            enabled = false

            [call]
            anonymity_modes = 1
            "#,
        )
        .unwrap();

        assert!(!config.tones.enabled);
        assert_eq!(config.tones.error_duration_ms, 5000);
        assert_eq!(config.call.anonymity().bits(), 1);
        assert_eq!(config.metrics.listen, "0.0.0.0:9090");
    }

    #[test]
    fn test_load_without_file() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.call.control_queue, 64);
    }
}
