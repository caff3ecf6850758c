//! Capture configuration
//!
//! Stored as JSON. Every field has a default, so a partial file (or `{}`)
//! is a valid configuration.

use crate::capture::gain::GainSettings;
use crate::timing::ClockDomain;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("sample rate must be positive and finite, got {0}")]
    InvalidSampleRate(f64),

    #[error("buffer duration must be positive, got {0} s")]
    InvalidBufferDuration(f64),

    #[error("chunk size must be non-zero")]
    InvalidChunkSize,

    #[error("poll interval must be non-zero")]
    InvalidPollInterval,
}

fn default_device_args() -> String {
    "driver=hackrf".to_string()
}

fn default_sample_rate() -> f64 {
    crate::DEFAULT_SAMPLE_RATE
}

fn default_center_freq() -> f64 {
    crate::DEFAULT_CENTER_FREQ
}

fn default_buffer_duration_secs() -> f64 {
    crate::DEFAULT_BUFFER_DURATION_SECS
}

fn default_chunk_size() -> usize {
    crate::DEFAULT_CHUNK_SIZE
}

fn default_timestamp_domain() -> ClockDomain {
    ClockDomain::Realtime
}

fn default_join_timeout_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    10
}

/// Streaming capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Driver argument string passed to the device driver
    #[serde(default = "default_device_args")]
    pub device_args: String,
    /// Sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    /// Center frequency in Hz
    #[serde(default = "default_center_freq")]
    pub center_freq: f64,
    /// RX gain request
    #[serde(default)]
    pub gains: GainSettings,
    /// RX antenna (None = device default)
    #[serde(default)]
    pub antenna: Option<String>,
    /// Retention horizon of the sample buffer in seconds
    #[serde(default = "default_buffer_duration_secs")]
    pub buffer_duration_secs: f64,
    /// Samples requested per device read
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Clock domain used to timestamp chunks
    #[serde(default = "default_timestamp_domain")]
    pub timestamp_domain: ClockDomain,
    /// How long `stop` waits for the read loop to exit
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
    /// Buffer poll interval for `wait_for_data`
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_args: default_device_args(),
            sample_rate: default_sample_rate(),
            center_freq: default_center_freq(),
            gains: GainSettings::default(),
            antenna: None,
            buffer_duration_secs: default_buffer_duration_secs(),
            chunk_size: default_chunk_size(),
            timestamp_domain: default_timestamp_domain(),
            join_timeout_ms: default_join_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl CaptureConfig {
    /// Load config from disk, falling back to defaults on any error
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config from disk");
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to parse config, using defaults"
                    );
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }

    /// Reject values the session cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate));
        }
        if !(self.buffer_duration_secs.is_finite() && self.buffer_duration_secs > 0.0) {
            return Err(ConfigError::InvalidBufferDuration(self.buffer_duration_secs));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize);
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        Ok(())
    }

    /// Buffer retention horizon (zero if the configured value is invalid)
    pub fn buffer_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.buffer_duration_secs).unwrap_or_default()
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CaptureConfig::default();
        assert_eq!(config.device_args, "driver=hackrf");
        assert_eq!(config.sample_rate, 20e6);
        assert_eq!(config.center_freq, 100e6);
        assert_eq!(config.buffer_duration(), Duration::from_secs(10));
        assert_eq!(config.chunk_size, 8192);
        assert_eq!(config.timestamp_domain, ClockDomain::Realtime);
        assert_eq!(config.join_timeout(), Duration::from_secs(5));
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let json = r#"{"sample_rate": 2e6, "gains": {"lna_db": 16}, "timestamp_domain": "tai"}"#;
        let config: CaptureConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.sample_rate, 2e6);
        assert_eq!(config.gains.lna_db, Some(16));
        assert_eq!(config.gains.amp, None);
        assert_eq!(config.timestamp_domain, ClockDomain::Tai);
        assert_eq!(config.chunk_size, 8192);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: CaptureConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CaptureConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = CaptureConfig {
            sample_rate: 0.0,
            ..CaptureConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidSampleRate(0.0)));

        config.sample_rate = 1e6;
        config.buffer_duration_secs = -1.0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidBufferDuration(-1.0))
        );

        config.buffer_duration_secs = 1.0;
        config.chunk_size = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidChunkSize));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("capture.json");

        let config = CaptureConfig {
            device_args: "driver=sim".to_string(),
            antenna: Some("TX/RX".to_string()),
            gains: GainSettings {
                amp: Some(true),
                ..GainSettings::default()
            },
            ..CaptureConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = CaptureConfig::load(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_falls_back_on_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.json");
        std::fs::write(&path, "not json").unwrap();
        assert_eq!(CaptureConfig::load(&path), CaptureConfig::default());
        assert_eq!(
            CaptureConfig::load(&dir.path().join("missing.json")),
            CaptureConfig::default()
        );
    }
}
