//! Configuration loading using Figment
//!
//! Configuration is layered, lowest precedence first:
//! 1. Built-in defaults (`AwgConfig::default()`)
//! 2. TOML file (default: `config/awg.toml`; a missing file is not an error)
//! 3. Environment variables prefixed with `AWG_`, nested keys joined by `__`
//!
//! # Environment Variable Overrides
//!
//! ```text
//! AWG_APPLICATION__LOG_LEVEL=debug
//! AWG_INSTRUMENT__ADDRESS="TCPIP0::192.168.1.50::hislip0::INSTR"
//! AWG_INSTRUMENT__TIMEOUT_MS=5000
//! ```
//!
//! # Example
//!
//! ```no_run
//! use awg_supervision::config::AwgConfig;
//!
//! let config = AwgConfig::load()?;
//! println!("AWG address: {}", config.instrument.address);
//! # Ok::<(), awg_supervision::config::ConfigError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::hardware::DEFAULT_TIMEOUT_MS;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/awg.toml";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "AWG_";

/// Highest channel number on the M8195A
pub const MAX_CHANNEL: u32 = 4;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File unreadable, malformed, or of the wrong shape
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    /// Values parsed but out of range
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AwgConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Instrument connection settings
    #[serde(default)]
    pub instrument: InstrumentConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// AWG connection and addressing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// VISA resource string
    #[serde(default = "default_address")]
    pub address: String,
    /// Per-call timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Output channel (1-4)
    #[serde(default = "default_channel")]
    pub channel: u32,
    /// Waveform segment ID
    #[serde(default = "default_segment")]
    pub segment: u32,
}

impl InstrumentConfig {
    /// Per-call timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_name() -> String {
    "AWG Supervision Board".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_address() -> String {
    "TCPIP0::localhost::hislip0::INSTR".to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_channel() -> u32 {
    1
}

fn default_segment() -> u32 {
    1
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            timeout_ms: default_timeout_ms(),
            channel: default_channel(),
            segment: default_segment(),
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl AwgConfig {
    /// Load configuration from `config/awg.toml` and the environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file is malformed or validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::LoadError(Box::new(e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Address is not empty
    /// - Timeout is non-zero
    /// - Channel is 1-4 and segment is at least 1
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let instrument = &self.instrument;
        if instrument.address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "instrument 'address' cannot be empty".to_string(),
            ));
        }

        if instrument.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "instrument 'timeout_ms' must be greater than 0".to_string(),
            ));
        }

        if !(1..=MAX_CHANNEL).contains(&instrument.channel) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid channel {}. Must be 1-{}",
                instrument.channel, MAX_CHANNEL
            )));
        }

        if instrument.segment == 0 {
            return Err(ConfigError::ValidationError(
                "instrument 'segment' must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AwgConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.instrument.timeout(), Duration::from_millis(3000));
        assert_eq!(config.instrument.channel, 1);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = AwgConfig::default();
        config.application.log_level = "verbose".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid log_level 'verbose'"));
    }

    #[test]
    fn test_invalid_channel() {
        let mut config = AwgConfig::default();
        config.instrument.channel = 5;
        assert!(config.validate().is_err());
        config.instrument.channel = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_and_segment() {
        let mut config = AwgConfig::default();
        config.instrument.timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AwgConfig::default();
        config.instrument.segment = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_address() {
        let mut config = AwgConfig::default();
        config.instrument.address = "  ".to_string();
        assert!(config.validate().is_err());
    }
}
