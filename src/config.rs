//! File-based configuration.
//!
//! Loads a TOML file through the `config` crate with environment overrides:
//!
//! ```toml
//! [telemetry]
//! endpoint = "https://telemetry.example.com/errors"
//! max_retry = 20
//! development = true
//!
//! [rate_limits.export]
//! max_requests = 2
//! window_ms = 60000
//! ```

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::rate_limit::{self, RateLimitPreset};
use crate::telemetry::TelemetryConfig;

/// Prefix of environment overrides, e.g. `DASHGUARD__TELEMETRY__MAX_RETRY=20`.
pub const ENV_PREFIX: &str = "DASHGUARD";

/// A named rate limit as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimitSettings {
    pub max_requests: usize,
    pub window_ms: u64,
}

impl From<RateLimitSettings> for RateLimitPreset {
    fn from(settings: RateLimitSettings) -> Self {
        RateLimitPreset::new(settings.max_requests, Duration::from_millis(settings.window_ms))
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub telemetry: TelemetryConfig,
    /// Named limits; these shadow the built-in presets of the same name.
    pub rate_limits: HashMap<String, RateLimitSettings>,
}

/// Errors that can occur when loading configuration.
#[derive(Error, Debug)]
pub enum ConfigLoadError {
    /// The configuration file was not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// Failed to parse the configuration file.
    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] ConfigError),

    /// The configuration file path is invalid.
    #[error("invalid configuration path: {0}")]
    InvalidPath(String),
}

impl ResilienceConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables override file values using
    /// `DASHGUARD__<SECTION>__<KEY>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, its path is not valid UTF-8,
    /// or its content does not match the expected shape.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        let path_str = path
            .to_str()
            .ok_or_else(|| ConfigLoadError::InvalidPath(format!("{:?}", path)))?;

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound(path_str.to_string()));
        }

        let config = Config::builder()
            .add_source(File::with_name(path_str))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Loads `path` when given, otherwise returns defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigLoadError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Looks up a rate limit by name.
    ///
    /// Configured limits win; otherwise the built-in presets `auth`,
    /// `password_reset`, `search`, `form_submit` and `api` are used.
    pub fn preset(&self, name: &str) -> Option<RateLimitPreset> {
        if let Some(settings) = self.rate_limits.get(name) {
            return Some((*settings).into());
        }

        match name {
            "auth" => Some(rate_limit::AUTH),
            "password_reset" => Some(rate_limit::PASSWORD_RESET),
            "search" => Some(rate_limit::SEARCH),
            "form_submit" => Some(rate_limit::FORM_SUBMIT),
            "api" => Some(rate_limit::API),
            _ => None,
        }
    }
}
