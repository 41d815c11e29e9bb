//! Studio configuration
//!
//! Operator-tunable parameters for the recording cycle and backend access,
//! loaded from the embedded `config.toml` with environment overrides.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding the backend base URL.
pub const API_URL_VAR: &str = "SIGNSTUDIO_API_URL";

/// Environment variable holding the bearer credential.
pub const TOKEN_VAR: &str = "SIGNSTUDIO_TOKEN";

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub studio: StudioParams,
    pub api: ApiSettings,
}

/// Parameters driving one recording session.
///
/// Repetitions, take duration and rest duration are operator-tunable, not
/// constants; the defaults mirror the standard collection protocol.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StudioParams {
    /// Number of takes requested per session
    pub repetitions: u32,
    /// Fixed duration of a single take, in seconds
    pub take_duration_secs: u64,
    /// Pause between takes, in seconds
    pub rest_secs: u32,
    /// Lead-in countdown before the first take, in seconds
    pub countdown_secs: u32,
    /// Recording timer granularity, in milliseconds
    pub recording_tick_ms: u64,
    /// Cap on simultaneously in-flight clip uploads
    pub max_concurrent_uploads: usize,
}

impl Default for StudioParams {
    fn default() -> Self {
        Self {
            repetitions: 5,
            take_duration_secs: 3,
            rest_secs: 2,
            countdown_secs: 15,
            recording_tick_ms: 100,
            max_concurrent_uploads: 3,
        }
    }
}

impl StudioParams {
    pub fn take_duration(&self) -> Duration {
        Duration::from_secs(self.take_duration_secs)
    }

    pub fn recording_tick(&self) -> Duration {
        Duration::from_millis(self.recording_tick_ms)
    }
}

/// Backend API settings
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    /// Base URL of the collection backend (e.g. "http://localhost:5000/api/v1")
    pub base_url: String,
}

/// Load configuration from the embedded config.toml, applying environment
/// overrides for the backend URL.
pub fn load_config() -> Result<Config, ConfigError> {
    const CONFIG_TOML: &str = include_str!("../config.toml");
    let mut config: Config = toml::from_str(CONFIG_TOML)?;

    if let Ok(url) = std::env::var(API_URL_VAR) {
        if !url.is_empty() {
            config.api.base_url = url;
        }
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let studio = &config.studio;
    if studio.repetitions == 0 {
        return Err(ConfigError::Invalid("repetitions must be at least 1".into()));
    }
    if studio.take_duration_secs == 0 {
        return Err(ConfigError::Invalid(
            "take_duration_secs must be at least 1".into(),
        ));
    }
    if studio.recording_tick_ms == 0 || studio.recording_tick_ms > 1000 {
        return Err(ConfigError::Invalid(
            "recording_tick_ms must be within 1..=1000".into(),
        ));
    }
    if studio.max_concurrent_uploads == 0 {
        return Err(ConfigError::Invalid(
            "max_concurrent_uploads must be at least 1".into(),
        ));
    }
    if config.api.base_url.is_empty() {
        return Err(ConfigError::Invalid("api.base_url must be set".into()));
    }
    Ok(())
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse config.toml: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
