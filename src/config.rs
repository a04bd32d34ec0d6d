//! Application configuration
//!
//! The default configuration is embedded from `config.toml`. A replacement
//! file can be named with `NAVI_CONFIG`, and `NAVI_API_BASE` /
//! `NAVI_FRAMES_DIR` override single values (also read from `.env`).

use crate::error::ConfigError;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use tracing::info;

const CONFIG_TOML: &str = include_str!("../config.toml");

/// Environment variable naming a replacement config file
pub const CONFIG_PATH_ENV: &str = "NAVI_CONFIG";

/// Environment variable overriding `backend.api_base`
pub const API_BASE_ENV: &str = "NAVI_API_BASE";

/// Environment variable overriding `capture.frames_dir`
pub const FRAMES_DIR_ENV: &str = "NAVI_FRAMES_DIR";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub backend: BackendConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the vision backend, e.g. "http://127.0.0.1:8000"
    pub api_base: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Period of the frame producer timer
    pub interval_ms: u64,
    /// Delay between device readiness and arming the producer
    pub warmup_ms: u64,
    /// Still quality, 0.0 (smallest) to 1.0 (best)
    pub quality: f32,
    /// Skip resizing on the device side
    pub skip_processing: bool,
    /// Longest edge in pixels when processing is not skipped
    pub max_dimension: u32,
    /// Simulated hardware initialisation time of the directory camera
    pub device_init_ms: u64,
    /// Directory the command-line camera reads stills from
    pub frames_dir: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3000,
            warmup_ms: 500,
            quality: 0.2,
            skip_processing: true,
            max_dimension: 640,
            device_init_ms: 750,
            frames_dir: None,
        }
    }
}

impl CaptureConfig {
    /// Configured frames directory, or `~/Pictures/Navi/frames`
    pub fn resolved_frames_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.frames_dir {
            return Some(dir.clone());
        }
        dirs::picture_dir().map(|d| d.join("Navi").join("frames"))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub connect_timeout_secs: u64,
    pub ping_interval_secs: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            ping_interval_secs: 30,
        }
    }
}

/// Optional tuning forwarded to the backend when a session starts
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub sampling_rate: Option<u32>,
    pub summary_interval_s: Option<f64>,
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_connect_timeout_secs() -> u64 {
    5
}

impl Config {
    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the effective configuration for this process
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => {
                let path = PathBuf::from(path);
                let contents = fs::read_to_string(&path).map_err(|e| ConfigError::Read {
                    path: path.clone(),
                    source: e,
                })?;
                info!("Loading configuration from {:?}", path);
                Self::from_toml_str(&contents)?
            }
            None => Self::from_toml_str(CONFIG_TOML)?,
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply single-value overrides looked up by environment variable name
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(api_base) = lookup(API_BASE_ENV).filter(|v| !v.trim().is_empty()) {
            info!(api_base = %api_base, "Overriding backend base URL from environment");
            self.backend.api_base = api_base;
        }
        if let Some(dir) = lookup(FRAMES_DIR_ENV).filter(|v| !v.trim().is_empty()) {
            self.capture.frames_dir = Some(PathBuf::from(dir));
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.backend.api_base).map_err(|e| {
            ConfigError::Invalid(format!(
                "backend.api_base '{}' is not a URL: {}",
                self.backend.api_base, e
            ))
        })?;
        if self.capture.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "capture.interval_ms must be greater than zero".into(),
            ));
        }
        let quality = self.capture.quality;
        if quality.is_nan() || quality <= 0.0 || quality > 1.0 {
            return Err(ConfigError::Invalid(format!(
                "capture.quality must be in (0, 1], got {}",
                self.capture.quality
            )));
        }
        if self.channel.ping_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "channel.ping_interval_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
