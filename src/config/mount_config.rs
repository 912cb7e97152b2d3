//! Mount configuration loaded from TOML.
//!
//! Everything an operator tunes lives here: mount address, refraction update
//! policy, build-run defaults, and the horizon mask source. Unset fields fall
//! back to built-in defaults so a missing file still yields a usable config.

use super::defaults;
use crate::types::RefractionMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the mount control core.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MountConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub refraction: RefractionConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub horizon: HorizonConfig,
}

/// Mount TCP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Mount IP address or hostname.
    pub host: String,
    /// Mount command port.
    pub port: u16,
    /// Mount MAC address, used for wake-on-LAN (optional).
    #[serde(default)]
    pub mac: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "192.168.2.15".to_string(),
            port: defaults::DEFAULT_MOUNT_PORT,
            mac: String::new(),
        }
    }
}

/// Refraction parameter update policy (see the medium poll cycle).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefractionConfig {
    /// When to push environment T/P to the mount.
    pub mode: RefractionMode,
}

impl Default for RefractionConfig {
    fn default() -> Self {
        Self {
            mode: RefractionMode::NotTracking,
        }
    }
}

/// Model-build run defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Seconds to let the mount settle after each slew.
    pub settling_time_s: f64,
    /// Keep FITS images after a successful solve.
    pub keep_images: bool,
    /// Directory for build images and analysis files.
    pub work_directory: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            settling_time_s: defaults::DEFAULT_SETTLING_TIME_S,
            keep_images: false,
            work_directory: PathBuf::from("./model-run"),
        }
    }
}

/// Horizon mask source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HorizonConfig {
    /// Horizon mask file (`az:alt` pairs), optional.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Minimum altitude applied on top of the file mask (degrees).
    pub altitude_floor: f64,
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            file: None,
            altitude_floor: 0.0,
        }
    }
}

impl MountConfig {
    /// Load configuration with the standard precedence:
    ///
    /// 1. `MOUNTCTL_CONFIG` environment variable (path to TOML file)
    /// 2. `mountctl.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("MOUNTCTL_CONFIG") {
            match Self::from_file(Path::new(&path)) {
                Ok(config) => {
                    tracing::info!(path = %path, "Loaded config from MOUNTCTL_CONFIG");
                    return config;
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Failed to load config — trying defaults");
                }
            }
        }

        let local = Path::new("mountctl.toml");
        if local.exists() {
            match Self::from_file(local) {
                Ok(config) => {
                    tracing::info!("Loaded config from ./mountctl.toml");
                    return config;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse ./mountctl.toml — using defaults");
                }
            }
        }

        tracing::info!("Using built-in default configuration");
        Self::default()
    }

    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }
}
