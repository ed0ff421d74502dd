//! Configuration file support for usblink.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (USBLINK_*)
//! 3. Local config file (./usblink.toml)
//! 4. Global config file (~/.config/usblink/config.toml)
//!
//! Files are only ever read; nothing is written back.

use directories::ProjectDirs;
use log::{debug, warn};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-directory config file.
pub const LOCAL_CONFIG_FILE: &str = "usblink.toml";

/// Connection defaults.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Preferred device (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
    /// Write timeout in milliseconds.
    pub write_timeout_ms: Option<u64>,
}

/// Monitor defaults.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Prefix received lines with a timestamp.
    #[serde(default)]
    pub timestamp: bool,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Monitor configuration.
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl Config {
    /// Load configuration from the global and local files.
    pub fn load() -> Self {
        Self::load_layered(
            Self::global_config_path().as_deref(),
            Path::new(LOCAL_CONFIG_FILE),
        )
    }

    fn load_layered(global_path: Option<&Path>, local_path: &Path) -> Self {
        let mut config = Self::default();

        if let Some(global_path) = global_path {
            if let Some(global_config) = Self::load_from_file(global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(local_path) {
            debug!("Loaded local config from {}", local_path.display());
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "usblink").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; set values in `other` win.
    fn merge(&mut self, other: Self) {
        if other.connection.port.is_some() {
            self.connection.port = other.connection.port;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }
        if other.connection.write_timeout_ms.is_some() {
            self.connection.write_timeout_ms = other.connection.write_timeout_ms;
        }
        if other.monitor.timestamp {
            self.monitor.timestamp = true;
        }
    }
}
