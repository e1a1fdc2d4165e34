//! Configuration file support for gotu.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (GOTU_*)
//! 3. Local config file (./gotu.toml)
//! 4. Global config file (~/.config/gotu/config.toml)
//!
//! An explicit `--config` path replaces both files.

use directories::ProjectDirs;
use gotu::{PurgeVariant, TransportKind};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-directory config file.
const LOCAL_CONFIG_FILE: &str = "gotu.toml";

/// Track name prefix used when none is configured.
pub(crate) const DEFAULT_TRACK_NAME_PREFIX: &str = "Track";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Transport name ("usb" or "serial").
    pub transport: Option<String>,
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Serial baud rate.
    pub baud: Option<u32>,
}

impl ConnectionConfig {
    /// Parsed transport. Unknown names are ignored with a warning.
    pub fn transport(&self) -> Option<TransportKind> {
        let name = self.transport.as_deref()?;
        let transport = TransportKind::from_name(name);
        if transport.is_none() {
            warn!("Ignoring unknown transport '{name}' in config");
        }
        transport
    }
}

/// Purge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurgeConfig {
    /// Forced purge sequence ("generic" or "legacy").
    pub variant: Option<String>,
    /// Busy polls per erased block before giving up.
    pub max_busy_polls: Option<u32>,
}

impl PurgeConfig {
    /// Parsed purge variant. Unknown names are ignored with a warning.
    pub fn variant(&self) -> Option<PurgeVariant> {
        let name = self.variant.as_deref()?;
        let variant = PurgeVariant::from_name(name);
        if variant.is_none() {
            warn!("Ignoring unknown purge variant '{name}' in config");
        }
        variant
    }
}

/// Download configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Prefix of GPX track names.
    pub track_name_prefix: Option<String>,
}

impl DownloadConfig {
    /// Configured prefix, or "Track".
    pub fn track_name_prefix(&self) -> &str {
        self.track_name_prefix
            .as_deref()
            .unwrap_or(DEFAULT_TRACK_NAME_PREFIX)
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Purge settings.
    #[serde(default)]
    pub purge: PurgeConfig,
    /// Download settings.
    #[serde(default)]
    pub download: DownloadConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
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
        ProjectDirs::from("", "", "gotu").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one. Set fields of `other` win.
    fn merge(&mut self, other: Self) {
        let Self {
            connection,
            purge,
            download,
        } = other;

        if connection.transport.is_some() {
            self.connection.transport = connection.transport;
        }
        if connection.serial.is_some() {
            self.connection.serial = connection.serial;
        }
        if connection.baud.is_some() {
            self.connection.baud = connection.baud;
        }

        if purge.variant.is_some() {
            self.purge.variant = purge.variant;
        }
        if purge.max_busy_polls.is_some() {
            self.purge.max_busy_polls = purge.max_busy_polls;
        }

        if download.track_name_prefix.is_some() {
            self.download.track_name_prefix = download.track_name_prefix;
        }
    }
}
