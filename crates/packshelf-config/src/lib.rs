//! Configuration management for Packshelf
//!
//! Handles library paths, re-identification staleness and the snapshot
//! cache location. TOML-based config files with sane defaults when no
//! file is present.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Standard configuration paths
pub const CONFIG_DIR: &str = "/etc/packshelf";
pub const DATA_DIR: &str = "/var/lib/packshelf";

/// Main Packshelf configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub library: LibrarySection,

    #[serde(default)]
    pub cache: CacheSection,
}

/// Content library settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibrarySection {
    /// Root directories holding package files
    #[serde(default)]
    pub paths: Vec<PathBuf>,

    /// Re-run identification on entries whose last attempt is older than this
    #[serde(default = "default_rescan_stale_days")]
    pub rescan_stale_days: u64,
}

impl Default for LibrarySection {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            rescan_stale_days: default_rescan_stale_days(),
        }
    }
}

fn default_rescan_stale_days() -> u64 {
    7
}

/// Snapshot cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    /// Where the generated library snapshot is persisted
    #[serde(default = "default_cache_file")]
    pub file: PathBuf,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            file: default_cache_file(),
        }
    }
}

fn default_cache_file() -> PathBuf {
    Path::new(DATA_DIR).join("library.json")
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> Result<Self, ConfigError> {
        let system_config = Path::new(CONFIG_DIR).join("config.toml");
        if system_config.exists() {
            return Self::load(&system_config);
        }

        // Return default config if no file exists
        tracing::warn!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        tracing::info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Staleness threshold as a duration
    pub fn rescan_stale(&self) -> Duration {
        Duration::from_secs(self.library.rescan_stale_days * 24 * 60 * 60)
    }
}
