//! Configuration management for Driftbox.
//!
//! This module handles loading, saving, and managing Driftbox configuration.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/driftbox/config.toml` |
//! | macOS | `~/Library/Application Support/com.driftbox.Driftbox/config.toml` |
//! | Windows | `%APPDATA%\driftbox\Driftbox\config\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use driftbox_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Uploads land in {}", config.storage_root().display());
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::{DeviceClass, UploadPolicy};
use crate::error::{Error, Result};
use crate::storage::{ChunkStore, CHUNK_DIR_NAME};

/// Main configuration struct for Driftbox.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where chunks and published files live
    pub storage: StorageConfig,
    /// HTTP server settings
    pub server: ServerConfig,
    /// Client upload settings
    pub upload: UploadConfig,
    /// Session housekeeping
    pub sessions: SessionConfig,
}

/// Storage locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory that receives published files (platform data dir when unset)
    pub root: Option<PathBuf>,
    /// Directory holding per-session chunk folders (`<root>/.chunks` when unset)
    pub chunk_dir: Option<PathBuf>,
}

/// HTTP server configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen port
    pub port: u16,
    /// Bind to 127.0.0.1 instead of all interfaces
    pub localhost_only: bool,
    /// Largest accepted request body, in bytes
    pub max_chunk_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_PORT,
            localhost_only: false,
            max_chunk_bytes: crate::DEFAULT_MAX_CHUNK_BYTES,
        }
    }
}

/// Which policy the client should use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// Use whatever was detected
    #[default]
    Auto,
    /// Always use the mobile policy
    Mobile,
    /// Always use the desktop policy
    Desktop,
}

impl DevicePreference {
    /// Pick the device class, falling back to `detected` for `auto`.
    #[must_use]
    pub const fn resolve(self, detected: DeviceClass) -> DeviceClass {
        match self {
            Self::Auto => detected,
            Self::Mobile => DeviceClass::Mobile,
            Self::Desktop => DeviceClass::Desktop,
        }
    }
}

/// Client upload configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Device class used to choose chunk size and concurrency
    pub device_class: DevicePreference,
    /// Chunk size override in bytes
    pub chunk_size: Option<u64>,
    /// Concurrency override
    pub concurrency: Option<usize>,
    /// How often the throughput indicator is refreshed
    #[serde(with = "humantime_serde")]
    pub speed_interval: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            device_class: DevicePreference::Auto,
            chunk_size: None,
            concurrency: None,
            speed_interval: Duration::from_secs(1),
        }
    }
}

/// Session housekeeping options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Remove chunk folders untouched for this long (never when unset)
    #[serde(
        with = "humantime_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub stale_after: Option<Duration>,
    /// How often the sweep runs when enabled
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stale_after: None,
            sweep_interval: Duration::from_secs(600),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, defaulting when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        toml::from_str(&content).map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = self.to_toml_string()?;

        std::fs::write(path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Render the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be represented in TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Directory that receives published files.
    #[must_use]
    pub fn storage_root(&self) -> PathBuf {
        self.storage.root.clone().unwrap_or_else(|| {
            project_dirs().map_or_else(
                || PathBuf::from("uploads"),
                |dirs| dirs.data_dir().join("uploads"),
            )
        })
    }

    /// Chunk store rooted at the configured chunk directory.
    #[must_use]
    pub fn chunk_store(&self) -> ChunkStore {
        match &self.storage.chunk_dir {
            Some(dir) => ChunkStore::new(dir.clone()),
            None => ChunkStore::new(self.storage_root().join(CHUNK_DIR_NAME)),
        }
    }

    /// Upload policy for a client detected as `detected`, with overrides applied.
    #[must_use]
    pub fn upload_policy(&self, detected: DeviceClass) -> UploadPolicy {
        let class = self.upload.device_class.resolve(detected);
        UploadPolicy::for_device(class)
            .with_chunk_size(self.upload.chunk_size.unwrap_or(0))
            .with_concurrency(self.upload.concurrency.unwrap_or(0))
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "driftbox", "Driftbox")
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let secs = duration.as_secs();
        if secs >= 60 && secs % 60 == 0 {
            serializer.serialize_str(&format!("{}m", secs / 60))
        } else {
            serializer.serialize_str(&format!("{secs}s"))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(secs) = s.strip_suffix('s') {
            return secs
                .parse()
                .map(Duration::from_secs)
                .map_err(|e| format!("invalid duration '{s}': {e}"));
        }
        if let Some(mins) = s.strip_suffix('m') {
            return mins
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|e| format!("invalid duration '{s}': {e}"));
        }
        if let Some(hours) = s.strip_suffix('h') {
            return hours
                .parse::<u64>()
                .map(|h| Duration::from_secs(h * 3600))
                .map_err(|e| format!("invalid duration '{s}': {e}"));
        }
        Err(format!("invalid duration format '{s}', expected e.g. \"30s\", \"10m\" or \"1h\""))
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        #[allow(clippy::ref_option)]
        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| super::parse(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
