//! Backup configuration read by the host.
//!
//! Only the two knobs the archiver consumes live here: the gzip level and the
//! sustained write limit. The file layout nests them under `system.backups`:
//!
//! ```yaml
//! system:
//!   backups:
//!     compression-level: best_compression
//!     write-limit: 50
//! ```

use crate::error::{Error, Result};
use flate2::Compression;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub system: SystemConfig,
}

/// System-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SystemConfig {
    /// Backup archive settings
    #[serde(default)]
    pub backups: BackupsConfig,
}

/// Archive creation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackupsConfig {
    /// Gzip level used for archives
    #[serde(default)]
    pub compression_level: CompressionLevel,

    /// Sustained write limit in MiB/s; 0 or negative disables throttling
    #[serde(default = "default_write_limit")]
    pub write_limit: i64,
}

impl BackupsConfig {
    /// The write limit as an unsigned MiB/s value, 0 meaning unlimited.
    pub fn write_limit_mib(&self) -> u64 {
        self.write_limit.max(0) as u64
    }
}

impl Default for BackupsConfig {
    fn default() -> Self {
        Self {
            compression_level: CompressionLevel::default(),
            write_limit: default_write_limit(),
        }
    }
}

fn default_write_limit() -> i64 {
    0
}

/// Gzip level selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionLevel {
    /// Store only
    None,
    /// Fastest compression
    #[default]
    BestSpeed,
    /// Smallest output
    BestCompression,
}

impl CompressionLevel {
    /// Parses a level name. Unrecognized names fall back to `BestSpeed`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "none" => CompressionLevel::None,
            "best_compression" => CompressionLevel::BestCompression,
            "best_speed" => CompressionLevel::BestSpeed,
            other => {
                debug!(level = other, "unknown compression level; using best_speed");
                CompressionLevel::BestSpeed
            }
        }
    }

    /// The flate2 setting for this level.
    pub fn to_flate2(self) -> Compression {
        match self {
            CompressionLevel::None => Compression::none(),
            CompressionLevel::BestSpeed => Compression::fast(),
            CompressionLevel::BestCompression => Compression::best(),
        }
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionLevel::None => write!(f, "none"),
            CompressionLevel::BestSpeed => write!(f, "best_speed"),
            CompressionLevel::BestCompression => write!(f, "best_compression"),
        }
    }
}

impl<'de> Deserialize<'de> for CompressionLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(CompressionLevel::parse(&s))
    }
}

impl Config {
    /// Loads a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::config_not_found(path.display().to_string())
            } else {
                Error::Io(e)
            }
        })?;
        Self::from_yaml(&content)
    }

    /// Parses configuration from YAML text. An empty document yields defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml_ng::from_str(content).map_err(|e| Error::invalid_config(e.to_string()))
    }
}
