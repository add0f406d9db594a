//! Configuration system.
//!
//! Layered loading: built-in defaults, then an optional TOML file, then
//! `CAIRN_*` environment variable overrides (e.g. `CAIRN_STORE_ROOT`,
//! `CAIRN_RETENTION__MAX_SNAPSHOTS`). The result feeds the engine's store
//! root, default retention bounds, and logging setup.

use crate::error::EngineError;
use crate::logging::LoggingConfig;
use crate::restore::{RegenerationPolicy, RestoreStrategy};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CairnConfig {
    /// Store root directory. Blobs live under `<root>/blobs`, the
    /// snapshot index under `<root>/metadata`.
    #[serde(default = "default_store_root")]
    pub store_root: PathBuf,

    /// Default retention bounds applied when the caller passes no policy.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Retention defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_max_snapshots")]
    pub max_snapshots: usize,

    /// Days a snapshot survives beyond the count bound. `None` disables
    /// the age rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_days: Option<i64>,
}

fn default_max_snapshots() -> usize {
    10
}

fn default_store_root() -> PathBuf {
    // XDG data directory when resolvable, current directory otherwise.
    directories::ProjectDirs::from("", "", "cairn")
        .map(|dirs| dirs.data_dir().join("store"))
        .unwrap_or_else(|| PathBuf::from(".cairn"))
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_snapshots: default_max_snapshots(),
            ttl_days: None,
        }
    }
}

impl Default for CairnConfig {
    fn default() -> Self {
        Self {
            store_root: default_store_root(),
            retention: RetentionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl CairnConfig {
    /// Load configuration: defaults, then the given TOML file (optional),
    /// then `CAIRN_*` environment overrides.
    pub fn load(config_file: Option<&Path>) -> Result<Self, EngineError> {
        let mut builder = Config::builder()
            .set_default("store_root", default_store_root().to_string_lossy().to_string())?
            .set_default("retention.max_snapshots", default_max_snapshots() as i64)?;

        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path));
        } else {
            builder = builder.add_source(File::with_name("cairn").required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("CAIRN")
                .separator("__")
                .try_parsing(true),
        );

        let config: CairnConfig = builder.build()?.try_deserialize()?;
        config.validate().map_err(EngineError::Config)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.store_root.as_os_str().is_empty() {
            return Err("store_root cannot be empty".to_string());
        }
        if let Some(ttl) = self.retention.ttl_days {
            if ttl < 0 {
                return Err(format!("retention.ttl_days cannot be negative: {}", ttl));
            }
        }
        Ok(())
    }

    /// Render the configuration as a TOML document, suitable for seeding
    /// a config file.
    pub fn to_toml(&self) -> Result<String, EngineError> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Default regeneration policy derived from the retention section.
    pub fn default_policy(&self) -> RegenerationPolicy {
        RegenerationPolicy {
            strategy: RestoreStrategy::Full,
            validate_before_restore: false,
            preserve_history: true,
            max_snapshots: self.retention.max_snapshots,
            ttl_days: self.retention.ttl_days,
        }
    }
}
