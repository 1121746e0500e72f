//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Every key accepted by [`Config::get`] and [`Config::set`]
const KEYS: &[&str] = &[
    "storage.path",
    "storage.max_connections",
    "cache.default_table",
    "cache.eager_replication",
    "reconcile.enabled",
    "reconcile.interval_secs",
    "archive.operator",
];

/// Lorebase configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file; `None` means `<config_dir>/lorebase.db`
    pub path: Option<PathBuf>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Table used for entities whose concept owns no table
    pub default_table: String,
    /// Attempt graph-node creation right after entity creation instead of
    /// waiting for the next reconciliation tick
    pub eager_replication: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Operator recorded for archival triggered without a caller identity
    pub operator: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 5,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_table: "entities".to_string(),
            eager_replication: true,
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            operator: "system".to_string(),
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("LOREBASE_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("lorebase")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Resolve the database file, falling back to the config directory
    pub fn database_path(&self) -> anyhow::Result<PathBuf> {
        match &self.storage.path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("lorebase.db")),
        }
    }

    /// Load configuration from file, or return defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config = Self::from_toml(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage.max_connections == 0 {
            return Err(anyhow!("storage.max_connections must be at least 1"));
        }
        if self.cache.default_table.trim().is_empty() {
            return Err(anyhow!("cache.default_table must not be empty"));
        }
        if self.reconcile.interval_secs == 0 {
            return Err(anyhow!("reconcile.interval_secs must be at least 1"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "storage.path" => Ok(self
                .storage
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(default)".to_string())),
            "storage.max_connections" => Ok(self.storage.max_connections.to_string()),
            "cache.default_table" => Ok(self.cache.default_table.clone()),
            "cache.eager_replication" => Ok(self.cache.eager_replication.to_string()),
            "reconcile.enabled" => Ok(self.reconcile.enabled.to_string()),
            "reconcile.interval_secs" => Ok(self.reconcile.interval_secs.to_string()),
            "archive.operator" => Ok(self.archive.operator.clone()),
            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `lorebase config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "storage.path" => {
                self.storage.path = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }
            "storage.max_connections" => {
                let max: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid max_connections value: {}", value))?;
                if max == 0 {
                    return Err(anyhow!("max_connections must be at least 1"));
                }
                self.storage.max_connections = max;
            }
            "cache.default_table" => {
                if value.trim().is_empty() {
                    return Err(anyhow!("default_table must not be empty"));
                }
                self.cache.default_table = value.trim().to_string();
            }
            "cache.eager_replication" => {
                self.cache.eager_replication = value
                    .parse()
                    .with_context(|| format!("Invalid eager_replication value: {}", value))?;
            }
            "reconcile.enabled" => {
                self.reconcile.enabled = value
                    .parse()
                    .with_context(|| format!("Invalid enabled value: {}", value))?;
            }
            "reconcile.interval_secs" => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid interval_secs value: {}", value))?;
                if secs == 0 {
                    return Err(anyhow!("interval_secs must be at least 1"));
                }
                self.reconcile.interval_secs = secs;
            }
            "archive.operator" => {
                self.archive.operator = value.to_string();
            }
            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `lorebase config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        KEYS.iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Every accepted dotted key
    pub fn keys() -> &'static [&'static str] {
        KEYS
    }
}
