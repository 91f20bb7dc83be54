//! Configuration schema and layered merge.
//!
//! A `Config` is assembled from defaults, the user config file, a
//! repo-local `deckpool.toml`, and finally environment overrides. The
//! category table is part of configuration: requests naming a category
//! outside it are validation errors.

mod load;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{CategoryId, CoreError};
use crate::error::{Effect, Transience};
use crate::evict::EvictionParams;

pub use load::{apply_env_overrides, config_path, load, load_from, local_config_path};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error(transparent)]
    Invalid(#[from] CoreError),
}

impl ConfigError {
    pub fn transience(&self) -> Transience {
        match self {
            ConfigError::Io { .. } => Transience::Retryable,
            _ => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        Effect::None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub eviction: EvictionConfig,
    pub logging: LoggingConfig,
    /// Category id -> display name.
    pub categories: BTreeMap<String, String>,
    pub state_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            eviction: EvictionConfig::default(),
            logging: LoggingConfig::default(),
            categories: BTreeMap::new(),
            state_dir: None,
        }
    }
}

impl Config {
    /// Parse the raw category map into a validated table.
    pub fn category_table(&self) -> Result<CategoryTable, ConfigError> {
        CategoryTable::from_raw(&self.categories).map_err(ConfigError::from)
    }

    pub fn eviction_params(&self) -> Result<EvictionParams, ConfigError> {
        EvictionParams::new(
            self.eviction.max_sets_per_category,
            self.eviction.max_age_months,
        )
        .map_err(ConfigError::from)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    pub max_sets_per_category: usize,
    pub max_age_months: u32,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            max_sets_per_category: EvictionParams::DEFAULT_MAX_SETS,
            max_age_months: EvictionParams::DEFAULT_MAX_AGE_MONTHS,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Tree,
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    Daily,
    Hourly,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub stdout: bool,
    pub stdout_format: LogFormat,
    pub filter: Option<String>,
    pub file: FileLoggingConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            stdout_format: LogFormat::Tree,
            filter: None,
            file: FileLoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
    pub format: LogFormat,
    pub rotation: LogRotation,
    pub retention_max_files: Option<usize>,
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            format: LogFormat::Json,
            rotation: LogRotation::Daily,
            retention_max_files: Some(10),
        }
    }
}

/// Partial config from one source; later layers win field by field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigLayer {
    pub eviction: Option<EvictionConfig>,
    pub logging: Option<LoggingConfig>,
    pub categories: Option<BTreeMap<String, String>>,
    pub state_dir: Option<PathBuf>,
}

impl ConfigLayer {
    pub fn apply_to(&self, target: &mut Config) {
        if let Some(eviction) = self.eviction {
            target.eviction = eviction;
        }
        if let Some(logging) = self.logging.as_ref() {
            target.logging = logging.clone();
        }
        if let Some(categories) = self.categories.as_ref() {
            target.categories = categories.clone();
        }
        if let Some(state_dir) = self.state_dir.as_ref() {
            target.state_dir = Some(state_dir.clone());
        }
    }
}

/// Validated category table: id -> display name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryTable {
    inner: BTreeMap<CategoryId, String>,
}

impl CategoryTable {
    pub fn from_raw(raw: &BTreeMap<String, String>) -> Result<Self, CoreError> {
        let mut inner = BTreeMap::new();
        for (id, name) in raw {
            inner.insert(CategoryId::parse(id)?, name.clone());
        }
        Ok(Self { inner })
    }

    pub fn contains(&self, category: &CategoryId) -> bool {
        self.inner.contains_key(category)
    }

    pub fn display_name(&self, category: &CategoryId) -> Option<&str> {
        self.inner.get(category).map(String::as_str)
    }

    pub fn ids(&self) -> Vec<CategoryId> {
        self.inner.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CategoryId, &str)> {
        self.inner.iter().map(|(id, name)| (id, name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
