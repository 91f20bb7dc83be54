//! Config discovery and layered loading.

use std::fs;
use std::path::{Path, PathBuf};

use super::{Config, ConfigError, ConfigLayer};
use crate::paths;

pub fn config_path() -> PathBuf {
    paths::config_dir().join("config.toml")
}

/// Repo-local override next to wherever the tool is run.
pub fn local_config_path() -> PathBuf {
    PathBuf::from("deckpool.toml")
}

fn load_layer(path: &Path) -> Result<Option<ConfigLayer>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents)
        .map(Some)
        .map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
}

/// Load defaults, then user config, then the local file, then env.
pub fn load() -> Result<Config, ConfigError> {
    let mut config = Config::default();
    if let Some(layer) = load_layer(&config_path())? {
        layer.apply_to(&mut config);
    }
    if let Some(layer) = load_layer(&local_config_path())? {
        layer.apply_to(&mut config);
    }
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load one explicit config file over the defaults, then env.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let mut config = Config::default();
    match load_layer(path)? {
        Some(layer) => layer.apply_to(&mut config),
        None => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }
    }
    apply_env_overrides(&mut config);
    Ok(config)
}

pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(raw) = std::env::var("DECKPOOL_MAX_SETS_PER_CATEGORY") {
        match raw.trim().parse::<usize>() {
            Ok(value) if value > 0 => config.eviction.max_sets_per_category = value,
            _ => {
                tracing::warn!("invalid DECKPOOL_MAX_SETS_PER_CATEGORY, ignoring: {raw}");
            }
        }
    }

    if let Ok(raw) = std::env::var("DECKPOOL_MAX_AGE_MONTHS") {
        match raw.trim().parse::<u32>() {
            Ok(value) if value > 0 => config.eviction.max_age_months = value,
            _ => {
                tracing::warn!("invalid DECKPOOL_MAX_AGE_MONTHS, ignoring: {raw}");
            }
        }
    }

    if let Ok(raw) = std::env::var("DECKPOOL_STATE_DIR") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            config.state_dir = Some(PathBuf::from(trimmed));
        }
    }
}
