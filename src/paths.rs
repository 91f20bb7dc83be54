//! XDG directory helpers for config and state locations.

use std::path::PathBuf;

/// Base directory for persistent state (snapshots, logs).
///
/// Uses `DECKPOOL_STATE_DIR` if set, otherwise `$XDG_DATA_HOME/deckpool`
/// or `~/.local/share/deckpool`.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DECKPOOL_STATE_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_DATA_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        })
        .join("deckpool")
}

/// Base directory for user configuration.
///
/// Uses `DECKPOOL_CONFIG_DIR` if set, otherwise `$XDG_CONFIG_HOME/deckpool`
/// or `~/.config/deckpool`.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DECKPOOL_CONFIG_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("deckpool")
}

/// Default log directory under the state dir.
pub fn log_dir() -> PathBuf {
    state_dir().join("logs")
}

/// Default snapshot path under the state dir.
pub fn snapshot_path() -> PathBuf {
    state_dir().join("deckpool.json")
}
