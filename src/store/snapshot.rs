//! Versioned JSON snapshot of the whole engine state.
//!
//! The CLI loads a snapshot on start and writes one back (temp file +
//! rename) after a successful mutation. Any store offering atomic list
//! append and map update could replace this; the format is not normative.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::catalog::CatalogState;
use super::content::ContentState;
use crate::core::WallClock;
use crate::error::{Effect, Transience};
use crate::ledger::LedgerState;
use crate::pool::PoolState;

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SnapshotError {
    #[error("snapshot io failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("snapshot format v{found} is newer than supported v{supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
}

impl SnapshotError {
    pub fn transience(&self) -> Transience {
        match self {
            SnapshotError::Io { .. } => Transience::Retryable,
            _ => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            SnapshotError::Io { .. } => Effect::Unknown,
            _ => Effect::None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub format_version: u32,
    pub saved_at: WallClock,
    pub content: ContentState,
    pub catalog: CatalogState,
    pub pool: PoolState,
    pub ledger: LedgerState,
}

/// Load a snapshot; `Ok(None)` when the file does not exist yet.
pub fn load(path: &Path) -> Result<Option<Snapshot>, SnapshotError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let snapshot: Snapshot =
        serde_json::from_str(&contents).map_err(|err| SnapshotError::Corrupt {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
    if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
        return Err(SnapshotError::UnsupportedVersion {
            found: snapshot.format_version,
            supported: SNAPSHOT_FORMAT_VERSION,
        });
    }
    Ok(Some(snapshot))
}

/// Write atomically: serialize to a sibling temp file, then rename over.
pub fn save(path: &Path, snapshot: &Snapshot) -> Result<(), SnapshotError> {
    let io_err = |source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let encoded = serde_json::to_vec_pretty(snapshot).map_err(|err| SnapshotError::Corrupt {
        path: path.to_path_buf(),
        reason: format!("encode failed: {err}"),
    })?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, encoded).map_err(|source| SnapshotError::Io {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(io_err)
}
