//! Backing stores: content items, the set catalog, and state snapshots.

mod catalog;
mod content;
mod snapshot;

use thiserror::Error;

use crate::error::{Effect, Transience};

pub use catalog::{CatalogState, MemoryCatalog, SetCatalog};
pub use content::{ContentState, ContentStore, IngestReport, MemoryContentStore};
pub use snapshot::{SNAPSHOT_FORMAT_VERSION, Snapshot, SnapshotError, load, save};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("store operation `{op}` timed out")]
    Timeout { op: &'static str },
}

impl StoreError {
    pub fn transience(&self) -> Transience {
        Transience::Retryable
    }

    pub fn effect(&self) -> Effect {
        Effect::Unknown
    }
}
