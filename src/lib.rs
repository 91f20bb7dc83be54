#![forbid(unsafe_code)]

pub mod alloc;
pub mod api;
pub mod builder;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod evict;
pub mod ledger;
pub mod paths;
pub mod pool;
pub mod store;
pub mod telemetry;

pub use error::{Effect, Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export core types at crate root for convenience
pub use crate::alloc::{AllocError, AllocationFailure, Allocator, BatchAllocation};
pub use crate::builder::{BuildParams, BuildReport, CategoryBuildOutcome, SetBuilder};
pub use crate::core::{
    CategoryId, ContentHash, CoreError, Item, ItemId, ItemRef, ManualClock, QuestionSet, SetId,
    SharedClock, SystemClock, UserId, WallClock, WallClockSource,
};
pub use crate::engine::Engine;
pub use crate::evict::{EvictReason, EvictionParams, EvictionPlan};
pub use crate::ledger::{AllocationLedger, InvariantViolation, LedgerError};
pub use crate::pool::{PoolError, PoolIndex, PoolMetadata};
pub use crate::store::{
    ContentStore, IngestReport, MemoryCatalog, MemoryContentStore, SetCatalog, StoreError,
};
