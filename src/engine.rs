//! Engine: wiring of stores, pool, ledger, allocator, and builder.

use std::path::Path;
use std::sync::Arc;

use crate::alloc::Allocator;
use crate::builder::{BuildParams, BuildReport, CategoryLocks, SetBuilder};
use crate::config::{CategoryTable, Config};
use crate::core::{CategoryId, SetId, SharedClock};
use crate::error::Error;
use crate::ledger::AllocationLedger;
use crate::pool::{PoolError, PoolIndex, PoolMetadata};
use crate::store::{
    MemoryCatalog, MemoryContentStore, SNAPSHOT_FORMAT_VERSION, Snapshot, load, save,
};

pub struct Engine {
    clock: SharedClock,
    content: Arc<MemoryContentStore>,
    catalog: Arc<MemoryCatalog>,
    pool: Arc<PoolIndex>,
    ledger: Arc<AllocationLedger>,
    allocator: Allocator,
    builder: SetBuilder,
    locks: Arc<CategoryLocks>,
    categories: CategoryTable,
}

impl Engine {
    pub fn new(config: &Config, clock: SharedClock) -> Result<Self, Error> {
        Self::assemble(
            config,
            clock,
            MemoryContentStore::new(),
            MemoryCatalog::new(),
            PoolIndex::new(),
            AllocationLedger::new(),
        )
    }

    /// Rebuild the engine from a persisted snapshot.
    pub fn from_snapshot(
        config: &Config,
        clock: SharedClock,
        snapshot: Snapshot,
    ) -> Result<Self, Error> {
        Self::assemble(
            config,
            clock,
            MemoryContentStore::restore(snapshot.content),
            MemoryCatalog::restore(snapshot.catalog),
            PoolIndex::restore(snapshot.pool),
            AllocationLedger::restore(snapshot.ledger)?,
        )
    }

    /// Load from the snapshot at `path`, or start empty if none exists.
    pub fn open(config: &Config, clock: SharedClock, path: &Path) -> Result<Self, Error> {
        match load(path)? {
            Some(snapshot) => Self::from_snapshot(config, clock, snapshot),
            None => Self::new(config, clock),
        }
    }

    fn assemble(
        config: &Config,
        clock: SharedClock,
        content: MemoryContentStore,
        catalog: MemoryCatalog,
        pool: PoolIndex,
        ledger: AllocationLedger,
    ) -> Result<Self, Error> {
        let categories = config.category_table()?;
        let params = config.eviction_params()?;

        let content = Arc::new(content);
        let catalog = Arc::new(catalog);
        let pool = Arc::new(pool);
        let ledger = Arc::new(ledger);
        let locks = Arc::new(CategoryLocks::new());

        let allocator = Allocator::new(ledger.clone(), pool.clone(), params, clock.clone());
        let builder = SetBuilder::new(
            content.clone(),
            catalog.clone(),
            pool.clone(),
            locks.clone(),
            clock.clone(),
        );

        Ok(Self {
            clock,
            content,
            catalog,
            pool,
            ledger,
            allocator,
            builder,
            locks,
            categories,
        })
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn categories(&self) -> &CategoryTable {
        &self.categories
    }

    pub fn content(&self) -> &MemoryContentStore {
        &self.content
    }

    pub fn catalog(&self) -> &MemoryCatalog {
        &self.catalog
    }

    pub fn pool_metadata(&self, category: &CategoryId) -> Result<PoolMetadata, PoolError> {
        self.pool.metadata(category)
    }

    pub fn pool_categories(&self) -> Result<Vec<CategoryId>, PoolError> {
        self.pool.categories()
    }

    /// Build sets for every configured category.
    pub fn build(&self, params: &BuildParams) -> BuildReport {
        self.builder.build(&self.categories.ids(), params)
    }

    /// Administrative drain of one set from a category's pool head.
    pub fn drain_one(&self, category: &CategoryId) -> Result<Option<SetId>, PoolError> {
        let _advisory = self.locks.lock(category);
        self.pool.dequeue_one(category)
    }

    /// Administrative removal of a category's entire pool.
    pub fn drop_pool(&self, category: &CategoryId) -> Result<(), PoolError> {
        let _advisory = self.locks.lock(category);
        self.pool.drop_category(category)
    }

    /// Capture the whole engine state.
    pub fn snapshot(&self) -> Result<Snapshot, Error> {
        Ok(Snapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            saved_at: self.clock.now(),
            content: self.content.export()?,
            catalog: self.catalog.export()?,
            pool: self.pool.export()?,
            ledger: self.ledger.export()?,
        })
    }

    /// Persist the current state to `path` atomically.
    pub fn persist(&self, path: &Path) -> Result<(), Error> {
        let snapshot = self.snapshot()?;
        save(path, &snapshot)?;
        Ok(())
    }
}
