//! Pool index: per-category FIFO of offerable set-ids.
//!
//! The pool is shared across all users. It is mutated by the builder and by
//! administrative drains only; allocation never removes from it. Per-user
//! uniqueness is the ledger's job, which is what lets N users draw disjoint
//! views from one pool without pool-level transactions.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{CategoryId, SetId, WallClock};
use crate::error::{Effect, Transience};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    #[error("pool unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("pool operation `{op}` timed out")]
    Timeout { op: &'static str },
}

impl PoolError {
    pub fn transience(&self) -> Transience {
        Transience::Retryable
    }

    pub fn effect(&self) -> Effect {
        Effect::Unknown
    }
}

/// Category metadata kept alongside the queue.
///
/// `available` is derived from queue length inside the same critical
/// section as every mutation, never cached separately.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMetadata {
    pub available: u64,
    pub last_updated: Option<WallClock>,
    pub last_batch_size: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct CategoryPool {
    queue: VecDeque<SetId>,
    last_updated: Option<WallClock>,
    last_batch_size: u64,
}

impl CategoryPool {
    fn metadata(&self) -> PoolMetadata {
        PoolMetadata {
            available: self.queue.len() as u64,
            last_updated: self.last_updated,
            last_batch_size: self.last_batch_size,
        }
    }
}

/// Serializable pool state, used by the snapshot layer.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolState {
    categories: BTreeMap<CategoryId, CategoryPool>,
}

#[derive(Debug, Default)]
pub struct PoolIndex {
    inner: Mutex<PoolState>,
}

impl PoolIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, op: &'static str) -> Result<std::sync::MutexGuard<'_, PoolState>, PoolError> {
        self.inner.lock().map_err(|_| PoolError::Unavailable {
            reason: format!("pool state poisoned during `{op}`"),
        })
    }

    /// Append set-ids to a category's FIFO.
    ///
    /// Enqueue is at-least-once from the builder's point of view, so ids
    /// already queued are skipped rather than duplicated. Metadata is
    /// updated in the same critical section.
    pub fn enqueue(
        &self,
        category: &CategoryId,
        set_ids: &[SetId],
        now: WallClock,
    ) -> Result<usize, PoolError> {
        let mut state = self.lock("enqueue")?;
        let pool = state.categories.entry(category.clone()).or_default();
        let queued: BTreeSet<&SetId> = pool.queue.iter().collect();
        let fresh: Vec<SetId> = set_ids
            .iter()
            .filter(|id| !queued.contains(id))
            .cloned()
            .collect();
        let appended = fresh.len();
        if appended < set_ids.len() {
            tracing::warn!(
                category = %category,
                skipped = set_ids.len() - appended,
                "enqueue skipped set-ids already in pool"
            );
        }
        pool.queue.extend(fresh);
        pool.last_updated = Some(now);
        pool.last_batch_size = appended as u64;
        Ok(appended)
    }

    /// Non-destructive FIFO read, earliest insert first.
    pub fn peek_all(&self, category: &CategoryId) -> Result<Vec<SetId>, PoolError> {
        let state = self.lock("peek_all")?;
        Ok(state
            .categories
            .get(category)
            .map(|pool| pool.queue.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Destructive pop of the pool head. Administrative drains only; the
    /// allocator never calls this.
    pub fn dequeue_one(&self, category: &CategoryId) -> Result<Option<SetId>, PoolError> {
        let mut state = self.lock("dequeue_one")?;
        let Some(pool) = state.categories.get_mut(category) else {
            return Ok(None);
        };
        Ok(pool.queue.pop_front())
    }

    /// Remove a category's queue and metadata entirely.
    pub fn drop_category(&self, category: &CategoryId) -> Result<(), PoolError> {
        let mut state = self.lock("drop_category")?;
        state.categories.remove(category);
        Ok(())
    }

    pub fn metadata(&self, category: &CategoryId) -> Result<PoolMetadata, PoolError> {
        let state = self.lock("metadata")?;
        Ok(state
            .categories
            .get(category)
            .map(CategoryPool::metadata)
            .unwrap_or(PoolMetadata {
                available: 0,
                last_updated: None,
                last_batch_size: 0,
            }))
    }

    /// Categories that currently have a pool entry.
    pub fn categories(&self) -> Result<Vec<CategoryId>, PoolError> {
        let state = self.lock("categories")?;
        Ok(state.categories.keys().cloned().collect())
    }

    pub fn export(&self) -> Result<PoolState, PoolError> {
        let state = self.lock("export")?;
        Ok(state.clone())
    }

    pub fn restore(state: PoolState) -> Self {
        Self {
            inner: Mutex::new(state),
        }
    }
}
