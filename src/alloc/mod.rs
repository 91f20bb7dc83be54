//! Allocator: one access = evict, scan, record.
//!
//! The pool is never modified on allocation. Per-user uniqueness comes
//! from filtering the pool against the user's ledger list under that
//! user's stripe lock, which also serializes concurrent requests for the
//! same user.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{CategoryId, SetId, SharedClock, UserId};
use crate::error::{Effect, Transience};
use crate::evict::{self, EvictionParams, EvictionPlan};
use crate::ledger::{AllocationLedger, LedgerError};
use crate::pool::{PoolError, PoolIndex};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AllocError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl AllocError {
    pub fn transience(&self) -> Transience {
        match self {
            AllocError::Ledger(e) => e.transience(),
            AllocError::Pool(e) => e.transience(),
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            AllocError::Ledger(e) => e.effect(),
            AllocError::Pool(e) => e.effect(),
        }
    }
}

/// Per-category failure reason inside a batch allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationFailure {
    NoSetsAvailable,
    LedgerUnavailable,
    PoolUnavailable,
    InvariantViolation,
}

impl From<&AllocError> for AllocationFailure {
    fn from(err: &AllocError) -> Self {
        match err {
            AllocError::Ledger(LedgerError::Invariant(_)) => AllocationFailure::InvariantViolation,
            AllocError::Ledger(_) => AllocationFailure::LedgerUnavailable,
            AllocError::Pool(_) => AllocationFailure::PoolUnavailable,
        }
    }
}

/// Aggregated outcome of `allocate_batch`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAllocation {
    pub successful: BTreeMap<CategoryId, SetId>,
    pub failed: BTreeMap<CategoryId, AllocationFailure>,
}

pub struct Allocator {
    ledger: Arc<AllocationLedger>,
    pool: Arc<PoolIndex>,
    params: RwLock<EvictionParams>,
    clock: SharedClock,
}

impl Allocator {
    pub fn new(
        ledger: Arc<AllocationLedger>,
        pool: Arc<PoolIndex>,
        params: EvictionParams,
        clock: SharedClock,
    ) -> Self {
        Self {
            ledger,
            pool,
            params: RwLock::new(params),
            clock,
        }
    }

    pub fn params(&self) -> EvictionParams {
        *self.params.read().unwrap_or_else(|err| err.into_inner())
    }

    /// Swap the eviction knobs at runtime.
    pub fn set_params(&self, params: EvictionParams) {
        *self.params.write().unwrap_or_else(|err| err.into_inner()) = params;
    }

    /// Draw the next unseen set for (user, category).
    ///
    /// Returns `None` when the pool is empty or exhausted relative to the
    /// user. Eviction always runs first; its outcome is logged, never an
    /// error. The whole read-modify-write holds the user's stripe, so two
    /// concurrent calls for the same user never return the same set-id.
    pub fn allocate_next(
        &self,
        user: &UserId,
        category: &CategoryId,
    ) -> Result<Option<SetId>, AllocError> {
        let now = self.clock.now();
        let params = self.params();
        let mut guard = self.ledger.lock_user(user)?;

        let entries = guard.entries(category, now)?;
        let plan = evict::plan(&entries, &params, now);
        if !plan.is_empty() {
            let removed = guard.apply_eviction(category, &plan, now);
            tracing::info!(
                user = %user,
                category = %category,
                removed,
                "evicted stale allocations"
            );
        }

        let held = guard.list(category);
        let pool_ids = self.pool.peek_all(category)?;
        let Some(next) = pool_ids.into_iter().find(|id| !held.contains(id)) else {
            tracing::debug!(user = %user, category = %category, "pool exhausted for user");
            return Ok(None);
        };

        // Make room so the append never breaches the cap: a user at
        // exactly the cap drops exactly their oldest.
        let entries = guard.entries(category, now)?;
        let room = evict::plan_for_incoming(&entries, &params);
        if !room.is_empty() {
            guard.apply_eviction(category, &room, now);
        }

        guard.append(category, next.clone(), now)?;
        tracing::debug!(user = %user, category = %category, set = %next, "allocated set");
        Ok(Some(next))
    }

    /// `allocate_next` composed per category. Per-category failures are
    /// aggregated; one bad category does not fail the batch.
    pub fn allocate_batch(&self, user: &UserId, categories: &[CategoryId]) -> BatchAllocation {
        let mut outcome = BatchAllocation::default();
        for category in categories {
            match self.allocate_next(user, category) {
                Ok(Some(set_id)) => {
                    outcome.successful.insert(category.clone(), set_id);
                }
                Ok(None) => {
                    outcome
                        .failed
                        .insert(category.clone(), AllocationFailure::NoSetsAvailable);
                }
                Err(err) => {
                    tracing::error!(
                        user = %user,
                        category = %category,
                        error = %err,
                        "allocation failed"
                    );
                    outcome.failed.insert(category.clone(), (&err).into());
                }
            }
        }
        outcome
    }

    /// Standalone eviction across all of a user's categories.
    pub fn evict_user(
        &self,
        user: &UserId,
    ) -> Result<BTreeMap<CategoryId, EvictionPlan>, AllocError> {
        let now = self.clock.now();
        let params = self.params();
        let mut guard = self.ledger.lock_user(user)?;

        let mut evicted = BTreeMap::new();
        for category in guard.categories() {
            let entries = guard.entries(&category, now)?;
            let plan = evict::plan(&entries, &params, now);
            if !plan.is_empty() {
                guard.apply_eviction(&category, &plan, now);
                evicted.insert(category, plan);
            }
        }
        Ok(evicted)
    }

    /// Administrative clear of a user's entire allocation record.
    pub fn reset_user(&self, user: &UserId) -> Result<usize, AllocError> {
        let mut guard = self.ledger.lock_user(user)?;
        let removed = guard.reset();
        tracing::info!(user = %user, removed, "reset user allocations");
        Ok(removed)
    }
}
