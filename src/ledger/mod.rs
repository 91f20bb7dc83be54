//! Allocation ledger: per-user, per-category assignment records.
//!
//! The ledger is the only state the allocator mutates. Each (user,
//! category) holds an ordered set-id list (oldest first), exactly one
//! `assigned_at` per listed id, and counters. Users are sharded across a
//! fixed number of lock stripes; eviction plus allocation for one user runs
//! under that user's stripe for the whole read-modify-write, which is what
//! upholds the no-duplicate invariant under concurrent requests.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{CategoryId, SetId, UserId, WallClock, later_of};
use crate::error::{Effect, Transience};
use crate::evict::EvictionPlan;

const STRIPE_COUNT: usize = 16;

/// Serialization bug made visible: a user's list holds a duplicate set-id.
#[derive(Debug, Error, Clone)]
#[error("allocation invariant violated for user `{user}` category `{category}`: {detail}")]
pub struct InvariantViolation {
    pub user: UserId,
    pub category: CategoryId,
    pub detail: String,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LedgerError {
    #[error("ledger unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("ledger operation `{op}` timed out")]
    Timeout { op: &'static str },
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

impl LedgerError {
    pub fn transience(&self) -> Transience {
        match self {
            LedgerError::Unavailable { .. } | LedgerError::Timeout { .. } => Transience::Retryable,
            LedgerError::Invariant(_) => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            LedgerError::Invariant(_) => Effect::None,
            _ => Effect::Unknown,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct CategoryAllocations {
    set_ids: Vec<SetId>,
    assigned_at: BTreeMap<SetId, WallClock>,
    count: u64,
    last_assigned: Option<SetId>,
    last_updated: Option<WallClock>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct UserRecord {
    categories: BTreeMap<CategoryId, CategoryAllocations>,
    last_updated: Option<WallClock>,
    evicted_count: u64,
    evicted_at: Option<WallClock>,
}

/// Read-only view of a user's bookkeeping counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMeta {
    pub last_updated: Option<WallClock>,
    pub evicted_count: u64,
    pub evicted_at: Option<WallClock>,
}

/// Serializable ledger state, used by the snapshot layer.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerState {
    users: BTreeMap<UserId, UserRecord>,
}

#[derive(Debug)]
pub struct AllocationLedger {
    stripes: Vec<Mutex<BTreeMap<UserId, UserRecord>>>,
}

impl Default for AllocationLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl AllocationLedger {
    pub fn new() -> Self {
        Self {
            stripes: (0..STRIPE_COUNT).map(|_| Mutex::default()).collect(),
        }
    }

    fn stripe_of(&self, user: &UserId) -> usize {
        let mut hasher = DefaultHasher::new();
        user.as_str().hash(&mut hasher);
        (hasher.finish() as usize) % self.stripes.len()
    }

    /// Take the user's stripe for a serialized read-modify-write.
    pub fn lock_user(&self, user: &UserId) -> Result<UserGuard<'_>, LedgerError> {
        let stripe = self.stripe_of(user);
        let guard = self.stripes[stripe]
            .lock()
            .map_err(|_| LedgerError::Unavailable {
                reason: format!("ledger stripe {stripe} poisoned"),
            })?;
        Ok(UserGuard {
            guard,
            user: user.clone(),
        })
    }

    pub fn export(&self) -> Result<LedgerState, LedgerError> {
        let mut users = BTreeMap::new();
        for (stripe, mutex) in self.stripes.iter().enumerate() {
            let guard = mutex.lock().map_err(|_| LedgerError::Unavailable {
                reason: format!("ledger stripe {stripe} poisoned"),
            })?;
            for (user, record) in guard.iter() {
                users.insert(user.clone(), record.clone());
            }
        }
        Ok(LedgerState { users })
    }

    /// Rebuild from snapshot state, verifying the no-duplicate invariant.
    ///
    /// A timestamp with no matching list entry is dropped with a warning; a
    /// list entry with no timestamp is kept (it reconciles to "now" on the
    /// next read).
    pub fn restore(state: LedgerState) -> Result<Self, LedgerError> {
        let ledger = Self::new();
        for (user, mut record) in state.users {
            for (category, alloc) in record.categories.iter_mut() {
                let mut seen = std::collections::BTreeSet::new();
                for set_id in &alloc.set_ids {
                    if !seen.insert(set_id.clone()) {
                        return Err(InvariantViolation {
                            user: user.clone(),
                            category: category.clone(),
                            detail: format!("duplicate set-id `{set_id}` in snapshot"),
                        }
                        .into());
                    }
                }
                let orphaned: Vec<SetId> = alloc
                    .assigned_at
                    .keys()
                    .filter(|id| !seen.contains(*id))
                    .cloned()
                    .collect();
                for id in orphaned {
                    tracing::warn!(
                        user = %user,
                        category = %category,
                        set_id = %id,
                        "dropping orphaned assignment timestamp from snapshot"
                    );
                    alloc.assigned_at.remove(&id);
                }
                alloc.count = alloc.set_ids.len() as u64;
            }
            let stripe = ledger.stripe_of(&user);
            let mut guard =
                ledger.stripes[stripe]
                    .lock()
                    .map_err(|_| LedgerError::Unavailable {
                        reason: format!("ledger stripe {stripe} poisoned"),
                    })?;
            guard.insert(user, record);
        }
        Ok(ledger)
    }
}

/// Exclusive access to one user's record for the lifetime of an operation.
pub struct UserGuard<'a> {
    guard: MutexGuard<'a, BTreeMap<UserId, UserRecord>>,
    user: UserId,
}

impl UserGuard<'_> {
    pub fn user(&self) -> &UserId {
        &self.user
    }

    fn record(&self) -> Option<&UserRecord> {
        self.guard.get(&self.user)
    }

    fn record_mut(&mut self) -> &mut UserRecord {
        self.guard.entry(self.user.clone()).or_default()
    }

    /// Categories with at least one allocation.
    pub fn categories(&self) -> Vec<CategoryId> {
        self.record()
            .map(|record| record.categories.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// The ordered set-id list for a category, oldest first.
    pub fn list(&self, category: &CategoryId) -> Vec<SetId> {
        self.record()
            .and_then(|record| record.categories.get(category))
            .map(|alloc| alloc.set_ids.clone())
            .unwrap_or_default()
    }

    pub fn assigned_at(&self, category: &CategoryId, set_id: &SetId) -> Option<WallClock> {
        self.record()
            .and_then(|record| record.categories.get(category))
            .and_then(|alloc| alloc.assigned_at.get(set_id))
            .copied()
    }

    pub fn meta(&self) -> UserMeta {
        let record = self.record();
        UserMeta {
            last_updated: record.and_then(|r| r.last_updated),
            evicted_count: record.map(|r| r.evicted_count).unwrap_or(0),
            evicted_at: record.and_then(|r| r.evicted_at),
        }
    }

    /// Snapshot of (set-id, assigned-at) in list order, verifying the
    /// no-duplicate invariant.
    ///
    /// A list entry with no timestamp is the crash window between "append
    /// list" and "write timestamp": it reconciles to `now` and the
    /// timestamp is written back.
    pub fn entries(
        &mut self,
        category: &CategoryId,
        now: WallClock,
    ) -> Result<Vec<(SetId, WallClock)>, LedgerError> {
        let user = self.user.clone();
        let Some(record) = self.guard.get_mut(&user) else {
            return Ok(Vec::new());
        };
        let Some(alloc) = record.categories.get_mut(category) else {
            return Ok(Vec::new());
        };

        let mut seen = std::collections::BTreeSet::new();
        let mut entries = Vec::with_capacity(alloc.set_ids.len());
        for set_id in &alloc.set_ids {
            if !seen.insert(set_id.clone()) {
                return Err(InvariantViolation {
                    user,
                    category: category.clone(),
                    detail: format!("duplicate set-id `{set_id}` in allocation list"),
                }
                .into());
            }
            let assigned = match alloc.assigned_at.entry(set_id.clone()) {
                Entry::Occupied(entry) => *entry.get(),
                Entry::Vacant(slot) => {
                    tracing::warn!(
                        user = %self.user,
                        category = %category,
                        set_id = %set_id,
                        "reconciling missing assignment timestamp to now"
                    );
                    *slot.insert(now)
                }
            };
            entries.push((set_id.clone(), assigned));
        }
        Ok(entries)
    }

    /// Apply an eviction plan: drop the planned ids and their timestamps in
    /// one write, maintain counters, and delete the category entry if it
    /// empties. Returns how many ids were actually removed.
    pub fn apply_eviction(
        &mut self,
        category: &CategoryId,
        plan: &EvictionPlan,
        now: WallClock,
    ) -> usize {
        if plan.is_empty() {
            return 0;
        }
        let record = self.record_mut();
        let Some(alloc) = record.categories.get_mut(category) else {
            return 0;
        };

        let mut removed = 0usize;
        for decision in &plan.remove {
            if let Some(pos) = alloc.set_ids.iter().position(|id| *id == decision.set_id) {
                alloc.set_ids.remove(pos);
                alloc.assigned_at.remove(&decision.set_id);
                removed += 1;
            }
        }
        if removed == 0 {
            return 0;
        }

        alloc.count = alloc.set_ids.len() as u64;
        alloc.last_updated = Some(now);
        if alloc.set_ids.is_empty() {
            record.categories.remove(category);
        }
        record.evicted_count += removed as u64;
        record.evicted_at = Some(now);
        record.last_updated = later_of(record.last_updated, Some(now));
        removed
    }

    /// Record a fresh assignment: append to the list and write the
    /// timestamp in the same write.
    pub fn append(
        &mut self,
        category: &CategoryId,
        set_id: SetId,
        now: WallClock,
    ) -> Result<(), LedgerError> {
        let user = self.user.clone();
        let record = self.record_mut();
        let alloc = record.categories.entry(category.clone()).or_default();
        if alloc.set_ids.contains(&set_id) {
            return Err(InvariantViolation {
                user,
                category: category.clone(),
                detail: format!("set-id `{set_id}` already allocated"),
            }
            .into());
        }
        alloc.set_ids.push(set_id.clone());
        alloc.assigned_at.insert(set_id.clone(), now);
        alloc.count = alloc.set_ids.len() as u64;
        alloc.last_assigned = Some(set_id);
        alloc.last_updated = Some(now);
        record.last_updated = later_of(record.last_updated, Some(now));
        Ok(())
    }

    /// Administrative reset: drop the user's entire record.
    pub fn reset(&mut self) -> usize {
        let Some(record) = self.guard.remove(&self.user) else {
            return 0;
        };
        record
            .categories
            .values()
            .map(|alloc| alloc.set_ids.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evict::{EvictReason, EvictionPlan, PlannedEviction};

    fn user(s: &str) -> UserId {
        UserId::new(s).unwrap()
    }

    fn cat(s: &str) -> CategoryId {
        CategoryId::parse(s).unwrap()
    }

    fn set(s: &str) -> SetId {
        SetId::parse(s).unwrap()
    }

    fn plan_removing(ids: &[&str]) -> EvictionPlan {
        EvictionPlan {
            remove: ids
                .iter()
                .map(|id| PlannedEviction {
                    set_id: set(id),
                    reason: EvictReason::ExceededCap,
                })
                .collect(),
        }
    }

    #[test]
    fn append_updates_list_and_counters() {
        let ledger = AllocationLedger::new();
        let mut guard = ledger.lock_user(&user("u1")).unwrap();
        guard.append(&cat("cat-x"), set("s1"), WallClock(10)).unwrap();
        guard.append(&cat("cat-x"), set("s2"), WallClock(20)).unwrap();

        assert_eq!(guard.list(&cat("cat-x")), vec![set("s1"), set("s2")]);
        assert_eq!(guard.assigned_at(&cat("cat-x"), &set("s1")), Some(WallClock(10)));
        assert_eq!(guard.assigned_at(&cat("cat-x"), &set("s2")), Some(WallClock(20)));
        assert_eq!(guard.meta().last_updated, Some(WallClock(20)));
    }

    #[test]
    fn append_rejects_duplicate() {
        let ledger = AllocationLedger::new();
        let mut guard = ledger.lock_user(&user("u1")).unwrap();
        guard.append(&cat("cat-x"), set("s1"), WallClock(10)).unwrap();
        let err = guard.append(&cat("cat-x"), set("s1"), WallClock(20));
        assert!(matches!(err, Err(LedgerError::Invariant(_))));
    }

    #[test]
    fn eviction_removes_ids_and_timestamps_together() {
        let ledger = AllocationLedger::new();
        let mut guard = ledger.lock_user(&user("u1")).unwrap();
        for (i, id) in ["s1", "s2", "s3"].iter().enumerate() {
            guard
                .append(&cat("cat-x"), set(id), WallClock(10 * (i as u64 + 1)))
                .unwrap();
        }

        let removed = guard.apply_eviction(&cat("cat-x"), &plan_removing(&["s1", "s2"]), WallClock(99));
        assert_eq!(removed, 2);
        assert_eq!(guard.list(&cat("cat-x")), vec![set("s3")]);
        assert_eq!(guard.assigned_at(&cat("cat-x"), &set("s1")), None);
        assert_eq!(guard.meta().evicted_count, 2);
        assert_eq!(guard.meta().evicted_at, Some(WallClock(99)));
    }

    #[test]
    fn eviction_emptying_category_removes_entry() {
        let ledger = AllocationLedger::new();
        let mut guard = ledger.lock_user(&user("u1")).unwrap();
        guard.append(&cat("cat-x"), set("s1"), WallClock(10)).unwrap();
        guard.apply_eviction(&cat("cat-x"), &plan_removing(&["s1"]), WallClock(20));
        assert!(guard.categories().is_empty());
    }

    #[test]
    fn entries_reconciles_missing_timestamp() {
        let ledger = AllocationLedger::new();
        {
            let mut guard = ledger.lock_user(&user("u1")).unwrap();
            guard.append(&cat("cat-x"), set("s1"), WallClock(10)).unwrap();
        }
        // Simulate the crash window by restoring a snapshot whose timestamp
        // map is missing an entry.
        let mut state = ledger.export().unwrap();
        let record = state.users.get_mut(&user("u1")).unwrap();
        record
            .categories
            .get_mut(&cat("cat-x"))
            .unwrap()
            .assigned_at
            .clear();
        let restored = AllocationLedger::restore(state).unwrap();

        let mut guard = restored.lock_user(&user("u1")).unwrap();
        let entries = guard.entries(&cat("cat-x"), WallClock(555)).unwrap();
        assert_eq!(entries, vec![(set("s1"), WallClock(555))]);
        // Reconciliation persisted the timestamp.
        assert_eq!(guard.assigned_at(&cat("cat-x"), &set("s1")), Some(WallClock(555)));
    }

    #[test]
    fn restore_rejects_duplicate_list_entries() {
        let ledger = AllocationLedger::new();
        {
            let mut guard = ledger.lock_user(&user("u1")).unwrap();
            guard.append(&cat("cat-x"), set("s1"), WallClock(10)).unwrap();
        }
        let mut state = ledger.export().unwrap();
        state
            .users
            .get_mut(&user("u1"))
            .unwrap()
            .categories
            .get_mut(&cat("cat-x"))
            .unwrap()
            .set_ids
            .push(set("s1"));
        assert!(matches!(
            AllocationLedger::restore(state),
            Err(LedgerError::Invariant(_))
        ));
    }

    #[test]
    fn reset_clears_user_record() {
        let ledger = AllocationLedger::new();
        {
            let mut guard = ledger.lock_user(&user("u1")).unwrap();
            guard.append(&cat("cat-x"), set("s1"), WallClock(10)).unwrap();
            guard.append(&cat("cat-y"), set("s2"), WallClock(11)).unwrap();
        }
        let mut guard = ledger.lock_user(&user("u1")).unwrap();
        assert_eq!(guard.reset(), 2);
        assert!(guard.categories().is_empty());
        assert_eq!(guard.meta().evicted_count, 0);
    }

    #[test]
    fn export_roundtrip_preserves_records() {
        let ledger = AllocationLedger::new();
        {
            let mut guard = ledger.lock_user(&user("u1")).unwrap();
            guard.append(&cat("cat-x"), set("s1"), WallClock(10)).unwrap();
        }
        let restored = AllocationLedger::restore(ledger.export().unwrap()).unwrap();
        let guard = restored.lock_user(&user("u1")).unwrap();
        assert_eq!(guard.list(&cat("cat-x")), vec![set("s1")]);
    }
}
