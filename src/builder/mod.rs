//! Set builder: partition new content into fixed-size sets and feed the
//! pool.
//!
//! The builder is single-writer per category. It resumes past the
//! catalog's high-water mark, consumes items in ascending id order, and
//! stamps every set of a batch with the greatest id consumed so the next
//! run picks up exactly where this one stopped.

use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::core::{
    CategoryId, CoreError, InvalidRecord, ItemId, ItemRef, QuestionSet, SetId, SharedClock,
};
use crate::pool::PoolIndex;
use crate::store::{ContentStore, SetCatalog};

const LOCK_STRIPES: usize = 8;

/// Striped advisory locks keyed by category.
///
/// Builder runs and administrative drains for the same category serialize
/// here; two categories on different stripes proceed in parallel.
#[derive(Debug)]
pub struct CategoryLocks {
    stripes: Vec<Mutex<()>>,
}

impl Default for CategoryLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl CategoryLocks {
    pub fn new() -> Self {
        Self {
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn lock(&self, category: &CategoryId) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        category.as_str().hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % self.stripes.len();
        self.stripes[stripe]
            .lock()
            .unwrap_or_else(|err| err.into_inner())
    }
}

/// Validated build request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildParams {
    num_sets_per_category: usize,
    items_per_set: usize,
}

impl BuildParams {
    pub fn new(num_sets_per_category: usize, items_per_set: usize) -> Result<Self, CoreError> {
        if num_sets_per_category == 0 {
            return Err(InvalidRecord {
                reason: "num_sets_per_category must be positive".into(),
            }
            .into());
        }
        if items_per_set == 0 {
            return Err(InvalidRecord {
                reason: "items_per_set must be positive".into(),
            }
            .into());
        }
        Ok(Self {
            num_sets_per_category,
            items_per_set,
        })
    }

    pub fn num_sets_per_category(&self) -> usize {
        self.num_sets_per_category
    }

    pub fn items_per_set(&self) -> usize {
        self.items_per_set
    }
}

/// What happened for one category during a build run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CategoryBuildOutcome {
    /// Sets were cataloged and enqueued.
    Built {
        sets: usize,
        items_consumed: usize,
        enqueued: usize,
        watermark: ItemId,
    },
    /// Not enough eligible items for even one set.
    Shortfall { available: usize, items_per_set: usize },
    /// The category batch aborted; `stage` names where.
    Failed { stage: String, reason: String },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub per_category: BTreeMap<CategoryId, CategoryBuildOutcome>,
}

impl BuildReport {
    pub fn total_sets(&self) -> usize {
        self.per_category
            .values()
            .map(|outcome| match outcome {
                CategoryBuildOutcome::Built { sets, .. } => *sets,
                _ => 0,
            })
            .sum()
    }
}

pub struct SetBuilder {
    content: Arc<dyn ContentStore>,
    catalog: Arc<dyn SetCatalog>,
    pool: Arc<PoolIndex>,
    locks: Arc<CategoryLocks>,
    clock: SharedClock,
}

impl SetBuilder {
    pub fn new(
        content: Arc<dyn ContentStore>,
        catalog: Arc<dyn SetCatalog>,
        pool: Arc<PoolIndex>,
        locks: Arc<CategoryLocks>,
        clock: SharedClock,
    ) -> Self {
        Self {
            content,
            catalog,
            pool,
            locks,
            clock,
        }
    }

    /// Run one build pass over the given categories.
    ///
    /// Failures are per-category: a category that fails is recorded and the
    /// run continues with the next one.
    pub fn build(&self, categories: &[CategoryId], params: &BuildParams) -> BuildReport {
        let mut report = BuildReport::default();
        for category in categories {
            let outcome = self.build_category(category, params);
            match &outcome {
                CategoryBuildOutcome::Built { sets, enqueued, .. } => {
                    tracing::info!(category = %category, sets, enqueued, "built sets");
                }
                CategoryBuildOutcome::Shortfall {
                    available,
                    items_per_set,
                } => {
                    tracing::warn!(
                        category = %category,
                        available,
                        items_per_set,
                        "builder shortfall: not enough items for a set"
                    );
                }
                CategoryBuildOutcome::Failed { stage, reason } => {
                    tracing::error!(category = %category, stage, reason, "category build failed");
                }
            }
            report.per_category.insert(category.clone(), outcome);
        }
        report
    }

    fn build_category(
        &self,
        category: &CategoryId,
        params: &BuildParams,
    ) -> CategoryBuildOutcome {
        let _advisory = self.locks.lock(category);

        let watermark = match self.catalog.latest_watermark(category) {
            Ok(mark) => mark,
            Err(err) => {
                return CategoryBuildOutcome::Failed {
                    stage: "catalog_read".into(),
                    reason: err.to_string(),
                };
            }
        };

        let mut items = match self.content.query_by_category(category, watermark.as_ref()) {
            Ok(items) => items,
            Err(err) => {
                return CategoryBuildOutcome::Failed {
                    stage: "store_read".into(),
                    reason: err.to_string(),
                };
            }
        };
        // The store promises ascending order; sort anyway so runs stay
        // deterministic against any store.
        items.sort_by(|a, b| a.id.cmp(&b.id));

        let possible = items.len() / params.items_per_set();
        let sets_to_build = possible.min(params.num_sets_per_category());
        if sets_to_build == 0 {
            return CategoryBuildOutcome::Shortfall {
                available: items.len(),
                items_per_set: params.items_per_set(),
            };
        }

        let consumed = sets_to_build * params.items_per_set();
        let batch = &items[..consumed];
        let batch_watermark = batch
            .last()
            .map(|item| item.id.clone())
            .expect("batch is non-empty when sets_to_build > 0");

        let now = self.clock.now();
        let mut set_ids = Vec::with_capacity(sets_to_build);
        for chunk in batch.chunks(params.items_per_set()) {
            let refs: Vec<ItemRef> = chunk
                .iter()
                .map(|item| ItemRef {
                    id: item.id.clone(),
                    hash: item.hash.clone(),
                })
                .collect();
            let set_id = SetId::generate();
            let set = match QuestionSet::new(
                set_id.clone(),
                category.clone(),
                refs,
                now,
                batch_watermark.clone(),
            ) {
                Ok(set) => set,
                Err(err) => {
                    return CategoryBuildOutcome::Failed {
                        stage: "assemble".into(),
                        reason: err.to_string(),
                    };
                }
            };
            // Catalog write errors abort the whole category batch.
            if let Err(err) = self.catalog.put(set) {
                return CategoryBuildOutcome::Failed {
                    stage: "catalog_write".into(),
                    reason: err.to_string(),
                };
            }
            set_ids.push(set_id);
        }

        // Enqueue is at-least-once: on failure the sets exist in the
        // catalog but are not offerable, and re-enqueueing them later is
        // safe because the pool skips ids it already holds.
        let enqueued = match self.pool.enqueue(category, &set_ids, now) {
            Ok(enqueued) => enqueued,
            Err(err) => {
                return CategoryBuildOutcome::Failed {
                    stage: "pool_enqueue".into(),
                    reason: err.to_string(),
                };
            }
        };

        CategoryBuildOutcome::Built {
            sets: sets_to_build,
            items_consumed: consumed,
            enqueued,
            watermark: batch_watermark,
        }
    }
}
