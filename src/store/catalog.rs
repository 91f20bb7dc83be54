//! Set catalog: durable record of each built set.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::core::{CategoryId, ItemId, QuestionSet, SetId};

/// Read/write surface of set storage.
pub trait SetCatalog: Send + Sync {
    fn put(&self, set: QuestionSet) -> Result<(), StoreError>;

    fn get(&self, set_id: &SetId) -> Result<Option<QuestionSet>, StoreError>;

    /// Fetch sets by id; unknown ids are omitted.
    fn get_batch(&self, set_ids: &[SetId]) -> Result<Vec<QuestionSet>, StoreError>;

    /// The greatest watermark over all sets of a category, or `None` if the
    /// category has no sets. The builder resumes past this.
    fn latest_watermark(&self, category: &CategoryId) -> Result<Option<ItemId>, StoreError>;
}

/// Serializable catalog state: the primary map only, index rebuilt.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogState {
    sets: BTreeMap<SetId, QuestionSet>,
}

#[derive(Debug, Default)]
struct Indexed {
    sets: BTreeMap<SetId, QuestionSet>,
    by_category: BTreeMap<CategoryId, BTreeSet<SetId>>,
}

impl Indexed {
    fn from_state(state: CatalogState) -> Self {
        let mut indexed = Self {
            sets: state.sets,
            ..Self::default()
        };
        for (id, set) in &indexed.sets {
            indexed
                .by_category
                .entry(set.category_id.clone())
                .or_default()
                .insert(id.clone());
        }
        indexed
    }
}

#[derive(Debug, Default)]
pub struct MemoryCatalog {
    inner: Mutex<Indexed>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(state: CatalogState) -> Self {
        Self {
            inner: Mutex::new(Indexed::from_state(state)),
        }
    }

    pub fn export(&self) -> Result<CatalogState, StoreError> {
        let inner = self.lock("export")?;
        Ok(CatalogState {
            sets: inner.sets.clone(),
        })
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock("len")?.sets.len())
    }

    fn lock(&self, op: &'static str) -> Result<std::sync::MutexGuard<'_, Indexed>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Unavailable {
            reason: format!("set catalog poisoned during `{op}`"),
        })
    }
}

impl SetCatalog for MemoryCatalog {
    fn put(&self, set: QuestionSet) -> Result<(), StoreError> {
        let mut inner = self.lock("put")?;
        inner
            .by_category
            .entry(set.category_id.clone())
            .or_default()
            .insert(set.set_id.clone());
        inner.sets.insert(set.set_id.clone(), set);
        Ok(())
    }

    fn get(&self, set_id: &SetId) -> Result<Option<QuestionSet>, StoreError> {
        Ok(self.lock("get")?.sets.get(set_id).cloned())
    }

    fn get_batch(&self, set_ids: &[SetId]) -> Result<Vec<QuestionSet>, StoreError> {
        let inner = self.lock("get_batch")?;
        Ok(set_ids
            .iter()
            .filter_map(|id| inner.sets.get(id).cloned())
            .collect())
    }

    fn latest_watermark(&self, category: &CategoryId) -> Result<Option<ItemId>, StoreError> {
        let inner = self.lock("latest_watermark")?;
        let Some(ids) = inner.by_category.get(category) else {
            return Ok(None);
        };
        Ok(ids
            .iter()
            .filter_map(|id| inner.sets.get(id))
            .map(|set| set.watermark.clone())
            .max())
    }
}
