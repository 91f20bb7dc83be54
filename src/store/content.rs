//! Content store: durable per-item records.
//!
//! Items are append-only and deduplicated by content hash at insert. The
//! dedupe is an insert-if-absent at the hash index inside one critical
//! section, so two builders racing the same payload cannot both store it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::core::{CategoryId, ContentHash, Item, ItemId, ItemRef};

/// Outcome of a `put_batch`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub stored: u64,
    pub skipped_duplicate_by_hash: u64,
    pub skipped_duplicate_id: u64,
}

/// Read/write surface of primary content storage.
pub trait ContentStore: Send + Sync {
    fn put_batch(&self, items: Vec<Item>) -> Result<IngestReport, StoreError>;

    /// Fetch items by (id, hash); refs with no exact match are omitted.
    fn get_batch(&self, refs: &[ItemRef]) -> Result<Vec<Item>, StoreError>;

    /// Items of a category with id strictly greater than `after`,
    /// ascending by id.
    fn query_by_category(
        &self,
        category: &CategoryId,
        after: Option<&ItemId>,
    ) -> Result<Vec<Item>, StoreError>;

    fn query_by_hash(&self, hash: &ContentHash) -> Result<Vec<Item>, StoreError>;
}

/// Serializable content state: the primary map only, indexes are rebuilt.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentState {
    items: BTreeMap<ItemId, Item>,
}

#[derive(Debug, Default)]
struct Indexed {
    items: BTreeMap<ItemId, Item>,
    by_hash: BTreeMap<ContentHash, ItemId>,
    by_category: BTreeMap<CategoryId, BTreeSet<ItemId>>,
}

impl Indexed {
    fn from_state(state: ContentState) -> Self {
        let mut indexed = Self {
            items: state.items,
            ..Self::default()
        };
        for (id, item) in &indexed.items {
            indexed.by_hash.insert(item.hash.clone(), id.clone());
            indexed
                .by_category
                .entry(item.category_id.clone())
                .or_default()
                .insert(id.clone());
        }
        indexed
    }
}

#[derive(Debug, Default)]
pub struct MemoryContentStore {
    inner: Mutex<Indexed>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(state: ContentState) -> Self {
        Self {
            inner: Mutex::new(Indexed::from_state(state)),
        }
    }

    pub fn export(&self) -> Result<ContentState, StoreError> {
        let inner = self.lock("export")?;
        Ok(ContentState {
            items: inner.items.clone(),
        })
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock("len")?.items.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.lock("is_empty")?.items.is_empty())
    }

    fn lock(&self, op: &'static str) -> Result<std::sync::MutexGuard<'_, Indexed>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Unavailable {
            reason: format!("content store poisoned during `{op}`"),
        })
    }
}

impl ContentStore for MemoryContentStore {
    fn put_batch(&self, items: Vec<Item>) -> Result<IngestReport, StoreError> {
        let mut inner = self.lock("put_batch")?;
        let mut report = IngestReport::default();
        for item in items {
            if inner.by_hash.contains_key(&item.hash) {
                report.skipped_duplicate_by_hash += 1;
                continue;
            }
            if inner.items.contains_key(&item.id) {
                tracing::warn!(
                    item = %item.id,
                    "item id already stored with a different hash, skipping"
                );
                report.skipped_duplicate_id += 1;
                continue;
            }
            inner.by_hash.insert(item.hash.clone(), item.id.clone());
            inner
                .by_category
                .entry(item.category_id.clone())
                .or_default()
                .insert(item.id.clone());
            inner.items.insert(item.id.clone(), item);
            report.stored += 1;
        }
        Ok(report)
    }

    fn get_batch(&self, refs: &[ItemRef]) -> Result<Vec<Item>, StoreError> {
        let inner = self.lock("get_batch")?;
        Ok(refs
            .iter()
            .filter_map(|r| {
                inner
                    .items
                    .get(&r.id)
                    .filter(|item| item.hash == r.hash)
                    .cloned()
            })
            .collect())
    }

    fn query_by_category(
        &self,
        category: &CategoryId,
        after: Option<&ItemId>,
    ) -> Result<Vec<Item>, StoreError> {
        let inner = self.lock("query_by_category")?;
        let Some(ids) = inner.by_category.get(category) else {
            return Ok(Vec::new());
        };
        // BTreeSet iteration is ascending, which is the order the builder
        // depends on.
        Ok(ids
            .iter()
            .filter(|id| after.is_none_or(|mark| id.as_str() > mark.as_str()))
            .filter_map(|id| inner.items.get(id).cloned())
            .collect())
    }

    fn query_by_hash(&self, hash: &ContentHash) -> Result<Vec<Item>, StoreError> {
        let inner = self.lock("query_by_hash")?;
        Ok(inner
            .by_hash
            .get(hash)
            .and_then(|id| inner.items.get(id).cloned())
            .into_iter()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(id: &str, cat: &str, payload: serde_json::Value) -> Item {
        Item::from_payload(
            ItemId::parse(id).unwrap(),
            CategoryId::parse(cat).unwrap(),
            payload,
        )
        .unwrap()
    }

    #[test]
    fn put_batch_dedupes_by_hash() {
        let store = MemoryContentStore::new();
        let report = store
            .put_batch(vec![
                item("i1", "cat-x", json!({"q": "alpha"})),
                item("i2", "cat-x", json!({"q": "alpha"})), // same payload, same hash
                item("i3", "cat-x", json!({"q": "beta"})),
            ])
            .unwrap();
        assert_eq!(report.stored, 2);
        assert_eq!(report.skipped_duplicate_by_hash, 1);
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn put_batch_is_idempotent_across_calls() {
        let store = MemoryContentStore::new();
        let batch = vec![item("i1", "cat-x", json!({"q": "alpha"}))];
        store.put_batch(batch.clone()).unwrap();
        let second = store.put_batch(batch).unwrap();
        assert_eq!(second.stored, 0);
        assert_eq!(second.skipped_duplicate_by_hash, 1);
    }

    #[test]
    fn query_by_category_is_ascending_and_exclusive() {
        let store = MemoryContentStore::new();
        store
            .put_batch(vec![
                item("i03", "cat-x", json!({"q": "c"})),
                item("i01", "cat-x", json!({"q": "a"})),
                item("i02", "cat-x", json!({"q": "b"})),
                item("i04", "cat-y", json!({"q": "d"})),
            ])
            .unwrap();

        let all: Vec<String> = store
            .query_by_category(&CategoryId::parse("cat-x").unwrap(), None)
            .unwrap()
            .into_iter()
            .map(|i| i.id.to_string())
            .collect();
        assert_eq!(all, vec!["i01", "i02", "i03"]);

        let after = ItemId::parse("i01").unwrap();
        let rest: Vec<String> = store
            .query_by_category(&CategoryId::parse("cat-x").unwrap(), Some(&after))
            .unwrap()
            .into_iter()
            .map(|i| i.id.to_string())
            .collect();
        assert_eq!(rest, vec!["i02", "i03"]);
    }

    #[test]
    fn get_batch_matches_id_and_hash() {
        let store = MemoryContentStore::new();
        let stored = item("i1", "cat-x", json!({"q": "alpha"}));
        store.put_batch(vec![stored.clone()]).unwrap();

        let hit = store
            .get_batch(&[ItemRef {
                id: stored.id.clone(),
                hash: stored.hash.clone(),
            }])
            .unwrap();
        assert_eq!(hit.len(), 1);

        let miss = store
            .get_batch(&[ItemRef {
                id: stored.id.clone(),
                hash: ContentHash::of_bytes(b"other"),
            }])
            .unwrap();
        assert!(miss.is_empty());
    }

    #[test]
    fn restore_rebuilds_indexes() {
        let store = MemoryContentStore::new();
        store
            .put_batch(vec![item("i1", "cat-x", json!({"q": "alpha"}))])
            .unwrap();
        let state = store.export().unwrap();
        let restored = MemoryContentStore::restore(state);

        let hash = restored
            .query_by_category(&CategoryId::parse("cat-x").unwrap(), None)
            .unwrap()[0]
            .hash
            .clone();
        assert_eq!(restored.query_by_hash(&hash).unwrap().len(), 1);
    }
}
