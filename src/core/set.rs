//! Question sets.
//!
//! A set is an ordered fixed-size bundle of item references within a single
//! category. Its `refs` are fixed at creation; `watermark` is the greatest
//! item id consumed by the builder batch that produced it.

use serde::{Deserialize, Serialize};

use super::error::{CoreError, InvalidRecord};
use super::identity::{CategoryId, ContentHash, ItemId, SetId};
use super::time::WallClock;

/// Reference to one item by (id, hash).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub id: ItemId,
    pub hash: ContentHash,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionSet {
    pub set_id: SetId,
    pub category_id: CategoryId,
    pub refs: Vec<ItemRef>,
    pub created_at: WallClock,
    pub watermark: ItemId,
}

impl QuestionSet {
    pub fn new(
        set_id: SetId,
        category_id: CategoryId,
        refs: Vec<ItemRef>,
        created_at: WallClock,
        watermark: ItemId,
    ) -> Result<Self, CoreError> {
        if refs.is_empty() {
            return Err(InvalidRecord {
                reason: format!("set {set_id} has no refs"),
            }
            .into());
        }
        Ok(Self {
            set_id,
            category_id,
            refs,
            created_at,
            watermark,
        })
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_ref(id: &str) -> ItemRef {
        ItemRef {
            id: ItemId::parse(id).unwrap(),
            hash: ContentHash::of_bytes(id.as_bytes()),
        }
    }

    #[test]
    fn rejects_empty_refs() {
        let err = QuestionSet::new(
            SetId::parse("qs-1").unwrap(),
            CategoryId::parse("cat-x").unwrap(),
            Vec::new(),
            WallClock(0),
            ItemId::parse("itm-9").unwrap(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let set = QuestionSet::new(
            SetId::parse("qs-1").unwrap(),
            CategoryId::parse("cat-x").unwrap(),
            vec![item_ref("itm-1"), item_ref("itm-2")],
            WallClock(1_726_000_000_000),
            ItemId::parse("itm-2").unwrap(),
        )
        .unwrap();
        let json = serde_json::to_string(&set).unwrap();
        let parsed: QuestionSet = serde_json::from_str(&json).unwrap();
        assert_eq!(set, parsed);
    }
}
