//! Content items.
//!
//! An item is one unit of content. Identity is (id, hash); items are
//! append-only once stored. The payload stays schemaless JSON so content
//! shapes can evolve without a store migration, but legacy field aliases
//! are normalized exactly once, at ingest.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{CoreError, InvalidRecord};
use super::identity::{CategoryId, ContentHash, ItemId};

/// Field aliases accepted at ingest and rewritten to the canonical name.
const LEGACY_FIELD_ALIASES: &[(&str, &str)] = &[
    ("correct-answer-idx", "correct-answer-index"),
    ("answer-idx", "correct-answer-index"),
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub hash: ContentHash,
    pub category_id: CategoryId,
    pub payload: Value,
}

impl Item {
    /// Build an item from a raw payload: normalize legacy aliases, then
    /// derive the content hash from the canonical payload bytes.
    pub fn from_payload(
        id: ItemId,
        category_id: CategoryId,
        mut payload: Value,
    ) -> Result<Self, CoreError> {
        normalize_payload(&mut payload)?;
        let hash = hash_payload(&payload);
        Ok(Self {
            id,
            hash,
            category_id,
            payload,
        })
    }
}

/// Hash the canonical payload encoding.
///
/// `serde_json` maps are key-sorted, so `to_string` of a `Value` built via
/// `serde_json` is already canonical for our purposes.
pub fn hash_payload(payload: &Value) -> ContentHash {
    let canonical = payload.to_string();
    ContentHash::of_bytes(canonical.as_bytes())
}

/// One-shot normalization of legacy field names in an item payload.
///
/// Only top-level object keys are rewritten. A payload carrying both the
/// alias and the canonical key is refused rather than silently merged.
pub fn normalize_payload(payload: &mut Value) -> Result<(), CoreError> {
    let Some(object) = payload.as_object_mut() else {
        return Ok(());
    };
    for (alias, canonical) in LEGACY_FIELD_ALIASES {
        if let Some(value) = object.remove(*alias) {
            if object.contains_key(*canonical) {
                return Err(InvalidRecord {
                    reason: format!("payload has both `{alias}` and `{canonical}`"),
                }
                .into());
            }
            object.insert((*canonical).to_string(), value);
        }
    }
    Ok(())
}
