//! Operations surface: wire-shaped requests/responses and their handlers.
//!
//! These types define the transport-neutral contract (camelCase on the
//! wire); any HTTP or IPC front-end serializes them as-is. Handlers
//! validate, then delegate to the engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::alloc::AllocationFailure;
use crate::builder::{BuildParams, BuildReport};
use crate::core::{CategoryId, CoreError, Item, ItemId, UserId};
use crate::engine::Engine;
use crate::error::{Effect, Transience};
use crate::store::{ContentStore, IngestReport, SetCatalog, StoreError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("`{field}` must be strictly positive")]
    NonPositive { field: &'static str },
    #[error("category_ids must be a non-empty array")]
    EmptyCategories,
    #[error("unknown category `{raw}`")]
    UnknownCategory { raw: String },
    #[error(transparent)]
    Invalid(#[from] CoreError),
}

impl ValidationError {
    pub fn transience(&self) -> Transience {
        Transience::Permanent
    }

    pub fn effect(&self) -> Effect {
        Effect::None
    }
}

// =========================================================================
// generate-sets
// =========================================================================

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateSetsRequest {
    pub num_sets_per_category: u64,
    pub items_per_set: u64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateSetsAccepted {
    pub accepted: bool,
    pub params: GenerateSetsRequest,
}

pub fn validate_generate(request: &GenerateSetsRequest) -> Result<BuildParams, ValidationError> {
    if request.num_sets_per_category == 0 {
        return Err(ValidationError::NonPositive {
            field: "numSetsPerCategory",
        });
    }
    if request.items_per_set == 0 {
        return Err(ValidationError::NonPositive {
            field: "itemsPerSet",
        });
    }
    BuildParams::new(
        request.num_sets_per_category as usize,
        request.items_per_set as usize,
    )
    .map_err(ValidationError::from)
}

/// Validate and run a build pass over every configured category.
pub fn generate_sets(
    engine: &Engine,
    request: GenerateSetsRequest,
) -> Result<(GenerateSetsAccepted, BuildReport), ValidationError> {
    let params = validate_generate(&request)?;
    let report = engine.build(&params);
    Ok((
        GenerateSetsAccepted {
            accepted: true,
            params: request,
        },
        report,
    ))
}

// =========================================================================
// allocate
// =========================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocateRequest {
    pub user_id: String,
    pub category_ids: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSummary {
    pub requested: usize,
    pub successful: usize,
    pub failed: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocateResponse {
    pub user_id: String,
    pub successful: BTreeMap<CategoryId, crate::core::SetId>,
    pub failed: BTreeMap<CategoryId, AllocationFailure>,
    pub summary: AllocationSummary,
}

fn validate_user(raw: &str) -> Result<UserId, ValidationError> {
    UserId::new(raw).map_err(ValidationError::from)
}

fn validate_categories(
    engine: &Engine,
    raw: &[String],
) -> Result<Vec<CategoryId>, ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::EmptyCategories);
    }
    let mut categories = Vec::with_capacity(raw.len());
    for id in raw {
        let category = CategoryId::parse(id)?;
        if !engine.categories().contains(&category) {
            return Err(ValidationError::UnknownCategory { raw: id.clone() });
        }
        categories.push(category);
    }
    Ok(categories)
}

/// Allocate the next unseen set per requested category.
pub fn allocate(
    engine: &Engine,
    request: AllocateRequest,
) -> Result<AllocateResponse, ValidationError> {
    let user = validate_user(&request.user_id)?;
    let categories = validate_categories(engine, &request.category_ids)?;

    let outcome = engine.allocator().allocate_batch(&user, &categories);
    let summary = AllocationSummary {
        requested: categories.len(),
        successful: outcome.successful.len(),
        failed: outcome.failed.len(),
    };
    Ok(AllocateResponse {
        user_id: request.user_id,
        successful: outcome.successful,
        failed: outcome.failed,
        summary,
    })
}

// =========================================================================
// merge
// =========================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub user_id: String,
    pub category_ids: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedCategory {
    pub set_id: crate::core::SetId,
    pub item_count: usize,
    pub items: Vec<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResponse {
    pub user_id: String,
    pub categories: BTreeMap<CategoryId, MergedCategory>,
    pub failed: BTreeMap<CategoryId, AllocationFailure>,
    pub all_items: Vec<Value>,
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Allocate per category and materialize the drawn sets' content.
pub fn merge(engine: &Engine, request: MergeRequest) -> Result<MergeResponse, MergeError> {
    let allocated = allocate(
        engine,
        AllocateRequest {
            user_id: request.user_id.clone(),
            category_ids: request.category_ids,
        },
    )?;

    let mut categories = BTreeMap::new();
    let mut all_items = Vec::new();
    for (category, set_id) in allocated.successful {
        let Some(set) = engine.catalog().get(&set_id)? else {
            tracing::error!(set = %set_id, "allocated set missing from catalog");
            continue;
        };
        let items = engine.content().get_batch(&set.refs)?;
        let payloads: Vec<Value> = items.into_iter().map(|item| item.payload).collect();
        all_items.extend(payloads.iter().cloned());
        categories.insert(
            category,
            MergedCategory {
                set_id,
                item_count: payloads.len(),
                items: payloads,
            },
        );
    }

    Ok(MergeResponse {
        user_id: allocated.user_id,
        categories,
        failed: allocated.failed,
        all_items,
    })
}

// =========================================================================
// ingest
// =========================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawItem {
    pub id: String,
    pub category_id: String,
    pub payload: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestRequest {
    pub items: Vec<RawItem>,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Normalize, hash, and store a batch of raw items.
pub fn ingest(engine: &Engine, request: IngestRequest) -> Result<IngestReport, IngestError> {
    let mut items = Vec::with_capacity(request.items.len());
    for raw in request.items {
        let category = CategoryId::parse(&raw.category_id).map_err(ValidationError::from)?;
        if !engine.categories().contains(&category) {
            return Err(ValidationError::UnknownCategory {
                raw: raw.category_id,
            }
            .into());
        }
        let id = ItemId::parse(&raw.id).map_err(ValidationError::from)?;
        let item = Item::from_payload(id, category, raw.payload).map_err(ValidationError::from)?;
        items.push(item);
    }
    Ok(engine.content().put_batch(items)?)
}
