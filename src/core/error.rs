//! Core capability errors (parsing, validation, domain invariants).
//!
//! These are bounded and stable: core errors represent domain/refusal
//! states, not library implementation details.

use thiserror::Error;

use crate::error::{Effect, Transience};

/// Invalid ID or content identifier.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum InvalidId {
    #[error("user id `{raw}` is invalid: {reason}")]
    User { raw: String, reason: String },
    #[error("category id `{raw}` is invalid: {reason}")]
    Category { raw: String, reason: String },
    #[error("set id `{raw}` is invalid: {reason}")]
    Set { raw: String, reason: String },
    #[error("item id `{raw}` is invalid: {reason}")]
    Item { raw: String, reason: String },
    #[error("content hash `{raw}` is invalid: {reason}")]
    ContentHash { raw: String, reason: String },
}

/// A record that violates an item/set structural invariant.
#[derive(Debug, Error, Clone)]
#[error("invalid record: {reason}")]
pub struct InvalidRecord {
    pub reason: String,
}

/// Canonical error enum for core capability.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    InvalidId(#[from] InvalidId),
    #[error(transparent)]
    InvalidRecord(#[from] InvalidRecord),
}

impl CoreError {
    pub fn transience(&self) -> Transience {
        // Core errors are pure domain/input failures.
        Transience::Permanent
    }

    pub fn effect(&self) -> Effect {
        Effect::None
    }
}
