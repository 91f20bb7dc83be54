//! Core domain atoms: identities, time, items, sets.

mod error;
mod identity;
mod item;
mod set;
mod time;

pub use error::{CoreError, InvalidId, InvalidRecord};
pub use identity::{CategoryId, ContentHash, ItemId, SetId, UserId};
pub use item::{Item, hash_payload, normalize_payload};
pub use set::{ItemRef, QuestionSet};
pub use time::{
    ManualClock, SharedClock, SystemClock, WallClock, WallClockSource, later_of, system_clock,
};
