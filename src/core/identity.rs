//! Identity atoms.
//!
//! UserId: opaque caller identity
//! CategoryId: content category key
//! SetId: question-set identifier, generated by the builder
//! ItemId: content item identifier, lexicographically ordered
//! ContentHash: SHA-256 over the canonical item payload

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::{CoreError, InvalidId};

/// User identifier - non-empty string.
///
/// Callers name themselves. No validation beyond non-empty.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        if s.trim().is_empty() {
            Err(InvalidId::User {
                raw: s,
                reason: "empty".into(),
            }
            .into())
        } else {
            Ok(Self(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({:?})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

const CATEGORY_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz-._";

/// Category identifier.
///
/// Lowercase alphanumeric with `-._` separators. Whether a category is
/// *known* is decided against the configured category table, not here.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(String);

impl CategoryId {
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let s = s.trim().to_lowercase();
        if s.is_empty() {
            return Err(InvalidId::Category {
                raw: s,
                reason: "empty".into(),
            }
            .into());
        }
        for c in s.bytes() {
            if !CATEGORY_ALPHABET.contains(&c) {
                return Err(InvalidId::Category {
                    raw: s.clone(),
                    reason: "contains character outside [a-z0-9-._]".into(),
                }
                .into());
            }
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CategoryId({:?})", self.0)
    }
}

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Question-set identifier - `qs-<12 lowercase alphanumeric>` when
/// generated here.
///
/// Parsing accepts any non-empty token so ids minted elsewhere survive a
/// round-trip through the ledger and pool.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SetId(String);

impl SetId {
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let s = s.trim();
        if s.is_empty() {
            Err(InvalidId::Set {
                raw: s.to_string(),
                reason: "empty".into(),
            }
            .into())
        } else {
            Ok(Self(s.to_string()))
        }
    }

    /// Mint a fresh set id. Only the builder should call this.
    pub(crate) fn generate() -> Self {
        use rand::Rng;
        const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

        let mut rng = rand::thread_rng();
        let suffix: String = (0..12)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        Self(format!("qs-{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SetId({:?})", self.0)
    }
}

impl fmt::Display for SetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Item identifier.
///
/// Ordering is lexicographic on the raw string; builder watermarks and
/// batch runs depend on that order being total and stable.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let s = s.trim();
        if s.is_empty() {
            Err(InvalidId::Item {
                raw: s.to_string(),
                reason: "empty".into(),
            }
            .into())
        } else {
            Ok(Self(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({:?})", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA-256 content hash, 64 lowercase hex chars.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let s = s.trim().to_lowercase();
        if s.len() != 64 || !s.bytes().all(|c| c.is_ascii_hexdigit()) {
            return Err(InvalidId::ContentHash {
                raw: s,
                reason: "expected 64 hex chars".into(),
            }
            .into());
        }
        Ok(Self(s))
    }

    /// Hash arbitrary bytes.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut hex = String::with_capacity(64);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:?})", self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_rejects_empty() {
        assert!(UserId::new("").is_err());
        assert!(UserId::new("  ").is_err());
        assert_eq!(UserId::new("u-1").unwrap().as_str(), "u-1");
    }

    #[test]
    fn category_id_normalizes_case() {
        let id = CategoryId::parse(" Science.History ").unwrap();
        assert_eq!(id.as_str(), "science.history");
        assert!(CategoryId::parse("no spaces").is_err());
    }

    #[test]
    fn set_id_generation_shape() {
        let id = SetId::generate();
        assert!(id.as_str().starts_with("qs-"));
        assert_eq!(id.as_str().len(), 15);
        assert_ne!(SetId::generate(), SetId::generate());
    }

    #[test]
    fn item_ids_order_lexicographically() {
        let a = ItemId::parse("itm-001").unwrap();
        let b = ItemId::parse("itm-010").unwrap();
        assert!(a < b);
    }

    #[test]
    fn content_hash_of_bytes_is_stable() {
        let h = ContentHash::of_bytes(b"hello");
        assert_eq!(h, ContentHash::of_bytes(b"hello"));
        assert_eq!(h.as_str().len(), 64);
        assert!(ContentHash::parse(h.as_str()).is_ok());
        assert!(ContentHash::parse("zz").is_err());
    }
}
