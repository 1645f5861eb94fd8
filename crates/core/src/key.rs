//! Key scheme for kvrepo collections
//!
//! Every entity lives under a storage key derived from its collection name
//! and identifier. The derivation is a pure function with no state.
//!
//! ## Contract
//!
//! - Identifiers must not be empty, blank, or contain NUL bytes
//! - Collection names follow the same rules and additionally:
//!   - must not contain the key separator `:`
//!   - must not end with a reserved suffix (`_lock`), which is kept for
//!     internal bookkeeping keys
//!
//! ## Key Format
//!
//! - Per-entity keys: `<collection>:<identifier>`
//! - Collection key (hash of entities): `<collection>`

use crate::error::{RepoError, RepoResult};
use std::fmt;

/// Separator between collection name and identifier
pub const KEY_SEPARATOR: char = ':';

/// Suffixes reserved for internal keys
pub const RESERVED_SUFFIXES: &[&str] = &["_lock"];

/// Validate an entity identifier
///
/// # Examples
///
/// ```
/// use kvrepo_core::key::validate_identifier;
///
/// assert!(validate_identifier("alice").is_ok());
/// assert!(validate_identifier("user:123").is_ok());
/// assert!(validate_identifier("").is_err());
/// assert!(validate_identifier("   ").is_err());
/// ```
pub fn validate_identifier(id: &str) -> RepoResult<()> {
    validate_name("id", id)
}

fn validate_name(param: &'static str, value: &str) -> RepoResult<()> {
    if value.is_empty() {
        return Err(RepoError::invalid_argument(param, "must not be empty"));
    }
    if value.trim().is_empty() {
        return Err(RepoError::invalid_argument(param, "must not be blank"));
    }
    if value.contains('\x00') {
        return Err(RepoError::invalid_argument(
            param,
            "must not contain NUL bytes",
        ));
    }
    Ok(())
}

/// Validated collection name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionName(String);

impl CollectionName {
    /// Validate and wrap a collection name
    pub fn new(name: &str) -> RepoResult<Self> {
        validate_name("collection", name)?;
        if name.contains(KEY_SEPARATOR) {
            return Err(RepoError::invalid_argument(
                "collection",
                format!("must not contain the key separator '{}'", KEY_SEPARATOR),
            ));
        }
        if let Some(suffix) = RESERVED_SUFFIXES.iter().find(|s| name.ends_with(*s)) {
            return Err(RepoError::invalid_argument(
                "collection",
                format!("must not end with reserved suffix '{}'", suffix),
            ));
        }
        Ok(CollectionName(name.to_string()))
    }

    /// Name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives storage keys for one collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyScheme {
    collection: CollectionName,
    prefix: String,
}

impl KeyScheme {
    /// Create the scheme for a collection
    pub fn new(collection: CollectionName) -> Self {
        let prefix = format!("{}{}", collection.as_str(), KEY_SEPARATOR);
        Self { collection, prefix }
    }

    /// The collection this scheme serves
    pub fn collection(&self) -> &CollectionName {
        &self.collection
    }

    /// Key of the collection-wide hash
    pub fn collection_key(&self) -> &str {
        self.collection.as_str()
    }

    /// Prefix shared by all per-entity keys
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Per-entity storage key
    pub fn key_for(&self, id: &str) -> RepoResult<String> {
        validate_identifier(id)?;
        Ok(format!("{}{}", self.prefix, id))
    }

    /// Recover the identifier from a per-entity key
    ///
    /// Returns `None` for keys outside this collection.
    pub fn identifier_of<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.prefix.as_str())
            .filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheme(name: &str) -> KeyScheme {
        KeyScheme::new(CollectionName::new(name).unwrap())
    }

    #[test]
    fn test_key_for() {
        let s = scheme("people");
        assert_eq!(s.key_for("alice").unwrap(), "people:alice");
        assert_eq!(s.collection_key(), "people");
        assert_eq!(s.prefix(), "people:");
    }

    #[test]
    fn test_identifier_may_contain_separator() {
        let s = scheme("people");
        let key = s.key_for("org:42").unwrap();
        assert_eq!(key, "people:org:42");
        assert_eq!(s.identifier_of(&key), Some("org:42"));
    }

    #[test]
    fn test_identifier_of_foreign_key() {
        let s = scheme("people");
        assert_eq!(s.identifier_of("pets:rex"), None);
        assert_eq!(s.identifier_of("people:"), None);
        assert_eq!(s.identifier_of("people"), None);
    }

    #[test]
    fn test_rejects_bad_identifiers() {
        let s = scheme("people");
        for bad in ["", " ", "\t\n", "a\x00b"] {
            let err = s.key_for(bad).unwrap_err();
            assert!(
                matches!(err, RepoError::InvalidArgument { param: "id", .. }),
                "{:?} accepted",
                bad
            );
        }
    }

    #[test]
    fn test_rejects_bad_collection_names() {
        for bad in ["", "  ", "a:b", "orders_lock", "x\x00"] {
            let err = CollectionName::new(bad).unwrap_err();
            assert!(
                matches!(err, RepoError::InvalidArgument { param: "collection", .. }),
                "{:?} accepted",
                bad
            );
        }
    }

    #[test]
    fn test_reserved_suffix_only_at_end() {
        assert!(CollectionName::new("lock_manager").is_ok());
        assert!(CollectionName::new("_lockers").is_ok());
    }

    #[test]
    fn test_hash_tag_collection_names() {
        let s = scheme("{people}");
        assert_eq!(s.key_for("bob").unwrap(), "{people}:bob");
    }
}
