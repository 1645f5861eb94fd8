//! Error types for kvrepo
//!
//! Two layers of errors live here:
//!
//! - [`StoreError`]: failures reported by a store client (connection loss,
//!   timeouts, wrong key type, cross-partition commands, unknown scripts).
//! - [`RepoError`]: what repository callers see. Store failures are wrapped
//!   as [`RepoError::StoreUnavailable`] together with the operation name.
//!
//! Absent entities, failed conditions and lost races are NOT errors. They are
//! values of [`crate::Mutation`].
//!
//! We use `thiserror` for automatic `Display` and `Error` implementations.

use crate::codec::CodecError;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for store client operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for repository operations
pub type RepoResult<T> = std::result::Result<T, RepoError>;

/// Errors reported by a store client
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store (or the node owning the key) cannot be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store did not answer in time
    #[error("store timed out after {0:?}")]
    Timeout(Duration),

    /// The command targets a key holding a different kind of value
    #[error("wrong type for key '{key}'")]
    WrongType {
        /// Key holding the mismatched value
        key: String,
    },

    /// A multi-key command spans more than one partition
    #[error("keys '{first}' and '{other}' map to different partitions")]
    CrossSlot {
        /// First key of the command
        first: String,
        /// Key that maps elsewhere
        other: String,
    },

    /// The store does not know the referenced script
    #[error("no script loaded for reference {0}")]
    NoScript(String),

    /// The script was rejected or failed while running
    #[error("script '{name}' failed: {reason}")]
    Script {
        /// Script name
        name: String,
        /// Failure description
        reason: String,
    },
}

impl StoreError {
    /// Whether this error means the script cache lost the referenced script
    pub fn is_no_script(&self) -> bool {
        matches!(self, StoreError::NoScript(_))
    }
}

/// Errors surfaced by repositories
#[derive(Debug, Error)]
pub enum RepoError {
    /// A caller-supplied argument was rejected before any store access
    #[error("invalid argument '{param}': {reason}")]
    InvalidArgument {
        /// Name of the offending parameter
        param: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// The store failed while executing an operation
    #[error("store unavailable during {operation}: {source}")]
    StoreUnavailable {
        /// Repository operation that issued the failing command
        operation: &'static str,
        /// Underlying store error
        #[source]
        source: StoreError,
    },

    /// The layout does not support the requested operation
    #[error("operation '{operation}' is not supported by the {layout} layout")]
    UnsupportedOperation {
        /// Operation name
        operation: &'static str,
        /// Layout name
        layout: &'static str,
    },

    /// The entity codec failed to encode or decode a value
    #[error("serialization failed for '{id}': {source}")]
    Serialization {
        /// Identifier of the entity being encoded or decoded
        id: String,
        /// Codec failure
        #[source]
        source: CodecError,
    },

    /// A configuration file could not be read, parsed or written
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl RepoError {
    /// Build an `InvalidArgument` error
    pub fn invalid_argument(param: &'static str, reason: impl Into<String>) -> Self {
        RepoError::InvalidArgument {
            param,
            reason: reason.into(),
        }
    }

    /// Build a `StoreUnavailable` error
    pub fn store(operation: &'static str, source: StoreError) -> Self {
        RepoError::StoreUnavailable { operation, source }
    }

    /// Build an `UnsupportedOperation` error
    pub fn unsupported(operation: &'static str, layout: &'static str) -> Self {
        RepoError::UnsupportedOperation { operation, layout }
    }

    /// Build a `Serialization` error
    pub fn serialization(id: &str, source: CodecError) -> Self {
        RepoError::Serialization {
            id: id.to_string(),
            source,
        }
    }

    /// Build a `Configuration` error
    pub fn configuration(reason: impl Into<String>) -> Self {
        RepoError::Configuration(reason.into())
    }

    /// Whether the caller can fix this error by correcting its input
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, RepoError::InvalidArgument { .. })
    }

    /// The underlying store error, if any
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            RepoError::StoreUnavailable { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display_invalid_argument() {
        let err = RepoError::invalid_argument("id", "must not be blank");
        let msg = err.to_string();
        assert!(msg.contains("invalid argument"));
        assert!(msg.contains("'id'"));
        assert!(msg.contains("must not be blank"));
    }

    #[test]
    fn test_error_display_store_unavailable() {
        let err = RepoError::store("get", StoreError::Unavailable("connection reset".into()));
        let msg = err.to_string();
        assert!(msg.contains("during get"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_store_unavailable_exposes_cause() {
        let err = RepoError::store("set", StoreError::Timeout(Duration::from_millis(250)));
        assert_eq!(
            err.store_error(),
            Some(&StoreError::Timeout(Duration::from_millis(250)))
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn test_error_display_unsupported() {
        let err = RepoError::unsupported("set_expiration_after", "hash");
        let msg = err.to_string();
        assert!(msg.contains("set_expiration_after"));
        assert!(msg.contains("hash layout"));
    }

    #[test]
    fn test_error_display_serialization() {
        let err = RepoError::serialization("alice", CodecError::Decode("unexpected EOF".into()));
        let msg = err.to_string();
        assert!(msg.contains("'alice'"));
        assert!(msg.contains("unexpected EOF"));
    }

    #[test]
    fn test_error_display_configuration() {
        let err = RepoError::configuration("missing field `collection`");
        assert!(err.to_string().contains("configuration error"));
        assert!(err.to_string().contains("collection"));
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::CrossSlot {
            first: "a".into(),
            other: "b".into(),
        };
        assert!(err.to_string().contains("different partitions"));

        let err = StoreError::WrongType { key: "people".into() };
        assert!(err.to_string().contains("'people'"));
    }

    #[test]
    fn test_is_no_script() {
        assert!(StoreError::NoScript("abc".into()).is_no_script());
        assert!(!StoreError::Unavailable("down".into()).is_no_script());
    }

    #[test]
    fn test_is_invalid_argument() {
        assert!(RepoError::invalid_argument("id", "empty").is_invalid_argument());
        assert!(!RepoError::unsupported("x", "hash").is_invalid_argument());
        assert!(RepoError::unsupported("x", "hash").store_error().is_none());
    }
}
