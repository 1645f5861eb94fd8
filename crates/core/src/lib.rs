//! Core types for kvrepo
//!
//! This crate defines the foundational types shared by the store and engine
//! layers:
//! - Error: `StoreError` (store client failures) and `RepoError` (caller-facing)
//! - Key scheme: collection names, identifier validation, storage key derivation
//! - Codec: the serialization boundary (`ValueCodec`, `FieldsCodec`) and stock codecs
//! - Timestamp / TimeToLive: millisecond expiry types
//! - Mutation: outcome of conditional updates and deletes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod key;
pub mod outcome;
pub mod timestamp;

pub use codec::{
    CodecError, EntityCodec, FieldMap, FieldsCodec, JsonCodec, JsonFieldsCodec, MsgPackCodec,
    ValueCodec,
};
pub use error::{RepoError, RepoResult, StoreError, StoreResult};
pub use key::{validate_identifier, CollectionName, KeyScheme, KEY_SEPARATOR, RESERVED_SUFFIXES};
pub use outcome::Mutation;
pub use timestamp::{TimeToLive, Timestamp};
