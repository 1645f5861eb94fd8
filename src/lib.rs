//! kvrepo - Typed repositories over key/value stores
//!
//! A [`Repository`] stores one collection of entities in a key/value store
//! using one of three layouts:
//!
//! - [`Layout::Value`]: one value per entity at `<collection>:<id>`
//! - [`Layout::Hash`]: one shared hash at `<collection>`, one field per entity
//! - [`Layout::ValueInHash`]: one hash of entity fields at `<collection>:<id>`
//!
//! Besides plain CRUD and expiry, repositories offer conditional updates and
//! deletes guarded by server-side compare-and-act scripts, so a write only
//! lands if nobody changed the entity since it was read.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use kvrepo::{EntityCodec, JsonCodec, Layout, MemoryStore, Mutation, Repository, RepositoryConfig};
//!
//! let store = Arc::new(MemoryStore::new());
//! let config = RepositoryConfig::new("greetings", Layout::Value).unwrap();
//! let repo: Repository<String> =
//!     Repository::open(store, config, EntityCodec::bytes(JsonCodec::new())).unwrap();
//!
//! repo.set("en", &"hello".to_string()).unwrap();
//! let outcome = repo.update("en", |s| s.to_uppercase()).unwrap();
//! assert_eq!(outcome, Mutation::Applied);
//! assert_eq!(repo.get("en").unwrap().as_deref(), Some("HELLO"));
//! ```
//!
//! # Stores
//!
//! Repositories talk to the store through [`StoreClient`]. [`MemoryStore`]
//! is a single node and [`ClusterStore`] shards keys over several nodes by
//! hash slot, with per-node script caches.

pub use kvrepo_core::{
    validate_identifier, CodecError, CollectionName, EntityCodec, FieldMap, FieldsCodec,
    JsonCodec, JsonFieldsCodec, KeyScheme, MsgPackCodec, Mutation, RepoError, RepoResult,
    StoreError, StoreResult, TimeToLive, Timestamp, ValueCodec,
};
pub use kvrepo_engine::{
    Capabilities, Layout, Repository, RepositoryConfig, RepositorySettings, StoreErrorObserver,
    CONFIG_FILE_NAME,
};
pub use kvrepo_storage::{
    ClusterStore, MemoryStore, PartitionId, Reapable, SetCondition, StoreClient, TTLCleaner,
};
