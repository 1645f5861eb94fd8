//! Store layer for kvrepo
//!
//! This crate defines the key/value store seam and ships in-memory stores
//! behind it:
//! - StoreClient: the command-level client trait repositories talk to
//! - Script / ScriptSha: server-side scripts referenced by content hash
//! - MemoryStore: single-node store with lazy expiry and a script cache
//! - ClusterStore: hash-slot sharded store with per-node script caches
//! - TTL index and TTL cleaner background task for expired key reclamation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cleaner;
pub mod client;
pub mod cluster;
pub mod keyspace;
pub mod memory;
pub mod script;
pub mod ttl;

pub use cleaner::TTLCleaner;
pub use client::{PartitionId, Reapable, SetCondition, StoreClient};
pub use cluster::{hash_tag, key_slot, ClusterStore, SLOT_COUNT};
pub use keyspace::Keyspace;
pub use memory::MemoryStore;
pub use script::{
    pack_compare_fields, pack_fields, unpack_compare_fields, unpack_fields, Action, Comparison,
    Script, ScriptBody, ScriptSha,
};
pub use ttl::TTLIndex;
