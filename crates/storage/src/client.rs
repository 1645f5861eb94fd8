//! Store client interface
//!
//! [`StoreClient`] is the seam between repositories and the key/value store.
//! It mirrors the store's command set one method per command, so a network
//! client can implement it by issuing the command and decoding the reply.
//!
//! ## Partitions
//!
//! A clustered store routes each key to a partition (a hash slot).
//! [`StoreClient::partition_of`] exposes that mapping so callers can group
//! keys before issuing multi-key commands. Every method that takes several
//! keys requires them to share one partition and fails with
//! `StoreError::CrossSlot` otherwise. A single-node store reports the same
//! partition for every key.
//!
//! ## Blocking
//!
//! All methods block until the store answers. Timeouts and reconnects belong
//! to the implementation.

use crate::script::{Script, ScriptSha};
use kvrepo_core::{FieldMap, StoreResult, TimeToLive, Timestamp};
use std::time::Duration;

/// Partition (hash slot) a key maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(pub u32);

/// Existence precondition for SET
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetCondition {
    /// Unconditional write
    Always,
    /// Write only if the key exists (XX)
    IfExists,
    /// Write only if the key is missing (NX)
    IfNotExists,
}

impl SetCondition {
    /// Whether the write may proceed given the key's existence
    pub fn allows(&self, exists: bool) -> bool {
        match self {
            SetCondition::Always => true,
            SetCondition::IfExists => exists,
            SetCondition::IfNotExists => !exists,
        }
    }
}

/// Synchronous key/value store client
pub trait StoreClient: Send + Sync {
    /// Partition owning `key`
    fn partition_of(&self, key: &str) -> PartitionId;

    // ========== Strings ==========

    /// GET
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// MGET; one entry per key, `None` for missing keys
    fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<Vec<u8>>>>;

    /// SET with an optional NX / XX precondition; clears any TTL
    ///
    /// Returns whether the value was written.
    fn set(&self, key: &str, value: &[u8], condition: SetCondition) -> StoreResult<bool>;

    /// DEL; returns the number of keys removed
    fn del(&self, keys: &[String]) -> StoreResult<u64>;

    /// EXISTS
    fn exists(&self, key: &str) -> StoreResult<bool>;

    /// All live keys starting with `prefix`, across every partition
    fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    // ========== Hashes ==========

    /// HGET
    fn hget(&self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>>;

    /// HMGET; one entry per field
    fn hmget(&self, key: &str, fields: &[String]) -> StoreResult<Vec<Option<Vec<u8>>>>;

    /// HGETALL; empty map for a missing key
    fn hgetall(&self, key: &str) -> StoreResult<FieldMap>;

    /// HSET; returns the number of fields created
    fn hset(&self, key: &str, fields: &FieldMap) -> StoreResult<u64>;

    /// HSETNX
    fn hsetnx(&self, key: &str, field: &str, value: &[u8]) -> StoreResult<bool>;

    /// HDEL; returns the number of fields removed
    fn hdel(&self, key: &str, fields: &[String]) -> StoreResult<u64>;

    /// HEXISTS
    fn hexists(&self, key: &str, field: &str) -> StoreResult<bool>;

    /// HKEYS
    fn hkeys(&self, key: &str) -> StoreResult<Vec<String>>;

    // ========== Expiry ==========

    /// PEXPIRE; returns whether the key exists
    fn pexpire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// PEXPIREAT; returns whether the key exists
    fn pexpire_at(&self, key: &str, at: Timestamp) -> StoreResult<bool>;

    /// PTTL
    fn pttl(&self, key: &str) -> StoreResult<TimeToLive>;

    // ========== Scripting ==========

    /// SCRIPT LOAD on the partition owning `route_key`
    fn script_load(&self, script: &Script, route_key: &str) -> StoreResult<ScriptSha>;

    /// EVALSHA; fails with `StoreError::NoScript` if the partition owning
    /// `keys` does not know the script
    fn eval_sha(&self, sha: &ScriptSha, keys: &[String], args: &[Vec<u8>]) -> StoreResult<i64>;
}

/// A store that can drop its expired keys in bulk
pub trait Reapable: Send + Sync {
    /// Remove every expired key; returns how many were removed
    fn purge_expired(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition_allows() {
        assert!(SetCondition::Always.allows(true));
        assert!(SetCondition::Always.allows(false));
        assert!(SetCondition::IfExists.allows(true));
        assert!(!SetCondition::IfExists.allows(false));
        assert!(SetCondition::IfNotExists.allows(false));
        assert!(!SetCondition::IfNotExists.allows(true));
    }
}
