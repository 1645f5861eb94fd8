//! Clustered in-memory store
//!
//! `ClusterStore` spreads keys over several [`MemoryStore`] nodes by hash
//! slot, the way a clustered deployment does:
//!
//! - `slot = crc32(hash_tag(key)) % 16384`
//! - node `i` of `n` owns slots `[i * 16384 / n, (i + 1) * 16384 / n)`
//!
//! Only the text inside the first non-empty `{...}` of a key is hashed, so
//! keys sharing a tag land in the same slot.
//!
//! Every multi-key command requires one slot and fails with
//! `StoreError::CrossSlot` otherwise. Scripts are loaded per node: a
//! script loaded through one route key is unknown to the other nodes until
//! it is loaded there too.

use crate::client::{PartitionId, Reapable, SetCondition, StoreClient};
use crate::memory::MemoryStore;
use crate::script::{Script, ScriptSha};
use kvrepo_core::{FieldMap, StoreError, StoreResult, TimeToLive, Timestamp};
use std::time::Duration;
use tracing::trace;

/// Number of hash slots in a cluster
pub const SLOT_COUNT: u32 = 16_384;

/// Part of `key` that is hashed: the first non-empty `{...}`, else the key
pub fn hash_tag(key: &str) -> &str {
    if let Some(open) = key.find('{') {
        if let Some(len) = key[open + 1..].find('}') {
            if len > 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}

/// Hash slot of `key`
pub fn key_slot(key: &str) -> u32 {
    crc32fast::hash(hash_tag(key).as_bytes()) % SLOT_COUNT
}

/// In-memory store sharded over several nodes
#[derive(Debug)]
pub struct ClusterStore {
    nodes: Vec<MemoryStore>,
}

impl ClusterStore {
    /// Create a cluster of `node_count` empty nodes (at least one)
    pub fn new(node_count: usize) -> Self {
        let nodes = (0..node_count.max(1)).map(|_| MemoryStore::new()).collect();
        Self { nodes }
    }

    /// The nodes, in slot order
    pub fn nodes(&self) -> &[MemoryStore] {
        &self.nodes
    }

    /// Index of the node owning `key`
    pub fn node_index(&self, key: &str) -> usize {
        self.node_for_slot(key_slot(key))
    }

    /// Node owning `key`
    pub fn node_of(&self, key: &str) -> &MemoryStore {
        &self.nodes[self.node_index(key)]
    }

    /// Total number of keys across nodes
    pub fn len(&self) -> usize {
        self.nodes.iter().map(MemoryStore::len).sum()
    }

    /// Whether every node is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.iter().all(MemoryStore::is_empty)
    }

    /// Forget loaded scripts on every node
    pub fn flush_scripts(&self) {
        for node in &self.nodes {
            node.flush_scripts();
        }
    }

    /// Take every node offline or back online
    pub fn set_offline(&self, offline: bool) {
        for node in &self.nodes {
            node.set_offline(offline);
        }
    }

    /// Make every node time out after `after`, or clear it with `None`
    pub fn set_timeout(&self, after: Option<Duration>) {
        for node in &self.nodes {
            node.set_timeout(after);
        }
    }

    fn node_for_slot(&self, slot: u32) -> usize {
        (slot as usize * self.nodes.len()) / SLOT_COUNT as usize
    }

    /// Node owning every key in `keys`, or `CrossSlot`
    fn single_slot_node(&self, keys: &[String]) -> StoreResult<Option<&MemoryStore>> {
        let first = match keys.first() {
            Some(first) => first,
            None => return Ok(None),
        };
        let slot = key_slot(first);
        if let Some(other) = keys.iter().find(|key| key_slot(key) != slot) {
            trace!(target: "kvrepo::store", first = %first, other = %other, "cross-slot command");
            return Err(StoreError::CrossSlot {
                first: first.clone(),
                other: other.clone(),
            });
        }
        Ok(Some(&self.nodes[self.node_for_slot(slot)]))
    }
}

impl StoreClient for ClusterStore {
    fn partition_of(&self, key: &str) -> PartitionId {
        PartitionId(key_slot(key))
    }

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.node_of(key).get(key)
    }

    fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        match self.single_slot_node(keys)? {
            Some(node) => node.mget(keys),
            None => Ok(Vec::new()),
        }
    }

    fn set(&self, key: &str, value: &[u8], condition: SetCondition) -> StoreResult<bool> {
        self.node_of(key).set(key, value, condition)
    }

    fn del(&self, keys: &[String]) -> StoreResult<u64> {
        match self.single_slot_node(keys)? {
            Some(node) => node.del(keys),
            None => Ok(0),
        }
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        self.node_of(key).exists(key)
    }

    fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        for node in &self.nodes {
            keys.extend(node.scan_prefix(prefix)?);
        }
        Ok(keys)
    }

    fn hget(&self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
        self.node_of(key).hget(key, field)
    }

    fn hmget(&self, key: &str, fields: &[String]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        self.node_of(key).hmget(key, fields)
    }

    fn hgetall(&self, key: &str) -> StoreResult<FieldMap> {
        self.node_of(key).hgetall(key)
    }

    fn hset(&self, key: &str, fields: &FieldMap) -> StoreResult<u64> {
        self.node_of(key).hset(key, fields)
    }

    fn hsetnx(&self, key: &str, field: &str, value: &[u8]) -> StoreResult<bool> {
        self.node_of(key).hsetnx(key, field, value)
    }

    fn hdel(&self, key: &str, fields: &[String]) -> StoreResult<u64> {
        self.node_of(key).hdel(key, fields)
    }

    fn hexists(&self, key: &str, field: &str) -> StoreResult<bool> {
        self.node_of(key).hexists(key, field)
    }

    fn hkeys(&self, key: &str) -> StoreResult<Vec<String>> {
        self.node_of(key).hkeys(key)
    }

    fn pexpire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.node_of(key).pexpire(key, ttl)
    }

    fn pexpire_at(&self, key: &str, at: Timestamp) -> StoreResult<bool> {
        self.node_of(key).pexpire_at(key, at)
    }

    fn pttl(&self, key: &str) -> StoreResult<TimeToLive> {
        self.node_of(key).pttl(key)
    }

    fn script_load(&self, script: &Script, route_key: &str) -> StoreResult<ScriptSha> {
        self.node_of(route_key).script_load(script, route_key)
    }

    fn eval_sha(&self, sha: &ScriptSha, keys: &[String], args: &[Vec<u8>]) -> StoreResult<i64> {
        match self.single_slot_node(keys)? {
            Some(node) => node.run_loaded(sha, keys, args),
            None => Err(StoreError::Script {
                name: sha.to_string(),
                reason: "no keys to route on".to_string(),
            }),
        }
    }
}

impl Reapable for ClusterStore {
    fn purge_expired(&self) -> usize {
        self.nodes.iter().map(MemoryStore::purge_expired).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_tag() {
        assert_eq!(hash_tag("user:1"), "user:1");
        assert_eq!(hash_tag("{user}:1"), "user");
        assert_eq!(hash_tag("a{b}c{d}"), "b");
        assert_eq!(hash_tag("{}:1"), "{}:1");
        assert_eq!(hash_tag("a{b"), "a{b");
    }

    #[test]
    fn test_tagged_keys_share_slot() {
        assert_eq!(key_slot("{orders}:1"), key_slot("{orders}:2"));
        assert_eq!(key_slot("{orders}:1"), key_slot("orders"));
        assert!(key_slot("anything") < SLOT_COUNT);
    }

    #[test]
    fn test_node_ranges_cover_all_slots() {
        let cluster = ClusterStore::new(3);
        assert_eq!(cluster.node_for_slot(0), 0);
        assert_eq!(cluster.node_for_slot(SLOT_COUNT - 1), 2);
        assert_eq!(ClusterStore::new(0).nodes().len(), 1);
    }

    #[test]
    fn test_cross_slot_rejected() {
        let cluster = ClusterStore::new(3);
        let keys: Vec<String> = (0..50).map(|i| format!("key:{i}")).collect();
        let err = cluster.mget(&keys).unwrap_err();
        assert!(matches!(err, StoreError::CrossSlot { .. }));

        let tagged: Vec<String> = (0..50).map(|i| format!("{{key}}:{i}")).collect();
        assert_eq!(cluster.mget(&tagged).unwrap().len(), 50);
    }

    #[test]
    fn test_keys_spread_over_nodes() {
        let cluster = ClusterStore::new(3);
        for i in 0..300 {
            cluster
                .set(&format!("key:{i}"), b"v", SetCondition::Always)
                .unwrap();
        }
        assert_eq!(cluster.len(), 300);
        assert!(cluster.nodes().iter().all(|node| !node.is_empty()));
        assert_eq!(cluster.scan_prefix("key:").unwrap().len(), 300);
    }
}
