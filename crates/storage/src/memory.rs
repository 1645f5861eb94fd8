//! Single-node in-memory store
//!
//! `MemoryStore` implements [`StoreClient`] over a [`Keyspace`] guarded by a
//! `parking_lot::Mutex`. Each command, including each script execution,
//! holds the lock for its whole duration, which gives the same atomicity a
//! single-threaded store server gives.
//!
//! Loaded scripts live in a `DashMap` next to the keyspace so script
//! lookups never contend with data commands.
//!
//! ## Fault injection
//!
//! Tests drive the failure paths through:
//! - [`MemoryStore::set_offline`]: every command fails with `Unavailable`
//! - [`MemoryStore::set_timeout`]: every command fails with `Timeout`
//! - [`MemoryStore::set_fail_script_loads`]: SCRIPT LOAD fails
//! - [`MemoryStore::flush_scripts`]: forget every loaded script (SCRIPT FLUSH)

use crate::client::{PartitionId, Reapable, SetCondition, StoreClient};
use crate::keyspace::Keyspace;
use crate::script::{Script, ScriptBody, ScriptSha};
use dashmap::DashMap;
use kvrepo_core::{FieldMap, StoreError, StoreResult, TimeToLive, Timestamp};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct LoadedScript {
    name: &'static str,
    body: ScriptBody,
}

/// In-memory store node
#[derive(Debug, Default)]
pub struct MemoryStore {
    keyspace: Mutex<Keyspace>,
    scripts: DashMap<ScriptSha, LoadedScript>,
    offline: AtomicBool,
    timeout: Mutex<Option<Duration>>,
    fail_script_loads: AtomicBool,
    commands: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held, including expired keys not yet purged
    pub fn len(&self) -> usize {
        self.keyspace.lock().len()
    }

    /// Whether the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.keyspace.lock().is_empty()
    }

    /// Remove every key (FLUSHALL); loaded scripts are kept
    pub fn flush_all(&self) {
        self.keyspace.lock().clear();
    }

    /// Forget every loaded script (SCRIPT FLUSH)
    pub fn flush_scripts(&self) {
        debug!(target: "kvrepo::store", count = self.scripts.len(), "flushing scripts");
        self.scripts.clear();
    }

    /// Whether a script with this hash is loaded
    pub fn has_script(&self, sha: &ScriptSha) -> bool {
        self.scripts.contains_key(sha)
    }

    /// Number of loaded scripts
    pub fn script_count(&self) -> usize {
        self.scripts.len()
    }

    /// Make every command fail with `StoreError::Unavailable`
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make every command fail with `StoreError::Timeout(after)`; `None` clears it
    pub fn set_timeout(&self, after: Option<Duration>) {
        *self.timeout.lock() = after;
    }

    /// Make SCRIPT LOAD fail with `StoreError::Unavailable`
    pub fn set_fail_script_loads(&self, fail: bool) {
        self.fail_script_loads.store(fail, Ordering::SeqCst);
    }

    /// Number of commands served so far
    pub fn command_count(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }

    /// Count the command and fail if the store is offline
    fn begin(&self, command: &'static str) -> StoreResult<()> {
        self.commands.fetch_add(1, Ordering::Relaxed);
        if self.offline.load(Ordering::SeqCst) {
            trace!(target: "kvrepo::store", command, "rejected, store offline");
            return Err(StoreError::Unavailable(format!("{command}: store offline")));
        }
        if let Some(after) = *self.timeout.lock() {
            trace!(target: "kvrepo::store", command, ?after, "rejected, store timed out");
            return Err(StoreError::Timeout(after));
        }
        Ok(())
    }

    /// Run a loaded script; `keys` are assumed to belong to this node
    pub(crate) fn run_loaded(
        &self,
        sha: &ScriptSha,
        keys: &[String],
        args: &[Vec<u8>],
    ) -> StoreResult<i64> {
        self.begin("EVALSHA")?;
        let loaded = match self.scripts.get(sha) {
            Some(entry) => entry.value().clone(),
            None => return Err(StoreError::NoScript(sha.to_string())),
        };
        let result = self.keyspace.lock().run_script(
            loaded.name,
            loaded.body,
            keys,
            args,
            Timestamp::now(),
        )?;
        trace!(target: "kvrepo::store", script = loaded.name, result, "script ran");
        Ok(result)
    }
}

impl StoreClient for MemoryStore {
    fn partition_of(&self, _key: &str) -> PartitionId {
        PartitionId(0)
    }

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.begin("GET")?;
        self.keyspace.lock().get(key, Timestamp::now())
    }

    fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        self.begin("MGET")?;
        let now = Timestamp::now();
        let mut keyspace = self.keyspace.lock();
        // MGET reports a key of the wrong type as missing
        Ok(keys
            .iter()
            .map(|key| keyspace.get(key, now).ok().flatten())
            .collect())
    }

    fn set(&self, key: &str, value: &[u8], condition: SetCondition) -> StoreResult<bool> {
        self.begin("SET")?;
        Ok(self
            .keyspace
            .lock()
            .set(key, value, condition, Timestamp::now()))
    }

    fn del(&self, keys: &[String]) -> StoreResult<u64> {
        self.begin("DEL")?;
        let now = Timestamp::now();
        let mut keyspace = self.keyspace.lock();
        Ok(keys.iter().filter(|key| keyspace.del(key, now)).count() as u64)
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        self.begin("EXISTS")?;
        Ok(self.keyspace.lock().exists(key, Timestamp::now()))
    }

    fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.begin("SCAN")?;
        Ok(self
            .keyspace
            .lock()
            .keys_with_prefix(prefix, Timestamp::now()))
    }

    fn hget(&self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
        self.begin("HGET")?;
        self.keyspace.lock().hget(key, field, Timestamp::now())
    }

    fn hmget(&self, key: &str, fields: &[String]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        self.begin("HMGET")?;
        let now = Timestamp::now();
        let mut keyspace = self.keyspace.lock();
        fields
            .iter()
            .map(|field| keyspace.hget(key, field, now))
            .collect()
    }

    fn hgetall(&self, key: &str) -> StoreResult<FieldMap> {
        self.begin("HGETALL")?;
        self.keyspace.lock().hgetall(key, Timestamp::now())
    }

    fn hset(&self, key: &str, fields: &FieldMap) -> StoreResult<u64> {
        self.begin("HSET")?;
        self.keyspace.lock().hset(key, fields, Timestamp::now())
    }

    fn hsetnx(&self, key: &str, field: &str, value: &[u8]) -> StoreResult<bool> {
        self.begin("HSETNX")?;
        self.keyspace
            .lock()
            .hsetnx(key, field, value, Timestamp::now())
    }

    fn hdel(&self, key: &str, fields: &[String]) -> StoreResult<u64> {
        self.begin("HDEL")?;
        self.keyspace.lock().hdel(key, fields, Timestamp::now())
    }

    fn hexists(&self, key: &str, field: &str) -> StoreResult<bool> {
        self.begin("HEXISTS")?;
        self.keyspace.lock().hexists(key, field, Timestamp::now())
    }

    fn hkeys(&self, key: &str) -> StoreResult<Vec<String>> {
        self.begin("HKEYS")?;
        self.keyspace.lock().hkeys(key, Timestamp::now())
    }

    fn pexpire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.begin("PEXPIRE")?;
        let now = Timestamp::now();
        Ok(self
            .keyspace
            .lock()
            .expire_at(key, now.saturating_add(ttl), now))
    }

    fn pexpire_at(&self, key: &str, at: Timestamp) -> StoreResult<bool> {
        self.begin("PEXPIREAT")?;
        Ok(self.keyspace.lock().expire_at(key, at, Timestamp::now()))
    }

    fn pttl(&self, key: &str) -> StoreResult<TimeToLive> {
        self.begin("PTTL")?;
        Ok(self.keyspace.lock().ttl(key, Timestamp::now()))
    }

    fn script_load(&self, script: &Script, _route_key: &str) -> StoreResult<ScriptSha> {
        self.begin("SCRIPT LOAD")?;
        if self.fail_script_loads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!(
                "SCRIPT LOAD {}: rejected",
                script.name()
            )));
        }
        self.scripts.insert(
            script.sha().clone(),
            LoadedScript {
                name: script.name(),
                body: script.body(),
            },
        );
        debug!(target: "kvrepo::store", script = script.name(), sha = %script.sha(), "script loaded");
        Ok(script.sha().clone())
    }

    fn eval_sha(&self, sha: &ScriptSha, keys: &[String], args: &[Vec<u8>]) -> StoreResult<i64> {
        self.run_loaded(sha, keys, args)
    }
}

impl Reapable for MemoryStore {
    fn purge_expired(&self) -> usize {
        self.keyspace.lock().purge_expired(Timestamp::now())
    }
}
