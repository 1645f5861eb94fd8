//! Single-node keyspace
//!
//! Holds the data of one store node: string values and hashes, each with an
//! optional deadline. Every method receives the current time so expiry is
//! evaluated lazily on access, the way the store itself does it; the
//! [`TTLIndex`] only serves bulk purges.
//!
//! The keyspace is not synchronized. [`crate::MemoryStore`] wraps it in a
//! mutex, which is also what makes script bodies atomic.
//!
//! A hash with no fields does not exist: removing its last field removes
//! the key.

use crate::client::SetCondition;
use crate::script::{
    script_error, unpack_compare_fields, unpack_fields, Action, Comparison, ScriptBody,
};
use crate::ttl::TTLIndex;
use kvrepo_core::{FieldMap, StoreError, StoreResult, TimeToLive, Timestamp};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
enum Data {
    Value(Vec<u8>),
    Hash(FieldMap),
}

#[derive(Debug, Clone)]
struct Entry {
    data: Data,
    expires_at: Option<Timestamp>,
}

impl Entry {
    fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// Data of one store node
#[derive(Debug, Default)]
pub struct Keyspace {
    entries: HashMap<String, Entry>,
    ttl: TTLIndex,
}

impl Keyspace {
    /// Create an empty keyspace
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the keyspace holds no keys
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every key
    pub fn clear(&mut self) {
        self.entries.clear();
        self.ttl.clear();
    }

    // ========== Entry bookkeeping ==========

    fn live(&mut self, key: &str, now: Timestamp) -> Option<&mut Entry> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => return None,
        };
        if expired {
            self.remove(key);
            return None;
        }
        self.entries.get_mut(key)
    }

    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.ttl.reschedule(key, entry.expires_at, None);
        Some(entry)
    }

    /// Insert `data`, clearing any previous deadline
    fn insert(&mut self, key: &str, data: Data) {
        self.remove(key);
        self.entries.insert(
            key.to_string(),
            Entry {
                data,
                expires_at: None,
            },
        );
    }

    /// Replace `data` in place, keeping the deadline of a live entry
    fn replace_keep_ttl(&mut self, key: &str, data: Data, now: Timestamp) {
        match self.live(key, now) {
            Some(entry) => entry.data = data,
            None => self.insert(key, data),
        }
    }

    fn value(&mut self, key: &str, now: Timestamp) -> StoreResult<Option<&Vec<u8>>> {
        match self.live(key, now) {
            None => Ok(None),
            Some(Entry {
                data: Data::Value(value),
                ..
            }) => Ok(Some(value)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn hash(&mut self, key: &str, now: Timestamp) -> StoreResult<Option<&mut FieldMap>> {
        match self.live(key, now) {
            None => Ok(None),
            Some(Entry {
                data: Data::Hash(fields),
                ..
            }) => Ok(Some(fields)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    // ========== Strings ==========

    /// GET
    pub fn get(&mut self, key: &str, now: Timestamp) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.value(key, now)?.cloned())
    }

    /// SET with NX / XX; clears the deadline
    pub fn set(
        &mut self,
        key: &str,
        value: &[u8],
        condition: SetCondition,
        now: Timestamp,
    ) -> bool {
        let exists = self.live(key, now).is_some();
        if !condition.allows(exists) {
            return false;
        }
        self.insert(key, Data::Value(value.to_vec()));
        true
    }

    /// DEL of one key
    pub fn del(&mut self, key: &str, now: Timestamp) -> bool {
        self.live(key, now).is_some() && self.remove(key).is_some()
    }

    /// EXISTS
    pub fn exists(&mut self, key: &str, now: Timestamp) -> bool {
        self.live(key, now).is_some()
    }

    /// Live keys starting with `prefix`
    pub fn keys_with_prefix(&self, prefix: &str, now: Timestamp) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    // ========== Hashes ==========

    /// HGET
    pub fn hget(&mut self, key: &str, field: &str, now: Timestamp) -> StoreResult<Option<Vec<u8>>> {
        Ok(self
            .hash(key, now)?
            .and_then(|fields| fields.get(field).cloned()))
    }

    /// HGETALL
    pub fn hgetall(&mut self, key: &str, now: Timestamp) -> StoreResult<FieldMap> {
        Ok(self.hash(key, now)?.cloned().unwrap_or_default())
    }

    /// HSET; returns the number of new fields
    pub fn hset(&mut self, key: &str, fields: &FieldMap, now: Timestamp) -> StoreResult<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        match self.hash(key, now)? {
            Some(existing) => {
                let mut created = 0;
                for (name, value) in fields {
                    if existing.insert(name.clone(), value.clone()).is_none() {
                        created += 1;
                    }
                }
                Ok(created)
            }
            None => {
                self.insert(key, Data::Hash(fields.clone()));
                Ok(fields.len() as u64)
            }
        }
    }

    /// HSETNX
    pub fn hsetnx(
        &mut self,
        key: &str,
        field: &str,
        value: &[u8],
        now: Timestamp,
    ) -> StoreResult<bool> {
        if let Some(existing) = self.hash(key, now)? {
            if existing.contains_key(field) {
                return Ok(false);
            }
            existing.insert(field.to_string(), value.to_vec());
            return Ok(true);
        }
        let mut fields = FieldMap::new();
        fields.insert(field.to_string(), value.to_vec());
        self.insert(key, Data::Hash(fields));
        Ok(true)
    }

    /// HDEL; returns the number of fields removed
    pub fn hdel(&mut self, key: &str, fields: &[String], now: Timestamp) -> StoreResult<u64> {
        let (removed, emptied) = match self.hash(key, now)? {
            Some(existing) => {
                let removed = fields
                    .iter()
                    .filter(|name| existing.remove(name.as_str()).is_some())
                    .count();
                (removed as u64, existing.is_empty())
            }
            None => return Ok(0),
        };
        if emptied {
            self.remove(key);
        }
        Ok(removed)
    }

    /// HEXISTS
    pub fn hexists(&mut self, key: &str, field: &str, now: Timestamp) -> StoreResult<bool> {
        Ok(self
            .hash(key, now)?
            .map_or(false, |fields| fields.contains_key(field)))
    }

    /// HKEYS
    pub fn hkeys(&mut self, key: &str, now: Timestamp) -> StoreResult<Vec<String>> {
        Ok(self
            .hash(key, now)?
            .map(|fields| fields.keys().cloned().collect())
            .unwrap_or_default())
    }

    // ========== Expiry ==========

    /// PEXPIREAT; a deadline in the past deletes the key
    pub fn expire_at(&mut self, key: &str, at: Timestamp, now: Timestamp) -> bool {
        let previous = match self.live(key, now) {
            Some(entry) => entry.expires_at,
            None => return false,
        };
        if at <= now {
            self.remove(key);
            return true;
        }
        if let Some(entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(at);
        }
        self.ttl.reschedule(key, previous, Some(at));
        true
    }

    /// PTTL
    pub fn ttl(&mut self, key: &str, now: Timestamp) -> TimeToLive {
        match self.live(key, now) {
            None => TimeToLive::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => TimeToLive::Persistent,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => match at.remaining_from(now) {
                Some(left) => TimeToLive::Expires(left),
                None => TimeToLive::Missing,
            },
        }
    }

    /// Remove every key whose deadline has passed
    pub fn purge_expired(&mut self, now: Timestamp) -> usize {
        let mut removed = 0;
        for key in self.ttl.drain_expired(now) {
            let is_expired = self
                .entries
                .get(&key)
                .map_or(false, |entry| entry.is_expired(now));
            if is_expired {
                self.entries.remove(&key);
                removed += 1;
            }
        }
        removed
    }

    // ========== Scripts ==========

    /// Run a script body against `keys[0]`
    pub fn run_script(
        &mut self,
        name: &str,
        body: ScriptBody,
        keys: &[String],
        args: &[Vec<u8>],
        now: Timestamp,
    ) -> StoreResult<i64> {
        let key = match keys {
            [key] => key.as_str(),
            _ => return Err(script_error(name, "expects exactly one key")),
        };
        let ran = match body {
            ScriptBody::CompareValue { when, action } => {
                self.compare_value(name, key, when, action, args, now)?
            }
            ScriptBody::CompareField { when, action } => {
                self.compare_field(name, key, when, action, args, now)?
            }
            ScriptBody::CompareFields { when, action } => {
                self.compare_fields(name, key, when, action, args, now)?
            }
            ScriptBody::ReplaceFields { guard } => {
                let fields = unpack_fields(name, args)?;
                if fields.is_empty() {
                    return Err(script_error(name, "refusing to write an empty hash"));
                }
                let exists = self.hash(key, now)?.is_some();
                if guard.allows(exists) {
                    self.insert(key, Data::Hash(fields));
                    true
                } else {
                    false
                }
            }
            ScriptBody::SetFieldIfExists => {
                let (field, value) = match args {
                    [field, value] => (field_name(name, field)?, value),
                    _ => return Err(script_error(name, "expects field and value")),
                };
                match self.hash(key, now)? {
                    Some(fields) if fields.contains_key(&field) => {
                        fields.insert(field, value.clone());
                        true
                    }
                    _ => false,
                }
            }
        };
        Ok(i64::from(ran))
    }

    fn compare_value(
        &mut self,
        name: &str,
        key: &str,
        when: Comparison,
        action: Action,
        args: &[Vec<u8>],
        now: Timestamp,
    ) -> StoreResult<bool> {
        let (expected, new) = split_expected(name, action, args)?;
        let current = self.value(key, now)?.map(|v| v.as_slice());
        if !when.holds(current, expected.as_slice()) {
            return Ok(false);
        }
        match new {
            Some(new) => self.replace_keep_ttl(key, Data::Value(new.clone()), now),
            None => {
                self.remove(key);
            }
        }
        Ok(true)
    }

    fn compare_field(
        &mut self,
        name: &str,
        key: &str,
        when: Comparison,
        action: Action,
        args: &[Vec<u8>],
        now: Timestamp,
    ) -> StoreResult<bool> {
        let (field, rest) = args
            .split_first()
            .ok_or_else(|| script_error(name, "missing field argument"))?;
        let field = field_name(name, field)?;
        let (expected, new) = split_expected(name, action, rest)?;

        let fields = match self.hash(key, now)? {
            Some(fields) => fields,
            None => return Ok(false),
        };
        if !when.holds(fields.get(&field).map(|v| v.as_slice()), expected.as_slice()) {
            return Ok(false);
        }
        let emptied = match new {
            Some(new) => {
                fields.insert(field, new.clone());
                false
            }
            None => {
                fields.remove(&field);
                fields.is_empty()
            }
        };
        if emptied {
            self.remove(key);
        }
        Ok(true)
    }

    fn compare_fields(
        &mut self,
        name: &str,
        key: &str,
        when: Comparison,
        action: Action,
        args: &[Vec<u8>],
        now: Timestamp,
    ) -> StoreResult<bool> {
        let (expected, new) = unpack_compare_fields(name, args)?;
        if action == Action::Set && new.is_empty() {
            return Err(script_error(name, "refusing to write an empty hash"));
        }
        let current = self.hash(key, now)?.map(|fields| &*fields);
        if !when.holds(current, &expected) {
            return Ok(false);
        }
        match action {
            Action::Set => self.replace_keep_ttl(key, Data::Hash(new), now),
            Action::Delete => {
                self.remove(key);
            }
        }
        Ok(true)
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
    }
}

fn field_name(script: &str, raw: &[u8]) -> StoreResult<String> {
    String::from_utf8(raw.to_vec()).map_err(|_| script_error(script, "field name is not UTF-8"))
}

/// Split `expected, [new]`; the new value is required exactly for `Set`
fn split_expected<'a>(
    script: &str,
    action: Action,
    args: &'a [Vec<u8>],
) -> StoreResult<(&'a Vec<u8>, Option<&'a Vec<u8>>)> {
    match (action, args) {
        (Action::Set, [expected, new]) => Ok((expected, Some(new))),
        (Action::Delete, [expected]) => Ok((expected, None)),
        _ => Err(script_error(script, "wrong number of arguments")),
    }
}
