//! Deadline index for bulk expiry
//!
//! A keyspace answers reads by checking each entry's own deadline, so this
//! index is never consulted on the read path. It exists so a purge only
//! touches keys that are actually due, ordered by deadline in a `BTreeMap`.

use kvrepo_core::Timestamp;
use std::collections::{BTreeMap, HashSet};

/// Keys grouped by expiry deadline
#[derive(Debug, Default)]
pub struct TTLIndex {
    by_deadline: BTreeMap<Timestamp, HashSet<String>>,
}

impl TTLIndex {
    /// Empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Move `key` from its `previous` deadline (if any) to `next` (if any)
    pub fn reschedule(&mut self, key: &str, previous: Option<Timestamp>, next: Option<Timestamp>) {
        if previous == next {
            return;
        }
        if let Some(at) = previous {
            if let Some(keys) = self.by_deadline.get_mut(&at) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_deadline.remove(&at);
                }
            }
        }
        if let Some(at) = next {
            self.by_deadline.entry(at).or_default().insert(key.to_string());
        }
    }

    /// Remove and return every key due at or before `now`
    pub fn drain_expired(&mut self, now: Timestamp) -> Vec<String> {
        let later = match now.as_millis().checked_add(1) {
            Some(after) => self.by_deadline.split_off(&Timestamp::from_millis(after)),
            None => BTreeMap::new(),
        };
        let due = std::mem::replace(&mut self.by_deadline, later);
        due.into_values().flatten().collect()
    }

    /// Number of scheduled keys
    pub fn len(&self) -> usize {
        self.by_deadline.values().map(HashSet::len).sum()
    }

    /// Whether nothing is scheduled
    pub fn is_empty(&self) -> bool {
        self.by_deadline.is_empty()
    }

    /// Forget every deadline
    pub fn clear(&mut self) {
        self.by_deadline.clear();
    }
}
