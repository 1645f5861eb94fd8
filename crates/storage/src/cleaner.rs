//! Background expiry reaper
//!
//! Reads already treat expired keys as missing; `TTLCleaner` only reclaims
//! their memory. It runs in a background thread, periodically calling
//! [`Reapable::purge_expired`], and stops on a shared atomic flag.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use kvrepo_storage::{MemoryStore, TTLCleaner};
//!
//! let store = Arc::new(MemoryStore::new());
//! let cleaner = TTLCleaner::new(store, Duration::from_millis(50));
//! let handle = cleaner.start();
//!
//! cleaner.shutdown();
//! handle.join().unwrap();
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use crate::client::Reapable;

/// Longest single sleep, so shutdown is noticed quickly
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Background expiry task
pub struct TTLCleaner {
    store: Arc<dyn Reapable>,
    check_interval: Duration,
    shutdown: Arc<AtomicBool>,
    reaped: Arc<AtomicU64>,
}

impl TTLCleaner {
    /// Create a cleaner for `store`, purging every `check_interval`
    pub fn new(store: Arc<dyn Reapable>, check_interval: Duration) -> Self {
        Self {
            store,
            check_interval,
            shutdown: Arc::new(AtomicBool::new(false)),
            reaped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the background task
    ///
    /// The thread runs until [`TTLCleaner::shutdown`] is called.
    pub fn start(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let shutdown = Arc::clone(&self.shutdown);
        let reaped = Arc::clone(&self.reaped);
        let check_interval = self.check_interval;

        thread::spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                let sleep_interval = SHUTDOWN_POLL.min(check_interval);
                let mut elapsed = Duration::ZERO;
                while elapsed < check_interval {
                    if shutdown.load(Ordering::Relaxed) {
                        return;
                    }
                    thread::sleep(sleep_interval);
                    elapsed += sleep_interval;
                }

                let removed = store.purge_expired();
                if removed > 0 {
                    reaped.fetch_add(removed as u64, Ordering::Relaxed);
                    debug!(target: "kvrepo::store", removed, "purged expired keys");
                }
            }
        })
    }

    /// Signal the background thread to stop
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Check if shutdown has been signaled
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Total keys purged by the background thread
    pub fn reaped(&self) -> u64 {
        self.reaped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{SetCondition, StoreClient};
    use crate::MemoryStore;

    #[test]
    fn test_ttl_cleaner_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let cleaner = TTLCleaner::new(store, Duration::from_secs(60));
        assert!(!cleaner.is_shutdown());

        cleaner.shutdown();
        assert!(cleaner.is_shutdown());
    }

    #[test]
    fn test_ttl_cleaner_purges_expired() {
        let store = Arc::new(MemoryStore::new());
        store.set("short", b"v", SetCondition::Always).unwrap();
        store.set("long", b"v", SetCondition::Always).unwrap();
        store.pexpire("short", Duration::from_millis(20)).unwrap();
        store.pexpire("long", Duration::from_secs(60)).unwrap();

        let cleaner = TTLCleaner::new(store.clone(), Duration::from_millis(30));
        let handle = cleaner.start();
        thread::sleep(Duration::from_millis(200));
        cleaner.shutdown();
        handle.join().unwrap();

        assert_eq!(cleaner.reaped(), 1);
        assert_eq!(store.len(), 1);
    }
}
