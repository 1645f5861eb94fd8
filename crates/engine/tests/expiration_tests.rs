//! Expiry through the repository

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::*;
use kvrepo_core::{TimeToLive, Timestamp};
use kvrepo_engine::Layout;
use kvrepo_storage::{Reapable, TTLCleaner};

const EXPIRING: [Layout; 2] = [Layout::Value, Layout::ValueInHash];

fn expiring_repos() -> Vec<(String, kvrepo_engine::Repository<Person>)> {
    EXPIRING
        .iter()
        .flat_map(|&layout| {
            [
                (format!("memory/{layout}"), memory_repo(layout).1),
                (format!("cluster/{layout}"), cluster_repo(layout).1),
            ]
        })
        .collect()
}

#[test]
fn test_entity_disappears_after_ttl() {
    for (label, repo) in expiring_repos() {
        repo.set("session", &person("s", 1)).unwrap();
        assert!(repo
            .set_expiration_after("session", Duration::from_millis(200))
            .unwrap());
        assert!(repo.get("session").unwrap().is_some(), "{label}");

        thread::sleep(Duration::from_millis(300));
        assert_eq!(repo.get("session").unwrap(), None, "{label}");
        assert!(!repo.exists("session").unwrap(), "{label}");
        assert!(!repo.identifiers().unwrap().contains("session"), "{label}");
    }
}

#[test]
fn test_time_to_live_readings() {
    for (label, repo) in expiring_repos() {
        assert_eq!(repo.time_to_live("ghost").unwrap(), TimeToLive::Missing, "{label}");
        assert_eq!(repo.time_to_live("ghost").unwrap().as_millis(), -2, "{label}");

        repo.set("alice", &person("alice", 30)).unwrap();
        let ttl = repo.time_to_live("alice").unwrap();
        assert_eq!(ttl, TimeToLive::Persistent, "{label}");
        assert_eq!(ttl.as_millis(), -1, "{label}");

        repo.set_expiration_after("alice", Duration::from_secs(60)).unwrap();
        let left = repo.time_to_live("alice").unwrap().remaining().unwrap();
        assert!(left <= Duration::from_secs(60), "{label}");
        assert!(left > Duration::from_secs(55), "{label}");
    }
}

#[test]
fn test_expire_missing_reports_false() {
    for (label, repo) in expiring_repos() {
        assert!(!repo
            .set_expiration_after("ghost", Duration::from_secs(1))
            .unwrap(), "{label}");
        let at = Timestamp::now().saturating_add(Duration::from_secs(1));
        assert!(!repo.set_expiration_at("ghost", at).unwrap(), "{label}");
    }
}

#[test]
fn test_expire_at_in_past_deletes() {
    for (label, repo) in expiring_repos() {
        repo.set("alice", &person("alice", 30)).unwrap();
        repo.set_expiration_at("alice", Timestamp::from_millis(1_000)).unwrap();
        assert_eq!(repo.get("alice").unwrap(), None, "{label}");
    }
}

#[test]
fn test_set_clears_ttl() {
    for (label, repo) in expiring_repos() {
        repo.set("alice", &person("alice", 30)).unwrap();
        repo.set_expiration_after("alice", Duration::from_secs(60)).unwrap();
        repo.set("alice", &person("alice", 31)).unwrap();
        assert_eq!(repo.time_to_live("alice").unwrap(), TimeToLive::Persistent, "{label}");
    }
}

#[test]
fn test_conditional_writes_keep_ttl() {
    for (label, repo) in expiring_repos() {
        repo.set("alice", &person("alice", 30)).unwrap();
        repo.set_expiration_after("alice", Duration::from_secs(60)).unwrap();

        assert!(repo
            .update("alice", |mut p| {
                p.age = 31;
                p
            })
            .unwrap()
            .is_applied());
        assert!(repo.time_to_live("alice").unwrap().remaining().is_some(), "{label}");

        assert!(repo
            .update_if_it_is("alice", &person("alice", 31), &person("alice", 32))
            .unwrap());
        assert!(repo.time_to_live("alice").unwrap().remaining().is_some(), "{label}");
    }
}

#[test]
fn test_cleaner_reclaims_expired_entities() {
    let (store, repo) = memory_repo(Layout::Value);
    for i in 0..20 {
        let id = format!("tmp{i}");
        repo.set(&id, &person(&id, i)).unwrap();
        repo.set_expiration_after(&id, Duration::from_millis(50)).unwrap();
    }
    repo.set("keeper", &person("keeper", 1)).unwrap();

    let cleaner = TTLCleaner::new(store.clone() as Arc<dyn Reapable>, Duration::from_millis(20));
    let handle = cleaner.start();
    thread::sleep(Duration::from_millis(300));
    cleaner.shutdown();
    handle.join().unwrap();

    assert_eq!(cleaner.reaped(), 20);
    assert_eq!(store.len(), 1);
    assert!(repo.exists("keeper").unwrap());
}
