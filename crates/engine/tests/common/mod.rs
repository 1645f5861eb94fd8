//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use std::sync::Arc;

use kvrepo_core::{EntityCodec, JsonCodec, JsonFieldsCodec};
use kvrepo_engine::{Layout, Repository, RepositoryConfig};
use kvrepo_storage::{ClusterStore, MemoryStore, StoreClient};
use serde::{Deserialize, Serialize};

/// Test entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub age: u32,
    pub tags: Vec<String>,
}

pub fn person(name: &str, age: u32) -> Person {
    Person {
        name: name.to_string(),
        age,
        tags: Vec::new(),
    }
}

pub const LAYOUTS: [Layout; 3] = [Layout::Value, Layout::Hash, Layout::ValueInHash];

/// Codec matching the layout's stored shape
pub fn codec_for(layout: Layout) -> EntityCodec<Person> {
    match layout {
        Layout::ValueInHash => EntityCodec::fields(JsonFieldsCodec::new()),
        Layout::Value | Layout::Hash => EntityCodec::bytes(JsonCodec::new()),
    }
}

pub fn open(store: Arc<dyn StoreClient>, layout: Layout) -> Repository<Person> {
    let config = RepositoryConfig::new("people", layout).unwrap();
    Repository::open(store, config, codec_for(layout)).unwrap()
}

/// Repository over a fresh single-node store
pub fn memory_repo(layout: Layout) -> (Arc<MemoryStore>, Repository<Person>) {
    let store = Arc::new(MemoryStore::new());
    let repo = open(store.clone(), layout);
    (store, repo)
}

/// Repository over a fresh three-node cluster
pub fn cluster_repo(layout: Layout) -> (Arc<ClusterStore>, Repository<Person>) {
    let store = Arc::new(ClusterStore::new(3));
    let repo = open(store.clone(), layout);
    (store, repo)
}

/// One repository per layout and topology, labelled for assertion messages
pub fn all_repos() -> Vec<(String, Repository<Person>)> {
    let mut repos = Vec::new();
    for layout in LAYOUTS {
        repos.push((format!("memory/{layout}"), memory_repo(layout).1));
        repos.push((format!("cluster/{layout}"), cluster_repo(layout).1));
    }
    repos
}
