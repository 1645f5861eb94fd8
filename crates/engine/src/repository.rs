//! Repository façade
//!
//! [`Repository`] is the public entry point: it validates arguments,
//! encodes and decodes entities through the caller's [`EntityCodec`], and
//! delegates to the [`LayoutStrategy`] for plain CRUD and expiry or to the
//! [`MutationEngine`] for conditional updates and deletes.
//!
//! Arguments are validated before any store access. Nothing is cached
//! between calls; every operation round-trips to the store.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use kvrepo_core::{EntityCodec, JsonCodec, Mutation};
//! use kvrepo_engine::{Layout, Repository, RepositoryConfig};
//! use kvrepo_storage::MemoryStore;
//!
//! let store = Arc::new(MemoryStore::new());
//! let config = RepositoryConfig::new("counters", Layout::Value).unwrap();
//! let repo: Repository<u64> =
//!     Repository::open(store, config, EntityCodec::bytes(JsonCodec::new())).unwrap();
//!
//! repo.set("hits", &1).unwrap();
//! assert_eq!(repo.update("hits", |n| n + 1).unwrap(), Mutation::Applied);
//! assert_eq!(repo.get("hits").unwrap(), Some(2));
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use kvrepo_core::{
    validate_identifier, EntityCodec, Mutation, RepoError, RepoResult, TimeToLive, Timestamp,
};
use kvrepo_storage::{SetCondition, StoreClient};
use tracing::warn;

use crate::config::RepositoryConfig;
use crate::layout::{validate_ids, Layout, LayoutStrategy, RawEntity};
use crate::mutation::MutationEngine;
use crate::observer::StoreErrorObserver;

/// Typed repository over one collection
pub struct Repository<E> {
    strategy: LayoutStrategy,
    codec: EntityCodec<E>,
    observer: Option<Arc<dyn StoreErrorObserver>>,
}

impl<E> Repository<E> {
    /// Open a repository over `store`
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument { param: "codec" }` if the codec's shape
    /// does not match the layout: `Value` and `Hash` store bytes,
    /// `ValueInHash` stores fields.
    pub fn open(
        store: Arc<dyn StoreClient>,
        config: RepositoryConfig,
        codec: EntityCodec<E>,
    ) -> RepoResult<Self> {
        let layout = config.layout();
        if codec.shape() != layout.codec_shape() {
            return Err(RepoError::invalid_argument(
                "codec",
                format!(
                    "the {} layout needs a {} codec, got {}",
                    layout,
                    layout.codec_shape(),
                    codec.shape()
                ),
            ));
        }
        let keys = kvrepo_core::KeyScheme::new(config.collection().clone());
        Ok(Self {
            strategy: LayoutStrategy::new(layout, keys, store),
            observer: config.observer().cloned(),
            codec,
        })
    }

    /// Storage layout
    pub fn layout(&self) -> Layout {
        self.strategy.layout()
    }

    /// Collection name
    pub fn collection(&self) -> &str {
        self.strategy.keys().collection_key()
    }

    // ========== Reads ==========

    /// Entity stored under `id`
    pub fn get(&self, id: &str) -> RepoResult<Option<E>> {
        self.observe(|| {
            self.strategy
                .read_raw(id)?
                .map(|raw| raw.decode(&self.codec, id))
                .transpose()
        })
    }

    /// Entities stored under `ids`; absent ids are omitted
    pub fn get_many<I>(&self, ids: I) -> RepoResult<BTreeMap<String, E>>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let ids = validate_ids(ids)?;
        self.observe(|| {
            let found = self.strategy.read_many_raw(&ids)?;
            self.decode_all(found)
        })
    }

    /// Every entity in the collection
    pub fn get_all(&self) -> RepoResult<BTreeMap<String, E>> {
        self.observe(|| {
            let found = self.strategy.read_all_raw()?;
            self.decode_all(found)
        })
    }

    /// Whether `id` is stored
    pub fn exists(&self, id: &str) -> RepoResult<bool> {
        self.observe(|| self.strategy.exists(id))
    }

    /// Identifiers of every entity in the collection
    pub fn identifiers(&self) -> RepoResult<BTreeSet<String>> {
        self.observe(|| self.strategy.list_identifiers())
    }

    // ========== Writes ==========

    /// Store `entity` under `id`, replacing any previous value and expiry
    pub fn set(&self, id: &str, entity: &E) -> RepoResult<()> {
        self.write(id, entity, SetCondition::Always).map(|_| ())
    }

    /// Store `entity` only if `id` already exists; returns whether it did
    pub fn set_if_exists(&self, id: &str, entity: &E) -> RepoResult<bool> {
        self.write(id, entity, SetCondition::IfExists)
    }

    /// Store `entity` only if `id` does not exist yet; returns whether it was written
    pub fn set_if_not_exists(&self, id: &str, entity: &E) -> RepoResult<bool> {
        self.write(id, entity, SetCondition::IfNotExists)
    }

    /// Delete `id`; returns whether it existed
    pub fn delete(&self, id: &str) -> RepoResult<bool> {
        self.observe(|| self.strategy.delete_raw(id))
    }

    /// Delete every id in `ids`; absent ids are ignored
    ///
    /// Returns the number of entities removed.
    pub fn delete_many<I>(&self, ids: I) -> RepoResult<u64>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let ids = validate_ids(ids)?;
        self.observe(|| self.strategy.delete_many_raw(&ids))
    }

    /// Delete every entity in the collection; returns how many existed
    pub fn delete_all(&self) -> RepoResult<u64> {
        self.observe(|| self.strategy.delete_all())
    }

    // ========== Conditional mutations ==========

    /// Replace the entity with `updater(current)`
    ///
    /// The write lands only if nobody changed the entity since it was read;
    /// otherwise the result is [`Mutation::Conflict`] and nothing is written.
    pub fn update<F>(&self, id: &str, updater: F) -> RepoResult<Mutation>
    where
        F: FnOnce(E) -> E,
    {
        self.update_if(id, updater, |_| true)
    }

    /// Replace the entity with `updater(current)` if `condition(&current)` holds
    pub fn update_if<F, C>(&self, id: &str, updater: F, condition: C) -> RepoResult<Mutation>
    where
        F: FnOnce(E) -> E,
        C: FnOnce(&E) -> bool,
    {
        validate_identifier(id)?;
        self.observe(|| self.engine().update(id, &self.codec, updater, condition))
    }

    /// Delete the entity if `condition(&current)` holds
    pub fn delete_if<C>(&self, id: &str, condition: C) -> RepoResult<Mutation>
    where
        C: FnOnce(&E) -> bool,
    {
        validate_identifier(id)?;
        self.observe(|| self.engine().delete(id, &self.codec, condition))
    }

    /// Replace the entity with `new` if it is stored as `old`
    pub fn update_if_it_is(&self, id: &str, old: &E, new: &E) -> RepoResult<bool> {
        self.observe(|| self.engine().update_if_it_is(id, &self.codec, old, new))
    }

    /// Replace the entity with `new` if it exists and is not stored as `old`
    pub fn update_if_it_is_not(&self, id: &str, old: &E, new: &E) -> RepoResult<bool> {
        self.observe(|| self.engine().update_if_it_is_not(id, &self.codec, old, new))
    }

    /// Delete the entity if it is stored as `old`
    pub fn delete_if_it_is(&self, id: &str, old: &E) -> RepoResult<bool> {
        self.observe(|| self.engine().delete_if_it_is(id, &self.codec, old))
    }

    /// Delete the entity if it exists and is not stored as `old`
    pub fn delete_if_it_is_not(&self, id: &str, old: &E) -> RepoResult<bool> {
        self.observe(|| self.engine().delete_if_it_is_not(id, &self.codec, old))
    }

    // ========== Expiry ==========

    /// Expire `id` after `ttl`; returns whether it exists
    pub fn set_expiration_after(&self, id: &str, ttl: Duration) -> RepoResult<bool> {
        self.observe(|| self.strategy.expire_after(id, ttl))
    }

    /// Expire `id` at `at`; returns whether it exists
    ///
    /// A time in the past deletes the entity.
    pub fn set_expiration_at(&self, id: &str, at: Timestamp) -> RepoResult<bool> {
        self.observe(|| self.strategy.expire_at(id, at))
    }

    /// Remaining lifetime of `id`
    ///
    /// [`TimeToLive::Persistent`] for an entity without expiry and
    /// [`TimeToLive::Missing`] for an absent one.
    pub fn time_to_live(&self, id: &str) -> RepoResult<TimeToLive> {
        self.observe(|| self.strategy.time_to_live(id))
    }

    // ========== Helpers ==========

    fn engine(&self) -> MutationEngine<'_> {
        MutationEngine::new(&self.strategy)
    }

    fn write(&self, id: &str, entity: &E, condition: SetCondition) -> RepoResult<bool> {
        validate_identifier(id)?;
        let raw = RawEntity::encode(&self.codec, id, entity)?;
        self.observe(|| self.strategy.write_raw(id, raw, condition))
    }

    fn decode_all(&self, found: Vec<(String, RawEntity)>) -> RepoResult<BTreeMap<String, E>> {
        found
            .into_iter()
            .map(|(id, raw)| {
                let entity = raw.decode(&self.codec, &id)?;
                Ok((id, entity))
            })
            .collect()
    }

    /// Run `f`, reporting a surfaced store error to the observer
    fn observe<T>(&self, f: impl FnOnce() -> RepoResult<T>) -> RepoResult<T> {
        let result = f();
        if let Err(RepoError::StoreUnavailable { operation, source }) = &result {
            warn!(
                target: "kvrepo::engine",
                collection = self.collection(),
                operation = *operation,
                error = %source,
                "store operation failed"
            );
            if let Some(observer) = &self.observer {
                observer.on_store_error(*operation, source);
            }
        }
        result
    }
}

impl<E> fmt::Debug for Repository<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("strategy", &self.strategy)
            .field("codec", &self.codec)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}
