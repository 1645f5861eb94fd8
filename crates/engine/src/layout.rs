//! Layout strategy
//!
//! A collection stores its entities in one of three physical shapes:
//!
//! | layout | storage key | entity form |
//! |--------|-------------|-------------|
//! | `Value` | `<collection>:<id>` | one opaque value |
//! | `Hash` | `<collection>`, field `<id>` | one field of a shared hash |
//! | `ValueInHash` | `<collection>:<id>` | one hash per entity |
//!
//! [`LayoutStrategy`] translates logical reads and writes into the store
//! commands for its layout. It is one type parameterized by [`Layout`];
//! the store client decides topology through [`StoreClient::partition_of`],
//! and multi-key commands are issued once per partition.
//!
//! Every operation treats a missing key and an empty stored value alike:
//! absent. Reads skip it, `exists` and the identifier listing leave it out,
//! and a create-only write replaces it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use kvrepo_core::{
    validate_identifier, CodecError, EntityCodec, FieldMap, KeyScheme, RepoError, RepoResult,
    StoreError, TimeToLive, Timestamp,
};
use kvrepo_storage::{pack_fields, Action, Comparison, PartitionId, SetCondition, StoreClient};
use serde::{Deserialize, Serialize};

use crate::scripts::{ScriptId, ScriptRunner};

/// Physical shape of a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// One opaque value per entity
    Value,
    /// All entities as fields of one hash keyed by the collection name
    Hash,
    /// One hash of entity fields per entity
    ValueInHash,
}

/// Optional operations a layout supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Per-entity expiration
    pub supports_expiry: bool,
    /// The equality-gated script family
    pub supports_equality_scripts: bool,
}

impl Layout {
    /// Layout name, as used in configuration and errors
    pub fn as_str(&self) -> &'static str {
        match self {
            Layout::Value => "value",
            Layout::Hash => "hash",
            Layout::ValueInHash => "value_in_hash",
        }
    }

    /// What this layout supports beyond plain CRUD
    pub fn capabilities(&self) -> Capabilities {
        match self {
            Layout::Value | Layout::ValueInHash => Capabilities {
                supports_expiry: true,
                supports_equality_scripts: true,
            },
            Layout::Hash => Capabilities {
                supports_expiry: false,
                supports_equality_scripts: false,
            },
        }
    }

    /// Codec shape this layout stores
    pub fn codec_shape(&self) -> &'static str {
        match self {
            Layout::Value | Layout::Hash => "bytes",
            Layout::ValueInHash => "fields",
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Raw entities
// ============================================================================

/// Serialized entity as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEntity {
    /// Value and Hash layouts
    Bytes(Vec<u8>),
    /// ValueInHash layout
    Fields(FieldMap),
}

impl RawEntity {
    /// Whether the serialized form carries no data
    pub fn is_empty(&self) -> bool {
        match self {
            RawEntity::Bytes(bytes) => bytes.is_empty(),
            RawEntity::Fields(fields) => fields.is_empty(),
        }
    }

    /// Encode `entity`, rejecting an empty serialized form
    pub fn encode<E>(codec: &EntityCodec<E>, id: &str, entity: &E) -> RepoResult<Self> {
        let raw = match codec {
            EntityCodec::Bytes(codec) => codec.encode(entity).map(RawEntity::Bytes),
            EntityCodec::Fields(codec) => codec.encode(entity).map(RawEntity::Fields),
        }
        .map_err(|e| RepoError::serialization(id, e))?;
        if raw.is_empty() {
            return Err(RepoError::invalid_argument(
                "entity",
                "serializes to an empty value",
            ));
        }
        Ok(raw)
    }

    /// Decode with `codec`
    pub fn decode<E>(&self, codec: &EntityCodec<E>, id: &str) -> RepoResult<E> {
        let decoded = match (codec, self) {
            (EntityCodec::Bytes(codec), RawEntity::Bytes(bytes)) => codec.decode(bytes),
            (EntityCodec::Fields(codec), RawEntity::Fields(fields)) => codec.decode(fields),
            (codec, _) => Err(CodecError::Decode(format!(
                "stored form does not match the {} codec",
                codec.shape()
            ))),
        };
        decoded.map_err(|e| RepoError::serialization(id, e))
    }

    fn into_bytes(self) -> RepoResult<Vec<u8>> {
        match self {
            RawEntity::Bytes(bytes) => Ok(bytes),
            RawEntity::Fields(_) => Err(shape_mismatch("bytes")),
        }
    }

    fn into_fields(self) -> RepoResult<FieldMap> {
        match self {
            RawEntity::Fields(fields) => Ok(fields),
            RawEntity::Bytes(_) => Err(shape_mismatch("fields")),
        }
    }
}

fn shape_mismatch(expected: &str) -> RepoError {
    RepoError::invalid_argument("entity", format!("expected the {} form", expected))
}

/// Store location of one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Storage key
    pub key: String,
    /// Hash field, for the Hash layout
    pub field: Option<String>,
}

/// Validate a batch of identifiers, dropping duplicates
pub(crate) fn validate_ids<I>(ids: I) -> RepoResult<Vec<String>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut unique = BTreeSet::new();
    for id in ids {
        let id = id.as_ref();
        validate_identifier(id)
            .map_err(|e| RepoError::invalid_argument("ids", format!("'{}' {}", id, reason_of(e))))?;
        unique.insert(id.to_string());
    }
    Ok(unique.into_iter().collect())
}

fn reason_of(err: RepoError) -> String {
    match err {
        RepoError::InvalidArgument { reason, .. } => reason,
        other => other.to_string(),
    }
}

// ============================================================================
// Strategy
// ============================================================================

/// Store commands for one collection and layout
pub struct LayoutStrategy {
    layout: Layout,
    keys: KeyScheme,
    store: Arc<dyn StoreClient>,
    scripts: ScriptRunner,
}

impl LayoutStrategy {
    /// Create the strategy for `keys` in `layout`
    pub fn new(layout: Layout, keys: KeyScheme, store: Arc<dyn StoreClient>) -> Self {
        let scripts = ScriptRunner::new(Arc::clone(&store));
        Self {
            layout,
            keys,
            store,
            scripts,
        }
    }

    /// The layout
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// The key scheme
    pub fn keys(&self) -> &KeyScheme {
        &self.keys
    }

    /// Where `id` is stored
    pub fn location(&self, id: &str) -> RepoResult<Location> {
        match self.layout {
            Layout::Value | Layout::ValueInHash => Ok(Location {
                key: self.keys.key_for(id)?,
                field: None,
            }),
            Layout::Hash => {
                validate_identifier(id)?;
                Ok(Location {
                    key: self.keys.collection_key().to_string(),
                    field: Some(id.to_string()),
                })
            }
        }
    }

    /// Fail with `UnsupportedOperation` unless the layout supports expiry
    pub fn require_expiry(&self, operation: &'static str) -> RepoResult<()> {
        if self.layout.capabilities().supports_expiry {
            Ok(())
        } else {
            Err(RepoError::unsupported(operation, self.layout.as_str()))
        }
    }

    // ========== Reads ==========

    /// Serialized entity stored under `id`
    pub fn read_raw(&self, id: &str) -> RepoResult<Option<RawEntity>> {
        const OP: &str = "get";
        let location = self.location(id)?;
        let raw = match (self.layout, location.field) {
            (Layout::Hash, Some(field)) => self
                .store
                .hget(&location.key, &field)
                .map_err(store(OP))?
                .map(RawEntity::Bytes),
            (Layout::ValueInHash, _) => {
                Some(RawEntity::Fields(self.store.hgetall(&location.key).map_err(store(OP))?))
            }
            _ => self
                .store
                .get(&location.key)
                .map_err(store(OP))?
                .map(RawEntity::Bytes),
        };
        Ok(raw.filter(|raw| !raw.is_empty()))
    }

    /// Serialized entities for `ids`; absent and empty entries are omitted
    pub fn read_many_raw(&self, ids: &[String]) -> RepoResult<Vec<(String, RawEntity)>> {
        const OP: &str = "get_many";
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut found = Vec::with_capacity(ids.len());
        match self.layout {
            Layout::Value => {
                for group in self.group_by_partition(ids)?.into_values() {
                    let (group_ids, keys): (Vec<String>, Vec<String>) = group.into_iter().unzip();
                    let values = self.store.mget(&keys).map_err(store(OP))?;
                    for (id, value) in group_ids.into_iter().zip(values) {
                        if let Some(bytes) = value.filter(|v| !v.is_empty()) {
                            found.push((id, RawEntity::Bytes(bytes)));
                        }
                    }
                }
            }
            Layout::Hash => {
                let values = self
                    .store
                    .hmget(self.keys.collection_key(), ids)
                    .map_err(store(OP))?;
                for (id, value) in ids.iter().zip(values) {
                    if let Some(bytes) = value.filter(|v| !v.is_empty()) {
                        found.push((id.clone(), RawEntity::Bytes(bytes)));
                    }
                }
            }
            Layout::ValueInHash => {
                for id in ids {
                    let fields = self
                        .store
                        .hgetall(&self.keys.key_for(id)?)
                        .map_err(store(OP))?;
                    if !fields.is_empty() {
                        found.push((id.clone(), RawEntity::Fields(fields)));
                    }
                }
            }
        }
        Ok(found)
    }

    /// Every serialized entity in the collection
    pub fn read_all_raw(&self) -> RepoResult<Vec<(String, RawEntity)>> {
        const OP: &str = "get_all";
        match self.layout {
            Layout::Hash => Ok(self
                .store
                .hgetall(self.keys.collection_key())
                .map_err(store(OP))?
                .into_iter()
                .filter(|(_, value)| !value.is_empty())
                .map(|(id, value)| (id, RawEntity::Bytes(value)))
                .collect()),
            Layout::Value | Layout::ValueInHash => {
                let ids: Vec<String> = self.list_identifiers()?.into_iter().collect();
                self.read_many_raw(&ids)
            }
        }
    }

    /// Whether a non-empty entity is stored under `id`
    pub fn exists(&self, id: &str) -> RepoResult<bool> {
        const OP: &str = "exists";
        let location = self.location(id)?;
        let exists = match (self.layout, location.field) {
            (Layout::Hash, Some(field)) => self
                .store
                .hget(&location.key, &field)
                .map(|value| value.map_or(false, |v| !v.is_empty())),
            // HDEL of the last field removes the key, so a hash is never empty
            (Layout::ValueInHash, _) => self.store.exists(&location.key),
            _ => self
                .store
                .get(&location.key)
                .map(|value| value.map_or(false, |v| !v.is_empty())),
        };
        exists.map_err(store(OP))
    }

    /// Identifiers of every stored entity
    pub fn list_identifiers(&self) -> RepoResult<BTreeSet<String>> {
        const OP: &str = "identifiers";
        match self.layout {
            Layout::Hash => Ok(self
                .store
                .hgetall(self.keys.collection_key())
                .map_err(store(OP))?
                .into_iter()
                .filter(|(_, value)| !value.is_empty())
                .map(|(id, _)| id)
                .collect()),
            Layout::ValueInHash => Ok(self.scanned_identifiers(OP)?.into_iter().collect()),
            Layout::Value => {
                let scanned = self.scanned_identifiers(OP)?;
                let mut found = BTreeSet::new();
                for group in self.group_by_partition(&scanned)?.into_values() {
                    let (group_ids, keys): (Vec<String>, Vec<String>) = group.into_iter().unzip();
                    let values = self.store.mget(&keys).map_err(store(OP))?;
                    found.extend(
                        group_ids
                            .into_iter()
                            .zip(values)
                            .filter(|(_, value)| value.as_ref().map_or(false, |v| !v.is_empty()))
                            .map(|(id, _)| id),
                    );
                }
                Ok(found)
            }
        }
    }

    // ========== Writes ==========

    /// Write `raw` under `id` if `condition` allows; returns whether it landed
    ///
    /// A plain write clears any expiration on the key.
    pub fn write_raw(&self, id: &str, raw: RawEntity, condition: SetCondition) -> RepoResult<bool> {
        let op = match condition {
            SetCondition::Always => "set",
            SetCondition::IfExists => "set_if_exists",
            SetCondition::IfNotExists => "set_if_not_exists",
        };
        if raw.is_empty() {
            return Err(RepoError::invalid_argument(
                "entity",
                "serializes to an empty value",
            ));
        }
        let location = self.location(id)?;
        match (self.layout, location.field) {
            (Layout::Hash, Some(field)) => {
                let bytes = raw.into_bytes()?;
                match condition {
                    SetCondition::Always => {
                        let mut fields = FieldMap::new();
                        fields.insert(field, bytes);
                        self.store
                            .hset(&location.key, &fields)
                            .map(|_| true)
                            .map_err(store(op))
                    }
                    SetCondition::IfNotExists => {
                        if self
                            .store
                            .hsetnx(&location.key, &field, &bytes)
                            .map_err(store(op))?
                        {
                            return Ok(true);
                        }
                        let args = vec![field.clone().into_bytes(), Vec::new()];
                        let cleared = self.run_script(
                            op,
                            ScriptId::compare_field(Action::Delete),
                            &location.key,
                            &args,
                        )?;
                        if !cleared {
                            return Ok(false);
                        }
                        self.store
                            .hsetnx(&location.key, &field, &bytes)
                            .map_err(store(op))
                    }
                    SetCondition::IfExists => {
                        let args = vec![field.into_bytes(), bytes];
                        self.run_script(op, ScriptId::FieldSetIfExists, &location.key, &args)
                    }
                }
            }
            (Layout::ValueInHash, _) => {
                let args = pack_fields(&raw.into_fields()?);
                self.run_script(op, ScriptId::replace_fields(condition), &location.key, &args)
            }
            _ => {
                let bytes = raw.into_bytes()?;
                let written = self
                    .store
                    .set(&location.key, &bytes, condition)
                    .map_err(store(op))?;
                if written || condition != SetCondition::IfNotExists {
                    return Ok(written);
                }
                let cleared = self.run_script(
                    op,
                    ScriptId::compare_value(Comparison::Equal, Action::Delete),
                    &location.key,
                    &[Vec::new()],
                )?;
                if !cleared {
                    return Ok(false);
                }
                self.store
                    .set(&location.key, &bytes, condition)
                    .map_err(store(op))
            }
        }
    }

    /// Delete `id`; returns whether it existed
    pub fn delete_raw(&self, id: &str) -> RepoResult<bool> {
        const OP: &str = "delete";
        let location = self.location(id)?;
        let removed = match location.field {
            Some(field) => self.store.hdel(&location.key, &[field]),
            None => self.store.del(&[location.key]),
        }
        .map_err(store(OP))?;
        Ok(removed > 0)
    }

    /// Delete every id in `ids`; returns how many existed
    pub fn delete_many_raw(&self, ids: &[String]) -> RepoResult<u64> {
        const OP: &str = "delete_many";
        if ids.is_empty() {
            return Ok(0);
        }
        match self.layout {
            Layout::Hash => self
                .store
                .hdel(self.keys.collection_key(), ids)
                .map_err(store(OP)),
            Layout::Value | Layout::ValueInHash => {
                let mut removed = 0;
                for group in self.group_by_partition(ids)?.into_values() {
                    let keys: Vec<String> = group.into_iter().map(|(_, key)| key).collect();
                    removed += self.store.del(&keys).map_err(store(OP))?;
                }
                Ok(removed)
            }
        }
    }

    /// Delete every entity in the collection; returns how many existed
    pub fn delete_all(&self) -> RepoResult<u64> {
        const OP: &str = "delete_all";
        match self.layout {
            Layout::Hash => {
                let ids = self
                    .store
                    .hkeys(self.keys.collection_key())
                    .map_err(store(OP))?;
                if ids.is_empty() {
                    return Ok(0);
                }
                self.store
                    .hdel(self.keys.collection_key(), &ids)
                    .map_err(store(OP))
            }
            Layout::Value | Layout::ValueInHash => {
                let ids: Vec<String> = self.list_identifiers()?.into_iter().collect();
                self.delete_many_raw(&ids)
            }
        }
    }

    // ========== Expiry ==========

    /// Expire `id` after `ttl`; returns whether it exists
    pub fn expire_after(&self, id: &str, ttl: Duration) -> RepoResult<bool> {
        const OP: &str = "set_expiration_after";
        self.require_expiry(OP)?;
        let key = self.keys.key_for(id)?;
        self.store.pexpire(&key, ttl).map_err(store(OP))
    }

    /// Expire `id` at `at`; returns whether it exists
    pub fn expire_at(&self, id: &str, at: Timestamp) -> RepoResult<bool> {
        const OP: &str = "set_expiration_at";
        self.require_expiry(OP)?;
        let key = self.keys.key_for(id)?;
        self.store.pexpire_at(&key, at).map_err(store(OP))
    }

    /// Remaining lifetime of `id`
    pub fn time_to_live(&self, id: &str) -> RepoResult<TimeToLive> {
        const OP: &str = "time_to_live";
        self.require_expiry(OP)?;
        let key = self.keys.key_for(id)?;
        self.store.pttl(&key).map_err(store(OP))
    }

    // ========== Helpers ==========

    /// Run a catalogued script on `key`; `1` means it acted
    pub(crate) fn run_script(
        &self,
        operation: &'static str,
        id: ScriptId,
        key: &str,
        args: &[Vec<u8>],
    ) -> RepoResult<bool> {
        self.scripts
            .run(id, key, args)
            .map(|reply| reply == 1)
            .map_err(store(operation))
    }

    /// Identifiers of every key under the collection prefix
    fn scanned_identifiers(&self, operation: &'static str) -> RepoResult<Vec<String>> {
        Ok(self
            .store
            .scan_prefix(self.keys.prefix())
            .map_err(store(operation))?
            .iter()
            .filter_map(|key| self.keys.identifier_of(key))
            .map(str::to_string)
            .collect())
    }

    /// Per-entity keys of `ids`, grouped by owning partition
    fn group_by_partition(
        &self,
        ids: &[String],
    ) -> RepoResult<BTreeMap<PartitionId, Vec<(String, String)>>> {
        let mut groups: BTreeMap<PartitionId, Vec<(String, String)>> = BTreeMap::new();
        for id in ids {
            let key = self.keys.key_for(id)?;
            groups
                .entry(self.store.partition_of(&key))
                .or_default()
                .push((id.clone(), key));
        }
        Ok(groups)
    }
}

impl fmt::Debug for LayoutStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayoutStrategy")
            .field("layout", &self.layout)
            .field("collection", &self.keys.collection_key())
            .field("scripts", &self.scripts)
            .finish()
    }
}

/// Wrap a store error with the repository operation that hit it
pub(crate) fn store(operation: &'static str) -> impl Fn(StoreError) -> RepoError {
    move |source| RepoError::store(operation, source)
}
