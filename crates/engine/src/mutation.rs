//! Conditional mutation engine
//!
//! Conditional updates and deletes run a single-attempt read-modify-write:
//!
//! 1. Fetch the serialized entity. Absent ends the call with
//!    [`Mutation::Absent`].
//! 2. Decode it and evaluate the caller's condition. False ends the call
//!    with [`Mutation::ConditionNotMet`].
//! 3. Apply the updater and encode the result (update), or mark the entity
//!    for removal (delete).
//! 4. Write through a compare-and-act script that checks the stored bytes
//!    still equal the bytes fetched in step 1.
//! 5. Report [`Mutation::Applied`] when the script acted and
//!    [`Mutation::Conflict`] when another writer got in between.
//!
//! A conflict is never retried here; retry policy belongs to the caller.
//!
//! The equality family (`update_if_it_is` and friends) skips steps 1-3 and
//! sends the caller's expected value straight to the script, so the whole
//! compare-and-act runs as one atomic unit in the store. Comparison is on
//! serialized bytes: two entities that encode differently never match.
//!
//! Every script call carries exactly one key, the entity's storage key, and
//! is routed to the partition owning it.

use kvrepo_core::{EntityCodec, Mutation, RepoError, RepoResult};
use kvrepo_storage::{pack_compare_fields, Action, Comparison};
use tracing::debug;

use crate::layout::{Layout, LayoutStrategy, RawEntity};
use crate::scripts::ScriptId;

/// Runs conditional mutations against one layout strategy
#[derive(Debug, Clone, Copy)]
pub struct MutationEngine<'a> {
    strategy: &'a LayoutStrategy,
}

impl<'a> MutationEngine<'a> {
    /// Engine over `strategy`
    pub fn new(strategy: &'a LayoutStrategy) -> Self {
        Self { strategy }
    }

    // ========== Read-modify-write ==========

    /// Apply `updater` to the current entity if `condition` holds
    pub fn update<E, F, C>(
        &self,
        id: &str,
        codec: &EntityCodec<E>,
        updater: F,
        condition: C,
    ) -> RepoResult<Mutation>
    where
        F: FnOnce(E) -> E,
        C: FnOnce(&E) -> bool,
    {
        const OP: &str = "update";
        let current = match self.strategy.read_raw(id)? {
            Some(raw) => raw,
            None => return Ok(finish(OP, id, Mutation::Absent)),
        };
        let entity = current.decode(codec, id)?;
        if !condition(&entity) {
            return Ok(finish(OP, id, Mutation::ConditionNotMet));
        }
        let new = RawEntity::encode(codec, id, &updater(entity))?;
        let landed = self.guarded(OP, id, Comparison::Equal, current, Some(new))?;
        Ok(finish(OP, id, Mutation::from_guarded_write(landed)))
    }

    /// Delete the current entity if `condition` holds
    pub fn delete<E, C>(&self, id: &str, codec: &EntityCodec<E>, condition: C) -> RepoResult<Mutation>
    where
        C: FnOnce(&E) -> bool,
    {
        const OP: &str = "delete_if";
        let current = match self.strategy.read_raw(id)? {
            Some(raw) => raw,
            None => return Ok(finish(OP, id, Mutation::Absent)),
        };
        let entity = current.decode(codec, id)?;
        if !condition(&entity) {
            return Ok(finish(OP, id, Mutation::ConditionNotMet));
        }
        let landed = self.guarded(OP, id, Comparison::Equal, current, None)?;
        Ok(finish(OP, id, Mutation::from_guarded_write(landed)))
    }

    // ========== Equality-gated scripts ==========

    /// Replace the entity with `new` if it currently serializes to `old`
    pub fn update_if_it_is<E>(
        &self,
        id: &str,
        codec: &EntityCodec<E>,
        old: &E,
        new: &E,
    ) -> RepoResult<bool> {
        self.equality("update_if_it_is", id, codec, Comparison::Equal, old, Some(new))
    }

    /// Replace the entity with `new` if it exists and does not serialize to `old`
    pub fn update_if_it_is_not<E>(
        &self,
        id: &str,
        codec: &EntityCodec<E>,
        old: &E,
        new: &E,
    ) -> RepoResult<bool> {
        self.equality("update_if_it_is_not", id, codec, Comparison::NotEqual, old, Some(new))
    }

    /// Delete the entity if it currently serializes to `old`
    pub fn delete_if_it_is<E>(&self, id: &str, codec: &EntityCodec<E>, old: &E) -> RepoResult<bool> {
        self.equality("delete_if_it_is", id, codec, Comparison::Equal, old, None)
    }

    /// Delete the entity if it exists and does not serialize to `old`
    pub fn delete_if_it_is_not<E>(
        &self,
        id: &str,
        codec: &EntityCodec<E>,
        old: &E,
    ) -> RepoResult<bool> {
        self.equality("delete_if_it_is_not", id, codec, Comparison::NotEqual, old, None)
    }

    fn equality<E>(
        &self,
        operation: &'static str,
        id: &str,
        codec: &EntityCodec<E>,
        when: Comparison,
        old: &E,
        new: Option<&E>,
    ) -> RepoResult<bool> {
        let layout = self.strategy.layout();
        if !layout.capabilities().supports_equality_scripts {
            return Err(RepoError::unsupported(operation, layout.as_str()));
        }
        // Validate before touching the codec or the store
        self.strategy.location(id)?;
        let expected = RawEntity::encode(codec, id, old)?;
        let new = new.map(|new| RawEntity::encode(codec, id, new)).transpose()?;

        let applied = self.guarded(operation, id, when, expected, new)?;
        debug!(target: "kvrepo::engine", operation, id, applied, "equality script finished");
        Ok(applied)
    }

    // ========== Compare-and-act ==========

    /// Run the layout's compare-and-act script for `id`
    ///
    /// `new` is the replacement for a set, `None` for a delete. Returns
    /// whether the script acted.
    fn guarded(
        &self,
        operation: &'static str,
        id: &str,
        when: Comparison,
        expected: RawEntity,
        new: Option<RawEntity>,
    ) -> RepoResult<bool> {
        let action = if new.is_some() {
            Action::Set
        } else {
            Action::Delete
        };
        let location = self.strategy.location(id)?;

        let (script, args) = match (self.strategy.layout(), expected, new) {
            (Layout::Value, RawEntity::Bytes(expected), new) => {
                let mut args = vec![expected];
                args.extend(new.map(raw_bytes).transpose()?);
                (ScriptId::compare_value(when, action), args)
            }
            (Layout::Hash, RawEntity::Bytes(expected), new) => {
                if when != Comparison::Equal {
                    return Err(RepoError::unsupported(operation, Layout::Hash.as_str()));
                }
                let field = location.field.clone().unwrap_or_else(|| id.to_string());
                let mut args = vec![field.into_bytes(), expected];
                args.extend(new.map(raw_bytes).transpose()?);
                (ScriptId::compare_field(action), args)
            }
            (Layout::ValueInHash, RawEntity::Fields(expected), new) => {
                let new = match new {
                    Some(RawEntity::Fields(fields)) => Some(fields),
                    Some(RawEntity::Bytes(_)) => return Err(shape_mismatch()),
                    None => None,
                };
                (
                    ScriptId::compare_fields(when, action),
                    pack_compare_fields(&expected, new.as_ref()),
                )
            }
            _ => return Err(shape_mismatch()),
        };

        self.strategy
            .run_script(operation, script, &location.key, &args)
    }
}

fn raw_bytes(raw: RawEntity) -> RepoResult<Vec<u8>> {
    match raw {
        RawEntity::Bytes(bytes) => Ok(bytes),
        RawEntity::Fields(_) => Err(shape_mismatch()),
    }
}

fn shape_mismatch() -> RepoError {
    RepoError::invalid_argument("entity", "serialized form does not match the layout")
}

fn finish(operation: &'static str, id: &str, outcome: Mutation) -> Mutation {
    debug!(target: "kvrepo::engine", operation, id, outcome = ?outcome, "conditional mutation finished");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvrepo_core::{CollectionName, JsonCodec, JsonFieldsCodec, KeyScheme};
    use kvrepo_storage::{MemoryStore, SetCondition, StoreClient};
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Person {
        name: String,
        age: u32,
    }

    fn alice(age: u32) -> Person {
        Person {
            name: "alice".to_string(),
            age,
        }
    }

    fn setup(layout: Layout) -> (Arc<MemoryStore>, LayoutStrategy, EntityCodec<Person>) {
        let store = Arc::new(MemoryStore::new());
        let keys = KeyScheme::new(CollectionName::new("people").unwrap());
        let strategy = LayoutStrategy::new(layout, keys, store.clone());
        let codec = match layout {
            Layout::ValueInHash => EntityCodec::fields(JsonFieldsCodec::<Person>::new()),
            _ => EntityCodec::bytes(JsonCodec::<Person>::new()),
        };
        (store, strategy, codec)
    }

    fn put(strategy: &LayoutStrategy, codec: &EntityCodec<Person>, id: &str, person: &Person) {
        let raw = RawEntity::encode(codec, id, person).unwrap();
        strategy.write_raw(id, raw, SetCondition::Always).unwrap();
    }

    fn read(strategy: &LayoutStrategy, codec: &EntityCodec<Person>, id: &str) -> Option<Person> {
        strategy
            .read_raw(id)
            .unwrap()
            .map(|raw| raw.decode(codec, id).unwrap())
    }

    const LAYOUTS: [Layout; 3] = [Layout::Value, Layout::Hash, Layout::ValueInHash];

    #[test]
    fn test_update_outcomes() {
        for layout in LAYOUTS {
            let (_store, strategy, codec) = setup(layout);
            let engine = MutationEngine::new(&strategy);

            let absent = engine.update("alice", &codec, |p| p, |_| true).unwrap();
            assert_eq!(absent, Mutation::Absent, "{layout}");

            put(&strategy, &codec, "alice", &alice(30));
            let skipped = engine
                .update("alice", &codec, |_| alice(99), |p| p.age > 40)
                .unwrap();
            assert_eq!(skipped, Mutation::ConditionNotMet, "{layout}");
            assert_eq!(read(&strategy, &codec, "alice"), Some(alice(30)));

            let applied = engine
                .update("alice", &codec, |p| alice(p.age + 1), |_| true)
                .unwrap();
            assert_eq!(applied, Mutation::Applied, "{layout}");
            assert_eq!(read(&strategy, &codec, "alice"), Some(alice(31)));
        }
    }

    #[test]
    fn test_update_conflict_keeps_interleaved_write() {
        for layout in LAYOUTS {
            let (_store, strategy, codec) = setup(layout);
            let engine = MutationEngine::new(&strategy);
            put(&strategy, &codec, "alice", &alice(30));

            // Another writer lands between the fetch and the guarded write
            let outcome = engine
                .update(
                    "alice",
                    &codec,
                    |p| {
                        put(&strategy, &codec, "alice", &alice(50));
                        alice(p.age + 1)
                    },
                    |_| true,
                )
                .unwrap();
            assert_eq!(outcome, Mutation::Conflict, "{layout}");
            assert_eq!(read(&strategy, &codec, "alice"), Some(alice(50)), "{layout}");
        }
    }

    #[test]
    fn test_delete_outcomes() {
        for layout in LAYOUTS {
            let (_store, strategy, codec) = setup(layout);
            let engine = MutationEngine::new(&strategy);
            assert_eq!(
                engine.delete("alice", &codec, |_| true).unwrap(),
                Mutation::Absent
            );

            put(&strategy, &codec, "alice", &alice(30));
            assert_eq!(
                engine.delete("alice", &codec, |p| p.age == 0).unwrap(),
                Mutation::ConditionNotMet
            );
            assert_eq!(
                engine.delete("alice", &codec, |p| p.age == 30).unwrap(),
                Mutation::Applied,
                "{layout}"
            );
            assert_eq!(read(&strategy, &codec, "alice"), None);
        }
    }

    #[test]
    fn test_delete_conflict() {
        let (_store, strategy, codec) = setup(Layout::Value);
        let engine = MutationEngine::new(&strategy);
        put(&strategy, &codec, "alice", &alice(30));

        let outcome = engine
            .delete("alice", &codec, |_| {
                put(&strategy, &codec, "alice", &alice(31));
                true
            })
            .unwrap();
        assert_eq!(outcome, Mutation::Conflict);
        assert_eq!(read(&strategy, &codec, "alice"), Some(alice(31)));
    }

    #[test]
    fn test_equality_family() {
        for layout in [Layout::Value, Layout::ValueInHash] {
            let (_store, strategy, codec) = setup(layout);
            let engine = MutationEngine::new(&strategy);

            // Absent: nothing matches, not even "is not"
            assert!(!engine.update_if_it_is_not("alice", &codec, &alice(1), &alice(2)).unwrap());
            assert!(!engine.delete_if_it_is_not("alice", &codec, &alice(1)).unwrap());
            assert_eq!(read(&strategy, &codec, "alice"), None, "{layout}");

            put(&strategy, &codec, "alice", &alice(30));
            assert!(!engine.update_if_it_is("alice", &codec, &alice(29), &alice(40)).unwrap());
            assert!(engine.update_if_it_is("alice", &codec, &alice(30), &alice(40)).unwrap());
            assert!(!engine.update_if_it_is_not("alice", &codec, &alice(40), &alice(41)).unwrap());
            assert!(engine.update_if_it_is_not("alice", &codec, &alice(1), &alice(41)).unwrap());
            assert_eq!(read(&strategy, &codec, "alice"), Some(alice(41)), "{layout}");

            assert!(!engine.delete_if_it_is_not("alice", &codec, &alice(41)).unwrap());
            assert!(!engine.delete_if_it_is("alice", &codec, &alice(40)).unwrap());
            assert!(engine.delete_if_it_is("alice", &codec, &alice(41)).unwrap());
            assert_eq!(read(&strategy, &codec, "alice"), None, "{layout}");
        }
    }

    #[test]
    fn test_equality_scripts_keep_ttl() {
        let (store, strategy, codec) = setup(Layout::ValueInHash);
        let engine = MutationEngine::new(&strategy);
        put(&strategy, &codec, "alice", &alice(30));
        strategy
            .expire_after("alice", Duration::from_secs(60))
            .unwrap();

        assert!(engine.update_if_it_is("alice", &codec, &alice(30), &alice(31)).unwrap());
        assert!(store.pttl("people:alice").unwrap().remaining().is_some());
    }

    #[test]
    fn test_hash_layout_rejects_equality_family() {
        let (store, strategy, codec) = setup(Layout::Hash);
        let engine = MutationEngine::new(&strategy);
        let before = store.command_count();

        let err = engine
            .update_if_it_is("alice", &codec, &alice(1), &alice(2))
            .unwrap_err();
        assert!(matches!(
            err,
            RepoError::UnsupportedOperation {
                operation: "update_if_it_is",
                layout: "hash"
            }
        ));
        assert!(engine.delete_if_it_is_not("alice", &codec, &alice(1)).is_err());
        assert_eq!(store.command_count(), before);
    }

    #[test]
    fn test_invalid_id_rejected_before_io() {
        let (store, strategy, codec) = setup(Layout::Value);
        let engine = MutationEngine::new(&strategy);
        let before = store.command_count();

        assert!(engine
            .update("", &codec, |p| p, |_| true)
            .unwrap_err()
            .is_invalid_argument());
        assert!(engine
            .delete_if_it_is(" ", &codec, &alice(1))
            .unwrap_err()
            .is_invalid_argument());
        assert_eq!(store.command_count(), before);
    }

    #[test]
    fn test_store_failure_surfaces() {
        let (store, strategy, codec) = setup(Layout::Value);
        let engine = MutationEngine::new(&strategy);
        store.set_offline(true);

        let err = engine.update("alice", &codec, |p| p, |_| true).unwrap_err();
        assert!(matches!(err, RepoError::StoreUnavailable { .. }));
    }
}
