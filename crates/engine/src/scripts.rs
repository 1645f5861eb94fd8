//! Script catalog and lazily loaded script handles
//!
//! Every atomic compare-and-act the engine needs is a named server-side
//! script. The catalog pairs each [`ScriptId`] with its Lua source and the
//! body the in-memory stores execute in its place.
//!
//! ## Loading
//!
//! A [`ScriptRunner`] keeps one `OnceCell<ScriptSha>` per script. The first
//! call loads the script (SCRIPT LOAD) on the partition owning the call's
//! key and memoizes the reference; concurrent first callers block on the
//! cell and observe the same reference. Later calls go straight to EVALSHA.
//!
//! If the store answers `NoScript` (restart, SCRIPT FLUSH, or a cluster node
//! that never saw the script) the runner reloads on that key's partition and
//! retries exactly once. A failing reload or a second `NoScript` is returned
//! to the caller.

use std::sync::Arc;

use kvrepo_core::StoreResult;
use kvrepo_storage::{Action, Comparison, Script, ScriptBody, ScriptSha, SetCondition, StoreClient};
use once_cell::sync::{Lazy, OnceCell};
use tracing::{debug, info};

// ============================================================================
// Lua sources
// ============================================================================

/// Helpers shared by the whole-hash scripts
///
/// `ARGV[1]` is the number of expected fields `n`, followed by `n` expected
/// name/value pairs, followed by the new name/value pairs.
macro_rules! fields_prelude {
    () => {
        r#"
local function same_hash(key, argv, n)
  local current = redis.call('HGETALL', key)
  if #current == 0 then return nil end
  if #current ~= 2 * n then return false end
  local expected = {}
  for i = 1, n do expected[argv[2 * i]] = argv[2 * i + 1] end
  for i = 1, #current, 2 do
    if expected[current[i]] ~= current[i + 1] then return false end
  end
  return true
end
local function replace_keep_ttl(key, argv, first)
  local ttl = redis.call('PTTL', key)
  local fields = {}
  for i = first, #argv do fields[#fields + 1] = argv[i] end
  redis.call('DEL', key)
  redis.call('HSET', key, unpack(fields))
  if ttl > 0 then redis.call('PEXPIRE', key, ttl) end
end
local n = tonumber(ARGV[1])
"#
    };
}

const VALUE_UPDATE_IF_IS: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2], 'KEEPTTL')
  return 1
end
return 0
"#;

const VALUE_UPDATE_IF_IS_NOT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current and current ~= ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2], 'KEEPTTL')
  return 1
end
return 0
"#;

const VALUE_DELETE_IF_IS: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('DEL', KEYS[1])
  return 1
end
return 0
"#;

const VALUE_DELETE_IF_IS_NOT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current and current ~= ARGV[1] then
  redis.call('DEL', KEYS[1])
  return 1
end
return 0
"#;

const FIELD_UPDATE_IF_IS: &str = r#"
if redis.call('HGET', KEYS[1], ARGV[1]) == ARGV[2] then
  redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
  return 1
end
return 0
"#;

const FIELD_DELETE_IF_IS: &str = r#"
if redis.call('HGET', KEYS[1], ARGV[1]) == ARGV[2] then
  redis.call('HDEL', KEYS[1], ARGV[1])
  return 1
end
return 0
"#;

const FIELD_SET_IF_EXISTS: &str = r#"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 1 then
  redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
  return 1
end
return 0
"#;

const FIELDS_UPDATE_IF_IS: &str = concat!(
    fields_prelude!(),
    r#"
if same_hash(KEYS[1], ARGV, n) ~= true then return 0 end
replace_keep_ttl(KEYS[1], ARGV, 2 + 2 * n)
return 1
"#
);

const FIELDS_UPDATE_IF_IS_NOT: &str = concat!(
    fields_prelude!(),
    r#"
if same_hash(KEYS[1], ARGV, n) ~= false then return 0 end
replace_keep_ttl(KEYS[1], ARGV, 2 + 2 * n)
return 1
"#
);

const FIELDS_DELETE_IF_IS: &str = concat!(
    fields_prelude!(),
    r#"
if same_hash(KEYS[1], ARGV, n) ~= true then return 0 end
redis.call('DEL', KEYS[1])
return 1
"#
);

const FIELDS_DELETE_IF_IS_NOT: &str = concat!(
    fields_prelude!(),
    r#"
if same_hash(KEYS[1], ARGV, n) ~= false then return 0 end
redis.call('DEL', KEYS[1])
return 1
"#
);

const FIELDS_REPLACE: &str = r#"
redis.call('DEL', KEYS[1])
redis.call('HSET', KEYS[1], unpack(ARGV))
return 1
"#;

const FIELDS_REPLACE_IF_EXISTS: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return 0 end
redis.call('DEL', KEYS[1])
redis.call('HSET', KEYS[1], unpack(ARGV))
return 1
"#;

const FIELDS_REPLACE_IF_NOT_EXISTS: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then return 0 end
redis.call('HSET', KEYS[1], unpack(ARGV))
return 1
"#;

// ============================================================================
// Catalog
// ============================================================================

/// Scripts known to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptId {
    /// Set a value if it equals the expected bytes
    ValueUpdateIfIs,
    /// Set a value if it exists and differs from the expected bytes
    ValueUpdateIfIsNot,
    /// Delete a value if it equals the expected bytes
    ValueDeleteIfIs,
    /// Delete a value if it exists and differs from the expected bytes
    ValueDeleteIfIsNot,
    /// Set a hash field if it equals the expected bytes
    FieldUpdateIfIs,
    /// Delete a hash field if it equals the expected bytes
    FieldDeleteIfIs,
    /// Set a hash field only if it exists
    FieldSetIfExists,
    /// Replace a whole hash if it equals the expected fields
    FieldsUpdateIfIs,
    /// Replace a whole hash if it exists and differs from the expected fields
    FieldsUpdateIfIsNot,
    /// Delete a whole hash if it equals the expected fields
    FieldsDeleteIfIs,
    /// Delete a whole hash if it exists and differs from the expected fields
    FieldsDeleteIfIsNot,
    /// Replace a whole hash
    FieldsReplace,
    /// Replace a whole hash only if it exists
    FieldsReplaceIfExists,
    /// Write a whole hash only if the key is missing
    FieldsReplaceIfNotExists,
}

impl ScriptId {
    /// Every script, in catalog order
    pub const ALL: [ScriptId; 14] = [
        ScriptId::ValueUpdateIfIs,
        ScriptId::ValueUpdateIfIsNot,
        ScriptId::ValueDeleteIfIs,
        ScriptId::ValueDeleteIfIsNot,
        ScriptId::FieldUpdateIfIs,
        ScriptId::FieldDeleteIfIs,
        ScriptId::FieldSetIfExists,
        ScriptId::FieldsUpdateIfIs,
        ScriptId::FieldsUpdateIfIsNot,
        ScriptId::FieldsDeleteIfIs,
        ScriptId::FieldsDeleteIfIsNot,
        ScriptId::FieldsReplace,
        ScriptId::FieldsReplaceIfExists,
        ScriptId::FieldsReplaceIfNotExists,
    ];

    /// Compare-and-act on a plain value
    pub fn compare_value(when: Comparison, action: Action) -> Self {
        match (when, action) {
            (Comparison::Equal, Action::Set) => ScriptId::ValueUpdateIfIs,
            (Comparison::NotEqual, Action::Set) => ScriptId::ValueUpdateIfIsNot,
            (Comparison::Equal, Action::Delete) => ScriptId::ValueDeleteIfIs,
            (Comparison::NotEqual, Action::Delete) => ScriptId::ValueDeleteIfIsNot,
        }
    }

    /// Compare-and-act on one hash field; only equality is catalogued
    pub fn compare_field(action: Action) -> Self {
        match action {
            Action::Set => ScriptId::FieldUpdateIfIs,
            Action::Delete => ScriptId::FieldDeleteIfIs,
        }
    }

    /// Compare-and-act on a whole hash
    pub fn compare_fields(when: Comparison, action: Action) -> Self {
        match (when, action) {
            (Comparison::Equal, Action::Set) => ScriptId::FieldsUpdateIfIs,
            (Comparison::NotEqual, Action::Set) => ScriptId::FieldsUpdateIfIsNot,
            (Comparison::Equal, Action::Delete) => ScriptId::FieldsDeleteIfIs,
            (Comparison::NotEqual, Action::Delete) => ScriptId::FieldsDeleteIfIsNot,
        }
    }

    /// Whole-hash write gated on existence
    pub fn replace_fields(condition: SetCondition) -> Self {
        match condition {
            SetCondition::Always => ScriptId::FieldsReplace,
            SetCondition::IfExists => ScriptId::FieldsReplaceIfExists,
            SetCondition::IfNotExists => ScriptId::FieldsReplaceIfNotExists,
        }
    }

    /// Script name
    pub fn name(self) -> &'static str {
        match self {
            ScriptId::ValueUpdateIfIs => "value_update_if_is",
            ScriptId::ValueUpdateIfIsNot => "value_update_if_is_not",
            ScriptId::ValueDeleteIfIs => "value_delete_if_is",
            ScriptId::ValueDeleteIfIsNot => "value_delete_if_is_not",
            ScriptId::FieldUpdateIfIs => "field_update_if_is",
            ScriptId::FieldDeleteIfIs => "field_delete_if_is",
            ScriptId::FieldSetIfExists => "field_set_if_exists",
            ScriptId::FieldsUpdateIfIs => "fields_update_if_is",
            ScriptId::FieldsUpdateIfIsNot => "fields_update_if_is_not",
            ScriptId::FieldsDeleteIfIs => "fields_delete_if_is",
            ScriptId::FieldsDeleteIfIsNot => "fields_delete_if_is_not",
            ScriptId::FieldsReplace => "fields_replace",
            ScriptId::FieldsReplaceIfExists => "fields_replace_if_exists",
            ScriptId::FieldsReplaceIfNotExists => "fields_replace_if_not_exists",
        }
    }

    /// The catalogued script
    pub fn script(self) -> &'static Script {
        &CATALOG[self as usize]
    }

    fn source(self) -> &'static str {
        match self {
            ScriptId::ValueUpdateIfIs => VALUE_UPDATE_IF_IS,
            ScriptId::ValueUpdateIfIsNot => VALUE_UPDATE_IF_IS_NOT,
            ScriptId::ValueDeleteIfIs => VALUE_DELETE_IF_IS,
            ScriptId::ValueDeleteIfIsNot => VALUE_DELETE_IF_IS_NOT,
            ScriptId::FieldUpdateIfIs => FIELD_UPDATE_IF_IS,
            ScriptId::FieldDeleteIfIs => FIELD_DELETE_IF_IS,
            ScriptId::FieldSetIfExists => FIELD_SET_IF_EXISTS,
            ScriptId::FieldsUpdateIfIs => FIELDS_UPDATE_IF_IS,
            ScriptId::FieldsUpdateIfIsNot => FIELDS_UPDATE_IF_IS_NOT,
            ScriptId::FieldsDeleteIfIs => FIELDS_DELETE_IF_IS,
            ScriptId::FieldsDeleteIfIsNot => FIELDS_DELETE_IF_IS_NOT,
            ScriptId::FieldsReplace => FIELDS_REPLACE,
            ScriptId::FieldsReplaceIfExists => FIELDS_REPLACE_IF_EXISTS,
            ScriptId::FieldsReplaceIfNotExists => FIELDS_REPLACE_IF_NOT_EXISTS,
        }
    }

    fn body(self) -> ScriptBody {
        match self {
            ScriptId::ValueUpdateIfIs => compare_value(Comparison::Equal, Action::Set),
            ScriptId::ValueUpdateIfIsNot => compare_value(Comparison::NotEqual, Action::Set),
            ScriptId::ValueDeleteIfIs => compare_value(Comparison::Equal, Action::Delete),
            ScriptId::ValueDeleteIfIsNot => compare_value(Comparison::NotEqual, Action::Delete),
            ScriptId::FieldUpdateIfIs => ScriptBody::CompareField {
                when: Comparison::Equal,
                action: Action::Set,
            },
            ScriptId::FieldDeleteIfIs => ScriptBody::CompareField {
                when: Comparison::Equal,
                action: Action::Delete,
            },
            ScriptId::FieldSetIfExists => ScriptBody::SetFieldIfExists,
            ScriptId::FieldsUpdateIfIs => compare_fields(Comparison::Equal, Action::Set),
            ScriptId::FieldsUpdateIfIsNot => compare_fields(Comparison::NotEqual, Action::Set),
            ScriptId::FieldsDeleteIfIs => compare_fields(Comparison::Equal, Action::Delete),
            ScriptId::FieldsDeleteIfIsNot => compare_fields(Comparison::NotEqual, Action::Delete),
            ScriptId::FieldsReplace => ScriptBody::ReplaceFields {
                guard: SetCondition::Always,
            },
            ScriptId::FieldsReplaceIfExists => ScriptBody::ReplaceFields {
                guard: SetCondition::IfExists,
            },
            ScriptId::FieldsReplaceIfNotExists => ScriptBody::ReplaceFields {
                guard: SetCondition::IfNotExists,
            },
        }
    }
}

fn compare_value(when: Comparison, action: Action) -> ScriptBody {
    ScriptBody::CompareValue { when, action }
}

fn compare_fields(when: Comparison, action: Action) -> ScriptBody {
    ScriptBody::CompareFields { when, action }
}

/// Catalog indexed by `ScriptId as usize`
static CATALOG: Lazy<Vec<Script>> = Lazy::new(|| {
    ScriptId::ALL
        .iter()
        .map(|id| Script::new(id.name(), id.source(), id.body()))
        .collect()
});

// ============================================================================
// Runner
// ============================================================================

/// Invokes catalogued scripts, loading each on first use
pub struct ScriptRunner {
    store: Arc<dyn StoreClient>,
    loaded: Vec<OnceCell<ScriptSha>>,
}

impl ScriptRunner {
    /// Create a runner with no script loaded yet
    pub fn new(store: Arc<dyn StoreClient>) -> Self {
        Self {
            store,
            loaded: ScriptId::ALL.iter().map(|_| OnceCell::new()).collect(),
        }
    }

    /// Whether this runner has memoized a reference for `id`
    pub fn is_loaded(&self, id: ScriptId) -> bool {
        self.loaded[id as usize].get().is_some()
    }

    /// Run `id` against `key`, routing load and call to the key's partition
    ///
    /// Returns the script's integer reply.
    pub fn run(&self, id: ScriptId, key: &str, args: &[Vec<u8>]) -> StoreResult<i64> {
        let script = id.script();
        let sha = self.loaded[id as usize].get_or_try_init(|| self.load(script, key))?;
        let keys = [key.to_string()];

        match self.store.eval_sha(sha, &keys, args) {
            Err(err) if err.is_no_script() => {
                debug!(
                    target: "kvrepo::scripts",
                    script = script.name(),
                    key,
                    "script unknown to the store, reloading"
                );
                let sha = self.load(script, key)?;
                self.store.eval_sha(&sha, &keys, args)
            }
            reply => reply,
        }
    }

    fn load(&self, script: &Script, route_key: &str) -> StoreResult<ScriptSha> {
        let sha = self.store.script_load(script, route_key)?;
        info!(target: "kvrepo::scripts", script = script.name(), sha = %sha, "script loaded");
        Ok(sha)
    }
}

impl std::fmt::Debug for ScriptRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let loaded: Vec<&str> = ScriptId::ALL
            .iter()
            .filter(|id| self.is_loaded(**id))
            .map(|id| id.name())
            .collect();
        f.debug_struct("ScriptRunner")
            .field("loaded", &loaded)
            .finish()
    }
}
