//! Server-side scripts
//!
//! A [`Script`] pairs the source text a store compiles with the
//! [`ScriptBody`] the in-memory stores execute in its place. Scripts are
//! referenced by [`ScriptSha`], the SHA-256 of their source, so two processes
//! loading the same text agree on the reference.
//!
//! ## Calling Convention
//!
//! Every body operates on exactly one key (`KEYS[1]`) and returns an integer:
//! `1` when the action ran, `0` when the guard rejected it.
//!
//! | body | ARGV |
//! |------|------|
//! | `CompareValue` | expected, [new] |
//! | `CompareField` | field, expected, [new] |
//! | `CompareFields` | n, n expected pairs, [new pairs] |
//! | `ReplaceFields` | new pairs |
//! | `SetFieldIfExists` | field, value |
//!
//! Field maps travel as flattened `name, value` pairs (see
//! [`pack_fields`] / [`unpack_fields`]).

use crate::client::SetCondition;
use kvrepo_core::{FieldMap, StoreError, StoreResult};
use sha2::{Digest, Sha256};
use std::fmt;

/// Content hash identifying a loaded script
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptSha(String);

impl ScriptSha {
    /// Hash script source text
    pub fn of_source(source: &str) -> Self {
        let digest = Sha256::digest(source.as_bytes());
        ScriptSha(format!("{:x}", digest))
    }

    /// Hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScriptSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the stored value must relate to the expected one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    /// Act when the stored value equals the expected value
    Equal,
    /// Act when a value is stored and differs from the expected value
    NotEqual,
}

impl Comparison {
    /// Whether the guard passes for `current` (absent is never a match)
    pub fn holds<T: PartialEq + ?Sized>(&self, current: Option<&T>, expected: &T) -> bool {
        match (self, current) {
            (_, None) => false,
            (Comparison::Equal, Some(current)) => current == expected,
            (Comparison::NotEqual, Some(current)) => current != expected,
        }
    }
}

/// What to do once the guard passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Write the new value, keeping the key's remaining TTL
    Set,
    /// Remove the value
    Delete,
}

/// Compiled form of a script, executed atomically by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptBody {
    /// Compare the string value at KEYS[1] with ARGV[1]
    CompareValue {
        /// Guard
        when: Comparison,
        /// Action when the guard passes
        action: Action,
    },
    /// Compare hash field ARGV[1] at KEYS[1] with ARGV[2]
    CompareField {
        /// Guard
        when: Comparison,
        /// Action when the guard passes
        action: Action,
    },
    /// Compare the whole hash at KEYS[1] with a packed field map
    CompareFields {
        /// Guard
        when: Comparison,
        /// Action when the guard passes
        action: Action,
    },
    /// Replace the whole hash at KEYS[1] with a packed field map
    ReplaceFields {
        /// Existence precondition
        guard: SetCondition,
    },
    /// Set hash field ARGV[1] to ARGV[2] only if the field exists
    SetFieldIfExists,
}

/// A named script: source text, content hash and compiled body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    name: &'static str,
    source: &'static str,
    body: ScriptBody,
    sha: ScriptSha,
}

impl Script {
    /// Create a script, hashing its source
    pub fn new(name: &'static str, source: &'static str, body: ScriptBody) -> Self {
        Self {
            name,
            source,
            body,
            sha: ScriptSha::of_source(source),
        }
    }

    /// Script name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Source text
    pub fn source(&self) -> &'static str {
        self.source
    }

    /// Compiled body
    pub fn body(&self) -> ScriptBody {
        self.body
    }

    /// Content hash of the source
    pub fn sha(&self) -> &ScriptSha {
        &self.sha
    }
}

// ============================================================================
// Field map packing
// ============================================================================

/// Flatten a field map into `name, value` argument pairs
pub fn pack_fields(fields: &FieldMap) -> Vec<Vec<u8>> {
    let mut args = Vec::with_capacity(fields.len() * 2);
    for (name, value) in fields {
        args.push(name.as_bytes().to_vec());
        args.push(value.clone());
    }
    args
}

/// Rebuild a field map from `name, value` argument pairs
pub fn unpack_fields(script: &str, args: &[Vec<u8>]) -> StoreResult<FieldMap> {
    if args.len() % 2 != 0 {
        return Err(script_error(script, "odd number of field arguments"));
    }
    args.chunks(2)
        .map(|pair| {
            let name = String::from_utf8(pair[0].clone())
                .map_err(|_| script_error(script, "field name is not UTF-8"))?;
            Ok((name, pair[1].clone()))
        })
        .collect()
}

/// Argument list for `CompareFields`: count, expected pairs, then new pairs
pub fn pack_compare_fields(expected: &FieldMap, new: Option<&FieldMap>) -> Vec<Vec<u8>> {
    let mut args = vec![expected.len().to_string().into_bytes()];
    args.extend(pack_fields(expected));
    if let Some(new) = new {
        args.extend(pack_fields(new));
    }
    args
}

/// Split `CompareFields` arguments back into expected and new maps
pub fn unpack_compare_fields(
    script: &str,
    args: &[Vec<u8>],
) -> StoreResult<(FieldMap, FieldMap)> {
    let (count, rest) = args
        .split_first()
        .ok_or_else(|| script_error(script, "missing field count"))?;
    let count: usize = std::str::from_utf8(count)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| script_error(script, "field count is not a number"))?;
    if rest.len() < count * 2 {
        return Err(script_error(script, "fewer expected fields than announced"));
    }
    let (expected, new) = rest.split_at(count * 2);
    Ok((unpack_fields(script, expected)?, unpack_fields(script, new)?))
}

pub(crate) fn script_error(script: &str, reason: &str) -> StoreError {
    StoreError::Script {
        name: script.to_string(),
        reason: reason.to_string(),
    }
}
