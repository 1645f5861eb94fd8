//! Serialization boundary
//!
//! Repositories never look inside entities. Callers supply a codec that turns
//! an entity into its stored form and back:
//!
//! - [`ValueCodec`]: entity ⇄ opaque bytes (Value and Hash layouts)
//! - [`FieldsCodec`]: entity ⇄ field map (ValueInHash layout)
//!
//! Equality-gated operations compare serialized bytes, so codecs must be
//! deterministic: equal entities must encode to byte-identical output.
//!
//! Three stock codecs are provided for `serde` types:
//! [`JsonCodec`], [`MsgPackCodec`] and [`JsonFieldsCodec`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

/// Serialized form of an entity stored as a hash
pub type FieldMap = BTreeMap<String, Vec<u8>>;

/// Codec failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The entity could not be encoded
    #[error("encode error: {0}")]
    Encode(String),

    /// The stored form could not be decoded
    #[error("decode error: {0}")]
    Decode(String),
}

/// Entity ⇄ bytes
pub trait ValueCodec<E>: Send + Sync {
    /// Encode an entity
    fn encode(&self, entity: &E) -> Result<Vec<u8>, CodecError>;

    /// Decode a stored value
    fn decode(&self, bytes: &[u8]) -> Result<E, CodecError>;
}

/// Entity ⇄ field map
pub trait FieldsCodec<E>: Send + Sync {
    /// Encode an entity into its fields
    fn encode(&self, entity: &E) -> Result<FieldMap, CodecError>;

    /// Decode an entity from its fields
    fn decode(&self, fields: &FieldMap) -> Result<E, CodecError>;
}

/// The codec a repository uses, tagged by stored shape
pub enum EntityCodec<E> {
    /// Entities are stored as one opaque value
    Bytes(Arc<dyn ValueCodec<E>>),
    /// Entities are stored as a map of fields
    Fields(Arc<dyn FieldsCodec<E>>),
}

impl<E> EntityCodec<E> {
    /// Wrap a value codec
    pub fn bytes(codec: impl ValueCodec<E> + 'static) -> Self {
        EntityCodec::Bytes(Arc::new(codec))
    }

    /// Wrap a fields codec
    pub fn fields(codec: impl FieldsCodec<E> + 'static) -> Self {
        EntityCodec::Fields(Arc::new(codec))
    }

    /// Shape name, for error messages
    pub fn shape(&self) -> &'static str {
        match self {
            EntityCodec::Bytes(_) => "bytes",
            EntityCodec::Fields(_) => "fields",
        }
    }
}

impl<E> Clone for EntityCodec<E> {
    fn clone(&self) -> Self {
        match self {
            EntityCodec::Bytes(c) => EntityCodec::Bytes(Arc::clone(c)),
            EntityCodec::Fields(c) => EntityCodec::Fields(Arc::clone(c)),
        }
    }
}

impl<E> fmt::Debug for EntityCodec<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntityCodec").field(&self.shape()).finish()
    }
}

// ============================================================================
// Stock codecs
// ============================================================================

/// JSON encoding via `serde_json`
pub struct JsonCodec<E>(PhantomData<fn() -> E>);

impl<E> JsonCodec<E> {
    /// Create a JSON codec
    pub fn new() -> Self {
        JsonCodec(PhantomData)
    }
}

impl<E> Default for JsonCodec<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Serialize + DeserializeOwned> ValueCodec<E> for JsonCodec<E> {
    fn encode(&self, entity: &E) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(entity).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<E, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// MessagePack encoding via `rmp-serde`, with named struct fields
pub struct MsgPackCodec<E>(PhantomData<fn() -> E>);

impl<E> MsgPackCodec<E> {
    /// Create a MessagePack codec
    pub fn new() -> Self {
        MsgPackCodec(PhantomData)
    }
}

impl<E> Default for MsgPackCodec<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Serialize + DeserializeOwned> ValueCodec<E> for MsgPackCodec<E> {
    fn encode(&self, entity: &E) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec_named(entity).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<E, CodecError> {
        rmp_serde::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// One hash field per top-level JSON member
///
/// The entity must serialize to a JSON object. Each member value is stored
/// as its own JSON text under the member name.
pub struct JsonFieldsCodec<E>(PhantomData<fn() -> E>);

impl<E> JsonFieldsCodec<E> {
    /// Create a JSON fields codec
    pub fn new() -> Self {
        JsonFieldsCodec(PhantomData)
    }
}

impl<E> Default for JsonFieldsCodec<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Serialize + DeserializeOwned> FieldsCodec<E> for JsonFieldsCodec<E> {
    fn encode(&self, entity: &E) -> Result<FieldMap, CodecError> {
        let value = serde_json::to_value(entity).map_err(|e| CodecError::Encode(e.to_string()))?;
        let object = match value {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(CodecError::Encode(format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };
        object
            .into_iter()
            .map(|(name, member)| {
                serde_json::to_vec(&member)
                    .map(|bytes| (name, bytes))
                    .map_err(|e| CodecError::Encode(e.to_string()))
            })
            .collect()
    }

    fn decode(&self, fields: &FieldMap) -> Result<E, CodecError> {
        let mut object = serde_json::Map::new();
        for (name, bytes) in fields {
            let member: serde_json::Value = serde_json::from_slice(bytes)
                .map_err(|e| CodecError::Decode(format!("field '{}': {}", name, e)))?;
            object.insert(name.clone(), member);
        }
        serde_json::from_value(serde_json::Value::Object(object))
            .map_err(|e| CodecError::Decode(e.to_string()))
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
