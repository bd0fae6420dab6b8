//! Documents are the unit of data exchanged with the ledger.
//!
//! The driver works with two representations. [`Value`] is a dynamic document
//! tree that statement parameters are bound as and results are mapped from.
//! [`Document`] is the serialized form that crosses the wire. A
//! [`DocumentSerializer`] converts between the two; the byte format itself is
//! the serializer's business.
//!
//! Mapping between `Value` and Rust types is plain field-name matching via
//! serde: derive `Serialize`/`Deserialize` (and use `#[serde(rename...)]` if
//! the ledger's field names differ from yours).

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::MappingError;

pub use serde_json::Value;

/// A serialized document as sent to, or received from, the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Document(Bytes);

impl Document {
    pub fn new<B>(bytes: B) -> Document
    where
        B: Into<Bytes>,
    {
        Document(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Bytes> for Document {
    fn from(bytes: Bytes) -> Self {
        Document(bytes)
    }
}

impl From<Vec<u8>> for Document {
    fn from(bytes: Vec<u8>) -> Self {
        Document(Bytes::from(bytes))
    }
}

impl AsRef<[u8]> for Document {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// Converts document trees to and from their wire representation.
///
/// Implementations must be deterministic: the commit digest hashes the
/// serialized parameters, so the same value must always produce the same
/// bytes.
pub trait DocumentSerializer: Send + Sync {
    fn serialize(&self, value: &Value) -> Result<Document, MappingError>;

    fn deserialize(&self, document: &Document) -> Result<Value, MappingError>;
}

/// Serializes documents as compact JSON text. JSON text is also valid Ion
/// text, so services that speak Ion text can consume it as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl DocumentSerializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> Result<Document, MappingError> {
        Ok(Document::from(serde_json::to_vec(value)?))
    }

    fn deserialize(&self, document: &Document) -> Result<Value, MappingError> {
        serde_json::from_slice(document.as_bytes())
            .map_err(|e| MappingError::Document(e.to_string()))
    }
}

/// Binds a Rust value as a document tree.
pub fn to_value<T>(value: T) -> Result<Value, MappingError>
where
    T: Serialize,
{
    Ok(serde_json::to_value(value)?)
}

/// Maps a document tree onto a Rust type by field name. Fails if a required
/// field is absent or has an incompatible kind.
pub fn from_value<T>(value: Value) -> Result<T, MappingError>
where
    T: DeserializeOwned,
{
    Ok(serde_json::from_value(value)?)
}
