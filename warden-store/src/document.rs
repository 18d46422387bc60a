// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Schemaless record as it is handed to and returned by a document store.
pub type Document = serde_json::Map<String, Value>;

/// Encode a value into a document.
///
/// Only values serializing into a JSON object can be stored as documents.
pub fn to_document<T: Serialize>(value: &T) -> Result<Document, DocumentError> {
    match serde_json::to_value(value)? {
        Value::Object(document) => Ok(document),
        _ => Err(DocumentError::NotAnObject),
    }
}

/// Decode a document into a value.
pub fn from_document<T: DeserializeOwned>(document: Document) -> Result<T, DocumentError> {
    Ok(serde_json::from_value(Value::Object(document))?)
}

/// String form of a field value, used to compare documents against lookup keys.
///
/// Only strings and numbers can act as keys, any other value (including a missing field) makes the
/// document unreachable through that field.
pub fn field_key(document: &Document, field: &str) -> Option<String> {
    match document.get(field)? {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

#[derive(Debug, Error)]
pub enum DocumentError {
    /// Value did not serialize into a JSON object.
    #[error("value is not a JSON object and can not be stored as a document")]
    NotAnObject,

    /// Value could not be converted from or into JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
