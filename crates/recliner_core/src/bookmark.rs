//! Opaque pagination cursors for `find`.
//!
//! A bookmark is base64 of the JSON object
//! `{"key": ..., "primaryKey": ..., "mostEfficientIndex": {field: {op: operand}}}`.
//! `key` and `primaryKey` name the last record returned; the index entry is
//! the planner choice the next page resumes on. A bookmark without a
//! primary key marks an exhausted result set.

use crate::error::{CoreError, CoreResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use recliner_codec::{from_json_slice, from_value, to_json_vec, to_value, Value};
use serde::{Deserialize, Serialize};

/// Bookmark text that starts from the beginning.
pub const NIL: &str = "nil";

/// A decoded bookmark.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Scan key of the last returned record.
    #[serde(default)]
    pub key: Value,
    /// Primary key of the last returned record.
    #[serde(rename = "primaryKey", default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<Value>,
    /// The index condition the scan ran on, in selector syntax.
    #[serde(
        rename = "mostEfficientIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub index: Option<Value>,
}

impl Bookmark {
    /// A bookmark positioned after `(key, primary_key)`.
    pub fn after(key: Value, primary_key: Value, index: Option<Value>) -> Self {
        Self {
            key,
            primary_key: Some(primary_key),
            index,
        }
    }

    /// A bookmark past the last result.
    pub fn exhausted(index: Option<Value>) -> Self {
        Self {
            key: Value::Null,
            primary_key: None,
            index,
        }
    }

    /// Returns true if no further results follow this bookmark.
    pub fn is_exhausted(&self) -> bool {
        self.primary_key.is_none()
    }

    /// Encodes the bookmark.
    ///
    /// # Errors
    ///
    /// Returns an error if the keys cannot be serialized.
    pub fn encode(&self) -> CoreResult<String> {
        let json = to_json_vec(&to_value(self)?)?;
        Ok(STANDARD.encode(json))
    }

    /// Decodes a bookmark. `nil` and the empty string decode to `None`.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` if the text is not a bookmark.
    pub fn decode(text: &str) -> CoreResult<Option<Self>> {
        if text.is_empty() || text == NIL {
            return Ok(None);
        }
        let bytes = STANDARD.decode(text).map_err(invalid)?;
        let value = from_json_slice(&bytes).map_err(invalid)?;
        let bookmark = from_value(&value).map_err(invalid)?;
        Ok(Some(bookmark))
    }
}

fn invalid(e: impl std::fmt::Display) -> CoreError {
    CoreError::bad_request(format!("invalid bookmark: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use recliner_codec::value;

    #[test]
    fn encode_is_base64_json() {
        let bookmark = Bookmark::after(
            Value::from(30),
            Value::from("alice"),
            Some(value!({"age": {"$eq": 30}})),
        );
        let text = bookmark.encode().unwrap();
        let json = String::from_utf8(STANDARD.decode(&text).unwrap()).unwrap();
        assert_eq!(
            json,
            r#"{"key":30,"primaryKey":"alice","mostEfficientIndex":{"age":{"$eq":30}}}"#
        );
        assert_eq!(Bookmark::decode(&text).unwrap(), Some(bookmark));
    }

    #[test]
    fn nil_and_empty_decode_to_none() {
        assert_eq!(Bookmark::decode(NIL).unwrap(), None);
        assert_eq!(Bookmark::decode("").unwrap(), None);
    }

    #[test]
    fn exhausted_has_no_primary_key() {
        let text = Bookmark::exhausted(None).encode().unwrap();
        assert!(Bookmark::decode(&text).unwrap().unwrap().is_exhausted());
    }

    #[test]
    fn garbage_is_bad_request() {
        let err = Bookmark::decode("!!!").unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
