//! Value decoding boundary.
//!
//! A [`RecordDecoder`] turns a raw value into a field-name→value mapping.
//! kvlens treats decoding as a collaborator behind this trait: the preview
//! pipeline consumes the mapping and never retries a failed decode. How a
//! schema is compiled or loaded is out of scope — a decoder arrives already
//! knowing its format.
//!
//! The shipped [`JsonDecoder`] covers stores whose values are JSON objects,
//! which is also the shape every structured-record format maps to for
//! display purposes (binary fields as base64 strings).

use crate::error::{LensError, Result};
use crate::models::{DecodedRecord, FieldValue};

/// Decodes raw value bytes into a [`DecodedRecord`].
pub trait RecordDecoder {
    /// Short identifier shown in store info (e.g. `"json"`).
    fn name(&self) -> &str;

    /// Decode one value. A failure is a "could not decode" condition the
    /// caller surfaces per entry; it must not abort browsing.
    fn decode(&self, raw: &[u8]) -> Result<DecodedRecord>;
}

/// Decoder for values that are UTF-8 JSON objects.
#[derive(Debug, Default)]
pub struct JsonDecoder;

impl JsonDecoder {
    pub fn new() -> Self {
        JsonDecoder
    }
}

impl RecordDecoder for JsonDecoder {
    fn name(&self) -> &str {
        "json"
    }

    fn decode(&self, raw: &[u8]) -> Result<DecodedRecord> {
        let value: serde_json::Value = serde_json::from_slice(raw)
            .map_err(|e| LensError::Decode(format!("invalid JSON: {}", e)))?;

        match value {
            serde_json::Value::Object(map) => Ok(map
                .into_iter()
                .map(|(k, v)| (k, FieldValue::from_json(v)))
                .collect()),
            other => Err(LensError::Decode(format!(
                "expected a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }
}

/// Human-readable name for a JSON value's type.
fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_json_object() {
        let record = JsonDecoder::new()
            .decode(br#"{"name": "alice", "age": 30}"#)
            .unwrap();
        assert_eq!(record["name"], FieldValue::Str("alice".to_string()));
        assert_eq!(record["age"], FieldValue::Int(30));
    }

    #[test]
    fn rejects_non_object_json() {
        let err = JsonDecoder::new().decode(b"[1, 2, 3]").unwrap_err();
        assert!(err.to_string().contains("expected a JSON object"));
    }

    #[test]
    fn rejects_garbage() {
        let err = JsonDecoder::new().decode(&[0xff, 0x01, 0x02]).unwrap_err();
        assert!(matches!(err, LensError::Decode(_)));
    }
}
