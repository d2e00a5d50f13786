//! Core data models used throughout kvlens.
//!
//! These types represent the decoded records, preview results, and formatted
//! entries that flow from the store through the preview pipeline to a caller.

use std::collections::BTreeMap;
use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// A single decoded field value.
///
/// Decoders map serialized records to these; processors consume them. Nested
/// structures are supported so a processor can decline them as "not
/// applicable" rather than erroring on shape.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    /// Convert a JSON value into a field value. JSON has no bytes type, so
    /// byte fields arrive as strings (typically base64) and are normalized
    /// by the processors that care.
    pub fn from_json(value: serde_json::Value) -> FieldValue {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FieldValue::Int(i)
                } else {
                    FieldValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => FieldValue::Str(s),
            serde_json::Value::Array(arr) => {
                FieldValue::List(arr.into_iter().map(FieldValue::from_json).collect())
            }
            serde_json::Value::Object(map) => FieldValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, FieldValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Short human-readable name for the value's runtime shape, used in
    /// debug logs when a processor declines a value.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::Int(_) => "int",
            FieldValue::Float(_) => "float",
            FieldValue::Str(_) => "string",
            FieldValue::Bytes(_) => "bytes",
            FieldValue::List(_) => "list",
            FieldValue::Map(_) => "map",
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Null => serializer.serialize_unit(),
            FieldValue::Bool(b) => serializer.serialize_bool(*b),
            FieldValue::Int(i) => serializer.serialize_i64(*i),
            FieldValue::Float(f) => serializer.serialize_f64(*f),
            FieldValue::Str(s) => serializer.serialize_str(s),
            // Bytes render as base64, mirroring the JSON mapping convention
            // for binary fields in serialized record formats.
            FieldValue::Bytes(b) => serializer.serialize_str(&STANDARD.encode(b)),
            FieldValue::List(items) => items.serialize(serializer),
            FieldValue::Map(map) => {
                let mut m = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    m.serialize_entry(k, v)?;
                }
                m.end()
            }
        }
    }
}

/// A decoded record: field name → value, in field-name order.
pub type DecodedRecord = BTreeMap<String, FieldValue>;

/// The closed set of preview categories a processor may declare.
///
/// A preview whose `type` is outside this set is a structural error at
/// aggregation time, not a data problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PreviewKind {
    Text,
    Audio,
    Image,
    Custom,
}

impl PreviewKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreviewKind::Text => "text",
            PreviewKind::Audio => "audio",
            PreviewKind::Image => "image",
            PreviewKind::Custom => "custom",
        }
    }

    /// Parse a declared preview type. Returns `None` for anything outside
    /// the recognized set.
    pub fn parse(s: &str) -> Option<PreviewKind> {
        match s {
            "text" => Some(PreviewKind::Text),
            "audio" => Some(PreviewKind::Audio),
            "image" => Some(PreviewKind::Image),
            "custom" => Some(PreviewKind::Custom),
            _ => None,
        }
    }
}

impl Serialize for PreviewKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One record's previews, bucketed by category.
///
/// Categories with no entries are never present in `previews`; an entirely
/// empty bundle is represented by the aggregator returning no bundle at all.
/// `temp_paths` collects every filesystem artifact the previews reference so
/// the session can dispose of them later.
#[derive(Debug, Default)]
pub struct PreviewBundle {
    pub previews: BTreeMap<PreviewKind, Vec<serde_json::Value>>,
    pub temp_paths: Vec<PathBuf>,
}

impl PreviewBundle {
    pub fn is_empty(&self) -> bool {
        self.previews.is_empty()
    }

    /// Total number of previews across all categories.
    pub fn len(&self) -> usize {
        self.previews.values().map(Vec::len).sum()
    }
}

/// A store entry formatted for display.
///
/// The key is shown as UTF-8 when it decodes cleanly and as hex otherwise;
/// `key_raw` always carries the hex form. A decode failure is surfaced in
/// `decode_error` instead of aborting the entry. `media_preview` is absent
/// (not an empty object) when nothing was previewable.
#[derive(Debug, Serialize)]
pub struct EntryView {
    pub key: String,
    pub key_raw: String,
    pub value_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<DecodedRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decode_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_preview: Option<BTreeMap<PreviewKind, Vec<serde_json::Value>>>,
}

/// Summary information about an open store, for `kvl info`.
#[derive(Debug, Serialize)]
pub struct StoreInfo {
    pub path: String,
    pub entries: u64,
    pub decoder: Option<String>,
    pub processors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_value_from_json_covers_scalars() {
        assert_eq!(
            FieldValue::from_json(serde_json::json!("hi")),
            FieldValue::Str("hi".to_string())
        );
        assert_eq!(FieldValue::from_json(serde_json::json!(3)), FieldValue::Int(3));
        assert_eq!(
            FieldValue::from_json(serde_json::json!(1.5)),
            FieldValue::Float(1.5)
        );
        assert_eq!(
            FieldValue::from_json(serde_json::json!(true)),
            FieldValue::Bool(true)
        );
        assert_eq!(FieldValue::from_json(serde_json::Value::Null), FieldValue::Null);
    }

    #[test]
    fn field_value_from_json_nests() {
        let v = FieldValue::from_json(serde_json::json!({"a": [1, "x"]}));
        match v {
            FieldValue::Map(m) => match &m["a"] {
                FieldValue::List(items) => {
                    assert_eq!(items[0], FieldValue::Int(1));
                    assert_eq!(items[1], FieldValue::Str("x".to_string()));
                }
                other => panic!("expected list, got {:?}", other),
            },
            other => panic!("expected map, got {:?}", other),
        }
    }

    #[test]
    fn bytes_serialize_as_base64() {
        let v = FieldValue::Bytes(vec![1, 2, 3]);
        let s = serde_json::to_string(&v).unwrap();
        assert_eq!(s, format!("\"{}\"", STANDARD.encode([1u8, 2, 3])));
    }

    #[test]
    fn preview_kind_round_trip() {
        for kind in [
            PreviewKind::Text,
            PreviewKind::Audio,
            PreviewKind::Image,
            PreviewKind::Custom,
        ] {
            assert_eq!(PreviewKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(PreviewKind::parse("bogus"), None);
    }
}
