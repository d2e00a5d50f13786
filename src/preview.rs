//! Media preview aggregation.
//!
//! Applies the registry's processors across all fields of one decoded
//! record, validates the results, and buckets them by category into a
//! [`PreviewBundle`].
//!
//! Two binding modes cooperate:
//!
//! 1. **Explicit field configuration** — a field listed in the
//!    [`FieldConfigMap`] is handled by the named processor with its
//!    configured options.
//! 2. **By field name** — any remaining field whose name matches a
//!    registered processor is handled by that processor with default
//!    options.
//!
//! Failure semantics are deliberately asymmetric: a processor failing on
//! its own input degrades to "no preview for this field" with a warning,
//! but a processor emitting a structurally invalid result (missing or
//! unrecognized `type`) is a hard error — that is a broken processor, not a
//! data problem, and hiding it would mask the defect.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{LensError, Result};
use crate::models::{DecodedRecord, PreviewBundle, PreviewKind};
use crate::processor::{Preview, ProcessorConfig};
use crate::registry::ProcessorRegistry;

/// Explicit binding of one field to a named processor plus options.
#[derive(Debug, Clone)]
pub struct FieldBinding {
    pub processor: String,
    pub config: ProcessorConfig,
}

/// Field name → explicit binding.
pub type FieldConfigMap = BTreeMap<String, FieldBinding>;

/// Run every applicable processor over `record` and bucket the results.
///
/// Returns `Ok(None)` when nothing was previewable — absence, not an empty
/// bundle, is the "no preview" signal. An unknown processor name in an
/// explicit binding propagates as
/// [`LensError::ProcessorNotFound`]; a structurally invalid result
/// propagates as [`LensError::InvalidPreview`].
pub fn aggregate_preview(
    record: &DecodedRecord,
    registry: &ProcessorRegistry,
    field_config: Option<&FieldConfigMap>,
) -> Result<Option<PreviewBundle>> {
    let mut bundle = PreviewBundle::default();

    for (field_name, value) in record {
        let binding = field_config.and_then(|fc| fc.get(field_name.as_str()));

        let (processor, identity) = match binding {
            Some(b) => (
                registry.create(&b.processor, b.config.clone())?,
                b.processor.clone(),
            ),
            None => {
                if !registry.contains(field_name) {
                    continue;
                }
                (
                    registry.create(field_name, ProcessorConfig::new())?,
                    field_name.clone(),
                )
            }
        };

        let preview = match processor.process(field_name, value) {
            Ok(Some(p)) => p,
            Ok(None) => {
                debug!(
                    field = %field_name,
                    processor = %identity,
                    value_type = value.type_name(),
                    "not applicable"
                );
                continue;
            }
            Err(e) => {
                warn!(
                    field = %field_name,
                    processor = %identity,
                    error = %e,
                    "processor failed, skipping field"
                );
                continue;
            }
        };

        let kind = validate_preview(field_name, &preview)?;
        if let Some(path) = preview.get("temp_path").and_then(|p| p.as_str()) {
            bundle.temp_paths.push(PathBuf::from(path));
        }
        bundle.previews.entry(kind).or_default().push(preview);
    }

    if bundle.is_empty() {
        Ok(None)
    } else {
        Ok(Some(bundle))
    }
}

/// Check the structural contract of one preview and return its category.
fn validate_preview(field_name: &str, preview: &Preview) -> Result<PreviewKind> {
    let obj = preview.as_object().ok_or_else(|| LensError::InvalidPreview {
        field: field_name.to_string(),
        reason: "preview is not an object".into(),
    })?;

    let declared = obj
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| LensError::InvalidPreview {
            field: field_name.to_string(),
            reason: "missing required 'type' field".into(),
        })?;

    PreviewKind::parse(declared).ok_or_else(|| LensError::InvalidPreview {
        field: field_name.to_string(),
        reason: format!(
            "unrecognized preview type '{}' (expected text, audio, image, or custom)",
            declared
        ),
    })
}

/// Best-effort deletion of preview artifacts.
///
/// Missing files are fine — the point is that they are gone. Failures are
/// logged and never raised; cleanup runs during teardown where an error has
/// nowhere useful to go.
pub fn cleanup_artifacts(paths: &[PathBuf]) {
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed preview artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove artifact"),
        }
    }
}

/// Convenience for callers holding string paths (e.g. from a JSON payload).
pub fn cleanup_artifact_strs<S: AsRef<Path>>(paths: &[S]) {
    let owned: Vec<PathBuf> = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
    cleanup_artifacts(&owned);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldValue;
    use crate::processor::{FieldProcessor, ProcessorFactory};
    use serde_json::json;
    use std::sync::Arc;

    /// Processor that returns a fixed JSON payload, or errors.
    struct CannedProcessor {
        payload: Option<serde_json::Value>,
        fails: bool,
    }

    impl FieldProcessor for CannedProcessor {
        fn name(&self) -> &str {
            "canned"
        }

        fn process(
            &self,
            field_name: &str,
            _value: &FieldValue,
        ) -> crate::error::Result<Option<Preview>> {
            if self.fails {
                return Err(LensError::Processor {
                    name: "canned".into(),
                    reason: "synthetic failure".into(),
                });
            }
            Ok(self.payload.clone().map(|mut p| {
                if let Some(obj) = p.as_object_mut() {
                    obj.insert("field_name".into(), json!(field_name));
                }
                p
            }))
        }
    }

    fn canned(payload: serde_json::Value) -> Arc<dyn ProcessorFactory> {
        Arc::new(move |_cfg: ProcessorConfig| {
            Box::new(CannedProcessor {
                payload: Some(payload.clone()),
                fails: false,
            }) as Box<dyn FieldProcessor>
        })
    }

    fn failing() -> Arc<dyn ProcessorFactory> {
        Arc::new(|_cfg: ProcessorConfig| {
            Box::new(CannedProcessor {
                payload: None,
                fails: true,
            }) as Box<dyn FieldProcessor>
        })
    }

    fn record(fields: &[(&str, FieldValue)]) -> DecodedRecord {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn no_applicable_processor_means_no_bundle() {
        let registry = ProcessorRegistry::new();
        let rec = record(&[("unhandled", FieldValue::Int(1))]);
        let bundle = aggregate_preview(&rec, &registry, None).unwrap();
        assert!(bundle.is_none());
    }

    #[test]
    fn by_field_name_binding_produces_previews() {
        let mut registry = ProcessorRegistry::new();
        registry.register("note", canned(json!({"type": "text", "preview": "p"})));

        let rec = record(&[
            ("note", FieldValue::Str("x".into())),
            ("other", FieldValue::Int(1)),
        ]);
        let bundle = aggregate_preview(&rec, &registry, None).unwrap().unwrap();
        assert_eq!(bundle.previews[&PreviewKind::Text].len(), 1);
        assert_eq!(bundle.len(), 1);
    }

    #[test]
    fn explicit_binding_overrides_name_lookup() {
        let mut registry = ProcessorRegistry::new();
        registry.register("note", canned(json!({"type": "text", "preview": "by-name"})));
        registry.register("special", canned(json!({"type": "custom", "detail": 1})));

        let mut field_config = FieldConfigMap::new();
        field_config.insert(
            "note".to_string(),
            FieldBinding {
                processor: "special".to_string(),
                config: ProcessorConfig::new(),
            },
        );

        let rec = record(&[("note", FieldValue::Str("x".into()))]);
        let bundle = aggregate_preview(&rec, &registry, Some(&field_config))
            .unwrap()
            .unwrap();
        assert!(bundle.previews.contains_key(&PreviewKind::Custom));
        assert!(!bundle.previews.contains_key(&PreviewKind::Text));
    }

    #[test]
    fn explicit_binding_to_unknown_processor_is_hard_error() {
        let registry = ProcessorRegistry::new();
        let mut field_config = FieldConfigMap::new();
        field_config.insert(
            "note".to_string(),
            FieldBinding {
                processor: "ghost".to_string(),
                config: ProcessorConfig::new(),
            },
        );

        let rec = record(&[("note", FieldValue::Str("x".into()))]);
        let err = aggregate_preview(&rec, &registry, Some(&field_config)).unwrap_err();
        assert!(matches!(err, LensError::ProcessorNotFound { .. }));
    }

    #[test]
    fn missing_type_is_a_structural_error() {
        let mut registry = ProcessorRegistry::new();
        registry.register("note", canned(json!({"preview": "no type here"})));

        let rec = record(&[("note", FieldValue::Str("x".into()))]);
        let err = aggregate_preview(&rec, &registry, None).unwrap_err();
        match err {
            LensError::InvalidPreview { reason, .. } => {
                assert!(reason.contains("missing required 'type'"))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn unrecognized_type_is_a_structural_error() {
        let mut registry = ProcessorRegistry::new();
        registry.register("note", canned(json!({"type": "bogus"})));

        let rec = record(&[("note", FieldValue::Str("x".into()))]);
        let err = aggregate_preview(&rec, &registry, None).unwrap_err();
        match err {
            LensError::InvalidPreview { reason, .. } => assert!(reason.contains("bogus")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn failing_processor_does_not_block_other_fields() {
        let mut registry = ProcessorRegistry::new();
        registry.register("broken", failing());
        registry.register("fine", canned(json!({"type": "text", "preview": "ok"})));

        let rec = record(&[
            ("broken", FieldValue::Str("a".into())),
            ("fine", FieldValue::Str("b".into())),
        ]);
        let bundle = aggregate_preview(&rec, &registry, None).unwrap().unwrap();
        assert_eq!(bundle.len(), 1);
        assert_eq!(
            bundle.previews[&PreviewKind::Text][0]["field_name"],
            "fine"
        );
    }

    #[test]
    fn temp_paths_are_collected() {
        let mut registry = ProcessorRegistry::new();
        registry.register(
            "clip",
            canned(json!({"type": "audio", "temp_path": "/tmp/kvlens-test-artifact.wav"})),
        );

        let rec = record(&[("clip", FieldValue::Bytes(vec![0u8; 4]))]);
        let bundle = aggregate_preview(&rec, &registry, None).unwrap().unwrap();
        assert_eq!(
            bundle.temp_paths,
            vec![PathBuf::from("/tmp/kvlens-test-artifact.wav")]
        );
    }

    #[test]
    fn cleanup_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("artifact.wav");
        std::fs::write(&existing, b"data").unwrap();
        let missing = dir.path().join("never-created.png");

        cleanup_artifacts(&[existing.clone(), missing]);
        assert!(!existing.exists());
    }
}
