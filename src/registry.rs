//! Processor registry.
//!
//! The registry is the catalog behind the preview pipeline: a mutable,
//! session-lifetime mapping from processor name to factory, populated by
//! built-in registrations and by Lua plugin files loaded at run time
//! ([`crate::lua_processor`]).
//!
//! Names double as field bindings: a processor registered under `"bio"`
//! handles fields named `bio` when no explicit field configuration says
//! otherwise. Registering the same factory under several names is the normal
//! way to say "this text processor handles bio, content, and description".
//!
//! Collisions are allowed by design: the last registration under a name
//! wins, with a logged warning. Plugins overriding built-ins is a feature,
//! not an error.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{LensError, Result};
use crate::processor::{
    FieldProcessor, HexProcessor, PcmAudioProcessor, ProcessorConfig, ProcessorFactory,
    RawImageProcessor, TextProcessor,
};

/// Catalog of processor factories, keyed by name.
#[derive(Default)]
pub struct ProcessorRegistry {
    factories: HashMap<String, Arc<dyn ProcessorFactory>>,
}

impl ProcessorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry seeded with the built-in processors: `text`, `hex`,
    /// `pcm_audio`, and `raw_image`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            "text",
            Arc::new(|cfg: ProcessorConfig| {
                Box::new(TextProcessor::new(cfg)) as Box<dyn FieldProcessor>
            }),
        );
        registry.register(
            "hex",
            Arc::new(|cfg: ProcessorConfig| {
                Box::new(HexProcessor::new(cfg)) as Box<dyn FieldProcessor>
            }),
        );
        registry.register(
            "pcm_audio",
            Arc::new(|cfg: ProcessorConfig| {
                Box::new(PcmAudioProcessor::new(cfg)) as Box<dyn FieldProcessor>
            }),
        );
        registry.register(
            "raw_image",
            Arc::new(|cfg: ProcessorConfig| {
                Box::new(RawImageProcessor::new(cfg)) as Box<dyn FieldProcessor>
            }),
        );
        registry
    }

    /// Bind `name` to a factory. Last writer wins; an overwrite is logged
    /// but never fails.
    pub fn register(&mut self, name: impl Into<String>, factory: Arc<dyn ProcessorFactory>) {
        let name = name.into();
        if self.factories.insert(name.clone(), factory).is_some() {
            warn!(name = %name, "overwriting existing processor registration");
        } else {
            debug!(name = %name, "registered processor");
        }
    }

    /// Bind the same factory under several names.
    pub fn register_many<S: Into<String>>(
        &mut self,
        names: impl IntoIterator<Item = S>,
        factory: Arc<dyn ProcessorFactory>,
    ) {
        for name in names {
            self.register(name, Arc::clone(&factory));
        }
    }

    /// Instantiate a processor by name with the given config.
    pub fn create(&self, name: &str, config: ProcessorConfig) -> Result<Box<dyn FieldProcessor>> {
        match self.factories.get(name) {
            Some(factory) => Ok(factory.create(config)),
            None => Err(LensError::ProcessorNotFound {
                name: name.to_string(),
                available: self.list(),
            }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted for stable display and error payloads.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Load a Lua plugin file and register the processors it defines.
    /// Returns how many registrations resulted; zero is a
    /// [`LensError::PluginLoad`] error — an empty plugin file is a caller
    /// mistake, not a no-op.
    pub fn load_script(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        crate::lua_processor::load_script(self, path.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldValue;
    use crate::processor::Preview;
    use serde_json::json;

    struct StubProcessor {
        tag: &'static str,
    }

    impl FieldProcessor for StubProcessor {
        fn name(&self) -> &str {
            self.tag
        }

        fn process(
            &self,
            field_name: &str,
            _value: &FieldValue,
        ) -> crate::error::Result<Option<Preview>> {
            Ok(Some(json!({
                "type": "text",
                "field_name": field_name,
                "content": self.tag,
                "preview": self.tag,
            })))
        }
    }

    fn stub_factory(tag: &'static str) -> Arc<dyn ProcessorFactory> {
        Arc::new(move |_cfg: ProcessorConfig| {
            Box::new(StubProcessor { tag }) as Box<dyn FieldProcessor>
        })
    }

    #[test]
    fn builtins_are_present() {
        let registry = ProcessorRegistry::with_builtins();
        for name in ["text", "hex", "pcm_audio", "raw_image"] {
            assert!(registry.contains(name), "missing builtin {}", name);
        }
    }

    #[test]
    fn create_unknown_name_reports_available() {
        let registry = ProcessorRegistry::with_builtins();
        let err = registry
            .create("nonexistent_processor", ProcessorConfig::new())
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("not found"));
        assert!(msg.contains("text"));
        match err {
            LensError::ProcessorNotFound { available, .. } => assert!(!available.is_empty()),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = ProcessorRegistry::new();
        registry.register("dup", stub_factory("first"));
        registry.register("dup", stub_factory("second"));

        let processor = registry.create("dup", ProcessorConfig::new()).unwrap();
        let preview = processor.process("f", &FieldValue::Null).unwrap().unwrap();
        assert_eq!(preview["content"], "second");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn register_many_binds_all_names() {
        let mut registry = ProcessorRegistry::new();
        registry.register_many(["bio", "content", "description"], stub_factory("t"));
        assert!(registry.contains("bio"));
        assert!(registry.contains("content"));
        assert!(registry.contains("description"));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn list_is_sorted() {
        let mut registry = ProcessorRegistry::new();
        registry.register("zeta", stub_factory("z"));
        registry.register("alpha", stub_factory("a"));
        assert_eq!(registry.list(), vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
