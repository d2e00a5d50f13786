//! Browsing service: the operations behind the CLI.
//!
//! A [`Browser`] owns an open store, an optional record decoder, the
//! processor registry, and the explicit field bindings from configuration.
//! Every operation formats raw entries into [`EntryView`]s: key as UTF-8
//! when it decodes cleanly (hex otherwise), value size, the decoded record
//! or the decode error, and — when any processor had an opinion — a media
//! preview bundle.
//!
//! The browser also owns the session's temporary preview artifacts: every
//! `temp_path` a processor produced is tracked here and deleted best-effort
//! on [`Browser::cleanup`] or drop. Until then the files stay on disk so a
//! caller can still render previews it has already been handed.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::decode::RecordDecoder;
use crate::error::Result;
use crate::models::{EntryView, StoreInfo};
use crate::preview::{aggregate_preview, cleanup_artifacts, FieldConfigMap};
use crate::registry::ProcessorRegistry;
use crate::sample;
use crate::store::KvStore;

/// A browsing session over one open store.
pub struct Browser {
    store: Box<dyn KvStore>,
    store_path: String,
    decoder: Option<Box<dyn RecordDecoder>>,
    registry: ProcessorRegistry,
    field_config: Option<FieldConfigMap>,
    temp_paths: Vec<PathBuf>,
}

impl Browser {
    /// A browser over `store` with the built-in processors and no decoder.
    pub fn new(store: Box<dyn KvStore>, store_path: impl Into<String>) -> Self {
        Self {
            store,
            store_path: store_path.into(),
            decoder: None,
            registry: ProcessorRegistry::with_builtins(),
            field_config: None,
            temp_paths: Vec::new(),
        }
    }

    pub fn with_decoder(mut self, decoder: Box<dyn RecordDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn with_field_config(mut self, field_config: FieldConfigMap) -> Self {
        self.field_config = Some(field_config);
        self
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ProcessorRegistry {
        &mut self.registry
    }

    /// Load processor plugin files. One bad file is a warning, not a session
    /// failure — the rest still load. Returns the total registrations.
    pub fn load_processor_scripts(&mut self, paths: &[PathBuf]) -> usize {
        let mut total = 0;
        for path in paths {
            match self.registry.load_script(path) {
                Ok(count) => total += count,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to load plugin"),
            }
        }
        if total > 0 {
            info!(count = total, "loaded processors from configured plugins");
        }
        total
    }

    /// Summary of the open store.
    pub fn info(&self) -> Result<StoreInfo> {
        Ok(StoreInfo {
            path: self.store_path.clone(),
            entries: self.store.entry_count()?,
            decoder: self.decoder.as_ref().map(|d| d.name().to_string()),
            processors: self.registry.list(),
        })
    }

    /// The first `n` entries in native key order.
    pub fn head(&mut self, n: usize) -> Result<Vec<EntryView>> {
        let entries: Vec<_> = self.store.scan()?.take(n).collect::<Result<_>>()?;
        entries
            .into_iter()
            .map(|(k, v)| self.format_entry(&k, &v))
            .collect()
    }

    /// Look up one entry by exact key.
    pub fn entry(&mut self, key: &[u8]) -> Result<Option<EntryView>> {
        match self.store.get(key)? {
            Some(value) => Ok(Some(self.format_entry(key, &value)?)),
            None => Ok(None),
        }
    }

    /// Entries whose keys start with `prefix`, up to `limit`.
    pub fn prefix(&mut self, prefix: &[u8], limit: usize) -> Result<Vec<EntryView>> {
        let entries: Vec<_> = self
            .store
            .scan_prefix(prefix)?
            .take(limit)
            .collect::<Result<_>>()?;
        entries
            .into_iter()
            .map(|(k, v)| self.format_entry(&k, &v))
            .collect()
    }

    /// Entries whose keys contain `pattern` as a byte substring, up to
    /// `limit`. An empty pattern matches everything.
    pub fn find(&mut self, pattern: &[u8], limit: usize) -> Result<Vec<EntryView>> {
        let mut matches = Vec::new();
        for item in self.store.scan()? {
            let (key, value) = item?;
            if contains_subslice(&key, pattern) {
                matches.push((key, value));
                if matches.len() >= limit {
                    break;
                }
            }
        }
        matches
            .into_iter()
            .map(|(k, v)| self.format_entry(&k, &v))
            .collect()
    }

    /// An approximate-random sample of up to `count` entries
    /// (see [`crate::sample`]).
    pub fn sample(&mut self, count: usize, oversample: f64) -> Result<Vec<EntryView>> {
        let entries = sample::sample(self.store.as_ref(), count, oversample)?;
        entries
            .into_iter()
            .map(|(k, v)| self.format_entry(&k, &v))
            .collect()
    }

    /// Artifacts produced so far in this session.
    pub fn temp_paths(&self) -> &[PathBuf] {
        &self.temp_paths
    }

    /// Delete every artifact this session produced. Best-effort: missing
    /// files are fine, failures are logged.
    pub fn cleanup(&mut self) {
        cleanup_artifacts(&self.temp_paths);
        self.temp_paths.clear();
    }

    /// Hand ownership of the session's artifacts to the caller: the files
    /// stay on disk past this session, and deleting them becomes the
    /// caller's job (e.g. via `kvl cleanup`).
    pub fn keep_artifacts(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.temp_paths)
    }

    /// Format one raw entry. Decode failures land in `decode_error`;
    /// structural preview errors (a broken processor) propagate.
    fn format_entry(&mut self, key: &[u8], value: &[u8]) -> Result<EntryView> {
        let key_display = match std::str::from_utf8(key) {
            Ok(s) => s.to_string(),
            Err(_) => hex::encode(key),
        };

        let mut view = EntryView {
            key: key_display,
            key_raw: hex::encode(key),
            value_size: value.len(),
            record: None,
            decode_error: None,
            media_preview: None,
        };

        if let Some(decoder) = &self.decoder {
            match decoder.decode(value) {
                Ok(record) => {
                    let bundle =
                        aggregate_preview(&record, &self.registry, self.field_config.as_ref())?;
                    if let Some(bundle) = bundle {
                        self.temp_paths.extend(bundle.temp_paths);
                        view.media_preview = Some(bundle.previews);
                    }
                    view.record = Some(record);
                }
                Err(e) => view.decode_error = Some(e.to_string()),
            }
        }

        Ok(view)
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Byte-substring search. An empty needle matches everything.
fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    if needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}
