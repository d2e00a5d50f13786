//! Storage abstraction for kvlens.
//!
//! The [`KvStore`] trait defines the read-only, ordered, cursor-style access
//! the browsing and sampling layers need, enabling pluggable backends
//! (RocksDB, in-memory). The tool is always a reader: no trait method can
//! mutate the store.
//!
//! Iteration contract: every call to [`KvStore::scan`] or
//! [`KvStore::scan_prefix`] produces a *fresh* forward cursor starting at the
//! beginning of its range, yielding entries in the store's native key order.
//! That native order is the only ordering guarantee in kvlens — no secondary
//! sort is ever applied on top.

use std::collections::BTreeMap;

use crate::error::Result;

/// One `(key, value)` pair as raw bytes.
pub type Entry = (Vec<u8>, Vec<u8>);

/// A forward cursor over a range of entries. Errors surface per item so a
/// caller can stop at the first failure without losing what came before.
pub type EntryIter<'a> = Box<dyn Iterator<Item = Result<Entry>> + 'a>;

/// Abstract read-only key-value backend.
pub trait KvStore {
    /// Total number of entries, from a cheap store-level statistic — never a
    /// full scan. Backends that only track an estimate may return it; the
    /// sampler only uses this to derive an inclusion probability.
    fn entry_count(&self) -> Result<u64>;

    /// Look up a single value by exact key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Fresh forward cursor over the whole store, in native key order.
    fn scan(&self) -> Result<EntryIter<'_>>;

    /// Fresh forward cursor over keys starting with `prefix`, in native key
    /// order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<EntryIter<'_>>;
}

// ═══════════════════════════════════════════════════════════════════════
// In-memory store
// ═══════════════════════════════════════════════════════════════════════

/// In-memory store for tests and in-process use. A `BTreeMap` gives the
/// same ordered-iteration semantics as an on-disk store.
#[derive(Default)]
pub struct MemoryStore {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from `(key, value)` pairs.
    pub fn from_entries<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Vec<u8>>,
        V: Into<Vec<u8>>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn insert(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.entries.insert(key.into(), value.into());
    }
}

impl KvStore for MemoryStore {
    fn entry_count(&self) -> Result<u64> {
        Ok(self.entries.len() as u64)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn scan(&self) -> Result<EntryIter<'_>> {
        Ok(Box::new(
            self.entries.iter().map(|(k, v)| Ok((k.clone(), v.clone()))),
        ))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<EntryIter<'_>> {
        let prefix = prefix.to_vec();
        Ok(Box::new(
            self.entries
                .range(prefix.clone()..)
                .take_while(move |(k, _)| k.starts_with(&prefix))
                .map(|(k, v)| Ok((k.clone(), v.clone()))),
        ))
    }
}
