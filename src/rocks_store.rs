//! Read-only RocksDB backend for the [`KvStore`](crate::store::KvStore) trait.
//!
//! The database is opened with `open_for_read_only`, which takes no lock and
//! coexists with a live writer — kvlens is always a reader, never a writer.
//! The entry count comes from the `rocksdb.estimate-num-keys` property, a
//! cheap store-level statistic rather than a scan; the sampler only needs it
//! to derive an inclusion probability, so an estimate is sufficient.

use std::path::{Path, PathBuf};

use rocksdb::{IteratorMode, Options, DB};
use tracing::{debug, info};

use crate::error::{LensError, Result};
use crate::store::{EntryIter, KvStore};

/// A RocksDB database opened read-only.
#[derive(Debug)]
pub struct RocksStore {
    db: DB,
    path: PathBuf,
}

impl RocksStore {
    /// Open an existing database at `path` for reading.
    ///
    /// Fails if the path does not exist or does not contain a RocksDB
    /// database. Never creates or repairs anything on disk.
    pub fn open(path: impl AsRef<Path>) -> Result<RocksStore> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LensError::Store(format!(
                "database path not found: {}",
                path.display()
            )));
        }

        let db = DB::open_for_read_only(&Options::default(), path, false)?;
        info!(path = %path.display(), "opened store read-only");

        Ok(RocksStore {
            db,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KvStore for RocksStore {
    fn entry_count(&self) -> Result<u64> {
        let count = self
            .db
            .property_int_value("rocksdb.estimate-num-keys")?
            .ok_or_else(|| LensError::Store("estimate-num-keys property unavailable".into()))?;
        debug!(count, "store entry count");
        Ok(count)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?)
    }

    fn scan(&self) -> Result<EntryIter<'_>> {
        Ok(Box::new(self.db.iterator(IteratorMode::Start).map(|item| {
            item.map(|(k, v)| (k.into_vec(), v.into_vec()))
                .map_err(LensError::from)
        })))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<EntryIter<'_>> {
        // prefix_iterator seeks to the prefix; the take_while bounds the
        // range regardless of whether a prefix extractor is configured.
        let prefix = prefix.to_vec();
        Ok(Box::new(
            self.db
                .prefix_iterator(prefix.clone())
                .map(|item| {
                    item.map(|(k, v)| (k.into_vec(), v.into_vec()))
                        .map_err(LensError::from)
                })
                .take_while(move |item| match item {
                    Ok((k, _)) => k.starts_with(&prefix),
                    Err(_) => true,
                }),
        ))
    }
}
