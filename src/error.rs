//! Error taxonomy for kvlens.
//!
//! Library code returns [`LensError`]; the CLI boundary wraps these with
//! `anyhow` context. The taxonomy deliberately separates configuration and
//! contract violations (which propagate) from per-item data problems (which
//! degrade to empty/partial results and are only logged).

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, LensError>;

/// All errors the kvlens library can surface to a caller.
#[derive(Debug, Error)]
pub enum LensError {
    /// A processor name was looked up that no factory is registered under.
    /// Carries the currently known names so a misconfiguration is
    /// immediately diagnosable.
    #[error("processor '{name}' not found. Available: {available:?}")]
    ProcessorNotFound {
        name: String,
        available: Vec<String>,
    },

    /// A plugin file could not be loaded, or loaded without registering
    /// any processors (an empty plugin file is a caller error, not a no-op).
    #[error("failed to load processors from {path}: {reason}")]
    PluginLoad { path: PathBuf, reason: String },

    /// A processor returned a structurally invalid preview (missing or
    /// unrecognized `type`). This indicates a broken processor
    /// implementation and is never downgraded to a warning.
    #[error("invalid preview for field '{field}': {reason}")]
    InvalidPreview { field: String, reason: String },

    /// A processor failed internally while handling a field. The aggregator
    /// downgrades this to "no preview" with a warning; it only reaches a
    /// caller when a processor is invoked directly.
    #[error("processor '{name}' failed: {reason}")]
    Processor { name: String, reason: String },

    /// The underlying key-value store reported a failure.
    #[error("store error: {0}")]
    Store(String),

    /// A value could not be decoded into a structured record.
    #[error("could not decode value: {0}")]
    Decode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for LensError {
    fn from(e: rocksdb::Error) -> Self {
        LensError::Store(e.to_string())
    }
}
