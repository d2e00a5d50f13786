use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::preview::{FieldBinding, FieldConfigMap};
use crate::processor::ProcessorConfig;

/// Top-level `kvlens.toml` configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub processors: ProcessorsConfig,
    /// Explicit field bindings: `[fields.<field>]` sections.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldBindingConfig>,
    #[serde(default)]
    pub sampling: SamplingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Path to the RocksDB database directory. Opened read-only.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DecoderConfig {
    /// Value decoder: `json` or `none`.
    #[serde(default = "default_decoder_kind")]
    pub kind: String,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            kind: default_decoder_kind(),
        }
    }
}

fn default_decoder_kind() -> String {
    "json".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProcessorsConfig {
    /// Lua plugin files loaded at startup. A file that fails to load is a
    /// warning, not a startup failure.
    #[serde(default)]
    pub scripts: Vec<PathBuf>,
}

/// One `[fields.<name>]` section: processor name plus its options.
#[derive(Debug, Deserialize, Clone)]
pub struct FieldBindingConfig {
    pub processor: String,
    #[serde(default)]
    pub config: toml::Table,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SamplingConfig {
    #[serde(default = "default_oversample")]
    pub oversample: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            oversample: default_oversample(),
        }
    }
}

fn default_oversample() -> f64 {
    3.0
}

impl Config {
    /// A minimal config pointing at `store_path`, used when `--db` is given
    /// without a config file.
    pub fn minimal(store_path: PathBuf) -> Self {
        Self {
            store: StoreConfig { path: store_path },
            decoder: DecoderConfig::default(),
            processors: ProcessorsConfig::default(),
            fields: BTreeMap::new(),
            sampling: SamplingConfig::default(),
        }
    }

    /// Convert the `[fields.*]` sections into the aggregator's binding map.
    pub fn field_config(&self) -> Result<FieldConfigMap> {
        let mut map = FieldConfigMap::new();
        for (field, binding) in &self.fields {
            let options = serde_json::to_value(&binding.config)
                .with_context(|| format!("Invalid config for field '{}'", field))?;
            map.insert(
                field.clone(),
                FieldBinding {
                    processor: binding.processor.clone(),
                    config: ProcessorConfig::from_value(options),
                },
            );
        }
        Ok(map)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}
