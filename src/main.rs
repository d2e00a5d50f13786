//! # kvlens CLI (`kvl`)
//!
//! The `kvl` binary is the operator's interface to kvlens. It provides
//! commands for inspecting a store, browsing and searching entries,
//! approximate-random sampling, and managing processor plugins.
//!
//! ## Usage
//!
//! ```bash
//! kvl --config ./kvlens.toml <command>
//! kvl --db ./path/to/store <command>     # no config file needed
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kvl info` | Store statistics, decoder, and registered processors |
//! | `kvl head -n 10` | First N entries, decoded and previewed |
//! | `kvl get <key>` | Look up one entry by exact key |
//! | `kvl prefix <p>` | Entries whose keys start with a prefix |
//! | `kvl find <pattern>` | Entries whose keys contain a substring |
//! | `kvl sample -n 20` | Approximate-random sample via key-hash thinning |
//! | `kvl processor list` | Registered processor names |
//! | `kvl processor load <file.lua>` | Load a plugin file and report what registered |
//! | `kvl processor test <file.lua>` | Run a plugin against a sample value |
//! | `kvl processor new <name>` | Scaffold a plugin from a template |
//! | `kvl cleanup <paths...>` | Delete preview artifacts left by earlier runs |
//!
//! ## Examples
//!
//! ```bash
//! # Inspect a store without a config file
//! kvl --db ./prod-replica info
//!
//! # Browse the first entries with previews
//! kvl --db ./prod-replica head -n 5
//!
//! # Pull a reproducible random-ish sample from a large store
//! kvl --db ./prod-replica sample -n 50 --oversample 4.0
//!
//! # Develop a processor plugin
//! kvl processor new waveform
//! kvl processor test processors/waveform.lua --field wav --value "$(base64 clip.pcm)" --base64
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use kvlens::browse::Browser;
use kvlens::config::{self, Config};
use kvlens::decode::{JsonDecoder, RecordDecoder};
use kvlens::lua_processor;
use kvlens::models::{EntryView, FieldValue};
use kvlens::preview;
use kvlens::processor::ProcessorConfig;
use kvlens::registry::ProcessorRegistry;
use kvlens::rocks_store::RocksStore;

/// kvlens CLI — a read-only browser and debugger for key-value stores
/// holding serialized records.
///
/// All commands accept `--config` pointing to a TOML configuration file, or
/// `--db` pointing straight at a store directory. See
/// `config/kvlens.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kvl",
    about = "kvlens — a read-only browser and debugger for key-value stores",
    version,
    long_about = "kvlens opens a key-value store read-only, enumerates or searches entries by \
    key, decodes values into structured records, and renders text/audio/image previews for \
    fields via pluggable processors, including Lua plugins loaded at run time."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./kvlens.toml`. Optional when `--db` is given.
    #[arg(long, global = true, default_value = "./kvlens.toml")]
    config: PathBuf,

    /// Store directory to open read-only. Overrides `[store].path` from the
    /// config file.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Show store statistics and the active decoder and processors.
    Info,

    /// Show the first N entries in native key order.
    Head {
        /// Number of entries to show.
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },

    /// Look up a single entry by exact key.
    Get {
        /// The key, as UTF-8 text (or hex with `--hex`).
        key: String,

        /// Interpret the key argument as hex-encoded bytes.
        #[arg(long)]
        hex: bool,
    },

    /// Show entries whose keys start with a prefix.
    Prefix {
        /// Key prefix, as UTF-8 text.
        prefix: String,

        /// Maximum number of entries to show.
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },

    /// Show entries whose keys contain a substring.
    Find {
        /// Byte substring to look for in keys, as UTF-8 text.
        pattern: String,

        /// Maximum number of entries to show.
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },

    /// Pull an approximate-random sample of entries.
    ///
    /// Inclusion is a pure function of each key's hash, so the same store
    /// and arguments always return the same entries. Small stores and
    /// unlucky draws can return fewer than requested.
    Sample {
        /// Target number of entries.
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,

        /// Oversampling factor compensating for hash variance (≥ 1.0).
        /// Defaults to `[sampling].oversample` from config, else 3.0.
        #[arg(long)]
        oversample: Option<f64>,
    },

    /// Manage processor plugins.
    Processor {
        #[command(subcommand)]
        action: ProcessorAction,
    },

    /// Delete preview artifacts left on disk by earlier runs.
    ///
    /// Best-effort: paths that no longer exist are silently skipped.
    Cleanup {
        /// Artifact paths to delete.
        paths: Vec<PathBuf>,
    },
}

/// Processor plugin subcommands.
#[derive(Subcommand)]
enum ProcessorAction {
    /// List registered processor names (built-ins plus configured plugins).
    List,

    /// Load a plugin file and report what it registered.
    ///
    /// A file that registers nothing is an error, not a no-op.
    Load {
        /// Path to the `.lua` plugin file.
        path: PathBuf,
    },

    /// Test a plugin against a sample value.
    ///
    /// Loads the plugin, runs each processor it defines over the given
    /// field/value, and prints the previews. Useful for development.
    Test {
        /// Path to the `.lua` plugin file.
        path: PathBuf,

        /// Field name to present to the processor.
        #[arg(long, default_value = "value")]
        field: String,

        /// The value, as UTF-8 text (or base64-encoded bytes with `--base64`).
        #[arg(long)]
        value: String,

        /// Decode the value argument from base64 into raw bytes first.
        #[arg(long)]
        base64: bool,

        /// Processor options as inline JSON (e.g. '{"sample_rate": 24000}').
        #[arg(long)]
        config: Option<String>,
    },

    /// Scaffold a new plugin from a template.
    ///
    /// Creates `processors/<name>.lua` with a commented template.
    New {
        /// Name for the new processor (e.g., `waveform`, `sentiment`).
        name: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require an open store
    match &cli.command {
        Commands::Processor {
            action: ProcessorAction::New { name },
        } => {
            lua_processor::scaffold_processor(name)?;
            return Ok(());
        }
        Commands::Processor {
            action: ProcessorAction::Load { path },
        } => {
            let mut registry = ProcessorRegistry::with_builtins();
            let names = lua_processor::load_script_names(&mut registry, path)?;
            println!("Loaded {} processor(s) from {}:", names.len(), path.display());
            for name in names {
                println!("  {}", name);
            }
            return Ok(());
        }
        Commands::Processor {
            action:
                ProcessorAction::Test {
                    path,
                    field,
                    value,
                    base64,
                    config,
                },
        } => {
            run_processor_test(path, field, value, *base64, config.as_deref())?;
            return Ok(());
        }
        Commands::Cleanup { paths } => {
            preview::cleanup_artifacts(paths);
            println!("Cleanup requested for {} path(s).", paths.len());
            return Ok(());
        }
        _ => {}
    }

    let cfg = resolve_config(&cli)?;
    let mut browser = build_browser(&cfg)?;

    match cli.command {
        Commands::Info => {
            let info = browser.info()?;
            println!("kvlens — Store Info");
            println!("===================");
            println!();
            println!("  Store:      {}", info.path);
            println!("  Entries:    {}", info.entries);
            println!(
                "  Decoder:    {}",
                info.decoder.as_deref().unwrap_or("(none)")
            );
            println!("  Processors: {}", info.processors.join(", "));
        }
        Commands::Head { count } => {
            let views = browser.head(count)?;
            print_entries(&mut browser, views)?;
        }
        Commands::Get { key, hex } => {
            let key_bytes = if hex {
                hex::decode(key.trim()).context("Invalid hex key")?
            } else {
                key.into_bytes()
            };
            match browser.entry(&key_bytes)? {
                Some(view) => print_entries(&mut browser, vec![view])?,
                None => println!("Key not found."),
            }
        }
        Commands::Prefix { prefix, limit } => {
            let views = browser.prefix(prefix.as_bytes(), limit)?;
            print_entries(&mut browser, views)?;
        }
        Commands::Find { pattern, limit } => {
            let views = browser.find(pattern.as_bytes(), limit)?;
            print_entries(&mut browser, views)?;
        }
        Commands::Sample { count, oversample } => {
            let factor = oversample.unwrap_or(cfg.sampling.oversample);
            let views = browser.sample(count, factor)?;
            if views.len() < count {
                println!("(sampled {} of {} requested)", views.len(), count);
            }
            print_entries(&mut browser, views)?;
        }
        Commands::Processor {
            action: ProcessorAction::List,
        } => {
            for name in browser.registry().list() {
                println!("{}", name);
            }
        }
        // Handled above.
        Commands::Processor { .. } | Commands::Cleanup { .. } => unreachable!(),
    }

    Ok(())
}

/// Load config from `--config`, or synthesize a minimal one from `--db`.
fn resolve_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else if let Some(db) = &cli.db {
        Config::minimal(db.clone())
    } else {
        bail!(
            "No config file at {} and no --db given. Create a config or pass --db <store>.",
            cli.config.display()
        );
    };
    if let Some(db) = &cli.db {
        cfg.store.path = db.clone();
    }
    Ok(cfg)
}

/// Open the store and assemble a browsing session from config.
fn build_browser(cfg: &Config) -> anyhow::Result<Browser> {
    let store = RocksStore::open(&cfg.store.path)
        .with_context(|| format!("Failed to open store: {}", cfg.store.path.display()))?;

    let mut browser = Browser::new(
        Box::new(store),
        cfg.store.path.to_string_lossy().into_owned(),
    );

    browser = match cfg.decoder.kind.as_str() {
        "json" => browser.with_decoder(Box::new(JsonDecoder::new()) as Box<dyn RecordDecoder>),
        "none" => browser,
        other => bail!("Unknown decoder kind '{}' (expected 'json' or 'none')", other),
    };

    let field_config = cfg.field_config()?;
    if !field_config.is_empty() {
        browser = browser.with_field_config(field_config);
    }

    browser.load_processor_scripts(&cfg.processors.scripts);
    Ok(browser)
}

/// Pretty-print entry views and hand any preview artifacts to the user.
fn print_entries(browser: &mut Browser, views: Vec<EntryView>) -> anyhow::Result<()> {
    if views.is_empty() {
        println!("No entries.");
        return Ok(());
    }

    let pretty = serde_json::to_string_pretty(&views)?;
    println!("{}", pretty);

    let artifacts = browser.keep_artifacts();
    if !artifacts.is_empty() {
        println!();
        println!("Preview artifacts (remove with `kvl cleanup <paths...>`):");
        for path in artifacts {
            println!("  {}", path.display());
        }
    }
    Ok(())
}

/// `kvl processor test` — run one plugin file against a sample value.
fn run_processor_test(
    path: &PathBuf,
    field: &str,
    value: &str,
    decode_base64: bool,
    config_json: Option<&str>,
) -> anyhow::Result<()> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    let mut registry = ProcessorRegistry::new();
    let names = lua_processor::load_script_names(&mut registry, path)?;
    println!("Testing plugin: {}", path.display());
    println!("  ✓ Loaded {} processor(s): {}", names.len(), names.join(", "));

    let field_value = if decode_base64 {
        FieldValue::Bytes(STANDARD.decode(value).context("Invalid base64 value")?)
    } else {
        FieldValue::Str(value.to_string())
    };

    let config = match config_json {
        Some(raw) => ProcessorConfig::from_value(
            serde_json::from_str(raw).context("Invalid --config JSON")?,
        ),
        None => ProcessorConfig::new(),
    };

    for name in &names {
        let processor = registry.create(name, config.clone())?;
        println!();
        println!("{}:", name);
        match processor.process(field, &field_value) {
            Ok(Some(preview)) => {
                let pretty = serde_json::to_string_pretty(&preview)?;
                for line in pretty.lines() {
                    println!("  {}", line);
                }
            }
            Ok(None) => println!("  (not applicable)"),
            Err(e) => println!("  error: {}", e),
        }
    }

    Ok(())
}
