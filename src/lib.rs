//! # kvlens
//!
//! A read-only browser and debugger for key-value stores holding serialized
//! records.
//!
//! kvlens opens a store read-only, enumerates or searches entries by key,
//! decodes values into structured records, and renders rich previews (text,
//! audio, image) for fields of the decoded record via a registry of
//! pluggable field processors — including processors loaded from
//! user-supplied Lua scripts at run time. For large stores it can pull an
//! approximate-random sample of entries using key-hash thinning instead of
//! a full scan.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌─────────────────────────┐
//! │ RocksDB  │──▶│ Decoder │──▶│  Preview Aggregator      │
//! │ (r/only) │   │ (JSON)  │   │  ├─ Processor Registry   │
//! └────┬─────┘   └─────────┘   │  │   ├─ built-ins        │
//!      │                       │  │   └─ Lua plugins      │
//!      ▼                       │  └─ temp artifacts       │
//! ┌──────────┐                 └───────────┬──────────────┘
//! │ Sampler  │                             ▼
//! │ key-hash │                        ┌─────────┐
//! └──────────┘                        │   CLI   │
//!                                     │  (kvl)  │
//!                                     └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kvl --db ./my-store info          # stats and registered processors
//! kvl --db ./my-store head -n 5    # first 5 entries, decoded
//! kvl --db ./my-store sample -n 20 # approximate-random sample
//! kvl processor new sentiment       # scaffold a Lua processor plugin
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`store`] | `KvStore` trait + in-memory store |
//! | [`rocks_store`] | Read-only RocksDB backend |
//! | [`decode`] | Value → record decoding boundary |
//! | [`processor`] | Field processor contract + built-ins |
//! | [`registry`] | Processor name → factory catalog |
//! | [`lua_processor`] | Lua-scripted processor plugins |
//! | [`preview`] | Per-record preview aggregation |
//! | [`sample`] | Key-hash approximate-random sampling |
//! | [`browse`] | Browsing session service |

pub mod browse;
pub mod config;
pub mod decode;
pub mod error;
pub mod lua_processor;
mod lua_runtime;
pub mod models;
pub mod preview;
pub mod processor;
pub mod registry;
pub mod rocks_store;
pub mod sample;
pub mod store;

pub use browse::Browser;
pub use error::{LensError, Result};
