//! Shared Lua 5.4 VM runtime for processor plugins.
//!
//! Provides the sandboxed Lua environment that [`crate::lua_processor`]
//! executes plugin scripts in. Processors are pure local transforms over a
//! field value, so the host API surface is small and fully synchronous.
//!
//! # Host APIs
//!
//! | Module | Functions |
//! |--------|-----------|
//! | `log` | `info`, `warn`, `error`, `debug` |
//! | `json` | `parse`, `encode` |
//! | `base64` | `encode`, `decode` |
//!
//! `base64.decode` returns a Lua byte-string, so binary payloads round-trip
//! without a UTF-8 detour.
//!
//! # Sandboxing
//!
//! Dangerous Lua standard libraries (`os`, `io`, `debug`, `loadfile`,
//! `dofile`) are removed before any script code runs.

use mlua::prelude::*;
use tracing::{debug, error, info, warn};

use crate::models::FieldValue;

// ═══════════════════════════════════════════════════════════════════════
// Public helpers
// ═══════════════════════════════════════════════════════════════════════

/// Register all host APIs on a Lua VM instance.
///
/// This is the single entry-point used by the processor runtime. It
/// sandboxes the globals and registers every host module.
///
/// # Arguments
///
/// * `lua` — the Lua VM instance to configure.
/// * `script_name` — logical name used for log prefixes (e.g.
///   `"processor:pcm_audio"`).
pub(crate) fn register_all_host_apis(lua: &Lua, script_name: &str) -> LuaResult<()> {
    sandbox_globals(lua)?;
    register_log_api(lua, script_name)?;
    register_json_api(lua)?;
    register_base64_api(lua)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Sandboxing
// ═══════════════════════════════════════════════════════════════════════

/// Remove dangerous standard library functions from the Lua globals.
pub(crate) fn sandbox_globals(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();
    globals.set("os", LuaValue::Nil)?;
    globals.set("io", LuaValue::Nil)?;
    globals.set("loadfile", LuaValue::Nil)?;
    globals.set("dofile", LuaValue::Nil)?;
    globals.set("debug", LuaValue::Nil)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Host API: log
// ═══════════════════════════════════════════════════════════════════════

fn register_log_api(lua: &Lua, script_name: &str) -> LuaResult<()> {
    let log = lua.create_table()?;

    let n = script_name.to_string();
    log.set(
        "info",
        lua.create_function(move |_lua, msg: String| {
            info!(script = %n, "{}", msg);
            Ok(())
        })?,
    )?;

    let n = script_name.to_string();
    log.set(
        "warn",
        lua.create_function(move |_lua, msg: String| {
            warn!(script = %n, "{}", msg);
            Ok(())
        })?,
    )?;

    let n = script_name.to_string();
    log.set(
        "error",
        lua.create_function(move |_lua, msg: String| {
            error!(script = %n, "{}", msg);
            Ok(())
        })?,
    )?;

    let n = script_name.to_string();
    log.set(
        "debug",
        lua.create_function(move |_lua, msg: String| {
            debug!(script = %n, "{}", msg);
            Ok(())
        })?,
    )?;

    lua.globals().set("log", log)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Host API: json
// ═══════════════════════════════════════════════════════════════════════

fn register_json_api(lua: &Lua) -> LuaResult<()> {
    let json_table = lua.create_table()?;

    json_table.set(
        "parse",
        lua.create_function(|lua, s: String| {
            let value: serde_json::Value = serde_json::from_str(&s)
                .map_err(|e| mlua::Error::external(anyhow::anyhow!("json.parse: {}", e)))?;
            json_value_to_lua(lua, &value)
        })?,
    )?;

    json_table.set(
        "encode",
        lua.create_function(|_lua, value: LuaValue| {
            let json = lua_value_to_json(value)?;
            serde_json::to_string(&json)
                .map_err(|e| mlua::Error::external(anyhow::anyhow!("json.encode: {}", e)))
        })?,
    )?;

    lua.globals().set("json", json_table)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Host API: base64
// ═══════════════════════════════════════════════════════════════════════

fn register_base64_api(lua: &Lua) -> LuaResult<()> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    let b64 = lua.create_table()?;

    b64.set(
        "encode",
        lua.create_function(|_lua, data: LuaString| {
            Ok(STANDARD.encode(&*data.as_bytes()))
        })?,
    )?;

    b64.set(
        "decode",
        lua.create_function(|lua, data: String| {
            let bytes = STANDARD
                .decode(data.as_bytes())
                .map_err(|e| mlua::Error::external(anyhow::anyhow!("base64.decode: {}", e)))?;
            lua.create_string(&bytes)
        })?,
    )?;

    lua.globals().set("base64", b64)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Value Conversions: FieldValue → Lua
// ═══════════════════════════════════════════════════════════════════════

/// Convert a decoded field value to a Lua value. Bytes map to Lua
/// byte-strings, which is what a binary-consuming processor expects.
pub(crate) fn field_value_to_lua(lua: &Lua, value: &FieldValue) -> LuaResult<LuaValue> {
    match value {
        FieldValue::Null => Ok(LuaValue::Nil),
        FieldValue::Bool(b) => Ok(LuaValue::Boolean(*b)),
        FieldValue::Int(i) => Ok(LuaValue::Integer(*i)),
        FieldValue::Float(f) => Ok(LuaValue::Number(*f)),
        FieldValue::Str(s) => lua.create_string(s).map(LuaValue::String),
        FieldValue::Bytes(b) => lua.create_string(b).map(LuaValue::String),
        FieldValue::List(items) => {
            let table = lua.create_table()?;
            for (i, v) in items.iter().enumerate() {
                table.set(i as i64 + 1, field_value_to_lua(lua, v)?)?;
            }
            Ok(LuaValue::Table(table))
        }
        FieldValue::Map(map) => {
            let table = lua.create_table()?;
            for (k, v) in map {
                table.set(k.as_str(), field_value_to_lua(lua, v)?)?;
            }
            Ok(LuaValue::Table(table))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Value Conversions: JSON ↔ Lua
// ═══════════════════════════════════════════════════════════════════════

/// Convert a JSON value to a Lua value.
pub(crate) fn json_value_to_lua(lua: &Lua, value: &serde_json::Value) -> LuaResult<LuaValue> {
    match value {
        serde_json::Value::Null => Ok(LuaValue::Nil),
        serde_json::Value::Bool(b) => Ok(LuaValue::Boolean(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(LuaValue::Integer(i))
            } else {
                Ok(LuaValue::Number(n.as_f64().unwrap_or(0.0)))
            }
        }
        serde_json::Value::String(s) => lua.create_string(s).map(LuaValue::String),
        serde_json::Value::Array(arr) => {
            let table = lua.create_table()?;
            for (i, v) in arr.iter().enumerate() {
                table.set(i as i64 + 1, json_value_to_lua(lua, v)?)?;
            }
            Ok(LuaValue::Table(table))
        }
        serde_json::Value::Object(map) => {
            let table = lua.create_table()?;
            for (k, v) in map {
                table.set(k.as_str(), json_value_to_lua(lua, v)?)?;
            }
            Ok(LuaValue::Table(table))
        }
    }
}

/// Convert a Lua value to a JSON value. Non-UTF-8 strings are replaced
/// lossily; a preview payload is display data, not a byte channel.
pub(crate) fn lua_value_to_json(value: LuaValue) -> LuaResult<serde_json::Value> {
    match value {
        LuaValue::Nil => Ok(serde_json::Value::Null),
        LuaValue::Boolean(b) => Ok(serde_json::Value::Bool(b)),
        LuaValue::Integer(i) => Ok(serde_json::Value::Number(i.into())),
        LuaValue::Number(n) => Ok(serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)),
        LuaValue::String(s) => Ok(serde_json::Value::String(
            String::from_utf8_lossy(&s.as_bytes()).into_owned(),
        )),
        LuaValue::Table(t) => {
            // Heuristic: if raw_len > 0, treat as array; otherwise as object
            let len = t.raw_len();
            if len > 0 {
                let mut arr = Vec::new();
                for i in 1..=len {
                    let v: LuaValue = t.raw_get(i)?;
                    arr.push(lua_value_to_json(v)?);
                }
                Ok(serde_json::Value::Array(arr))
            } else {
                let mut map = serde_json::Map::new();
                for pair in t.pairs::<String, LuaValue>() {
                    let (k, v) = pair?;
                    map.insert(k, lua_value_to_json(v)?);
                }
                Ok(serde_json::Value::Object(map))
            }
        }
        _ => Ok(serde_json::Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn field_value_round_trips_through_lua() {
        let lua = Lua::new();
        let mut map = BTreeMap::new();
        map.insert("n".to_string(), FieldValue::Int(7));
        map.insert("s".to_string(), FieldValue::Str("hi".to_string()));
        let v = field_value_to_lua(&lua, &FieldValue::Map(map)).unwrap();

        let json = lua_value_to_json(v).unwrap();
        assert_eq!(json["n"], 7);
        assert_eq!(json["s"], "hi");
    }

    #[test]
    fn bytes_become_lua_byte_strings() {
        let lua = Lua::new();
        let v = field_value_to_lua(&lua, &FieldValue::Bytes(vec![0xff, 0x00, 0x01])).unwrap();
        match v {
            LuaValue::String(s) => assert_eq!(s.as_bytes().to_vec(), vec![0xff, 0x00, 0x01]),
            other => panic!("expected string, got {:?}", other),
        }
    }

    #[test]
    fn sandbox_removes_dangerous_globals() {
        let lua = Lua::new();
        sandbox_globals(&lua).unwrap();
        let os: LuaValue = lua.globals().get("os").unwrap();
        assert!(matches!(os, LuaValue::Nil));
        let io: LuaValue = lua.globals().get("io").unwrap();
        assert!(matches!(io, LuaValue::Nil));
    }

    #[test]
    fn lua_array_maps_to_json_array() {
        let lua = Lua::new();
        let v: LuaValue = lua.load("return {1, 2, 3}").eval().unwrap();
        let json = lua_value_to_json(v).unwrap();
        assert_eq!(json, serde_json::json!([1, 2, 3]));
    }
}
