//! Lua-scripted field processors.
//!
//! Loads `.lua` plugin files at run time and registers the processors they
//! define with the [`ProcessorRegistry`](crate::registry::ProcessorRegistry),
//! alongside the built-ins. Scripts run in the sandboxed VM provided by
//! [`crate::lua_runtime`].
//!
//! # Script Interface
//!
//! A plugin file defines a global `processor` table:
//!
//! ```lua
//! processor = {
//!     name = "sentiment",              -- or names = { "bio", "about" }
//!     description = "Text sentiment tag",
//! }
//!
//! function processor.process(field, value, config)
//!     if type(value) ~= "string" then return nil end
//!     return { type = "text", field_name = field, content = value, preview = value }
//! end
//! ```
//!
//! A file may also define several processors at once via a global
//! `processors` array of such tables. Returning `nil` (or an empty table)
//! from `process` means "not applicable"; the field is simply skipped.
//!
//! # Loading semantics
//!
//! Loading executes the script once to extract definitions, then each
//! invocation re-executes it in a fresh sandboxed VM — scripts are cheap,
//! state never leaks between records, and editing a plugin file takes
//! effect on the next load. A file that loads but registers no processors
//! is a load error, not a silent no-op.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mlua::prelude::*;
use tracing::info;

use crate::error::{LensError, Result};
use crate::lua_runtime::{
    field_value_to_lua, json_value_to_lua, lua_value_to_json, register_all_host_apis,
};
use crate::models::FieldValue;
use crate::processor::{FieldProcessor, Preview, ProcessorConfig, ProcessorFactory};
use crate::registry::ProcessorRegistry;

// ═══════════════════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════════════════

/// Which definition inside the plugin file a processor came from.
#[derive(Debug, Clone, Copy)]
enum DefSelector {
    /// The single global `processor` table.
    Single,
    /// Index (1-based) into the global `processors` array.
    Indexed(i64),
}

/// Load a plugin file and register every processor it defines.
///
/// Returns the list of names registered (a definition with a `names` array
/// contributes one registration per name). Zero registrations, an
/// unreadable file, or a script error are all [`LensError::PluginLoad`].
pub fn load_script(registry: &mut ProcessorRegistry, path: &Path) -> Result<usize> {
    let names = load_script_names(registry, path)?;
    Ok(names.len())
}

/// As [`load_script`], but returns the registered names.
pub fn load_script_names(registry: &mut ProcessorRegistry, path: &Path) -> Result<Vec<String>> {
    let source = std::fs::read_to_string(path).map_err(|e| LensError::PluginLoad {
        path: path.to_path_buf(),
        reason: format!("cannot read file: {}", e),
    })?;
    let source = Arc::new(source);

    // Execute once to extract definitions.
    let lua = new_plugin_vm(path, &source)?;
    let definitions = collect_definitions(&lua, path)?;

    let mut registered = Vec::new();
    for (selector, def) in definitions {
        let names = definition_names(&def, path)?;
        ensure_has_process_fn(&def, &names, path)?;

        let factory: Arc<dyn ProcessorFactory> = Arc::new(LuaProcessorFactory {
            source: Arc::clone(&source),
            path: path.to_path_buf(),
            selector,
            label: names.join("/"),
        });
        for name in &names {
            registry.register(name.clone(), Arc::clone(&factory));
            registered.push(name.clone());
        }
    }

    if registered.is_empty() {
        return Err(LensError::PluginLoad {
            path: path.to_path_buf(),
            reason: "script defines no processors (expected a global 'processor' table \
                     or 'processors' array)"
                .into(),
        });
    }

    info!(
        path = %path.display(),
        count = registered.len(),
        "loaded processors from plugin"
    );
    Ok(registered)
}

/// Create a sandboxed VM and execute the plugin source in it.
fn new_plugin_vm(path: &Path, source: &str) -> Result<Lua> {
    let lua = Lua::new();
    let label = format!(
        "processor:{}",
        path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
    );
    register_all_host_apis(&lua, &label).map_err(|e| LensError::PluginLoad {
        path: path.to_path_buf(),
        reason: format!("host API setup failed: {}", e),
    })?;
    lua.load(source)
        .set_name(path.to_string_lossy())
        .exec()
        .map_err(|e| LensError::PluginLoad {
            path: path.to_path_buf(),
            reason: format!("script error: {}", e),
        })?;
    Ok(lua)
}

/// Gather `(selector, table)` pairs for every definition in the file.
fn collect_definitions(lua: &Lua, path: &Path) -> Result<Vec<(DefSelector, LuaTable)>> {
    let globals = lua.globals();

    if let Ok(list) = globals.get::<LuaTable>("processors") {
        let mut defs = Vec::new();
        let len = list.raw_len();
        for i in 1..=len {
            let def: LuaTable = list.raw_get(i as i64).map_err(|e| LensError::PluginLoad {
                path: path.to_path_buf(),
                reason: format!("processors[{}] is not a table: {}", i, e),
            })?;
            defs.push((DefSelector::Indexed(i as i64), def));
        }
        return Ok(defs);
    }

    if let Ok(def) = globals.get::<LuaTable>("processor") {
        return Ok(vec![(DefSelector::Single, def)]);
    }

    Ok(Vec::new())
}

/// Extract the name(s) a definition registers under.
fn definition_names(def: &LuaTable, path: &Path) -> Result<Vec<String>> {
    if let Ok(names) = def.get::<Vec<String>>("names") {
        if !names.is_empty() {
            return Ok(names);
        }
    }
    if let Ok(name) = def.get::<String>("name") {
        return Ok(vec![name]);
    }
    Err(LensError::PluginLoad {
        path: path.to_path_buf(),
        reason: "processor definition has neither 'name' nor 'names'".into(),
    })
}

fn ensure_has_process_fn(def: &LuaTable, names: &[String], path: &Path) -> Result<()> {
    if def.get::<LuaFunction>("process").is_err() {
        return Err(LensError::PluginLoad {
            path: path.to_path_buf(),
            reason: format!("processor '{}' has no process function", names.join("/")),
        });
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Execution
// ═══════════════════════════════════════════════════════════════════════

struct LuaProcessorFactory {
    source: Arc<String>,
    path: PathBuf,
    selector: DefSelector,
    label: String,
}

impl ProcessorFactory for LuaProcessorFactory {
    fn create(&self, config: ProcessorConfig) -> Box<dyn FieldProcessor> {
        Box::new(LuaProcessor {
            source: Arc::clone(&self.source),
            path: self.path.clone(),
            selector: self.selector,
            label: self.label.clone(),
            config,
        })
    }
}

/// A processor backed by a Lua plugin definition.
///
/// Each invocation runs the script in a fresh sandboxed VM, mirroring how
/// the definitions were extracted at load time.
struct LuaProcessor {
    source: Arc<String>,
    path: PathBuf,
    selector: DefSelector,
    label: String,
    config: ProcessorConfig,
}

impl LuaProcessor {
    fn fail(&self, reason: impl std::fmt::Display) -> LensError {
        LensError::Processor {
            name: self.label.clone(),
            reason: reason.to_string(),
        }
    }
}

impl FieldProcessor for LuaProcessor {
    fn name(&self) -> &str {
        &self.label
    }

    fn process(&self, field_name: &str, value: &FieldValue) -> Result<Option<Preview>> {
        let lua = new_plugin_vm(&self.path, &self.source)
            .map_err(|e| self.fail(format!("VM setup: {}", e)))?;

        let def: LuaTable = match self.selector {
            DefSelector::Single => lua
                .globals()
                .get::<LuaTable>("processor")
                .map_err(|e| self.fail(format!("missing 'processor' table: {}", e)))?,
            DefSelector::Indexed(i) => {
                let list: LuaTable = lua
                    .globals()
                    .get::<LuaTable>("processors")
                    .map_err(|e| self.fail(format!("missing 'processors' array: {}", e)))?;
                list.raw_get(i)
                    .map_err(|e| self.fail(format!("missing processors[{}]: {}", i, e)))?
            }
        };

        let process: LuaFunction = def
            .get::<LuaFunction>("process")
            .map_err(|e| self.fail(format!("process function not defined: {}", e)))?;

        let value_lua =
            field_value_to_lua(&lua, value).map_err(|e| self.fail(format!("value: {}", e)))?;
        let config_lua = json_value_to_lua(&lua, &self.config.as_json())
            .map_err(|e| self.fail(format!("config: {}", e)))?;

        let result: LuaValue = process
            .call((field_name, value_lua, config_lua))
            .map_err(|e| self.fail(e))?;

        match result {
            LuaValue::Nil => Ok(None),
            other => {
                let json = lua_value_to_json(other)
                    .map_err(|e| self.fail(format!("result conversion: {}", e)))?;
                match &json {
                    // An empty table is "not applicable", same as nil.
                    serde_json::Value::Object(map) if map.is_empty() => Ok(None),
                    serde_json::Value::Null => Ok(None),
                    _ => Ok(Some(json)),
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// CLI: scaffold
// ═══════════════════════════════════════════════════════════════════════

/// Scaffold a new processor plugin from a template.
///
/// Creates `processors/<name>.lua` with a commented template showing the
/// plugin interface and available host APIs.
pub fn scaffold_processor(name: &str) -> anyhow::Result<()> {
    use anyhow::bail;

    let dir = Path::new("processors");
    std::fs::create_dir_all(dir)?;

    let filename = format!("{}.lua", name);
    let path = dir.join(&filename);

    if path.exists() {
        bail!("Processor plugin already exists: {}", path.display());
    }

    let template = format!(
        r#"--[[
  kvlens processor: {name}

  Configuration (add to kvlens.toml):

    [processors]
    scripts = ["processors/{filename}"]

    # Bind it to a field explicitly, with options:
    [fields.my_field]
    processor = "{name}"
    config = {{ max_preview = 120 }}

  Test:
    kvl processor test processors/{filename} --field my_field --value "hello"
]]

processor = {{
    name = "{name}",
    description = "TODO: describe what this processor previews",
}}

--- Inspect one decoded field.
--- @param field string Field name
--- @param value any Decoded value (byte fields arrive as Lua strings)
--- @param config table Options from kvlens.toml (may be empty)
--- @return table|nil Preview with a 'type' of text/audio/image/custom, or nil
function processor.process(field, value, config)
    if type(value) ~= "string" then
        return nil
    end

    return {{
        type = "text",
        field_name = field,
        content = value,
        preview = string.sub(value, 1, 200),
    }}
end
"#,
        name = name,
        filename = filename,
    );

    std::fs::write(&path, template)?;
    println!("Created processor plugin: {}", path.display());
    println!();
    println!("Add to your kvlens.toml:");
    println!();
    println!("  [processors]");
    println!("  scripts = [\"processors/{}\"]", filename);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_plugin(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".lua").tempfile().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_single_processor_and_runs_it() {
        let plugin = write_plugin(
            r#"
            processor = { name = "upper" }
            function processor.process(field, value, config)
                if type(value) ~= "string" then return nil end
                return {
                    type = "text",
                    field_name = field,
                    content = string.upper(value),
                    preview = string.upper(value),
                }
            end
            "#,
        );

        let mut registry = ProcessorRegistry::new();
        let count = registry.load_script(plugin.path()).unwrap();
        assert_eq!(count, 1);
        assert!(registry.contains("upper"));

        let p = registry.create("upper", ProcessorConfig::new()).unwrap();
        let preview = p
            .process("title", &FieldValue::Str("hello".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(preview["content"], "HELLO");
        assert_eq!(preview["field_name"], "title");
    }

    #[test]
    fn loads_multiple_names_and_definitions() {
        let plugin = write_plugin(
            r#"
            processors = {
                {
                    names = { "bio", "about" },
                    process = function(field, value, config)
                        return { type = "text", field_name = field, content = value, preview = value }
                    end,
                },
                {
                    name = "tag",
                    process = function(field, value, config)
                        return nil
                    end,
                },
            }
            "#,
        );

        let mut registry = ProcessorRegistry::new();
        let names = load_script_names(&mut registry, plugin.path()).unwrap();
        assert_eq!(names, vec!["bio", "about", "tag"]);
        assert!(registry.contains("bio"));
        assert!(registry.contains("about"));
        assert!(registry.contains("tag"));
    }

    #[test]
    fn nil_and_empty_table_mean_not_applicable() {
        let plugin = write_plugin(
            r#"
            processors = {
                { name = "nil_p", process = function() return nil end },
                { name = "empty_p", process = function() return {} end },
            }
            "#,
        );

        let mut registry = ProcessorRegistry::new();
        registry.load_script(plugin.path()).unwrap();

        for name in ["nil_p", "empty_p"] {
            let p = registry.create(name, ProcessorConfig::new()).unwrap();
            let out = p.process("f", &FieldValue::Int(1)).unwrap();
            assert!(out.is_none(), "{} should be not-applicable", name);
        }
    }

    #[test]
    fn config_reaches_the_script() {
        let plugin = write_plugin(
            r#"
            processor = { name = "limited" }
            function processor.process(field, value, config)
                local bound = config.bound or 10
                return {
                    type = "text",
                    field_name = field,
                    content = value,
                    preview = string.sub(value, 1, bound),
                }
            end
            "#,
        );

        let mut registry = ProcessorRegistry::new();
        registry.load_script(plugin.path()).unwrap();

        let config = ProcessorConfig::from_value(serde_json::json!({"bound": 3}));
        let p = registry.create("limited", config).unwrap();
        let preview = p
            .process("f", &FieldValue::Str("abcdef".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(preview["preview"], "abc");
    }

    #[test]
    fn empty_plugin_is_a_load_error() {
        let plugin = write_plugin("-- nothing here\nlocal x = 1\n");
        let mut registry = ProcessorRegistry::new();
        let err = registry.load_script(plugin.path()).unwrap_err();
        assert!(matches!(err, LensError::PluginLoad { .. }));
        assert!(err.to_string().contains("defines no processors"));
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let mut registry = ProcessorRegistry::new();
        let err = registry
            .load_script(Path::new("/nonexistent/plugin.lua"))
            .unwrap_err();
        assert!(matches!(err, LensError::PluginLoad { .. }));
    }

    #[test]
    fn script_error_is_a_load_error() {
        let plugin = write_plugin("this is not lua ===");
        let mut registry = ProcessorRegistry::new();
        let err = registry.load_script(plugin.path()).unwrap_err();
        assert!(matches!(err, LensError::PluginLoad { .. }));
    }

    #[test]
    fn runtime_error_surfaces_as_processor_failure() {
        let plugin = write_plugin(
            r#"
            processor = { name = "boom" }
            function processor.process(field, value, config)
                error("deliberate failure")
            end
            "#,
        );

        let mut registry = ProcessorRegistry::new();
        registry.load_script(plugin.path()).unwrap();

        let p = registry.create("boom", ProcessorConfig::new()).unwrap();
        let err = p.process("f", &FieldValue::Int(1)).unwrap_err();
        assert!(matches!(err, LensError::Processor { .. }));
    }

    #[test]
    fn plugin_overrides_builtin() {
        let plugin = write_plugin(
            r#"
            processor = { name = "text" }
            function processor.process(field, value, config)
                return { type = "text", field_name = field, content = "override", preview = "override" }
            end
            "#,
        );

        let mut registry = ProcessorRegistry::with_builtins();
        registry.load_script(plugin.path()).unwrap();

        let p = registry.create("text", ProcessorConfig::new()).unwrap();
        let preview = p
            .process("f", &FieldValue::Str("anything".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(preview["content"], "override");
    }
}
