// src/core/parser/script.rs

//! The user-supplied-function parser: a Lua chunk loaded once at init.

use super::{Parser, insert_value, sanitize_key};
use crate::config::Fragment;
use crate::core::errors::GatherError;
use crate::core::record::Content;
use mlua::{Function, Lua, Value};
use std::sync::Mutex;

/// Loads a Lua file once at init; the chunk must define a global
/// `parse(body)` returning a table of key → number. The VM lives for the
/// parser's lifetime; per-run state belongs to the function, not globals.
pub struct ScriptParser {
    /// Wrapped in a Mutex because `mlua::Lua` is not Sync.
    vm: Mutex<Lua>,
}

impl ScriptParser {
    pub fn from_fragment(frag: &mut Fragment) -> Result<Self, GatherError> {
        let path = frag
            .take_str("file")
            .ok_or_else(|| GatherError::Config("script parser needs a 'file' key".into()))?;
        let source = std::fs::read_to_string(&path)
            .map_err(|e| GatherError::Config(format!("failed to read script '{path}': {e}")))?;

        let lua = Lua::new();
        lua.load(&source)
            .set_name(&path)
            .exec()
            .map_err(|e| GatherError::Config(format!("script '{path}' failed to load: {e}")))?;
        // Fail at init, not on the first record, when the chunk forgot to
        // define the entry point.
        let _: Function = lua
            .globals()
            .get("parse")
            .map_err(|_| GatherError::Config(format!("script '{path}' defines no parse()")))?;

        Ok(Self { vm: Mutex::new(lua) })
    }
}

impl Parser for ScriptParser {
    fn driver(&self) -> &'static str {
        "script"
    }

    fn parse(&self, payload: &[u8]) -> Result<Content, GatherError> {
        let vm = self.vm.lock().expect("script VM mutex poisoned");
        let parse_fn: Function = vm.globals().get("parse")?;
        let body = vm.create_string(payload)?;
        let table: mlua::Table = parse_fn.call(body)?;

        let mut content = Content::new();
        for entry in table.pairs::<Value, Value>() {
            let (key, value) = entry?;
            let key = match key {
                Value::String(s) => sanitize_key(&s.to_string_lossy()),
                other => sanitize_key(&format!("{other:?}")),
            };
            let value = match value {
                Value::Integer(i) => i as f64,
                Value::Number(n) => n,
                Value::Boolean(b) => {
                    if b {
                        1.0
                    } else {
                        0.0
                    }
                }
                _ => continue,
            };
            insert_value(&mut content, key, value)?;
        }

        if content.is_empty() {
            return Err(GatherError::Parse("script returned no numeric pairs".into()));
        }
        Ok(content)
    }
}
