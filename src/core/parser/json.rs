// src/core/parser/json.rs

//! The JSON parser: a document flattened into dot-joined paths.

use super::{Parser, insert_value, sanitize_key};
use crate::config::Fragment;
use crate::core::errors::GatherError;
use crate::core::record::Content;
use serde_json::Value;

/// Nesting beyond this depth is not descended into.
const MAX_DEPTH: usize = 9;

/// Flattens a JSON document: object keys join with `.`, booleans map to
/// 0/1, arrays are comma-joined and kept only when the joined text still
/// reads as a float, everything non-numeric is skipped.
pub struct JsonParser {
    min_keys: usize,
}

impl JsonParser {
    pub fn from_fragment(frag: &mut Fragment) -> Result<Self, GatherError> {
        Ok(Self {
            min_keys: frag.take_parsed_or("min_keys", 1usize)?,
        })
    }
}

impl Parser for JsonParser {
    fn driver(&self) -> &'static str {
        "json"
    }

    fn parse(&self, payload: &[u8]) -> Result<Content, GatherError> {
        let root: Value = serde_json::from_slice(payload)?;
        let mut content = Content::new();
        flatten(&root, "", 0, &mut content)?;
        if content.len() < self.min_keys {
            return Err(GatherError::Parse(format!(
                "only {} numeric keys (minimum {})",
                content.len(),
                self.min_keys
            )));
        }
        Ok(content)
    }
}

fn flatten(
    value: &Value,
    prefix: &str,
    depth: usize,
    content: &mut Content,
) -> Result<(), GatherError> {
    match value {
        Value::Object(map) => {
            if depth >= MAX_DEPTH {
                return Ok(());
            }
            for (k, v) in map {
                let key = join_path(prefix, k);
                flatten(v, &key, depth + 1, content)?;
            }
            Ok(())
        }
        Value::Number(n) => match n.as_f64() {
            Some(v) if !prefix.is_empty() => insert_value(content, prefix.to_string(), v),
            _ => Ok(()),
        },
        Value::Bool(b) => {
            if !prefix.is_empty() {
                insert_value(content, prefix.to_string(), if *b { 1.0 } else { 0.0 })?;
            }
            Ok(())
        }
        Value::String(s) => {
            if let Ok(v) = s.trim().parse::<f64>()
                && !prefix.is_empty()
            {
                insert_value(content, prefix.to_string(), v)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            let joined = items
                .iter()
                .map(render_scalar)
                .collect::<Vec<_>>()
                .join(",");
            if let Ok(v) = joined.parse::<f64>()
                && !prefix.is_empty()
            {
                insert_value(content, prefix.to_string(), v)?;
            }
            Ok(())
        }
        Value::Null => Ok(()),
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        other => other.to_string(),
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    let key = sanitize_key(key);
    if prefix.is_empty() {
        key
    } else {
        format!("{prefix}.{key}")
    }
}
