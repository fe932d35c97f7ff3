// src/core/parser/text_simple.rs

//! The line-oriented key/value parser.

use super::{Parser, insert_value, sanitize_key};
use crate::config::Fragment;
use crate::core::errors::GatherError;
use crate::core::record::Content;
use tracing::warn;

/// Lines beyond this are ignored.
const MAX_LINES: usize = 1000;

/// Parses `key=value` lines, falling back to `key:value` and finally to a
/// whitespace-separated pair. `#` and `;` start comment lines. Whitespace
/// inside a key becomes `.`. Duplicate keys keep the last seen value.
pub struct TextSimpleParser {
    /// Log a warning when a duplicate key overwrites an earlier one.
    warn_duplicates: bool,
    /// Fail the parse when fewer recognizable pairs than this are seen.
    min_pairs: usize,
}

impl TextSimpleParser {
    pub fn from_fragment(frag: &mut Fragment) -> Result<Self, GatherError> {
        Ok(Self {
            warn_duplicates: frag.take_bool_or("warn_duplicates", false)?,
            min_pairs: frag.take_parsed_or("min_pairs", 1usize)?,
        })
    }
}

impl Parser for TextSimpleParser {
    fn driver(&self) -> &'static str {
        "text_simple"
    }

    fn parse(&self, payload: &[u8]) -> Result<Content, GatherError> {
        let text = std::str::from_utf8(payload)?;
        let mut content = Content::new();

        for line in text.lines().take(MAX_LINES) {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let Some((raw_key, raw_value)) = split_pair(line) else {
                continue;
            };
            let Ok(value) = raw_value.trim().parse::<f64>() else {
                continue;
            };
            let key = sanitize_key(raw_key);
            if key.is_empty() {
                continue;
            }
            if self.warn_duplicates && content.contains_key(&key) {
                warn!("duplicate key '{}', keeping the last value", key);
            }
            insert_value(&mut content, key, value)?;
        }

        if content.len() < self.min_pairs {
            return Err(GatherError::Parse(format!(
                "only {} recognizable pairs (minimum {})",
                content.len(),
                self.min_pairs
            )));
        }
        Ok(content)
    }
}

/// Splits one line into a key/value pair: `=` wins over `:`, which wins
/// over the last whitespace run.
fn split_pair(line: &str) -> Option<(&str, &str)> {
    if let Some(pair) = line.split_once('=') {
        return Some(pair);
    }
    if let Some(pair) = line.split_once(':') {
        return Some(pair);
    }
    let idx = line.rfind(char::is_whitespace)?;
    Some((&line[..idx], &line[idx + 1..]))
}
