// src/core/parser/webstatus.rs

//! Status-page parsers for the common web servers: nginx stub_status,
//! Apache/Lighttpd mod_status, and varnishstat column output.

use super::{Parser, insert_value, sanitize_key};
use crate::config::Fragment;
use crate::core::errors::GatherError;
use crate::core::record::Content;

const MAX_LINES: usize = 1000;

/// Parses the nginx stub_status page:
///
/// ```text
/// Active connections: 7
/// server accepts handled requests
///  10 10 15
/// Reading: 1 Writing: 2 Waiting: 4
/// ```
pub struct NginxParser {}

impl NginxParser {
    pub fn from_fragment(_frag: &mut Fragment) -> Result<Self, GatherError> {
        Ok(Self {})
    }
}

impl Parser for NginxParser {
    fn driver(&self) -> &'static str {
        "nginx"
    }

    fn parse(&self, payload: &[u8]) -> Result<Content, GatherError> {
        let text = std::str::from_utf8(payload)?;
        let mut content = Content::new();
        let mut expect_totals = false;

        for line in text.lines().take(MAX_LINES) {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("Active connections:") {
                let v = rest.trim().parse::<f64>()?;
                insert_value(&mut content, "connections".into(), v)?;
            } else if line.starts_with("server accepts handled requests") {
                expect_totals = true;
            } else if expect_totals {
                expect_totals = false;
                let mut fields = line.split_whitespace();
                for key in ["accepts", "handled", "requests"] {
                    let raw = fields.next().ok_or_else(|| {
                        GatherError::Parse("short server totals line".into())
                    })?;
                    insert_value(&mut content, key.into(), raw.parse::<f64>()?)?;
                }
            } else if line.starts_with("Reading:") {
                // "Reading: 1 Writing: 2 Waiting: 4"
                let mut fields = line.split_whitespace();
                while let (Some(key), Some(value)) = (fields.next(), fields.next()) {
                    let key = key.trim_end_matches(':').to_ascii_lowercase();
                    insert_value(&mut content, sanitize_key(&key), value.parse::<f64>()?)?;
                }
            }
        }

        if content.is_empty() {
            return Err(GatherError::Parse("not a stub_status page".into()));
        }
        Ok(content)
    }
}

/// Parses Apache mod_status `?auto` output; lighttpd serves the same
/// format. Header names become camelCase keys ("Total Accesses" →
/// `totalAccesses`); the scoreboard expands into reading/writing/waiting
/// slot counts, keep-alive slots counting as waiting.
pub struct ApacheParser {}

impl ApacheParser {
    pub fn from_fragment(_frag: &mut Fragment) -> Result<Self, GatherError> {
        Ok(Self {})
    }
}

impl Parser for ApacheParser {
    fn driver(&self) -> &'static str {
        "apache"
    }

    fn parse(&self, payload: &[u8]) -> Result<Content, GatherError> {
        let text = std::str::from_utf8(payload)?;
        let mut content = Content::new();

        for line in text.lines().take(MAX_LINES) {
            let Some((raw_key, raw_value)) = line.split_once(':') else {
                continue;
            };
            let raw_value = raw_value.trim();
            if raw_key.trim() == "Scoreboard" {
                expand_scoreboard(raw_value, &mut content)?;
                continue;
            }
            if let Ok(v) = raw_value.parse::<f64>() {
                insert_value(&mut content, camel_case(raw_key), v)?;
            }
        }

        if content.is_empty() {
            return Err(GatherError::Parse("not a mod_status page".into()));
        }
        Ok(content)
    }
}

/// Scoreboard legend: `R` reading, `W` writing, `_` idle and `K` keep-alive
/// both waiting, `.` an open slot. Everything else is lumped under `other`.
fn expand_scoreboard(board: &str, content: &mut Content) -> Result<(), GatherError> {
    let (mut reading, mut writing, mut waiting, mut open, mut other) = (0u32, 0u32, 0u32, 0u32, 0u32);
    for ch in board.chars() {
        match ch {
            'R' => reading += 1,
            'W' => writing += 1,
            '_' | 'K' => waiting += 1,
            '.' => open += 1,
            c if c.is_whitespace() => {}
            _ => other += 1,
        }
    }
    insert_value(content, "reading".into(), reading as f64)?;
    insert_value(content, "writing".into(), writing as f64)?;
    insert_value(content, "waiting".into(), waiting as f64)?;
    insert_value(content, "open".into(), open as f64)?;
    if other > 0 {
        insert_value(content, "other".into(), other as f64)?;
    }
    Ok(())
}

/// "Total Accesses" → "totalAccesses", "BusyWorkers" → "busyWorkers".
fn camel_case(raw: &str) -> String {
    let compact: String = raw.split_whitespace().collect();
    let sanitized = sanitize_key(&compact);
    let mut chars = sanitized.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => sanitized,
    }
}

/// Parses `varnishstat -1` output: one counter per line,
/// `NAME  VALUE  RATE  DESCRIPTION`.
pub struct VarnishParser {}

impl VarnishParser {
    pub fn from_fragment(_frag: &mut Fragment) -> Result<Self, GatherError> {
        Ok(Self {})
    }
}

impl Parser for VarnishParser {
    fn driver(&self) -> &'static str {
        "varnish"
    }

    fn parse(&self, payload: &[u8]) -> Result<Content, GatherError> {
        let text = std::str::from_utf8(payload)?;
        let mut content = Content::new();

        for line in text.lines().take(MAX_LINES) {
            let mut fields = line.split_whitespace();
            let (Some(name), Some(raw_value)) = (fields.next(), fields.next()) else {
                continue;
            };
            let Ok(value) = raw_value.parse::<f64>() else {
                continue;
            };
            insert_value(&mut content, sanitize_key(name), value)?;
        }

        if content.is_empty() {
            return Err(GatherError::Parse("no varnishstat counters found".into()));
        }
        Ok(content)
    }
}
