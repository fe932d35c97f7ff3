// src/core/parser/mod.rs

//! Parser drivers: raw payload bytes in, a typed key/float map out.
//!
//! Parsers never suspend and are bounded by line/event caps, so a hostile
//! payload cannot stall the pipeline. Keys are normalized to
//! `[A-Za-z0-9_.]+`; values must be finite floats.

mod json;
mod script;
mod statik;
mod text_simple;
mod webstatus;
mod xml;

pub use json::JsonParser;
pub use script::ScriptParser;
pub use statik::StaticParser;
pub use text_simple::TextSimpleParser;
pub use webstatus::{ApacheParser, NginxParser, VarnishParser};
pub use xml::{TomcatParser, XmlSimpleParser};

use crate::config::Fragment;
use crate::core::errors::GatherError;
use crate::core::record::Content;
use crate::core::stats::{StatsRegistry, StatsSession};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// A parser driver. `init` is the constructor from its fragment; `parse`
/// turns one payload into content.
pub trait Parser: Send + Sync {
    /// The driver tag this instance was built from.
    fn driver(&self) -> &'static str;

    fn parse(&self, payload: &[u8]) -> Result<Content, GatherError>;
}

/// Driver tags with the one-line documentation the CLI introspection
/// helpers print.
pub const PARSER_DOCS: &[(&str, &str)] = &[
    ("text_simple", "Line-oriented key=value (also key:value and whitespace pairs)."),
    ("json", "JSON document flattened to dot-joined paths, depth-capped."),
    ("xml_simple", "XML elements and attributes flattened to dot-joined paths."),
    ("tomcat", "Tomcat /status?XML=true connector and JVM figures."),
    ("nginx", "Nginx stub_status page."),
    ("apache", "Apache mod_status ?auto output, scoreboard expanded."),
    ("lighttpd", "Alias of apache; lighttpd serves the same format."),
    ("varnish", "varnishstat -1 column output."),
    ("static", "Constant configured content, input ignored."),
    ("script", "User-supplied Lua parse(body) function, loaded once."),
];

/// Builds one parser instance from its fragment.
pub fn build_parser(frag: &mut Fragment) -> Result<Arc<dyn Parser>, GatherError> {
    let parser: Arc<dyn Parser> = match frag.driver.as_str() {
        "text_simple" => Arc::new(TextSimpleParser::from_fragment(frag)?),
        "json" => Arc::new(JsonParser::from_fragment(frag)?),
        "xml_simple" => Arc::new(XmlSimpleParser::from_fragment(frag)?),
        "tomcat" => Arc::new(TomcatParser::from_fragment(frag)?),
        "nginx" => Arc::new(NginxParser::from_fragment(frag)?),
        "apache" | "lighttpd" => Arc::new(ApacheParser::from_fragment(frag)?),
        "varnish" => Arc::new(VarnishParser::from_fragment(frag)?),
        "static" => Arc::new(StaticParser::from_fragment(frag)?),
        "script" => Arc::new(ScriptParser::from_fragment(frag)?),
        other => return Err(GatherError::UnknownDriver(other.to_string())),
    };
    frag.finish()?;
    Ok(parser)
}

struct ParserEntry {
    parser: Arc<dyn Parser>,
    stats: Arc<StatsSession>,
}

/// All configured parser instances, keyed by instance name. Read-only after
/// configuration load.
pub struct ParserRegistry {
    entries: HashMap<String, ParserEntry>,
}

impl ParserRegistry {
    pub fn build(
        fragments: &mut [Fragment],
        stats: &StatsRegistry,
    ) -> Result<Self, GatherError> {
        let mut entries = HashMap::new();
        for frag in fragments.iter_mut() {
            let parser = build_parser(frag)?;
            let session = stats.register(&format!("parser.{}", frag.name));
            entries.insert(
                frag.name.clone(),
                ParserEntry {
                    parser,
                    stats: session,
                },
            );
        }
        Ok(Self { entries })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Runs the named parser over the payload, recording its per-run
    /// statistics (ok/err counts, time sum, rolling run time).
    pub fn parse(&self, name: &str, payload: &[u8]) -> Result<Content, GatherError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| GatherError::UnknownDriver(name.to_string()))?;
        let started = Instant::now();
        let result = entry.parser.parse(payload);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        entry.stats.add("time_ms", elapsed_ms);
        entry.stats.observe("run_ms", elapsed_ms);
        match &result {
            Ok(content) => {
                entry.stats.incr("ok");
                entry.stats.observe("keys", content.len() as f64);
            }
            Err(_) => entry.stats.incr("err"),
        }
        result
    }
}

/// Normalizes a raw key: whitespace runs become a single `.`, any other
/// character outside `[A-Za-z0-9_.]` becomes `_`.
pub fn sanitize_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_space = false;
    for ch in raw.trim().chars() {
        if ch.is_whitespace() {
            in_space = true;
            continue;
        }
        if in_space {
            out.push('.');
            in_space = false;
        }
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    out
}

/// Inserts one pair, enforcing the finite-value invariant. Last write wins
/// on duplicates; callers that care warn themselves.
pub fn insert_value(content: &mut Content, key: String, value: f64) -> Result<(), GatherError> {
    if !value.is_finite() {
        return Err(GatherError::NonFiniteValue(key));
    }
    content.insert(key, value);
    Ok(())
}
