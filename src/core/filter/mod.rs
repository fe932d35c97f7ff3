// src/core/filter/mod.rs

//! Filter drivers: typed transforms over parsed content.
//!
//! A filter receives a clone of the parsed record and produces a new one;
//! the input survives unmodified. Filters are pure: same input, same
//! output. They run in the order the source lists them; the first error
//! aborts the rest of the pipeline for that record.

mod prune;
mod rewrite;
mod route;
mod scale;
mod sethost;

pub use prune::PruneFilter;
pub use rewrite::RewriteFilter;
pub use route::RouteFilter;
pub use scale::ScaleFilter;
pub use sethost::SetHostFilter;

use crate::config::Fragment;
use crate::core::errors::GatherError;
use crate::core::record::{Content, ParsedRecord};
use crate::core::stats::{StatsRegistry, StatsSession};
use std::collections::HashMap;
use std::sync::Arc;

/// A filter driver. Most filters only rewrite content; the ones that attach
/// metadata (host or storage routing overrides) override `filter_record`.
pub trait Filter: Send + Sync {
    /// The driver tag this instance was built from.
    fn driver(&self) -> &'static str;

    fn filter_content(&self, content: &Content) -> Result<Content, GatherError>;

    fn filter_record(&self, record: &ParsedRecord) -> Result<ParsedRecord, GatherError> {
        let mut out = record.clone();
        out.content = self.filter_content(&record.content)?;
        Ok(out)
    }
}

/// Driver tags with the one-line documentation the CLI introspection
/// helpers print.
pub const FILTER_DOCS: &[(&str, &str)] = &[
    ("rewrite", "Rename keys: prefix, suffix, regex search/replace."),
    ("scale", "Multiply and offset values for keys matching patterns."),
    ("prune", "Keep or drop keys by wildcard pattern."),
    ("sethost", "Override the host the record is attributed to."),
    ("route", "Override the storages the record is routed to."),
];

/// Builds one filter instance from its fragment.
pub fn build_filter(frag: &mut Fragment) -> Result<Arc<dyn Filter>, GatherError> {
    let filter: Arc<dyn Filter> = match frag.driver.as_str() {
        "rewrite" => Arc::new(RewriteFilter::from_fragment(frag)?),
        "scale" => Arc::new(ScaleFilter::from_fragment(frag)?),
        "prune" => Arc::new(PruneFilter::from_fragment(frag)?),
        "sethost" => Arc::new(SetHostFilter::from_fragment(frag)?),
        "route" => Arc::new(RouteFilter::from_fragment(frag)?),
        other => return Err(GatherError::UnknownDriver(other.to_string())),
    };
    frag.finish()?;
    Ok(filter)
}

struct FilterEntry {
    filter: Arc<dyn Filter>,
    stats: Arc<StatsSession>,
}

/// All configured filter instances, keyed by instance name. Read-only after
/// configuration load.
pub struct FilterRegistry {
    entries: HashMap<String, FilterEntry>,
}

impl FilterRegistry {
    pub fn build(
        fragments: &mut [Fragment],
        stats: &StatsRegistry,
    ) -> Result<Self, GatherError> {
        let mut entries = HashMap::new();
        for frag in fragments.iter_mut() {
            let filter = build_filter(frag)?;
            let session = stats.register(&format!("filter.{}", frag.name));
            entries.insert(
                frag.name.clone(),
                FilterEntry {
                    filter,
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

    /// Runs the named filter over a clone of `record`, recording ok/err
    /// counts.
    pub fn apply(
        &self,
        name: &str,
        record: &ParsedRecord,
    ) -> Result<ParsedRecord, GatherError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| GatherError::UnknownDriver(name.to_string()))?;
        let result = entry.filter.filter_record(record);
        match &result {
            Ok(_) => entry.stats.incr("ok"),
            Err(_) => entry.stats.incr("err"),
        }
        result
    }
}
