// src/core/filter/prune.rs

//! Key-selecting filter.

use super::Filter;
use crate::config::Fragment;
use crate::core::errors::GatherError;
use crate::core::record::Content;
use wildmatch::WildMatch;

/// Keeps or drops keys by wildcard pattern. `keep` patterns, when present,
/// whitelist; `drop` patterns then blacklist out of what remains.
pub struct PruneFilter {
    keep: Vec<WildMatch>,
    drop: Vec<WildMatch>,
}

impl PruneFilter {
    pub fn from_fragment(frag: &mut Fragment) -> Result<Self, GatherError> {
        let keep: Vec<WildMatch> = frag
            .take_list("keep")
            .iter()
            .map(|p| WildMatch::new(p))
            .collect();
        let drop: Vec<WildMatch> = frag
            .take_list("drop")
            .iter()
            .map(|p| WildMatch::new(p))
            .collect();
        if keep.is_empty() && drop.is_empty() {
            return Err(GatherError::Config(
                "prune filter needs 'keep' or 'drop' patterns".into(),
            ));
        }
        Ok(Self { keep, drop })
    }

    fn retains(&self, key: &str) -> bool {
        if !self.keep.is_empty() && !self.keep.iter().any(|m| m.matches(key)) {
            return false;
        }
        !self.drop.iter().any(|m| m.matches(key))
    }
}

impl Filter for PruneFilter {
    fn driver(&self) -> &'static str {
        "prune"
    }

    fn filter_content(&self, content: &Content) -> Result<Content, GatherError> {
        Ok(content
            .iter()
            .filter(|(key, _)| self.retains(key))
            .map(|(key, value)| (key.clone(), *value))
            .collect())
    }
}
