// src/core/filter/rewrite.rs

//! Key-renaming filter.

use super::Filter;
use crate::config::Fragment;
use crate::core::errors::GatherError;
use crate::core::record::Content;
use regex::Regex;

/// Renames keys: a fixed prefix and/or suffix, and an optional regex
/// search/replace applied to every key. Values pass through untouched.
pub struct RewriteFilter {
    prefix: Option<String>,
    suffix: Option<String>,
    search: Option<Regex>,
    replace: String,
}

impl RewriteFilter {
    pub fn from_fragment(frag: &mut Fragment) -> Result<Self, GatherError> {
        let search = match frag.take_str("search") {
            None => None,
            Some(pat) => Some(Regex::new(&pat).map_err(|e| {
                GatherError::Config(format!("bad search regex '{pat}': {e}"))
            })?),
        };
        Ok(Self {
            prefix: frag.take_str("prefix"),
            suffix: frag.take_str("suffix"),
            search,
            replace: frag.take_str_or("replace", ""),
        })
    }

    fn rewrite_key(&self, key: &str) -> String {
        let mut key = match &self.search {
            Some(re) => re.replace_all(key, self.replace.as_str()).into_owned(),
            None => key.to_string(),
        };
        if let Some(prefix) = &self.prefix {
            key.insert_str(0, prefix);
        }
        if let Some(suffix) = &self.suffix {
            key.push_str(suffix);
        }
        key
    }
}

impl Filter for RewriteFilter {
    fn driver(&self) -> &'static str {
        "rewrite"
    }

    fn filter_content(&self, content: &Content) -> Result<Content, GatherError> {
        let mut out = Content::with_capacity(content.len());
        for (key, value) in content {
            out.insert(self.rewrite_key(key), *value);
        }
        Ok(out)
    }
}
