// src/core/filter/route.rs

//! Metadata filter: storage routing override.

use super::Filter;
use crate::config::Fragment;
use crate::core::errors::GatherError;
use crate::core::record::{Content, ParsedRecord};

/// Replaces the storage set the record fans out to. Content passes through
/// untouched.
pub struct RouteFilter {
    storages: Vec<String>,
}

impl RouteFilter {
    pub fn from_fragment(frag: &mut Fragment) -> Result<Self, GatherError> {
        let storages = frag.take_list("storage");
        if storages.is_empty() {
            return Err(GatherError::Config("route filter needs a 'storage' list".into()));
        }
        Ok(Self { storages })
    }
}

impl Filter for RouteFilter {
    fn driver(&self) -> &'static str {
        "route"
    }

    fn filter_content(&self, content: &Content) -> Result<Content, GatherError> {
        Ok(content.clone())
    }

    fn filter_record(&self, record: &ParsedRecord) -> Result<ParsedRecord, GatherError> {
        let mut out = record.clone();
        out.storages = self.storages.clone();
        Ok(out)
    }
}
