// src/core/filter/sethost.rs

//! Metadata filter: host attribution override.

use super::Filter;
use crate::config::Fragment;
use crate::core::errors::GatherError;
use crate::core::record::{Content, ParsedRecord};

/// Rewrites the host a record's samples are attributed to. Content passes
/// through untouched.
pub struct SetHostFilter {
    host: String,
}

impl SetHostFilter {
    pub fn from_fragment(frag: &mut Fragment) -> Result<Self, GatherError> {
        let host = frag
            .take_str("host")
            .ok_or_else(|| GatherError::Config("sethost filter needs a 'host' key".into()))?;
        if host.trim().is_empty() {
            return Err(GatherError::Config("sethost host cannot be empty".into()));
        }
        Ok(Self { host })
    }
}

impl Filter for SetHostFilter {
    fn driver(&self) -> &'static str {
        "sethost"
    }

    fn filter_content(&self, content: &Content) -> Result<Content, GatherError> {
        Ok(content.clone())
    }

    fn filter_record(&self, record: &ParsedRecord) -> Result<ParsedRecord, GatherError> {
        let mut out = record.clone();
        out.host = self.host.clone();
        Ok(out)
    }
}
