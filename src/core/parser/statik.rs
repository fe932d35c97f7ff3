// src/core/parser/statik.rs

//! The static parser: constant configured content, whatever the input.

use super::{Parser, insert_value, sanitize_key};
use crate::config::Fragment;
use crate::core::errors::GatherError;
use crate::core::record::Content;

/// Always returns the content configured in its fragment, regardless of the
/// payload. Used to exercise the pipeline and the sinks.
pub struct StaticParser {
    data: Content,
}

impl StaticParser {
    /// `data = key=value,key=value,...`
    pub fn from_fragment(frag: &mut Fragment) -> Result<Self, GatherError> {
        let raw = frag
            .take_str("data")
            .ok_or_else(|| GatherError::Config("static parser needs a 'data' key".into()))?;
        let mut data = Content::new();
        for pair in raw.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                GatherError::Config(format!("bad static data pair '{pair}'"))
            })?;
            let value = value.trim().parse::<f64>().map_err(|_| {
                GatherError::Config(format!("bad static data value in '{pair}'"))
            })?;
            insert_value(&mut data, sanitize_key(key), value)
                .map_err(|_| GatherError::Config(format!("non-finite static value in '{pair}'")))?;
        }
        if data.is_empty() {
            return Err(GatherError::Config("static parser data is empty".into()));
        }
        Ok(Self { data })
    }
}

impl Parser for StaticParser {
    fn driver(&self) -> &'static str {
        "static"
    }

    fn parse(&self, _payload: &[u8]) -> Result<Content, GatherError> {
        Ok(self.data.clone())
    }
}
