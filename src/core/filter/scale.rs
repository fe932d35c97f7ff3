// src/core/filter/scale.rs

//! Value-transforming filter.

use super::Filter;
use crate::config::Fragment;
use crate::core::errors::GatherError;
use crate::core::record::Content;
use wildmatch::WildMatch;

/// Applies `value * factor + offset` to every key matching one of the
/// configured patterns; no patterns means every key.
pub struct ScaleFilter {
    factor: f64,
    offset: f64,
    keys: Vec<WildMatch>,
}

impl ScaleFilter {
    pub fn from_fragment(frag: &mut Fragment) -> Result<Self, GatherError> {
        let factor = frag.take_parsed_or("factor", 1.0f64)?;
        let offset = frag.take_parsed_or("offset", 0.0f64)?;
        if !factor.is_finite() || !offset.is_finite() {
            return Err(GatherError::Config("factor/offset must be finite".into()));
        }
        Ok(Self {
            factor,
            offset,
            keys: frag
                .take_list("keys")
                .iter()
                .map(|p| WildMatch::new(p))
                .collect(),
        })
    }

    fn applies_to(&self, key: &str) -> bool {
        self.keys.is_empty() || self.keys.iter().any(|m| m.matches(key))
    }
}

impl Filter for ScaleFilter {
    fn driver(&self) -> &'static str {
        "scale"
    }

    fn filter_content(&self, content: &Content) -> Result<Content, GatherError> {
        let mut out = Content::with_capacity(content.len());
        for (key, value) in content {
            let scaled = if self.applies_to(key) {
                let v = value * self.factor + self.offset;
                if !v.is_finite() {
                    return Err(GatherError::Filter(format!(
                        "scaling '{key}' produced a non-finite value"
                    )));
                }
                v
            } else {
                *value
            };
            out.insert(key.clone(), scaled);
        }
        Ok(out)
    }
}
