// src/core/source/statik.rs

//! Test sources: a constant body, and a randomly succeeding one.

use super::{FetchContext, SourceDriver};
use crate::config::Fragment;
use crate::core::errors::GatherError;
use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use std::time::Duration;

/// Produces the configured body on every fetch.
pub struct StaticSource {
    body: Bytes,
}

impl StaticSource {
    pub fn from_fragment(frag: &mut Fragment) -> Result<Self, GatherError> {
        let body = frag.take_str_or("body", "static=1");
        if body.is_empty() {
            return Err(GatherError::Config("static source body cannot be empty".into()));
        }
        // The config format is single-line; \n escapes make multi-line
        // payloads expressible.
        let body = body.replace("\\n", "\n");
        Ok(Self {
            body: Bytes::from(body),
        })
    }
}

#[async_trait]
impl SourceDriver for StaticSource {
    fn driver(&self) -> &'static str {
        "static"
    }

    fn signature(&self) -> String {
        "static://".to_string()
    }

    fn endpoint(&self) -> (String, u16) {
        ("localhost".to_string(), 0)
    }

    async fn fetch(&self, _ctx: &FetchContext) -> Result<Bytes, GatherError> {
        Ok(self.body.clone())
    }
}

/// Produces a body after a random delay, failing a configurable fraction
/// of the time. Exercises scheduling, timeouts and error accounting.
pub struct DummySource {
    body: Bytes,
    max_delay: Duration,
    fail_ratio: f64,
}

impl DummySource {
    pub fn from_fragment(frag: &mut Fragment) -> Result<Self, GatherError> {
        let fail_ratio = frag.take_parsed_or("fail_ratio", 0.0f64)?;
        if !(0.0..=1.0).contains(&fail_ratio) {
            return Err(GatherError::Config("fail_ratio must be within 0..1".into()));
        }
        Ok(Self {
            body: Bytes::from(frag.take_str_or("body", "dummy=1")),
            max_delay: Duration::from_secs_f64(frag.take_parsed_or("max_delay", 0.1f64)?),
            fail_ratio,
        })
    }
}

#[async_trait]
impl SourceDriver for DummySource {
    fn driver(&self) -> &'static str {
        "dummy"
    }

    fn signature(&self) -> String {
        "dummy://".to_string()
    }

    fn endpoint(&self) -> (String, u16) {
        ("localhost".to_string(), 0)
    }

    async fn fetch(&self, _ctx: &FetchContext) -> Result<Bytes, GatherError> {
        let (delay, fails) = {
            let mut rng = rand::thread_rng();
            let delay = self.max_delay.mul_f64(rng.r#gen::<f64>());
            (delay, rng.r#gen::<f64>() < self.fail_ratio)
        };
        tokio::time::sleep(delay).await;
        if fails {
            return Err(GatherError::ConnectFailed(
                "dummy".to_string(),
                "randomly failing as configured".to_string(),
            ));
        }
        Ok(self.body.clone())
    }
}
