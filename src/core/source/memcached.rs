// src/core/source/memcached.rs

//! The memcached source: a small request/response dialog over the TCP
//! machine, decoded until the END sentinel.

use super::{FetchContext, SourceDriver};
use crate::config::Fragment;
use crate::core::errors::GatherError;
use crate::core::net::{ConnectOpts, TcpClient, write_flushed};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};

/// STAT lines beyond this fail the dialog as malformed.
const MAX_STAT_LINES: usize = 1000;

/// Sends `stats`, accumulates the decoded `STAT name value` fields, and
/// emits them as `name value` lines once END arrives.
pub struct MemcachedSource {
    host: String,
    port: u16,
}

impl MemcachedSource {
    pub fn from_fragment(frag: &mut Fragment) -> Result<Self, GatherError> {
        Ok(Self {
            host: frag.take_str_or("host", "localhost"),
            port: frag.take_parsed_or("port", 11211u16)?,
        })
    }
}

#[async_trait]
impl SourceDriver for MemcachedSource {
    fn driver(&self) -> &'static str {
        "memcached"
    }

    fn signature(&self) -> String {
        format!("memcached://{}:{}", self.host, self.port)
    }

    fn endpoint(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<Bytes, GatherError> {
        let mut client = TcpClient::new(self.host.clone(), self.port);
        let opts = ConnectOpts {
            timeout: ctx.timeout,
            failover: true,
            shuffle: false,
            tls: None,
        };
        let stream = client.connect(&ctx.resolver, &opts).await?;
        let (read_half, mut write_half) = tokio::io::split(stream);

        write_flushed(&mut write_half, b"stats\r\n").await?;

        let mut lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(512));
        let mut body = Vec::new();
        let mut seen = 0usize;
        while let Some(line) = lines.next().await {
            let line = line.map_err(|e| GatherError::Parse(format!("bad stats line: {e}")))?;
            let line = line.trim_end();
            seen += 1;
            if seen > MAX_STAT_LINES {
                return Err(GatherError::Parse("stats dialog exceeded line cap".into()));
            }
            if line == "END" {
                if body.is_empty() {
                    return Err(GatherError::Parse("no STAT fields before END".into()));
                }
                return Ok(Bytes::from(body));
            }
            match line.strip_prefix("STAT ") {
                Some(field) => {
                    body.extend_from_slice(field.as_bytes());
                    body.push(b'\n');
                }
                None => {
                    return Err(GatherError::Parse(format!(
                        "unexpected stats line '{line}'"
                    )));
                }
            }
        }
        Err(GatherError::Http("connection closed before END".into()))
    }
}
