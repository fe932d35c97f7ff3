// src/core/source/http.rs

//! The HTTP source driver: a hand-rolled HTTP/1.1 GET over the TCP client
//! machine, because the daemon needs line-level control over status
//! classification, chunked framing and streamed decompression.

use super::{FetchContext, SourceDriver};
use crate::config::Fragment;
use crate::core::errors::GatherError;
use crate::core::net::{ClientStream, ConnectOpts, TcpClient, TlsOpts, write_flushed};
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use flate2::read::{GzDecoder, ZlibDecoder};
use std::io::Read;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::debug;
use url::Url;

/// Headers beyond this count fail the response as malformed.
const MAX_HEADERS: usize = 100;

/// Bodies beyond this are refused; a status endpoint has no business being
/// larger.
const MAX_BODY: usize = 64 * 1024 * 1024;

#[derive(Debug, Default)]
struct ResponseHeaders {
    content_length: Option<usize>,
    chunked: bool,
    content_encoding: Option<String>,
}

/// One HTTP endpoint. Supports Basic credentials, an optional `Host:`
/// override, and routing through an HTTP proxy (the request-line then
/// carries the absolute URL).
pub struct HttpSource {
    url: Url,
    host: String,
    port: u16,
    use_tls: bool,
    basic_auth: Option<(String, String)>,
    host_header: Option<String>,
    proxy: Option<(String, u16)>,
    ca_file: Option<String>,
    /// Shuffle resolved addresses to spread load across a DNS round-robin.
    shuffle: bool,
}

impl HttpSource {
    pub fn from_fragment(frag: &mut Fragment) -> Result<Self, GatherError> {
        let raw_url = frag
            .take_str("url")
            .ok_or_else(|| GatherError::Config("http source needs a 'url' key".into()))?;
        let url = Url::parse(&raw_url)?;
        let use_tls = match url.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(GatherError::Config(format!(
                    "unsupported URL scheme '{other}'"
                )));
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| GatherError::Config(format!("URL '{raw_url}' has no host")))?
            .to_string();
        let port = url
            .port()
            .unwrap_or(if use_tls { 443 } else { 80 });

        // Credentials may ride in the URL or in dedicated keys.
        let mut basic_auth = None;
        if !url.username().is_empty() {
            basic_auth = Some((
                url.username().to_string(),
                url.password().unwrap_or("").to_string(),
            ));
        }
        if let Some(user) = frag.take_str("username") {
            basic_auth = Some((user, frag.take_str_or("password", "")));
        }

        let proxy = match frag.take_str("proxy") {
            None => None,
            Some(raw) => {
                let (phost, pport) = raw
                    .rsplit_once(':')
                    .ok_or_else(|| GatherError::Config(format!("bad proxy '{raw}'")))?;
                let pport: u16 = pport
                    .parse()
                    .map_err(|_| GatherError::Config(format!("bad proxy port in '{raw}'")))?;
                Some((phost.to_string(), pport))
            }
        };
        if proxy.is_some() && use_tls {
            return Err(GatherError::Config(
                "https through a proxy is not supported".into(),
            ));
        }

        Ok(Self {
            url,
            host,
            port,
            use_tls,
            basic_auth,
            host_header: frag.take_str("host_header"),
            proxy,
            ca_file: frag.take_str("ca_file"),
            shuffle: frag.take_bool_or("shuffle", false)?,
        })
    }

    fn request(&self) -> String {
        // Via a proxy the request-line uses the absolute URL.
        let target = match &self.proxy {
            Some(_) => self.url.as_str().to_string(),
            None => {
                let mut t = self.url.path().to_string();
                if let Some(q) = self.url.query() {
                    t.push('?');
                    t.push_str(q);
                }
                t
            }
        };
        let host_header = self.host_header.clone().unwrap_or_else(|| {
            let default_port = if self.use_tls { 443 } else { 80 };
            if self.port == default_port {
                self.host.clone()
            } else {
                format!("{}:{}", self.host, self.port)
            }
        });

        let mut req = format!(
            "GET {target} HTTP/1.1\r\nHost: {host_header}\r\nUser-Agent: gatherd/{}\r\nAccept: */*\r\nAccept-Encoding: gzip, deflate\r\nConnection: close\r\n",
            env!("CARGO_PKG_VERSION")
        );
        if let Some((user, pass)) = &self.basic_auth {
            let token = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
            req.push_str(&format!("Authorization: Basic {token}\r\n"));
        }
        req.push_str("\r\n");
        req
    }
}

#[async_trait]
impl SourceDriver for HttpSource {
    fn driver(&self) -> &'static str {
        "http"
    }

    fn signature(&self) -> String {
        self.url.as_str().to_string()
    }

    fn endpoint(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<Bytes, GatherError> {
        let (connect_host, connect_port) = self
            .proxy
            .clone()
            .unwrap_or_else(|| (self.host.clone(), self.port));
        let mut client = TcpClient::new(connect_host, connect_port);
        let opts = ConnectOpts {
            timeout: ctx.timeout,
            failover: true,
            shuffle: self.shuffle,
            tls: self.use_tls.then(|| TlsOpts {
                server_name: self.host.clone(),
                ca_file: self.ca_file.clone(),
            }),
        };
        let stream = client.connect(&ctx.resolver, &opts).await?;
        let mut reader = BufReader::new(stream);

        write_flushed(reader.get_mut(), self.request().as_bytes()).await?;

        let status = read_status_line(&mut reader).await?;
        match status {
            200..=299 => {}
            // Only 301 and 302 are classified "no body expected"; the other
            // redirects fall through to the generic status error.
            301 | 302 => {
                return Err(GatherError::Http(format!(
                    "status {status}: redirect, no body expected"
                )));
            }
            _ => return Err(GatherError::HttpStatus(status)),
        }

        let headers = read_headers(&mut reader).await?;
        let body = read_body(&mut reader, &headers).await?;
        let body = decompress(body, headers.content_encoding.as_deref())?;
        if body.is_empty() {
            return Err(GatherError::Http("empty body".into()));
        }
        Ok(Bytes::from(body))
    }
}

async fn read_line(reader: &mut BufReader<ClientStream>) -> Result<String, GatherError> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(GatherError::Http("connection closed mid-response".into()));
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

/// Parses "HTTP/1.x CODE REASON".
async fn read_status_line(reader: &mut BufReader<ClientStream>) -> Result<u16, GatherError> {
    let line = read_line(reader).await?;
    let mut fields = line.split_whitespace();
    let proto = fields
        .next()
        .ok_or_else(|| GatherError::Http("empty status line".into()))?;
    if !proto.starts_with("HTTP/1.") {
        return Err(GatherError::Http(format!("bad status line '{line}'")));
    }
    fields
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| GatherError::Http(format!("bad status line '{line}'")))
}

/// Accumulates headers until the blank line, case-insensitively picking
/// out the three that matter for framing.
async fn read_headers(
    reader: &mut BufReader<ClientStream>,
) -> Result<ResponseHeaders, GatherError> {
    let mut headers = ResponseHeaders::default();
    for count in 0.. {
        if count > MAX_HEADERS {
            return Err(GatherError::Http("too many headers".into()));
        }
        let line = read_line(reader).await?;
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(GatherError::Http(format!("malformed header '{line}'")));
        };
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "content-length" => {
                headers.content_length = Some(value.parse::<usize>().map_err(|_| {
                    GatherError::Http(format!("bad Content-Length '{value}'"))
                })?);
            }
            "transfer-encoding" => {
                if value.to_ascii_lowercase().contains("chunked") {
                    headers.chunked = true;
                }
            }
            "content-encoding" => {
                headers.content_encoding = Some(value.to_ascii_lowercase());
            }
            _ => {}
        }
    }
    Ok(headers)
}

/// Reads the body per the framing the headers declared: chunked wins, then
/// an exact Content-Length, then read-to-EOF.
async fn read_body(
    reader: &mut BufReader<ClientStream>,
    headers: &ResponseHeaders,
) -> Result<Vec<u8>, GatherError> {
    if headers.chunked {
        return read_chunked_body(reader).await;
    }
    if let Some(expected) = headers.content_length {
        if expected > MAX_BODY {
            return Err(GatherError::Http(format!("body of {expected} bytes refused")));
        }
        return read_exact_body(reader, expected).await;
    }
    // No framing headers at all: read to EOF, capped.
    let mut body = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(body);
        }
        if body.len() + n > MAX_BODY {
            return Err(GatherError::Http("body too large".into()));
        }
        body.extend_from_slice(&chunk[..n]);
    }
}

/// Reads exactly `expected` bytes; a peer that closes early yields a
/// truncation error, never a hang.
async fn read_exact_body(
    reader: &mut BufReader<ClientStream>,
    expected: usize,
) -> Result<Vec<u8>, GatherError> {
    let mut body = vec![0u8; expected];
    let mut got = 0usize;
    while got < expected {
        let n = reader.read(&mut body[got..]).await?;
        if n == 0 {
            return Err(GatherError::TruncatedBody { expected, got });
        }
        got += n;
    }
    Ok(body)
}

/// Length-prefixed chunks until the zero-length chunk; trailers are read
/// and discarded.
async fn read_chunked_body(
    reader: &mut BufReader<ClientStream>,
) -> Result<Vec<u8>, GatherError> {
    let mut body = Vec::new();
    loop {
        let size_line = read_line(reader).await?;
        // Chunk extensions after ';' are ignored.
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| GatherError::Http(format!("bad chunk size '{size_line}'")))?;
        if size == 0 {
            // Trailer section: lines until the final blank one.
            loop {
                let trailer = read_line(reader).await?;
                if trailer.is_empty() {
                    break;
                }
            }
            return Ok(body);
        }
        if body.len() + size > MAX_BODY {
            return Err(GatherError::Http("chunked body too large".into()));
        }
        let start = body.len();
        body.resize(start + size, 0);
        let mut got = 0usize;
        while got < size {
            let n = reader.read(&mut body[start + got..]).await?;
            if n == 0 {
                return Err(GatherError::TruncatedBody {
                    expected: size,
                    got,
                });
            }
            got += n;
        }
        // The CRLF trailing every chunk.
        let sep = read_line(reader).await?;
        if !sep.is_empty() {
            return Err(GatherError::Http("missing chunk separator".into()));
        }
    }
}

/// Decompresses the accumulated body in memory when the server advertised
/// gzip or deflate.
fn decompress(body: Vec<u8>, encoding: Option<&str>) -> Result<Vec<u8>, GatherError> {
    let Some(encoding) = encoding else {
        return Ok(body);
    };
    let mut out = Vec::new();
    match encoding {
        "gzip" => {
            GzDecoder::new(body.as_slice())
                .take(MAX_BODY as u64)
                .read_to_end(&mut out)
                .map_err(|e| GatherError::Decompress(format!("gzip: {e}")))?;
        }
        "deflate" => {
            ZlibDecoder::new(body.as_slice())
                .take(MAX_BODY as u64)
                .read_to_end(&mut out)
                .map_err(|e| GatherError::Decompress(format!("deflate: {e}")))?;
        }
        "identity" => return Ok(body),
        other => {
            debug!("Unknown Content-Encoding '{}', passing body through.", other);
            return Ok(body);
        }
    }
    Ok(out)
}
