// src/core/net/socket.rs

//! The per-connection TCP client state machine.
//!
//! A connect walks Idle → Resolving → Connecting(k) → Connected, with
//! per-address failover while candidates remain, and an optional TLS wrap
//! that is opaque to the caller. Literal addresses skip the Resolving state.
//! The whole walk is bounded by one deadline; cancelling it (dropping the
//! future or hitting the deadline) aborts the current attempt and discards
//! the remaining candidates.

use crate::core::errors::GatherError;
use crate::core::net::stream::ClientStream;
use crate::core::resolver::ResolverHandle;
use rand::seq::SliceRandom;
use rustls::pki_types::ServerName;
use std::fs::File;
use std::io::BufReader as StdBufReader;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

/// Observable connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    Resolving,
    /// Attempt `k` into the candidate address list.
    Connecting(usize),
    Connected,
    Closing,
    Error,
}

/// TLS parameters for a wrapped connection.
#[derive(Debug, Clone)]
pub struct TlsOpts {
    /// The name presented for SNI and certificate verification.
    pub server_name: String,
    /// Optional PEM bundle overriding the built-in webpki roots.
    pub ca_file: Option<String>,
}

/// Knobs for one connect walk.
#[derive(Debug, Clone)]
pub struct ConnectOpts {
    /// Deadline for the whole walk: resolve, every connect attempt, and the
    /// TLS handshake together.
    pub timeout: Duration,
    /// Try the next candidate address after a failed attempt.
    pub failover: bool,
    /// Shuffle the candidate list to spread load across targets.
    pub shuffle: bool,
    /// Wrap the stream in TLS after connecting.
    pub tls: Option<TlsOpts>,
}

impl Default for ConnectOpts {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            failover: true,
            shuffle: false,
            tls: None,
        }
    }
}

/// A per-connection client machine. The state field exists for observers
/// (statistics, logs); the data path is the stream `connect` returns.
pub struct TcpClient {
    host: String,
    port: u16,
    state: ConnState,
    /// Connect attempts made over the lifetime of this client.
    attempts: u64,
}

impl TcpClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            state: ConnState::Idle,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Runs the connect walk and returns the established stream.
    pub async fn connect(
        &mut self,
        resolver: &ResolverHandle,
        opts: &ConnectOpts,
    ) -> Result<ClientStream, GatherError> {
        let deadline = Instant::now() + opts.timeout;

        let mut addrs = match self.host.parse::<IpAddr>() {
            // Literal address: Resolving is skipped.
            Ok(ip) => vec![ip],
            Err(_) => {
                self.state = ConnState::Resolving;
                let remaining = deadline.saturating_duration_since(Instant::now());
                match resolver.resolve(&self.host, remaining).await {
                    Ok(addrs) => addrs,
                    Err(e) => {
                        self.state = ConnState::Error;
                        return Err(e);
                    }
                }
            }
        };
        if addrs.is_empty() {
            self.state = ConnState::Error;
            return Err(GatherError::DnsFailed(self.host.clone()));
        }
        if opts.shuffle && addrs.len() > 1 {
            addrs.shuffle(&mut rand::thread_rng());
        }

        let mut last_err: Option<String> = None;
        for (k, addr) in addrs.iter().enumerate() {
            self.state = ConnState::Connecting(k);
            self.attempts += 1;
            let target = SocketAddr::new(*addr, self.port);
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.state = ConnState::Error;
                return Err(GatherError::FetchTimeout(opts.timeout.as_millis() as u64));
            }
            match tokio::time::timeout(remaining, TcpStream::connect(target)).await {
                Ok(Ok(stream)) => {
                    self.state = ConnState::Connected;
                    debug!("Connected to {} (attempt {})", target, k);
                    return self.maybe_wrap_tls(stream, opts, deadline).await;
                }
                Ok(Err(e)) => {
                    debug!("Connect to {} failed: {}", target, e);
                    last_err = Some(e.to_string());
                    if !opts.failover {
                        break;
                    }
                }
                Err(_) => {
                    // Deadline: abort the attempt and purge the remaining
                    // candidates.
                    self.state = ConnState::Error;
                    return Err(GatherError::FetchTimeout(opts.timeout.as_millis() as u64));
                }
            }
        }

        self.state = ConnState::Error;
        Err(GatherError::ConnectFailed(
            format!("{}:{}", self.host, self.port),
            last_err.unwrap_or_else(|| "no candidate addresses".to_string()),
        ))
    }

    /// Marks the client closed. The stream itself closes when dropped or
    /// shut down by its owner.
    pub fn disconnect(&mut self) {
        self.state = ConnState::Closing;
    }

    async fn maybe_wrap_tls(
        &mut self,
        stream: TcpStream,
        opts: &ConnectOpts,
        deadline: Instant,
    ) -> Result<ClientStream, GatherError> {
        let Some(tls) = &opts.tls else {
            return Ok(ClientStream::Tcp(stream));
        };

        let connector = tls_connector(tls)?;
        let server_name = ServerName::try_from(tls.server_name.clone())
            .map_err(|e| GatherError::TlsHandshake(tls.server_name.clone(), e.to_string()))?;

        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, connector.connect(server_name, stream)).await {
            Ok(Ok(tls_stream)) => Ok(ClientStream::Tls(Box::new(tls_stream))),
            Ok(Err(e)) => {
                self.state = ConnState::Error;
                Err(GatherError::TlsHandshake(
                    tls.server_name.clone(),
                    e.to_string(),
                ))
            }
            Err(_) => {
                self.state = ConnState::Error;
                Err(GatherError::FetchTimeout(opts.timeout.as_millis() as u64))
            }
        }
    }
}

/// Builds a TLS connector from either the built-in webpki roots or a custom
/// PEM bundle.
fn tls_connector(opts: &TlsOpts) -> Result<TlsConnector, GatherError> {
    let mut roots = rustls::RootCertStore::empty();
    match &opts.ca_file {
        Some(path) => {
            let file = File::open(path).map_err(|e| {
                GatherError::Config(format!("failed to open CA bundle '{path}': {e}"))
            })?;
            let mut reader = StdBufReader::new(file);
            for cert in rustls_pemfile::certs(&mut reader) {
                let cert = cert
                    .map_err(|e| GatherError::Config(format!("bad certificate in '{path}': {e}")))?;
                if let Err(e) = roots.add(cert) {
                    warn!("Skipping unusable certificate in '{}': {}", path, e);
                }
            }
            if roots.is_empty() {
                return Err(GatherError::Config(format!(
                    "no usable certificates in '{path}'"
                )));
            }
        }
        None => {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Writes all of `buf` and awaits the transport flush. Line and HTTP
/// protocols key their next step off this completing.
pub async fn write_flushed(
    stream: &mut (impl tokio::io::AsyncWrite + Unpin),
    buf: &[u8],
) -> Result<(), GatherError> {
    stream.write_all(buf).await?;
    stream.flush().await?;
    Ok(())
}
