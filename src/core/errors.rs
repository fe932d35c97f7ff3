// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::num::{ParseFloatError, ParseIntError};
use std::sync::Arc;
use thiserror::Error;

/// The broad failure categories the pipeline distinguishes. Every
/// [`GatherError`] maps onto exactly one of these; counters and logs are
/// keyed by kind, never by the concrete variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Configuration or driver-init failure. Fatal at startup, never at runtime.
    Config,
    /// DNS failure, connect failure, 5xx, nonzero subprocess exit. Counted and
    /// logged; the next cycle proceeds.
    Transient,
    /// Malformed HTTP, unparseable body, NaN in a parsed map. Counted as a
    /// parse error; the record is dropped.
    Protocol,
    /// A storage inbox was full. Counted as a drop with a per-storage reason.
    Backpressure,
    /// Unrecoverable internal invariant violation; triggers shutdown.
    Fatal,
}

impl ErrorKind {
    /// A stable label for counters and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Transient => "transient",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Backpressure => "backpressure",
            ErrorKind::Fatal => "fatal",
        }
    }
}

/// The main error enum, representing all possible failures within the daemon.
/// Using `thiserror` allows for clean error definitions and automatic `From`
/// trait implementations.
#[derive(Error, Debug)]
pub enum GatherError {
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unknown config key '{0}'")]
    UnknownConfigKey(String),

    #[error("Unknown driver '{0}'")]
    UnknownDriver(String),

    #[error("DNS resolution failed for '{0}'")]
    DnsFailed(String),

    #[error("DNS resolution for '{0}' timed out")]
    DnsTimeout(String),

    #[error("Connection to {0} failed: {1}")]
    ConnectFailed(String, String),

    #[error("TLS handshake with {0} failed: {1}")]
    TlsHandshake(String, String),

    #[error("Fetch timed out after {0} ms")]
    FetchTimeout(u64),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("Truncated body: expected {expected} bytes, got {got}")]
    TruncatedBody { expected: usize, got: usize },

    #[error("Decompression failed: {0}")]
    Decompress(String),

    #[error("Subprocess failed: {0}")]
    Subprocess(String),

    #[error("Subprocess exited with code {0}")]
    SubprocessExit(i32),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Non-finite value for key '{0}'")]
    NonFiniteValue(String),

    #[error("Filter error: {0}")]
    Filter(String),

    #[error("Storage '{0}' queue full")]
    QueueFull(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatherError {
    /// Classifies this error into one of the five pipeline kinds.
    pub fn kind(&self) -> ErrorKind {
        use GatherError::*;
        match self {
            Config(_) | UnknownConfigKey(_) | UnknownDriver(_) => ErrorKind::Config,
            DnsFailed(_) | DnsTimeout(_) | ConnectFailed(..) | TlsHandshake(..)
            | FetchTimeout(_) | SubprocessExit(_) | Subprocess(_) | Io(_) | HttpStatus(_)
            | Storage(_) | ShuttingDown => ErrorKind::Transient,
            Http(_) | TruncatedBody { .. } | Decompress(_) | Parse(_) | NonFiniteValue(_)
            | Filter(_) => ErrorKind::Protocol,
            QueueFull(_) => ErrorKind::Backpressure,
            Internal(_) => ErrorKind::Fatal,
        }
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for GatherError {
    fn clone(&self) -> Self {
        use GatherError::*;
        match self {
            Io(e) => Io(Arc::clone(e)),
            Config(s) => Config(s.clone()),
            UnknownConfigKey(s) => UnknownConfigKey(s.clone()),
            UnknownDriver(s) => UnknownDriver(s.clone()),
            DnsFailed(s) => DnsFailed(s.clone()),
            DnsTimeout(s) => DnsTimeout(s.clone()),
            ConnectFailed(a, b) => ConnectFailed(a.clone(), b.clone()),
            TlsHandshake(a, b) => TlsHandshake(a.clone(), b.clone()),
            FetchTimeout(ms) => FetchTimeout(*ms),
            Http(s) => Http(s.clone()),
            HttpStatus(c) => HttpStatus(*c),
            TruncatedBody { expected, got } => TruncatedBody {
                expected: *expected,
                got: *got,
            },
            Decompress(s) => Decompress(s.clone()),
            Subprocess(s) => Subprocess(s.clone()),
            SubprocessExit(c) => SubprocessExit(*c),
            Parse(s) => Parse(s.clone()),
            NonFiniteValue(s) => NonFiniteValue(s.clone()),
            Filter(s) => Filter(s.clone()),
            QueueFull(s) => QueueFull(s.clone()),
            Storage(s) => Storage(s.clone()),
            ShuttingDown => ShuttingDown,
            Internal(s) => Internal(s.clone()),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for GatherError {
    fn from(e: std::io::Error) -> Self {
        GatherError::Io(Arc::new(e))
    }
}

impl From<ParseIntError> for GatherError {
    fn from(e: ParseIntError) -> Self {
        GatherError::Parse(format!("not an integer: {e}"))
    }
}

impl From<ParseFloatError> for GatherError {
    fn from(e: ParseFloatError) -> Self {
        GatherError::Parse(format!("not a float: {e}"))
    }
}

impl From<std::str::Utf8Error> for GatherError {
    fn from(e: std::str::Utf8Error) -> Self {
        GatherError::Parse(format!("invalid UTF-8: {e}"))
    }
}

impl From<std::string::FromUtf8Error> for GatherError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        GatherError::Parse(format!("invalid UTF-8: {e}"))
    }
}

impl From<serde_json::Error> for GatherError {
    fn from(e: serde_json::Error) -> Self {
        GatherError::Parse(format!("JSON error: {e}"))
    }
}

impl From<url::ParseError> for GatherError {
    fn from(e: url::ParseError) -> Self {
        GatherError::Config(format!("invalid URL: {e}"))
    }
}

impl From<mlua::Error> for GatherError {
    fn from(e: mlua::Error) -> Self {
        GatherError::Parse(format!("Lua error: {e}"))
    }
}
