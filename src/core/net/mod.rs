// src/core/net/mod.rs

//! Non-blocking TCP client primitives shared by the socket-oriented source
//! drivers and the Graphite sink.

mod socket;
mod stream;

pub use socket::{ConnState, ConnectOpts, TcpClient, TlsOpts, write_flushed};
pub use stream::ClientStream;
