//! Transport abstraction for network I/O.
//!
//! A Karman connection is exactly one reliable, ordered byte stream. The
//! `Transport` trait hands out such streams, either by accepting them or by
//! dialing a remote host.
//!
//! # Implementations
//!
//! - **`TcpTransport`** (karman-runtime): tokio TCP sockets
//! - **`SimTransport`** (karman-harness): Turmoil's simulated TCP
//!
//! # What We ARE Testing
//!
//! - Framing and decoding over real stream semantics (arbitrary chunking)
//! - Session handshake, reconnection and takeover
//! - Replication convergence across clients
//! - Network fault handling (peer closes, partitions)

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Source of byte streams, either accepted or dialed.
///
/// # Lifecycle
///
/// ```text
/// Server:                      Client:
/// Transport::bind()            Transport::client()
///   ↓                            ↓
/// accept() ── loop             connect(host, port)
///   ↓                            ↓
/// [Stream returned]            [Stream returned]
/// ```
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Bidirectional stream to one peer.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Accept an incoming connection.
    ///
    /// Blocks until a peer connects.
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the transport is not listening or the
    /// listening socket failed.
    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)>;

    /// Connect to a remote endpoint.
    ///
    /// `host` is resolved with normal name resolution; callers map
    /// `localhost` to the loopback address beforehand (see
    /// [`crate::endpoint::Endpoint`]).
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the host cannot be resolved or the
    /// connection is refused.
    async fn connect(&self, host: &str, port: u16) -> io::Result<Self::Stream>;
}
