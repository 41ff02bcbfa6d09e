//! Production transport over tokio TCP sockets.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use karman_core::Transport;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// TCP transport. Listens when built with [`TcpTransport::bind`]; dials
/// with either constructor.
#[derive(Debug)]
pub struct TcpTransport {
    listener: Option<TcpListener>,
}

impl TcpTransport {
    /// Listen on `addr`.
    ///
    /// # Errors
    ///
    /// Returns the bind error (address in use, permission denied).
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        debug!(addr = %listener.local_addr()?, "listening");
        Ok(Self { listener: Some(listener) })
    }

    /// Dial-only transport
    pub fn client() -> Self {
        Self { listener: None }
    }

    /// Bound address (useful after binding port 0)
    ///
    /// # Errors
    ///
    /// `NotConnected` for a dial-only transport.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener().and_then(TcpListener::local_addr)
    }

    fn listener(&self) -> io::Result<&TcpListener> {
        self.listener.as_ref().ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport is not listening"))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.listener()?.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, peer))
    }

    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
