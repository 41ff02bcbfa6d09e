//! Turmoil-based Transport implementation.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use karman_core::Transport;
use turmoil::net::{TcpListener, TcpStream};

/// Simulation transport over Turmoil's deterministic TCP.
///
/// Turmoil controls delivery order and timing and can partition or crash
/// hosts, while keeping the one property Karman relies on: a reliable,
/// ordered byte stream per connection. Hosts are addressed by their
/// simulation name (`"server"`, `"server:14641"`).
pub struct SimTransport {
    listener: Option<TcpListener>,
}

impl SimTransport {
    /// Listen on `address` (e.g. `"0.0.0.0:14641"`).
    ///
    /// # Errors
    ///
    /// Returns the bind error if the address is in use or malformed.
    pub async fn bind(address: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self { listener: Some(listener) })
    }

    /// Dial-only transport
    pub fn client() -> Self {
        Self { listener: None }
    }
}

#[async_trait]
impl Transport for SimTransport {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport is not listening"))?;
        listener.accept().await
    }

    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        TcpStream::connect((host, port)).await
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[test]
    fn echo_over_simulated_tcp() {
        let mut sim = turmoil::Builder::new().build();

        sim.host("server", || async {
            let transport = SimTransport::bind("0.0.0.0:14641").await?;
            let (mut stream, _peer) = transport.accept().await?;

            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).await?;
            stream.write_all(&buf[..n]).await?;

            Ok(())
        });

        sim.client("client", async {
            let mut stream = SimTransport::client().connect("server", 14641).await?;

            stream.write_all(b"karman").await?;
            let mut buf = [0u8; 6];
            stream.read_exact(&mut buf).await?;
            assert_eq!(&buf, b"karman");

            Ok(())
        });

        sim.run().expect("simulation failed");
    }

    #[test]
    fn dial_only_transport_cannot_accept() {
        let mut sim = turmoil::Builder::new().build();

        sim.client("client", async {
            let err = SimTransport::client().accept().await.unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::NotConnected);
            Ok(())
        });

        sim.run().expect("simulation failed");
    }
}
