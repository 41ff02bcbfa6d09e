//! Karman client.
//!
//! Connects to one server, performs the handshake and keeps a Karmax replica
//! of the server's container. Mutations are requested through the
//! [`ClientHandle`]; everything the server does comes back as a
//! [`ClientEvent`].
//!
//! # Example
//!
//! ```no_run
//! use karman_client::{ClientConfig, ClientEvent, KarmanClient};
//! use karman_core::karmax::Schema;
//! use karman_runtime::{SystemEnv, TcpTransport};
//!
//! # async fn run() -> Result<(), karman_client::ClientError> {
//! let env = SystemEnv::new();
//! let config = ClientConfig::generate(&env, "localhost", "ada")?;
//! let client = KarmanClient::new(config, env, Schema::new())?;
//! let (handle, mut events) = client.connect(&TcpTransport::client()).await?;
//! while let Some(event) = events.recv().await {
//!     if let ClientEvent::ServerIdentified(server) = event {
//!         tracing::info!(server = %server.server_name, "server identified");
//!         handle.leave("bye").await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;

pub use client::{ClientEvent, ClientEvents, ClientHandle, KarmanClient};
pub use config::ClientConfig;
pub use error::ClientError;
