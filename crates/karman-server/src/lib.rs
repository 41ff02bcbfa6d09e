//! Karman server.
//!
//! Accepts connections, runs the session layer and hosts the authoritative
//! Karmax container. Applications build a [`KarmanServer`], register their
//! packet types and mutation schema, then drive it through the returned
//! [`ServerHandle`] and [`ServerEvents`] stream.
//!
//! # Example
//!
//! ```no_run
//! use karman_core::karmax::Schema;
//! use karman_runtime::SystemEnv;
//! use karman_server::{KarmanServer, ServerConfig};
//!
//! # async fn run() -> Result<(), karman_server::ServerError> {
//! let server = KarmanServer::new(ServerConfig::default(), SystemEnv::new(), Schema::new())?;
//! let (handle, mut events) = server.listen().await?;
//! while let Some(event) = events.recv().await {
//!     tracing::info!(?event, "server event");
//! }
//! handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod server;

pub use config::ServerConfig;
pub use error::ServerError;
pub use server::{KarmanServer, ServerEvent, ServerEvents, ServerHandle};
