//! Tokio runtime plumbing for Karman.
//!
//! The state machines in `karman-core` never touch a socket. This crate
//! supplies the pieces that do:
//!
//! - [`dispatcher`]: the single serialized queue every completion runs on
//! - [`link`]: per-connection reader/writer tasks around a byte stream
//! - [`tcp`]: the production [`karman_core::Transport`]
//! - [`mod@env`]: the production [`karman_core::Environment`]

#![forbid(unsafe_code)]

pub mod dispatcher;
pub mod env;
pub mod error;
pub mod link;
pub mod tcp;

pub use dispatcher::Dispatcher;
pub use env::SystemEnv;
pub use error::DispatchError;
pub use link::{Link, LinkEvent};
pub use tcp::TcpTransport;
