//! Session layer: handshake, identity binding, reconnection and takeover.
//!
//! - [`server`]: `ServerSession`, one per server, tracking every connection
//!   and client identity
//! - [`client`]: `ClientSession`, one per connection attempt

pub mod client;
pub mod error;
pub mod server;

pub use client::{ClientCredentials, ClientSession, ClientSessionAction, ClientSessionState};
pub use error::SessionError;
pub use server::{AdmissionPolicy, AdmitAll, ClientIdentity, ServerSession, ServerSessionConfig, SessionAction};
