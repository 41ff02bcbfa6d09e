//! Karman protocol core logic
//!
//! Pure state machine logic for the Karman session layer and the Karmax
//! replicated state engine, decoupled from I/O.
//!
//! # Architecture
//!
//! Every component here is a deterministic state machine. Time, randomness
//! and identifiers are supplied by the caller through [`env::Environment`] or
//! as parameters. Transitions return declarative actions (send this, close
//! that, notify the application) which a runtime or the simulation harness
//! executes.
//!
//! # Components
//!
//! - [`connection`]: Per-socket liveness state machine
//! - [`session`]: Handshake, identities, reconnection and takeover
//! - [`karmax`]: Oracle/Replicator replicated state
//! - [`router`]: Typed dispatch of application packets
//! - [`endpoint`]: Connection string parsing
//! - [`mod@env`]: Environment abstraction (time, RNG)
//! - [`transport`]: Transport abstraction (streams)
//! - [`error`]: Connection error types

#![forbid(unsafe_code)]

pub mod connection;
pub mod endpoint;
pub mod env;
pub mod error;
pub mod karmax;
pub mod router;
pub mod session;
pub mod transport;

pub use connection::{Connection, ConnectionStatus};
pub use endpoint::{Endpoint, EndpointError};
pub use env::Environment;
pub use error::ConnectionError;
pub use router::PacketRouter;
pub use transport::Transport;
