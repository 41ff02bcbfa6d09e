//! Deterministic simulation harness for Karman.
//!
//! Turmoil-based implementations of the Environment and Transport traits, a
//! small replicated game model, and helpers to run real servers and clients
//! inside one reproducible simulation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod scenario;
pub mod sim_env;
pub mod sim_transport;

pub use scenario::{ServerProbe, connect, host_server, next_matching};
pub use sim_env::SimEnv;
pub use sim_transport::SimTransport;
