//! Client runtime errors.

use karman_core::{ConnectionError, EndpointError, karmax::KarmaxError};
use karman_proto::RegistryError;
use karman_runtime::DispatchError;
use thiserror::Error;

/// Errors surfaced by [`crate::KarmanClient`] and [`crate::ClientHandle`]
#[derive(Error, Debug)]
pub enum ClientError {
    /// Connection string could not be parsed
    #[error("invalid connection string: {0}")]
    Endpoint(#[from] EndpointError),

    /// Connecting or sending failed
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Message type registration conflict
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Container or replicated value error
    #[error("karmax error: {0}")]
    Karmax(#[from] KarmaxError),

    /// The handshake has not completed, or the session is over
    #[error("not joined to a server")]
    NotJoined,

    /// The client has stopped
    #[error("client stopped")]
    Stopped(#[from] DispatchError),
}
