//! Server runtime errors.

use std::io;

use karman_core::{karmax::KarmaxError, session::SessionError};
use karman_proto::RegistryError;
use karman_runtime::DispatchError;
use thiserror::Error;

/// Errors surfaced by [`crate::KarmanServer`] and [`crate::ServerHandle`]
#[derive(Error, Debug)]
pub enum ServerError {
    /// Binding or accepting failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Message type registration conflict
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Container or replicated value error
    #[error("karmax error: {0}")]
    Karmax(#[from] KarmaxError),

    /// Session operation failed (e.g. kicking an unknown client)
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// The server has shut down
    #[error("server stopped")]
    Stopped(#[from] DispatchError),
}
