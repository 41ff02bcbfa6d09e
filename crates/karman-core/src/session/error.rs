//! Session-layer errors.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised while handling session traffic.
///
/// Every variant except `UnknownClient` is a protocol violation by the peer;
/// the caller answers it with `Leave` and closes the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Connection id not tracked by this session
    #[error("unknown connection {0}")]
    UnknownConnection(Uuid),

    /// Traffic before the handshake completed
    #[error("{kind} received before handshake")]
    NotBound {
        /// Message type received
        kind: &'static str,
    },

    /// Second `ClientInfo` on a bound connection
    #[error("connection already bound to client {0}")]
    AlreadyBound(Uuid),

    /// Message type not valid in this direction or state
    #[error("unexpected {kind}")]
    Unexpected {
        /// Message type received
        kind: &'static str,
    },

    /// Server speaks a different protocol version
    #[error("protocol version mismatch: server {server}, client {client}")]
    VersionMismatch {
        /// Server's version
        server: String,
        /// Our version
        client: String,
    },

    /// No such client identity
    #[error("unknown client {0}")]
    UnknownClient(Uuid),
}

impl SessionError {
    /// True if the error is the peer's fault
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(self, Self::UnknownClient(_))
    }
}
