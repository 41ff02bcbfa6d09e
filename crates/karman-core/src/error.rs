//! Error types for the connection state machine.
//!
//! We avoid using `std::io::Error` for protocol logic to keep errors typed;
//! conversion happens only at the I/O boundary.

use std::io;

use thiserror::Error;

use crate::connection::ConnectionStatus;

/// Errors that can occur during connection state machine operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Invalid state transition attempted
    #[error("invalid state transition: cannot {operation} from {status:?}")]
    InvalidState {
        /// Current status when error occurred
        status: ConnectionStatus,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Send attempted while not connected
    #[error("connection is not connected ({0:?})")]
    NotConnected(ConnectionStatus),

    /// Protocol error from framing/decoding
    #[error("protocol error: {0}")]
    Protocol(#[from] karman_proto::ProtocolError),

    /// Underlying transport error
    #[error("transport error: {0}")]
    Transport(String),
}

impl ConnectionError {
    /// True if the peer violated the protocol (as opposed to local misuse or
    /// network failure).
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}

/// Convert io::Error to ConnectionError (for transport errors)
impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Convert ConnectionError to io::Error for compatibility with async I/O APIs.
///
/// This is only for boundary conversion - internally we use ConnectionError.
impl From<ConnectionError> for io::Error {
    fn from(err: ConnectionError) -> Self {
        let kind = match &err {
            ConnectionError::NotConnected(_) => io::ErrorKind::NotConnected,
            ConnectionError::InvalidState { .. } | ConnectionError::Protocol(_) => io::ErrorKind::InvalidData,
            ConnectionError::Transport(_) => io::ErrorKind::Other,
        };
        Self::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use karman_proto::ProtocolError;

    use super::*;

    #[test]
    fn only_protocol_errors_are_violations() {
        assert!(ConnectionError::Protocol(ProtocolError::UnknownTypeId(1)).is_protocol_violation());
        assert!(!ConnectionError::NotConnected(ConnectionStatus::New).is_protocol_violation());
        assert!(!ConnectionError::Transport("reset".to_string()).is_protocol_violation());
    }

    #[test]
    fn io_conversion_keeps_kind() {
        let err: io::Error = ConnectionError::NotConnected(ConnectionStatus::Disconnected).into();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
