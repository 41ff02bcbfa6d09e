//! Connection state machine.
//!
//! Tracks the liveness of exactly one socket. The I/O driver (a `Link` in
//! karman-runtime) consults it before every send and asks it whether a
//! disconnect is the first one, so the disconnect notification fires once.
//!
//! # State Machine
//!
//! ```text
//! ┌─────┐  connected   ┌───────────┐  disconnect  ┌──────────────┐
//! │ New │─────────────>│ Connected │─────────────>│ Disconnected │
//! └─────┘              └───────────┘              └──────────────┘
//!    │                                                   ↑
//!    └──────────────── connect failed ───────────────────┘
//! ```
//!
//! `Disconnected` is terminal. Reconnecting means a new connection with a new
//! id.

use uuid::Uuid;

use crate::error::ConnectionError;

/// Connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Created, socket not yet established
    New,
    /// Socket established, both directions open
    Connected,
    /// Socket closed (terminal)
    Disconnected,
}

/// Liveness state of one connection
#[derive(Debug, Clone)]
pub struct Connection {
    id: Uuid,
    status: ConnectionStatus,
}

impl Connection {
    /// Create a connection in `New` status
    pub fn new(id: Uuid) -> Self {
        Self { id, status: ConnectionStatus::New }
    }

    /// Create a connection for an already-established socket (server side,
    /// where accept hands over a connected stream).
    pub fn accepted(id: Uuid) -> Self {
        Self { id, status: ConnectionStatus::Connected }
    }

    /// Connection id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current status
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// True while both directions are usable
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// The socket was established.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless in `New`.
    pub fn connect_succeeded(&mut self) -> Result<(), ConnectionError> {
        if self.status != ConnectionStatus::New {
            return Err(ConnectionError::InvalidState { status: self.status, operation: "connect" });
        }
        self.status = ConnectionStatus::Connected;
        Ok(())
    }

    /// The connect attempt failed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless in `New`.
    pub fn connect_failed(&mut self) -> Result<(), ConnectionError> {
        if self.status != ConnectionStatus::New {
            return Err(ConnectionError::InvalidState { status: self.status, operation: "fail connect" });
        }
        self.status = ConnectionStatus::Disconnected;
        Ok(())
    }

    /// Check that a send may be enqueued.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` unless in `Connected`.
    pub fn ensure_sendable(&self) -> Result<(), ConnectionError> {
        if self.is_connected() { Ok(()) } else { Err(ConnectionError::NotConnected(self.status)) }
    }

    /// Transition to `Disconnected`.
    ///
    /// Returns `true` only for the call that performed the transition; the
    /// caller fires the disconnect notification exactly then.
    pub fn disconnect(&mut self) -> bool {
        if self.status == ConnectionStatus::Disconnected {
            return false;
        }
        self.status = ConnectionStatus::Disconnected;
        true
    }
}
