//! Client side of the session layer.
//!
//! # State Machine
//!
//! ```text
//! ┌───────────────────┐  ServerInfo   ┌─────────────┐  Leave / leave()  ┌──────┐
//! │ AwaitingServerInfo│──────────────>│ Established │──────────────────>│ Left │
//! └───────────────────┘ (ClientInfo   └─────────────┘                   └──────┘
//!                         sent back)
//! ```
//!
//! The server may still refuse the handshake; a refusal arrives as `Leave`
//! in `Established`.

use std::fmt;

use karman_proto::{ClientInfo, Leave, Message, PROTOCOL_VERSION, ServerInfo};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::SessionError;
use crate::env::Environment;

/// Identity a client presents to the server.
///
/// Keep the same id and secret across connections to reconnect as the same
/// client; the secret is what proves ownership of the id.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    /// Client id (non-nil)
    pub client_id: Uuid,
    /// Secret proving ownership of the id (non-nil)
    pub secret: Uuid,
    /// Display name
    pub name: String,
    /// Server password, empty if none
    pub server_password: String,
}

impl ClientCredentials {
    /// Fresh random id and secret
    pub fn generate<E: Environment>(env: &E, name: impl Into<String>) -> Self {
        Self { client_id: env.new_uuid(), secret: env.new_uuid(), name: name.into(), server_password: String::new() }
    }

    /// Builder-style password
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.server_password = password.into();
        self
    }

    /// Handshake message
    pub fn client_info(&self) -> ClientInfo {
        ClientInfo {
            client_id: self.client_id,
            client_name: self.name.clone(),
            secret: self.secret,
            server_password: self.server_password.clone(),
        }
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Client session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientSessionState {
    /// Connected, waiting for the server to describe itself
    AwaitingServerInfo,
    /// Handshake sent
    Established,
    /// Left or refused (terminal)
    Left,
}

/// Actions returned by the client session
#[derive(Debug, Clone)]
pub enum ClientSessionAction {
    /// Send to the server
    Send(Message),
    /// Server described itself; handshake sent, admission still pending
    ServerIdentified(ServerInfo),
    /// Replication or application message for the layers above
    Route(Message),
    /// Session over
    Left {
        /// Reason given by the server, or our own
        reason: String,
    },
    /// Close the connection
    Disconnect,
}

/// Client session state machine.
#[derive(Debug)]
pub struct ClientSession {
    credentials: ClientCredentials,
    state: ClientSessionState,
    server: Option<ServerInfo>,
}

impl ClientSession {
    /// New session for a freshly connected socket
    pub fn new(credentials: ClientCredentials) -> Self {
        Self { credentials, state: ClientSessionState::AwaitingServerInfo, server: None }
    }

    /// Current state
    pub fn state(&self) -> ClientSessionState {
        self.state
    }

    /// Our credentials
    pub fn credentials(&self) -> &ClientCredentials {
        &self.credentials
    }

    /// Server description, once received
    pub fn server(&self) -> Option<&ServerInfo> {
        self.server.as_ref()
    }

    /// Handle a message from the server.
    ///
    /// # Errors
    ///
    /// - `VersionMismatch` if the server speaks another protocol version
    /// - `Unexpected` for messages invalid in the current state
    pub fn on_message(&mut self, message: Message) -> Result<Vec<ClientSessionAction>, SessionError> {
        match (self.state, message) {
            (ClientSessionState::Left, message) => {
                debug!(kind = message.kind(), "ignoring message after leave");
                Ok(Vec::new())
            },
            (_, Message::Leave(leave)) => {
                info!(reason = %leave.reason, "server asked us to leave");
                self.state = ClientSessionState::Left;
                Ok(vec![ClientSessionAction::Left { reason: leave.reason }, ClientSessionAction::Disconnect])
            },
            (ClientSessionState::AwaitingServerInfo, Message::ServerInfo(server)) => {
                if server.protocol_version != PROTOCOL_VERSION {
                    warn!(server = %server.protocol_version, ours = PROTOCOL_VERSION, "protocol version mismatch");
                    return Err(SessionError::VersionMismatch {
                        server: server.protocol_version,
                        client: PROTOCOL_VERSION.to_string(),
                    });
                }

                info!(server_id = %server.server_id, name = %server.server_name, "server identified");
                self.state = ClientSessionState::Established;
                self.server = Some(server.clone());
                Ok(vec![
                    ClientSessionAction::Send(Message::ClientInfo(self.credentials.client_info())),
                    ClientSessionAction::ServerIdentified(server),
                ])
            },
            (
                ClientSessionState::Established,
                message @ (Message::FragmentSet(_) | Message::MutationRequest(_) | Message::MutationFailed(_) | Message::App(_)),
            ) => Ok(vec![ClientSessionAction::Route(message)]),
            (_, message) => Err(SessionError::Unexpected { kind: message.kind() }),
        }
    }

    /// Leave voluntarily; no-op once left.
    pub fn leave(&mut self, reason: &str) -> Vec<ClientSessionAction> {
        if self.state == ClientSessionState::Left {
            return Vec::new();
        }
        self.state = ClientSessionState::Left;
        vec![
            ClientSessionAction::Send(Message::Leave(Leave::new(reason))),
            ClientSessionAction::Left { reason: reason.to_string() },
            ClientSessionAction::Disconnect,
        ]
    }

    /// The socket closed underneath us.
    pub fn on_connection_closed(&mut self) -> Vec<ClientSessionAction> {
        if self.state == ClientSessionState::Left {
            return Vec::new();
        }
        self.state = ClientSessionState::Left;
        vec![ClientSessionAction::Left { reason: "connection closed".to_string() }]
    }
}
