//! Server side of the session layer.
//!
//! Tracks two things: which socket is bound to which client identity, and
//! which identities exist. An identity outlives its socket; a client that
//! reconnects with the same id and secret is rebound to its existing
//! identity instead of joining again.
//!
//! # Architecture: Action-Based State Machine
//!
//! - Methods accept time as a parameter (no stored Environment)
//! - Methods return `Result<Vec<SessionAction>, SessionError>`
//! - The server driver executes the actions (send, close, notify)
//!
//! # Handshake
//!
//! ```text
//! client                         server
//!   │   (socket accepted)          │ on_connection_opened
//!   │<──────── ServerInfo ─────────│
//!   │───────── ClientInfo ────────>│ password, admission, identity
//!   │                              │
//!   │       new id:   Joined + Connected
//!   │       known id, same secret:  Connected (old socket told to leave)
//!   │       known id, other secret: Leave, close new socket
//! ```
//!
//! # Invariants
//!
//! - An identity is bound to at most one connection.
//! - A secret mismatch never affects the existing identity or its socket.
//! - Before its `ClientInfo`, a connection may send nothing else.

use std::collections::{BTreeMap, HashMap};

use karman_proto::{ClientInfo, Leave, Message, PROTOCOL_VERSION, ServerInfo};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::SessionError;

/// Reason sent to a socket replaced by a reconnect
pub const TAKEN_OVER: &str = "took over from another device";

/// Reason sent when the password does not match
pub const INCORRECT_PASSWORD: &str = "incorrect server password";

/// Reason sent when a known client id presents the wrong secret
pub const SECRET_MISMATCH: &str = "client id already in use";

/// Reason sent to every client on shutdown
pub const SERVER_SHUTDOWN: &str = "server shutting down";

/// Static server description
#[derive(Debug, Clone)]
pub struct ServerSessionConfig {
    /// Server id
    pub server_id: Uuid,
    /// Display name
    pub server_name: String,
    /// Game id; clients use it to pick the right server
    pub game_id: Uuid,
    /// Game version
    pub game_version: String,
    /// Required password, if any
    pub password: Option<String>,
}

/// Decides whether a new client identity may join.
///
/// Consulted once per identity, on its first handshake. Reconnects of a known
/// identity are not re-checked.
pub trait AdmissionPolicy: Send {
    /// Accept, or reject with a reason sent to the client
    fn admit(&mut self, info: &ClientInfo) -> Result<(), String>;
}

/// Admits everyone
#[derive(Debug, Clone, Copy, Default)]
pub struct AdmitAll;

impl AdmissionPolicy for AdmitAll {
    fn admit(&mut self, _info: &ClientInfo) -> Result<(), String> {
        Ok(())
    }
}

/// Actions returned by the server session
#[derive(Debug, Clone)]
pub enum SessionAction {
    /// Send a message on a connection
    Send {
        /// Target connection
        connection_id: Uuid,
        /// Message to send
        message: Message,
    },

    /// Close a connection (after flushing queued sends)
    Disconnect {
        /// Target connection
        connection_id: Uuid,
        /// Reason for logging
        reason: String,
    },

    /// A new identity joined
    Joined {
        /// New client
        client_id: Uuid,
        /// Client's display name
        name: String,
    },

    /// An identity was bound to a connection (first join or reconnect)
    Connected {
        /// Bound client
        client_id: Uuid,
        /// Its connection
        connection_id: Uuid,
    },

    /// An identity lost its connection but still exists
    Disconnected {
        /// Client
        client_id: Uuid,
    },

    /// An identity was removed
    Left {
        /// Removed client
        client_id: Uuid,
        /// Why
        reason: String,
    },

    /// Application-level message from a bound client
    Route {
        /// Sending client
        client_id: Uuid,
        /// `MutationRequest` or application packet
        message: Message,
    },
}

/// A client identity known to the server
#[derive(Debug, Clone)]
pub struct ClientIdentity<I> {
    /// Client id
    pub client_id: Uuid,
    /// Display name from the latest handshake
    pub name: String,
    /// Bound connection, if any
    pub connection_id: Option<Uuid>,
    /// First handshake
    pub joined_at: I,
    /// Latest bind
    pub bound_at: I,
    secret: Uuid,
}

impl<I> ClientIdentity<I> {
    /// True while bound to a connection
    pub fn is_connected(&self) -> bool {
        self.connection_id.is_some()
    }
}

/// Server session state machine.
#[derive(Debug)]
pub struct ServerSession<I> {
    config: ServerSessionConfig,
    /// Open connections; `None` until the handshake binds a client
    connections: HashMap<Uuid, Option<Uuid>>,
    /// Ordered for deterministic broadcast order
    clients: BTreeMap<Uuid, ClientIdentity<I>>,
}

impl<I: Copy> ServerSession<I> {
    /// Create a session with no connections
    pub fn new(config: ServerSessionConfig) -> Self {
        Self { config, connections: HashMap::new(), clients: BTreeMap::new() }
    }

    /// Static configuration
    pub fn config(&self) -> &ServerSessionConfig {
        &self.config
    }

    /// Description sent to every new connection
    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            server_id: self.config.server_id,
            server_name: self.config.server_name.clone(),
            game_id: self.config.game_id,
            game_version: self.config.game_version.clone(),
            protocol_version: PROTOCOL_VERSION.to_string(),
        }
    }

    /// Identity by id
    pub fn client(&self, client_id: Uuid) -> Option<&ClientIdentity<I>> {
        self.clients.get(&client_id)
    }

    /// All identities, ordered by id
    pub fn clients(&self) -> impl Iterator<Item = &ClientIdentity<I>> {
        self.clients.values()
    }

    /// Ids of clients currently bound to a connection
    pub fn connected_clients(&self) -> Vec<Uuid> {
        self.clients.values().filter(|c| c.is_connected()).map(|c| c.client_id).collect()
    }

    /// True if `client_id` is bound to a connection
    pub fn is_connected(&self, client_id: Uuid) -> bool {
        self.clients.get(&client_id).is_some_and(ClientIdentity::is_connected)
    }

    /// Client bound to `connection_id`
    pub fn client_for_connection(&self, connection_id: Uuid) -> Option<Uuid> {
        self.connections.get(&connection_id).copied().flatten()
    }

    /// Number of open connections, bound or not
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// A socket was accepted.
    pub fn on_connection_opened(&mut self, connection_id: Uuid) -> Vec<SessionAction> {
        self.connections.insert(connection_id, None);
        debug!(connection_id = %connection_id, "connection opened");
        vec![SessionAction::Send { connection_id, message: Message::ServerInfo(self.server_info()) }]
    }

    /// A socket closed, for any reason.
    pub fn on_connection_closed(&mut self, connection_id: Uuid) -> Vec<SessionAction> {
        let Some(Some(client_id)) = self.connections.remove(&connection_id) else {
            return Vec::new();
        };

        match self.clients.get_mut(&client_id) {
            Some(identity) if identity.connection_id == Some(connection_id) => {
                identity.connection_id = None;
                info!(client_id = %client_id, connection_id = %connection_id, "client disconnected");
                vec![SessionAction::Disconnected { client_id }]
            },
            _ => Vec::new(),
        }
    }

    /// Handle a message received on `connection_id`.
    ///
    /// # Errors
    ///
    /// A [`SessionError`] for any protocol violation; answer it with
    /// [`ServerSession::reject`].
    pub fn on_message(
        &mut self,
        connection_id: Uuid,
        message: Message,
        policy: &mut dyn AdmissionPolicy,
        now: I,
    ) -> Result<Vec<SessionAction>, SessionError> {
        let bound = *self.connections.get(&connection_id).ok_or(SessionError::UnknownConnection(connection_id))?;

        match (bound, message) {
            (None, Message::ClientInfo(info)) => Ok(self.handshake(connection_id, info, policy, now)),
            (None, other) => Err(SessionError::NotBound { kind: other.kind() }),
            (Some(client_id), Message::ClientInfo(_)) => Err(SessionError::AlreadyBound(client_id)),
            (Some(client_id), Message::Leave(leave)) => {
                info!(client_id = %client_id, reason = %leave.reason, "client left");
                self.kick(client_id, &leave.reason)
            },
            (Some(client_id), message @ (Message::MutationRequest(_) | Message::App(_))) => {
                Ok(vec![SessionAction::Route { client_id, message }])
            },
            (Some(_), other) => Err(SessionError::Unexpected { kind: other.kind() }),
        }
    }

    fn handshake(
        &mut self,
        connection_id: Uuid,
        info: ClientInfo,
        policy: &mut dyn AdmissionPolicy,
        now: I,
    ) -> Vec<SessionAction> {
        if let Some(password) = &self.config.password
            && info.server_password != *password
        {
            warn!(client_id = %info.client_id, connection_id = %connection_id, "incorrect server password");
            return self.reject(connection_id, INCORRECT_PASSWORD);
        }

        match self.clients.get(&info.client_id).map(|identity| identity.secret) {
            None => return self.join(connection_id, info, policy, now),
            Some(secret) if secret != info.secret => {
                warn!(client_id = %info.client_id, connection_id = %connection_id, "client secret mismatch");
                return self.reject(connection_id, SECRET_MISMATCH);
            },
            Some(_) => {},
        }

        let client_id = info.client_id;
        let mut previous = None;
        if let Some(identity) = self.clients.get_mut(&client_id) {
            previous = identity.connection_id.replace(connection_id);
            identity.name = info.client_name;
            identity.bound_at = now;
        }
        self.connections.insert(connection_id, Some(client_id));

        let mut actions = Vec::new();
        if let Some(previous) = previous {
            info!(client_id = %client_id, old = %previous, new = %connection_id, "client took over connection");
            self.connections.remove(&previous);
            actions.extend(Self::leave_and_close(previous, TAKEN_OVER));
        } else {
            info!(client_id = %client_id, connection_id = %connection_id, "client reconnected");
        }
        actions.push(SessionAction::Connected { client_id, connection_id });
        actions
    }

    fn join(
        &mut self,
        connection_id: Uuid,
        info: ClientInfo,
        policy: &mut dyn AdmissionPolicy,
        now: I,
    ) -> Vec<SessionAction> {
        if let Err(reason) = policy.admit(&info) {
            info!(client_id = %info.client_id, reason = %reason, "client refused");
            return self.reject(connection_id, &reason);
        }

        let client_id = info.client_id;
        self.clients.insert(
            client_id,
            ClientIdentity {
                client_id,
                name: info.client_name.clone(),
                connection_id: Some(connection_id),
                joined_at: now,
                bound_at: now,
                secret: info.secret,
            },
        );
        self.connections.insert(connection_id, Some(client_id));
        info!(client_id = %client_id, name = %info.client_name, connection_id = %connection_id, "client joined");

        vec![
            SessionAction::Joined { client_id, name: info.client_name },
            SessionAction::Connected { client_id, connection_id },
        ]
    }

    /// Tell a connection to leave and close it. The connection is forgotten;
    /// any bound identity keeps existing but loses its connection.
    pub fn reject(&mut self, connection_id: Uuid, reason: &str) -> Vec<SessionAction> {
        let mut actions = Vec::from(Self::leave_and_close(connection_id, reason));
        if let Some(Some(client_id)) = self.connections.remove(&connection_id)
            && let Some(identity) = self.clients.get_mut(&client_id)
            && identity.connection_id == Some(connection_id)
        {
            identity.connection_id = None;
            actions.push(SessionAction::Disconnected { client_id });
        }
        actions
    }

    /// Remove a client identity, closing its connection if bound.
    ///
    /// # Errors
    ///
    /// `UnknownClient` if no such identity exists.
    pub fn kick(&mut self, client_id: Uuid, reason: &str) -> Result<Vec<SessionAction>, SessionError> {
        let identity = self.clients.remove(&client_id).ok_or(SessionError::UnknownClient(client_id))?;

        let mut actions = Vec::new();
        if let Some(connection_id) = identity.connection_id {
            self.connections.remove(&connection_id);
            actions.extend(Self::leave_and_close(connection_id, reason));
        }
        info!(client_id = %client_id, reason = %reason, "client removed");
        actions.push(SessionAction::Left { client_id, reason: reason.to_string() });
        Ok(actions)
    }

    /// Send to one client; nothing if it is not connected.
    pub fn send_to(&self, client_id: Uuid, message: Message) -> Vec<SessionAction> {
        match self.clients.get(&client_id).and_then(|identity| identity.connection_id) {
            Some(connection_id) => vec![SessionAction::Send { connection_id, message }],
            None => {
                debug!(client_id = %client_id, kind = message.kind(), "dropping message for disconnected client");
                Vec::new()
            },
        }
    }

    /// Send to every connected client except `except`.
    pub fn broadcast(&self, message: &Message, except: Option<Uuid>) -> Vec<SessionAction> {
        self.clients
            .values()
            .filter(|identity| Some(identity.client_id) != except)
            .filter_map(|identity| identity.connection_id)
            .map(|connection_id| SessionAction::Send { connection_id, message: message.clone() })
            .collect()
    }

    /// Remove every identity, then close every remaining connection.
    pub fn shutdown(&mut self, reason: &str) -> Vec<SessionAction> {
        let client_ids: Vec<_> = self.clients.keys().copied().collect();
        let mut actions = Vec::new();
        for client_id in client_ids {
            if let Ok(kicked) = self.kick(client_id, reason) {
                actions.extend(kicked);
            }
        }

        let mut pending: Vec<_> = self.connections.drain().map(|(connection_id, _)| connection_id).collect();
        pending.sort();
        for connection_id in pending {
            actions.extend(Self::leave_and_close(connection_id, reason));
        }
        actions
    }

    fn leave_and_close(connection_id: Uuid, reason: &str) -> [SessionAction; 2] {
        [
            SessionAction::Send { connection_id, message: Message::Leave(Leave::new(reason)) },
            SessionAction::Disconnect { connection_id, reason: reason.to_string() },
        ]
    }
}
