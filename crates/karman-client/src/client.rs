//! Client runtime.
//!
//! One [`Link`] to one server. The [`ClientSession`] and the [`Replicator`]
//! live on a dispatcher; link events are forwarded to it in wire order.
//!
//! ```text
//!  Link ──events──> forwarder ──post──> Dispatcher ──> ClientState { session, replicator }
//!  ClientHandle ─────────────────post──┘                   │
//!                                                          └──> ClientEvent channel
//! ```
//!
//! A client is single-use: once the link closes the dispatcher stops and
//! the event channel ends. Reconnect by connecting again with the same
//! credentials; the server sends a fresh snapshot.

use std::{fmt, sync::Arc};

use karman_core::{
    Environment, Transport,
    karmax::{ContainerRegistry, ContainerState, FragmentKey, Mutation, MutationFailure, Replicator, ReplicatorAction, Schema},
    session::{ClientSession, ClientSessionAction, ClientSessionState},
};
use karman_proto::{AppPacket, Message, Registry, ServerInfo, WireValue};
use karman_runtime::{Dispatcher, Link, LinkEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{config::ClientConfig, error::ClientError};

/// Session and replication events, in dispatcher order
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The socket is open; the handshake is in progress
    Connected,
    /// The server identified itself and our `ClientInfo` was sent. The server
    /// may still refuse us, in which case `Left` follows.
    ServerIdentified(ServerInfo),
    /// The replicated state changed
    StateChanged {
        /// Changed key
        key: FragmentKey,
        /// State after the change
        state: ContainerState,
    },
    /// A mutation we submitted was applied by the server
    MutationAcknowledged {
        /// Submitted mutation
        mutation_id: Uuid,
    },
    /// A mutation we submitted was rejected
    MutationFailed {
        /// Submitted mutation
        mutation_id: Uuid,
        /// Target key
        key: FragmentKey,
        /// Debug rendering of the mutation
        description: String,
        /// Reason given by the server
        failure: MutationFailure,
    },
    /// Application packet from the server
    Packet(AppPacket),
    /// The session ended
    Left {
        /// Reason given by the server, or our own
        reason: String,
    },
    /// The socket closed; no further events follow
    Disconnected,
}

/// Receiver half of the client event channel
pub type ClientEvents = mpsc::UnboundedReceiver<ClientEvent>;

/// Client builder.
pub struct KarmanClient<E: Environment> {
    config: ClientConfig,
    env: E,
    schema: Arc<Schema>,
    registry: Registry<Message>,
    containers: ContainerRegistry,
}

impl<E: Environment> KarmanClient<E> {
    /// New client replicating the types in `schema`.
    ///
    /// # Errors
    ///
    /// `Registry` if the protocol messages fail to register.
    pub fn new(config: ClientConfig, env: E, schema: Schema) -> Result<Self, ClientError> {
        Ok(Self {
            config,
            env,
            schema: Arc::new(schema),
            registry: Message::registry()?,
            containers: ContainerRegistry::new(),
        })
    }

    /// Register an application packet type (sent in either direction).
    ///
    /// # Errors
    ///
    /// `Registry` on a name or type id conflict.
    pub fn register_packet<V: WireValue + fmt::Debug>(&mut self) -> Result<&mut Self, ClientError> {
        self.registry.register::<V>(Message::app)?;
        Ok(self)
    }

    /// Use an existing container registry (one per process)
    #[must_use]
    pub fn with_container_registry(mut self, containers: ContainerRegistry) -> Self {
        self.containers = containers;
        self
    }

    /// Connect to the configured endpoint and start the handshake.
    ///
    /// # Errors
    ///
    /// - `Karmax` if the container id is already in use in this process
    /// - `Connection` if the server cannot be reached
    pub async fn connect<T: Transport>(self, transport: &T) -> Result<(ClientHandle<E>, ClientEvents), ClientError> {
        let Self { config, env, schema, registry, containers } = self;

        let replicator = Replicator::new(&containers, config.container_id, config.credentials.client_id, schema)?;
        let (link_tx, mut link_rx) = mpsc::unbounded_channel();
        let link = Link::connect(
            transport,
            &config.endpoint,
            env.new_uuid(),
            Arc::new(registry),
            config.max_frame_size,
            move |event| {
                let _ = link_tx.send(event);
            },
        )
        .await?;

        info!(
            client_id = %config.credentials.client_id,
            endpoint = %config.endpoint,
            connection_id = %link.id(),
            "connected"
        );

        let (events_tx, events) = mpsc::unbounded_channel();
        let _ = events_tx.send(ClientEvent::Connected);
        let state = ClientState {
            env,
            session: ClientSession::new(config.credentials),
            replicator,
            link,
            events: events_tx,
        };
        let (dispatcher, _task) = Dispatcher::spawn(state);

        let forward = dispatcher.clone();
        tokio::spawn(async move {
            while let Some(event) = link_rx.recv().await {
                let closed = matches!(event, LinkEvent::Closed);
                if forward.post(move |state| state.on_link_event(event)).is_err() || closed {
                    break;
                }
            }
            forward.stop();
        });

        Ok((ClientHandle { dispatcher }, events))
    }
}

impl<E: Environment> fmt::Debug for KarmanClient<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KarmanClient")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Control handle for a connected client. Cheap to clone.
pub struct ClientHandle<E: Environment> {
    dispatcher: Dispatcher<ClientState<E>>,
}

impl<E: Environment> Clone for ClientHandle<E> {
    fn clone(&self) -> Self {
        Self { dispatcher: self.dispatcher.clone() }
    }
}

impl<E: Environment> fmt::Debug for ClientHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle").field("dispatcher", &self.dispatcher).finish()
    }
}

impl<E: Environment> ClientHandle<E> {
    /// Request a mutation. It is applied locally only once the server
    /// broadcasts it; the outcome arrives as [`ClientEvent::MutationAcknowledged`]
    /// or [`ClientEvent::MutationFailed`].
    ///
    /// # Errors
    ///
    /// - `NotJoined` before the handshake or after the session ended
    /// - `Karmax` if the mutation type is not in the schema
    pub async fn submit(&self, key: FragmentKey, mutation: impl Mutation + 'static) -> Result<Uuid, ClientError> {
        self.dispatcher.call(move |state| state.submit(key, &mutation)).await?
    }

    /// Send a message to the server.
    ///
    /// # Errors
    ///
    /// `NotJoined` before the handshake or after the session ended.
    pub async fn send(&self, message: Message) -> Result<(), ClientError> {
        self.dispatcher.call(move |state| state.send(&message)).await?
    }

    /// Send an application packet to the server.
    ///
    /// # Errors
    ///
    /// See [`ClientHandle::send`].
    pub async fn send_packet<V: WireValue + fmt::Debug>(&self, packet: V) -> Result<(), ClientError> {
        self.send(Message::app(packet)).await
    }

    /// Leave the server and close the connection. No-op once left.
    ///
    /// # Errors
    ///
    /// `Stopped` if the client already stopped.
    pub async fn leave(&self, reason: impl Into<String>) -> Result<(), ClientError> {
        let reason = reason.into();
        self.dispatcher
            .call(move |state| {
                let actions = state.session.leave(&reason);
                state.execute(actions);
            })
            .await?;
        Ok(())
    }

    /// Drop the connection without leaving, as if the process died. The
    /// server keeps our identity, so the same credentials can reconnect.
    ///
    /// # Errors
    ///
    /// `Stopped` if the client already stopped.
    pub fn abort(&self) -> Result<(), ClientError> {
        self.dispatcher.post(|state| state.link.close())?;
        Ok(())
    }

    /// Snapshot of the replicated state
    ///
    /// # Errors
    ///
    /// `Stopped` if the client already stopped.
    pub async fn state(&self) -> Result<ContainerState, ClientError> {
        Ok(self.dispatcher.call(|state| state.replicator.state().clone()).await?)
    }

    /// Session state
    ///
    /// # Errors
    ///
    /// `Stopped` if the client already stopped.
    pub async fn session_state(&self) -> Result<ClientSessionState, ClientError> {
        Ok(self.dispatcher.call(|state| state.session.state()).await?)
    }

    /// Server description, once received
    ///
    /// # Errors
    ///
    /// `Stopped` if the client already stopped.
    pub async fn server(&self) -> Result<Option<ServerInfo>, ClientError> {
        Ok(self.dispatcher.call(|state| state.session.server().cloned()).await?)
    }

    /// Number of submitted mutations not yet resolved
    ///
    /// # Errors
    ///
    /// `Stopped` if the client already stopped.
    pub async fn pending(&self) -> Result<usize, ClientError> {
        Ok(self.dispatcher.call(|state| state.replicator.pending().len()).await?)
    }

    /// True once the client has stopped
    pub fn is_stopped(&self) -> bool {
        self.dispatcher.is_stopped()
    }
}

/// Everything the dispatcher owns.
struct ClientState<E: Environment> {
    env: E,
    session: ClientSession,
    replicator: Replicator,
    link: Link,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl<E: Environment> ClientState<E> {
    fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Message(message) => match self.session.on_message(message) {
                Ok(actions) => self.execute(actions),
                Err(err) => {
                    warn!(error = %err, "session error");
                    let actions = self.session.leave(&err.to_string());
                    self.execute(actions);
                },
            },
            LinkEvent::Violation(err) => {
                warn!(error = %err, "protocol violation from server");
                let actions = self.session.leave(&err.to_string());
                self.execute(actions);
            },
            LinkEvent::Closed => {
                let actions = self.session.on_connection_closed();
                self.execute(actions);
                if !self.replicator.pending().is_empty() {
                    debug!(pending = self.replicator.pending().len(), "closed with unresolved mutations");
                }
                self.emit(ClientEvent::Disconnected);
            },
        }
    }

    fn execute(&mut self, actions: Vec<ClientSessionAction>) {
        for action in actions {
            match action {
                ClientSessionAction::Send(message) => self.transmit(&message),
                ClientSessionAction::ServerIdentified(server) => self.emit(ClientEvent::ServerIdentified(server)),
                ClientSessionAction::Route(message) => self.route(message),
                ClientSessionAction::Left { reason } => self.emit(ClientEvent::Left { reason }),
                ClientSessionAction::Disconnect => self.link.close(),
            }
        }
    }

    fn route(&mut self, message: Message) {
        let result = match message {
            Message::FragmentSet(set) => self.replicator.handle_fragment_set(&set),
            Message::MutationRequest(request) => self.replicator.handle_mutation(&request),
            Message::MutationFailed(failed) => Ok(self.replicator.handle_failure(&failed)),
            Message::App(packet) => {
                self.emit(ClientEvent::Packet(packet));
                return;
            },
            other => {
                debug!(kind = other.kind(), "ignoring routed message");
                return;
            },
        };

        match result {
            Ok(actions) => self.execute_replicator(actions),
            Err(err) => {
                warn!(error = %err, "undecodable replication message");
                let actions = self.session.leave(&err.to_string());
                self.execute(actions);
            },
        }
    }

    fn execute_replicator(&mut self, actions: Vec<ReplicatorAction>) {
        for action in actions {
            match action {
                ReplicatorAction::Send(message) => self.transmit(&message),
                ReplicatorAction::StateChanged { key, state } => self.emit(ClientEvent::StateChanged { key, state }),
                ReplicatorAction::Acknowledged { mutation_id } => {
                    self.emit(ClientEvent::MutationAcknowledged { mutation_id });
                },
                ReplicatorAction::Failed { mutation_id, key, description, failure } => {
                    self.emit(ClientEvent::MutationFailed { mutation_id, key, description, failure });
                },
                ReplicatorAction::Leave { reason } => {
                    let actions = self.session.leave(&reason);
                    self.execute(actions);
                },
            }
        }
    }

    fn transmit(&self, message: &Message) {
        if let Err(err) = self.link.send(message) {
            debug!(kind = message.kind(), error = %err, "send dropped");
        }
    }

    fn ensure_joined(&self) -> Result<(), ClientError> {
        if self.session.state() == ClientSessionState::Established && self.link.is_connected() {
            Ok(())
        } else {
            Err(ClientError::NotJoined)
        }
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

impl<E: Environment> ClientState<E> {
    fn submit(&mut self, key: FragmentKey, mutation: &dyn Mutation) -> Result<Uuid, ClientError> {
        self.ensure_joined()?;
        let (id, actions) = self.replicator.submit(&self.env, key, mutation)?;
        self.execute_replicator(actions);
        Ok(id)
    }

    fn send(&mut self, message: &Message) -> Result<(), ClientError> {
        self.ensure_joined()?;
        self.link.send(message)?;
        Ok(())
    }
}
