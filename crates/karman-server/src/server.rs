//! Server runtime.
//!
//! Wires the Sans-IO [`ServerSession`] and [`Oracle`] to real connections.
//! Everything they own lives in [`ServerState`], which only the dispatcher
//! task touches:
//!
//! ```text
//!  accept loop ──post──┐
//!  links (rx) ──post───┼──> Dispatcher ──> ServerState { session, oracle, links, router }
//!  ServerHandle ─post──┘                       │
//!                                              └──> ServerEvent channel
//! ```

use std::{any::Any, collections::HashMap, fmt, net::SocketAddr, sync::Arc, time::Duration};

use karman_core::{
    Environment, PacketRouter, Transport,
    karmax::{ContainerRegistry, ContainerState, FragmentKey, Mutation, MutationFailure, Oracle, OracleAction, Schema},
    session::{
        AdmissionPolicy, AdmitAll, ServerSession, ServerSessionConfig, SessionAction, SessionError, server::SERVER_SHUTDOWN,
    },
};
use karman_proto::{Message, Registry, WireValue};
use karman_runtime::{Dispatcher, Link, LinkEvent, TcpTransport};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{config::ServerConfig, error::ServerError};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Lifecycle and replication events, in dispatcher order
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A new client identity joined
    Joined {
        /// Client id
        client_id: Uuid,
        /// Display name
        name: String,
    },
    /// A client was bound to a connection (join or reconnect)
    Connected {
        /// Client id
        client_id: Uuid,
    },
    /// A client lost its connection; it may reconnect
    Disconnected {
        /// Client id
        client_id: Uuid,
    },
    /// A client identity was removed (kick or leave)
    Left {
        /// Client id
        client_id: Uuid,
        /// Reason
        reason: String,
    },
    /// The authoritative state changed
    StateChanged {
        /// Applied mutation
        mutation_id: Uuid,
        /// Mutated key
        key: FragmentKey,
        /// Requesting client (nil for server-issued mutations)
        requester: Uuid,
        /// State after the mutation
        state: ContainerState,
    },
    /// A server-issued mutation failed
    MutationFailed {
        /// Failed mutation
        mutation_id: Uuid,
        /// Target key
        key: FragmentKey,
        /// Reason
        failure: MutationFailure,
    },
}

/// Receiver half of the server event channel
pub type ServerEvents = mpsc::UnboundedReceiver<ServerEvent>;

/// Server builder.
///
/// Register application packet types and their handlers, then start it on a
/// transport.
pub struct KarmanServer<E: Environment> {
    config: ServerConfig,
    env: E,
    schema: Arc<Schema>,
    registry: Registry<Message>,
    router: PacketRouter<ServerHandle<E>>,
    admission: Box<dyn AdmissionPolicy>,
    containers: ContainerRegistry,
}

impl<E: Environment> KarmanServer<E> {
    /// New server replicating the types in `schema`.
    ///
    /// # Errors
    ///
    /// `Registry` if the protocol messages fail to register.
    pub fn new(config: ServerConfig, env: E, schema: Schema) -> Result<Self, ServerError> {
        Ok(Self {
            config,
            env,
            schema: Arc::new(schema),
            registry: Message::registry()?,
            router: PacketRouter::new(),
            admission: Box::new(AdmitAll),
            containers: ContainerRegistry::new(),
        })
    }

    /// Register an application packet type (sent in either direction).
    ///
    /// # Errors
    ///
    /// `Registry` on a name or type id conflict.
    pub fn register_packet<V: WireValue + fmt::Debug>(&mut self) -> Result<&mut Self, ServerError> {
        self.registry.register::<V>(Message::app)?;
        Ok(self)
    }

    /// Handle application packets of type `V` sent by clients.
    pub fn on_packet<V: Any>(&mut self, handler: impl FnMut(&mut ServerHandle<E>, Uuid, &V) + Send + 'static) -> &mut Self {
        self.router.on(handler);
        self
    }

    /// Decide which new identities may join
    #[must_use]
    pub fn with_admission(mut self, policy: impl AdmissionPolicy + 'static) -> Self {
        self.admission = Box::new(policy);
        self
    }

    /// Use an existing container registry (one per process)
    #[must_use]
    pub fn with_container_registry(mut self, containers: ContainerRegistry) -> Self {
        self.containers = containers;
        self
    }

    /// Bind a TCP listener on the configured address and start.
    ///
    /// # Errors
    ///
    /// `Io` if binding fails; see [`KarmanServer::start`].
    pub async fn listen(self) -> Result<(ServerHandle<E>, ServerEvents), ServerError> {
        let transport = TcpTransport::bind(self.config.bind).await?;
        info!(addr = %transport.local_addr()?, "listening");
        self.start(transport)
    }

    /// Start serving connections accepted from `transport`.
    ///
    /// # Errors
    ///
    /// `Karmax` if the container id is already in use.
    pub fn start<T: Transport>(self, transport: T) -> Result<(ServerHandle<E>, ServerEvents), ServerError> {
        let Self { config, env, schema, registry, router, admission, containers } = self;

        let oracle = Oracle::new(&containers, config.container_id, schema)?;
        let session = ServerSession::new(ServerSessionConfig {
            server_id: env.new_uuid(),
            server_name: config.name.clone(),
            game_id: config.game_id,
            game_version: config.game_version.clone(),
            password: config.effective_password(),
        });
        info!(
            server_id = %session.config().server_id,
            name = %config.name,
            container_id = %config.container_id,
            "server starting"
        );

        let (events_tx, events) = mpsc::unbounded_channel();
        let registry = Arc::new(registry);
        let (dispatcher, _task) = Dispatcher::spawn_with(|dispatcher| ServerState {
            env: env.clone(),
            session,
            oracle,
            links: HashMap::new(),
            router,
            admission,
            events: events_tx,
            registry,
            max_frame_size: config.max_frame_size,
            handle: ServerHandle { dispatcher, accept_task: None },
            stopping: false,
        });

        let accept_task = tokio::spawn(accept_loop(transport, env, dispatcher.clone()));
        let handle = ServerHandle { dispatcher, accept_task: Some(Arc::new(accept_task)) };
        Ok((handle, events))
    }
}

impl<E: Environment> fmt::Debug for KarmanServer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KarmanServer")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

/// Control handle for a running server. Cheap to clone.
pub struct ServerHandle<E: Environment> {
    dispatcher: Dispatcher<ServerState<E>>,
    accept_task: Option<Arc<JoinHandle<()>>>,
}

impl<E: Environment> Clone for ServerHandle<E> {
    fn clone(&self) -> Self {
        Self { dispatcher: self.dispatcher.clone(), accept_task: self.accept_task.clone() }
    }
}

impl<E: Environment> fmt::Debug for ServerHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle").field("dispatcher", &self.dispatcher).finish_non_exhaustive()
    }
}

impl<E: Environment> ServerHandle<E> {
    /// Send a message to one client; skipped if it is not connected.
    ///
    /// # Errors
    ///
    /// `Stopped` after shutdown.
    pub fn send(&self, client_id: Uuid, message: Message) -> Result<(), ServerError> {
        self.dispatcher.post(move |state| {
            let actions = state.session.send_to(client_id, message);
            state.execute(actions);
        })?;
        Ok(())
    }

    /// Send an application packet to one client.
    ///
    /// # Errors
    ///
    /// `Stopped` after shutdown.
    pub fn send_packet<V: WireValue + fmt::Debug>(&self, client_id: Uuid, packet: V) -> Result<(), ServerError> {
        self.send(client_id, Message::app(packet))
    }

    /// Send a message to every connected client except `except`.
    ///
    /// # Errors
    ///
    /// `Stopped` after shutdown.
    pub fn broadcast(&self, message: Message, except: Option<Uuid>) -> Result<(), ServerError> {
        self.dispatcher.post(move |state| {
            let actions = state.session.broadcast(&message, except);
            state.execute(actions);
        })?;
        Ok(())
    }

    /// Remove a client; it cannot reconnect under the same identity.
    ///
    /// # Errors
    ///
    /// `Session(UnknownClient)` if no such client exists.
    pub async fn kick(&self, client_id: Uuid, reason: impl Into<String>) -> Result<(), ServerError> {
        let reason = reason.into();
        self.dispatcher
            .call(move |state| -> Result<(), SessionError> {
                let actions = state.session.kick(client_id, &reason)?;
                state.execute(actions);
                Ok(())
            })
            .await??;
        Ok(())
    }

    /// Apply a mutation as the server itself (nil requester).
    ///
    /// Returns the mutation id; a failure is reported as
    /// [`ServerEvent::MutationFailed`].
    ///
    /// # Errors
    ///
    /// `Karmax` if the mutation type is not in the schema.
    pub async fn submit(&self, key: FragmentKey, mutation: impl Mutation + 'static) -> Result<Uuid, ServerError> {
        let id = self.dispatcher.call(move |state| state.submit(key, &mutation)).await??;
        Ok(id)
    }

    /// Snapshot of the authoritative state
    ///
    /// # Errors
    ///
    /// `Stopped` after shutdown.
    pub async fn state(&self) -> Result<ContainerState, ServerError> {
        Ok(self.dispatcher.call(|state| state.oracle.state().clone()).await?)
    }

    /// Ids of currently connected clients
    ///
    /// # Errors
    ///
    /// `Stopped` after shutdown.
    pub async fn connected_clients(&self) -> Result<Vec<Uuid>, ServerError> {
        Ok(self.dispatcher.call(|state| state.session.connected_clients()).await?)
    }

    /// Kick every client, stop accepting and stop the dispatcher.
    ///
    /// # Errors
    ///
    /// `Stopped` if the server already shut down.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        // Connections accepted after the kick are dropped unanswered
        self.dispatcher.call(ServerState::shutdown).await?;
        if let Some(accept_task) = &self.accept_task {
            accept_task.abort();
        }
        self.dispatcher.stop();
        info!("server stopped");
        Ok(())
    }
}

/// Everything the dispatcher owns.
struct ServerState<E: Environment> {
    env: E,
    session: ServerSession<E::Instant>,
    oracle: Oracle,
    links: HashMap<Uuid, Link>,
    router: PacketRouter<ServerHandle<E>>,
    admission: Box<dyn AdmissionPolicy>,
    events: mpsc::UnboundedSender<ServerEvent>,
    registry: Arc<Registry<Message>>,
    max_frame_size: usize,
    handle: ServerHandle<E>,
    stopping: bool,
}

impl<E: Environment> ServerState<E> {
    fn on_accepted<S>(&mut self, stream: S, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if self.stopping {
            return;
        }

        let connection_id = self.env.new_uuid();
        let dispatcher = self.handle.dispatcher.clone();
        let link = Link::accept(connection_id, stream, Arc::clone(&self.registry), self.max_frame_size, move |event| {
            // Events after shutdown have nowhere to go
            let _ = dispatcher.post(move |state| state.on_link_event(connection_id, event));
        });

        info!(connection_id = %connection_id, peer = %peer, "connection accepted");
        self.links.insert(connection_id, link);
        let actions = self.session.on_connection_opened(connection_id);
        self.execute(actions);
    }

    fn on_link_event(&mut self, connection_id: Uuid, event: LinkEvent) {
        match event {
            LinkEvent::Message(message) => {
                let now = self.env.now();
                match self.session.on_message(connection_id, message, self.admission.as_mut(), now) {
                    Ok(actions) => self.execute(actions),
                    Err(SessionError::UnknownConnection(_)) => {
                        debug!(connection_id = %connection_id, "message on released connection");
                    },
                    Err(err) => {
                        warn!(connection_id = %connection_id, error = %err, "protocol violation");
                        let actions = self.session.reject(connection_id, &err.to_string());
                        self.execute(actions);
                    },
                }
            },
            LinkEvent::Violation(err) => {
                warn!(connection_id = %connection_id, error = %err, "protocol violation");
                let actions = self.session.reject(connection_id, &err.to_string());
                self.execute(actions);
            },
            LinkEvent::Closed => {
                self.links.remove(&connection_id);
                let actions = self.session.on_connection_closed(connection_id);
                self.execute(actions);
            },
        }
    }

    fn execute(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::Send { connection_id, message } => {
                    let Some(link) = self.links.get(&connection_id) else {
                        continue;
                    };
                    if let Err(err) = link.send(&message) {
                        debug!(connection_id = %connection_id, kind = message.kind(), error = %err, "send dropped");
                    }
                },
                SessionAction::Disconnect { connection_id, reason } => {
                    if let Some(link) = self.links.get(&connection_id) {
                        debug!(connection_id = %connection_id, reason = %reason, "closing connection");
                        link.close();
                    }
                },
                SessionAction::Joined { client_id, name } => self.emit(ServerEvent::Joined { client_id, name }),
                SessionAction::Connected { client_id, .. } => {
                    self.emit(ServerEvent::Connected { client_id });
                    let actions = self.oracle.snapshot_for(client_id);
                    self.execute_oracle(actions);
                },
                SessionAction::Disconnected { client_id } => self.emit(ServerEvent::Disconnected { client_id }),
                SessionAction::Left { client_id, reason } => self.emit(ServerEvent::Left { client_id, reason }),
                SessionAction::Route { client_id, message } => self.route(client_id, message),
            }
        }
    }

    fn execute_oracle(&mut self, actions: Vec<OracleAction>) {
        for action in actions {
            match action {
                OracleAction::SendTo { client_id, message } => {
                    let actions = self.session.send_to(client_id, message);
                    self.execute(actions);
                },
                OracleAction::Broadcast(message) => {
                    let actions = self.session.broadcast(&message, None);
                    self.execute(actions);
                },
                OracleAction::StateChanged { mutation_id, key, requester, state } => {
                    self.emit(ServerEvent::StateChanged { mutation_id, key, requester, state });
                },
                OracleAction::LocalFailure { mutation_id, key, failure } => {
                    self.emit(ServerEvent::MutationFailed { mutation_id, key, failure });
                },
            }
        }
    }

    fn route(&mut self, client_id: Uuid, message: Message) {
        match message {
            Message::MutationRequest(request) => match self.oracle.handle_request(client_id, request) {
                Ok(actions) => self.execute_oracle(actions),
                Err(err) => {
                    warn!(client_id = %client_id, error = %err, "bad mutation request");
                    if let Some(connection_id) = self.session.client(client_id).and_then(|c| c.connection_id) {
                        let actions = self.session.reject(connection_id, &err.to_string());
                        self.execute(actions);
                    }
                },
            },
            Message::App(packet) => {
                let mut handle = self.handle.clone();
                if !self.router.dispatch(&mut handle, client_id, &packet) {
                    debug!(client_id = %client_id, packet = packet.type_name(), "unhandled packet");
                }
            },
            other => debug!(client_id = %client_id, kind = other.kind(), "ignoring routed message"),
        }
    }

    fn submit(&mut self, key: FragmentKey, mutation: &dyn Mutation) -> Result<Uuid, ServerError> {
        let (id, actions) = self.oracle.submit(&self.env, key, mutation)?;
        self.execute_oracle(actions);
        Ok(id)
    }

    fn shutdown(&mut self) {
        self.stopping = true;
        let actions = self.session.shutdown(SERVER_SHUTDOWN);
        self.execute(actions);
    }

    fn emit(&self, event: ServerEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }
}

async fn accept_loop<T: Transport, E: Environment>(transport: T, env: E, dispatcher: Dispatcher<ServerState<E>>) {
    loop {
        match transport.accept().await {
            Ok((stream, peer)) => {
                if dispatcher.post(move |state| state.on_accepted(stream, peer)).is_err() {
                    break;
                }
            },
            Err(err) => {
                if dispatcher.is_stopped() {
                    break;
                }
                warn!(error = %err, "accept failed");
                env.sleep(ACCEPT_BACKOFF).await;
            },
        }
    }
    debug!("accept loop finished");
}
