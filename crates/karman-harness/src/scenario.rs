//! Building blocks for simulated deployments.
//!
//! A scenario is one Turmoil simulation with a `"server"` host running a real
//! [`KarmanServer`] and any number of client programs running real
//! [`KarmanClient`]s, all over [`SimTransport`].
//!
//! ```text
//!  ┌──────────── host "server" ────────────┐      ┌──── client "alice" ────┐
//!  │ KarmanServer ── ServerProbe (shared) ─┼──┐   │ KarmanClient + events  │
//!  └───────────────────────────────────────┘  │   └────────────────────────┘
//!                                             └──> test assertions
//! ```

use std::{
    future::Future,
    io,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use karman_client::{ClientConfig, ClientEvent, ClientEvents, ClientHandle, KarmanClient};
use karman_core::session::ClientCredentials;
use karman_proto::DEFAULT_PORT;
use karman_server::{KarmanServer, ServerConfig, ServerEvent, ServerHandle};
use tracing::debug;

use crate::{SimEnv, SimTransport, fixtures::lobby_schema};

/// Host name of the server in every scenario
pub const SERVER_HOST: &str = "server";

/// How long helpers wait for an expected event (simulated time)
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared view of the simulated server, readable from client programs.
#[derive(Clone, Default)]
pub struct ServerProbe {
    handle: Arc<Mutex<Option<ServerHandle<SimEnv>>>>,
    events: Arc<Mutex<Vec<ServerEvent>>>,
}

impl ServerProbe {
    /// Handle of the running server, once it has started
    pub fn handle(&self) -> Option<ServerHandle<SimEnv>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Every server event so far
    pub fn events(&self) -> Vec<ServerEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Wait (in simulated time) for the server to start.
    ///
    /// # Errors
    ///
    /// `TimedOut` if it does not start within [`EVENT_TIMEOUT`].
    pub async fn wait_started(&self) -> turmoil::Result<ServerHandle<SimEnv>> {
        poll_until(|| self.handle()).await
    }

    /// Wait (in simulated time) for a server event matching `predicate`.
    ///
    /// # Errors
    ///
    /// `TimedOut` if none arrives within [`EVENT_TIMEOUT`].
    pub async fn wait_event(&self, predicate: impl Fn(&ServerEvent) -> bool) -> turmoil::Result<ServerEvent> {
        poll_until(|| self.events().into_iter().find(|event| predicate(event))).await
    }

    fn set_handle(&self, handle: ServerHandle<SimEnv>) {
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    fn record(&self, event: ServerEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}

/// Add the `"server"` host to `sim`, serving the lobby schema.
///
/// The host runs until the server shuts down.
pub fn host_server(sim: &mut turmoil::Sim<'_>, config: ServerConfig, seed: u64) -> ServerProbe {
    let probe = ServerProbe::default();
    let host_probe = probe.clone();

    sim.host(SERVER_HOST, move || {
        let config = config.clone();
        let probe = host_probe.clone();
        async move {
            let server = KarmanServer::new(config, SimEnv::with_seed(seed), lobby_schema()?)?;
            let transport = SimTransport::bind(&format!("0.0.0.0:{DEFAULT_PORT}")).await?;
            let (handle, mut events) = server.start(transport)?;
            probe.set_handle(handle);

            while let Some(event) = events.recv().await {
                debug!(?event, "server event");
                probe.record(event);
            }
            Ok(())
        }
    });

    probe
}

/// Connect to the scenario server with `credentials`.
///
/// # Errors
///
/// Schema, registry or connection errors from the client.
pub async fn connect(
    env: SimEnv,
    credentials: ClientCredentials,
) -> turmoil::Result<(ClientHandle<SimEnv>, ClientEvents)> {
    let config = ClientConfig::new(SERVER_HOST, credentials)?;
    let client = KarmanClient::new(config, env, lobby_schema()?)?;
    Ok(client.connect(&SimTransport::client()).await?)
}

/// Receive client events until one matches `predicate`.
///
/// # Errors
///
/// `TimedOut` if nothing matches within [`EVENT_TIMEOUT`]; `UnexpectedEof`
/// if the client stops first.
pub async fn next_matching(
    events: &mut ClientEvents,
    predicate: impl Fn(&ClientEvent) -> bool,
) -> turmoil::Result<ClientEvent> {
    with_timeout(async {
        while let Some(event) = events.recv().await {
            if predicate(&event) {
                return Ok(event);
            }
        }
        Err(io::Error::new(io::ErrorKind::UnexpectedEof, "client stopped").into())
    })
    .await
}

/// Wait until `check` yields a value, polling the simulation clock.
///
/// # Errors
///
/// `TimedOut` after [`EVENT_TIMEOUT`].
pub async fn poll_until<T>(check: impl Fn() -> Option<T>) -> turmoil::Result<T> {
    with_timeout(async {
        loop {
            if let Some(value) = check() {
                return Ok(value);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
}

async fn with_timeout<T>(future: impl Future<Output = turmoil::Result<T>>) -> turmoil::Result<T> {
    tokio::time::timeout(EVENT_TIMEOUT, future)
        .await
        .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "timed out waiting for event").into()))
}
