//! Karman server binary.
//!
//! Runs a server with an empty schema: sessions, packet relay and an empty
//! replicated container. Games embed [`karman_server`] to add their own
//! types.

use std::net::SocketAddr;

use clap::Parser;
use karman_core::karmax::Schema;
use karman_runtime::SystemEnv;
use karman_server::{KarmanServer, ServerConfig, ServerError, ServerEvent};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "karman-server", version, about = "Karman game server")]
struct Args {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:14641")]
    bind: SocketAddr,

    /// Server display name
    #[arg(long, default_value = "karman")]
    name: String,

    /// Game id advertised to clients
    #[arg(long, default_value_t = Uuid::nil())]
    game_id: Uuid,

    /// Game version advertised to clients
    #[arg(long, default_value = "0.0.0")]
    game_version: String,

    /// Password clients must present
    #[arg(long, env = "KARMAN_PASSWORD")]
    password: Option<String>,

    /// Id of the replicated container
    #[arg(long, default_value_t = Uuid::nil())]
    container_id: Uuid,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            bind: args.bind,
            name: args.name,
            game_id: args.game_id,
            game_version: args.game_version,
            password: args.password,
            container_id: args.container_id,
            ..Self::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from(Args::parse());
    let server = KarmanServer::new(config, SystemEnv::new(), Schema::new())?;
    let (handle, mut events) = server.listen().await?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ServerEvent::Joined { client_id, name }) => info!(client_id = %client_id, name = %name, "client joined"),
                Some(ServerEvent::Left { client_id, reason }) => info!(client_id = %client_id, reason = %reason, "client left"),
                Some(ServerEvent::MutationFailed { mutation_id, failure, .. }) => {
                    warn!(mutation_id = %mutation_id, failure = %failure, "mutation failed");
                },
                Some(_) => {},
                None => break,
            },
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    warn!(error = %err, "signal handler failed");
                }
                info!("shutting down");
                break;
            },
        }
    }

    handle.shutdown().await
}
