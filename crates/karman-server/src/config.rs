//! Server configuration.

use std::net::{Ipv4Addr, SocketAddr};

use karman_proto::{DEFAULT_PORT, MAX_FRAME_SIZE};
use uuid::Uuid;

/// Static server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub bind: SocketAddr,
    /// Display name sent in `ServerInfo`
    pub name: String,
    /// Game id sent in `ServerInfo`
    pub game_id: Uuid,
    /// Game version sent in `ServerInfo`
    pub game_version: String,
    /// Password clients must present; `None` or empty for an open server
    pub password: Option<String>,
    /// Id of the replicated container
    pub container_id: Uuid,
    /// Largest accepted frame
    pub max_frame_size: usize,
}

impl ServerConfig {
    /// Password, treating an empty one as none
    pub fn effective_password(&self) -> Option<String> {
        self.password.clone().filter(|password| !password.is_empty())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            name: "karman".to_string(),
            game_id: Uuid::nil(),
            game_version: "0.0.0".to_string(),
            password: None,
            container_id: Uuid::nil(),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}
