//! Client configuration.

use karman_core::{Endpoint, Environment, session::ClientCredentials};
use karman_proto::MAX_FRAME_SIZE;
use uuid::Uuid;

use crate::error::ClientError;

/// Where to connect and who to connect as
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address
    pub endpoint: Endpoint,
    /// Identity; reuse it to reconnect as the same client
    pub credentials: ClientCredentials,
    /// Id of the replicated container (must match the server's)
    pub container_id: Uuid,
    /// Largest accepted frame
    pub max_frame_size: usize,
}

impl ClientConfig {
    /// Parse `connection` (`host` or `host:port`) for an existing identity.
    ///
    /// # Errors
    ///
    /// `Endpoint` if the connection string is invalid.
    pub fn new(connection: &str, credentials: ClientCredentials) -> Result<Self, ClientError> {
        Ok(Self {
            endpoint: Endpoint::parse(connection)?,
            credentials,
            container_id: Uuid::nil(),
            max_frame_size: MAX_FRAME_SIZE,
        })
    }

    /// Parse `connection` and generate a fresh identity named `name`.
    ///
    /// # Errors
    ///
    /// `Endpoint` if the connection string is invalid.
    pub fn generate<E: Environment>(env: &E, connection: &str, name: &str) -> Result<Self, ClientError> {
        Self::new(connection, ClientCredentials::generate(env, name))
    }

    /// Builder-style server password
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.credentials = self.credentials.with_password(password);
        self
    }

    /// Builder-style container id
    #[must_use]
    pub fn with_container(mut self, container_id: Uuid) -> Self {
        self.container_id = container_id;
        self
    }
}
