//! Replicated state engine errors.

use karman_proto::{ProtocolError, RegistryError};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by containers, the Oracle and Replicators.
///
/// Mutation *failures* are not errors; they are ordinary outcomes reported
/// through [`super::MutationFailure`]. These are the conditions that mean the
/// peer or the local configuration is broken.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KarmaxError {
    /// Another live container holds this id
    #[error("container {0} is already in use")]
    ContainerInUse(Uuid),

    /// Fragment or mutation bytes did not decode
    #[error("undecodable replicated value: {0}")]
    Decode(#[from] ProtocolError),

    /// Type registration conflict
    #[error("schema error: {0}")]
    Schema(#[from] RegistryError),
}
