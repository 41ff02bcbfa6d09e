//! Server-side authoritative container.
//!
//! The Oracle owns the authoritative state. It validates and applies mutation
//! requests, then broadcasts every accepted mutation to all clients (the
//! originator included, which doubles as the acknowledgement). Rejections go
//! only to the originator.
//!
//! # Flow
//!
//! ```text
//! client A                  Oracle                    client B
//!    │  MutationRequest        │                          │
//!    │────────────────────────>│ requester == A?          │
//!    │                         │ apply to state           │
//!    │   MutationRequest       │   MutationRequest        │
//!    │<────────────────────────│─────────────────────────>│
//!    │                         │                          │
//!    │   MutationFailed        │  (on failure, only A)    │
//!    │<────────────────────────│                          │
//! ```
//!
//! # Invariants
//!
//! - Mutations are applied in the order their requests are handled; that is
//!   the order every client receives them in.
//! - A failed mutation leaves the state unchanged and is never broadcast.
//! - A request whose requester is not the sending client is never applied.
//! - Only fragments that are valid and encode with the schema are stored, so
//!   every stored key can be sent to a late joiner.

use std::sync::Arc;

use karman_proto::{FragmentSet, Message, MutationFailed, MutationRequest};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    container::{Container, ContainerRegistry},
    error::KarmaxError,
    fragment::Fragment,
    key::FragmentKey,
    mutation::{Mutation, MutationFailure},
    schema::Schema,
    state::ContainerState,
};
use crate::env::Environment;

/// Effects requested by the Oracle
#[derive(Debug, Clone)]
pub enum OracleAction {
    /// Send to one client
    SendTo {
        /// Recipient
        client_id: Uuid,
        /// Message to send
        message: Message,
    },

    /// Send to every connected client
    Broadcast(Message),

    /// The authoritative state changed
    StateChanged {
        /// Applied mutation
        mutation_id: Uuid,
        /// Mutated key
        key: FragmentKey,
        /// Requesting client (nil for the Oracle itself)
        requester: Uuid,
        /// State after the mutation
        state: ContainerState,
    },

    /// A mutation the Oracle issued itself failed
    LocalFailure {
        /// Failed mutation
        mutation_id: Uuid,
        /// Target key
        key: FragmentKey,
        /// Reason
        failure: MutationFailure,
    },
}

/// Authoritative replicated container.
#[derive(Debug)]
pub struct Oracle {
    container: Container,
    schema: Arc<Schema>,
}

impl Oracle {
    /// Create the Oracle for container `id`.
    ///
    /// # Errors
    ///
    /// `ContainerInUse` if `registry` already holds `id`.
    pub fn new(registry: &ContainerRegistry, id: Uuid, schema: Arc<Schema>) -> Result<Self, KarmaxError> {
        let container = Container::new(registry, id)?;
        info!(container_id = %id, "oracle ready");
        Ok(Self { container, schema })
    }

    /// Container id
    pub fn id(&self) -> Uuid {
        self.container.id()
    }

    /// Current authoritative state
    pub fn state(&self) -> &ContainerState {
        self.container.state()
    }

    /// Shared schema
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Full snapshot for a newly bound client: one `FragmentSet` per key, in
    /// key order.
    ///
    /// A stored fragment that no longer encodes is logged and left out; the
    /// rest of the snapshot is still sent.
    pub fn snapshot_for(&self, client_id: Uuid) -> Vec<OracleAction> {
        let mut actions = Vec::with_capacity(self.state().len());
        for (key, fragment) in self.state().sorted() {
            let fragment = match self.schema.encode_fragment(fragment.as_ref()) {
                Ok(fragment) => fragment,
                Err(err) => {
                    error!(client_id = %client_id, key = %key, error = %err, "fragment left out of snapshot");
                    continue;
                },
            };
            actions.push(OracleAction::SendTo {
                client_id,
                message: Message::FragmentSet(FragmentSet { fragment_key: key.to_string(), fragment }),
            });
        }
        debug!(client_id = %client_id, fragments = actions.len(), "snapshot prepared");
        actions
    }

    /// Handle a mutation request from client `sender`.
    ///
    /// # Errors
    ///
    /// `Decode` if the mutation bytes are not a registered mutation type. The
    /// caller treats this as a protocol violation by `sender`.
    pub fn handle_request(&mut self, sender: Uuid, request: MutationRequest) -> Result<Vec<OracleAction>, KarmaxError> {
        if request.requester != sender {
            warn!(
                client_id = %sender,
                claimed = %request.requester,
                mutation_id = %request.id,
                "mutation request impersonates another client"
            );
            return Ok(vec![OracleAction::SendTo {
                client_id: sender,
                message: Message::MutationFailed(MutationFailed {
                    mutation_id: request.id,
                    reason: MutationFailure::Imposter.reason(),
                }),
            }]);
        }

        let mutation = self.schema.decode_mutation(&request.mutation)?;
        Ok(self.apply(request, mutation.as_ref()))
    }

    /// Apply a mutation on behalf of the server (nil requester).
    ///
    /// Returns the new mutation id. On success every client receives the
    /// mutation; on failure a `LocalFailure` is reported instead.
    ///
    /// # Errors
    ///
    /// `Decode` if the mutation type is not in the schema (clients could not
    /// decode it).
    pub fn submit<E: Environment>(
        &mut self,
        env: &E,
        key: FragmentKey,
        mutation: &dyn Mutation,
    ) -> Result<(Uuid, Vec<OracleAction>), KarmaxError> {
        let request = MutationRequest {
            id: env.new_uuid(),
            requester: Uuid::nil(),
            fragment_key: key.to_string(),
            mutation: self.schema.encode_mutation(mutation)?,
        };
        let id = request.id;
        Ok((id, self.apply(request, mutation)))
    }

    fn apply(&mut self, request: MutationRequest, mutation: &dyn Mutation) -> Vec<OracleAction> {
        let key = FragmentKey::from_wire(request.fragment_key.as_str());

        let schema = &self.schema;
        let encodes = |fragment: &dyn Fragment| match schema.encode_fragment(fragment) {
            Ok(_) => true,
            Err(err) => {
                warn!(mutation_id = %request.id, key = %key, error = %err, "mutation produced an unencodable fragment");
                false
            },
        };

        match self.container.apply_checked(&key, mutation, request.requester, encodes) {
            Ok(()) => {
                debug!(
                    mutation_id = %request.id,
                    key = %key,
                    requester = %request.requester,
                    mutation = ?mutation,
                    "mutation applied"
                );
                vec![
                    OracleAction::StateChanged {
                        mutation_id: request.id,
                        key,
                        requester: request.requester,
                        state: self.state().clone(),
                    },
                    OracleAction::Broadcast(Message::MutationRequest(request)),
                ]
            },
            Err(failure) => {
                if failure.is_bug() {
                    error!(mutation_id = %request.id, mutation = ?mutation, "mutation produced no result");
                } else {
                    debug!(mutation_id = %request.id, key = %key, reason = %failure, "mutation rejected");
                }

                if request.requester.is_nil() {
                    vec![OracleAction::LocalFailure { mutation_id: request.id, key, failure }]
                } else {
                    vec![OracleAction::SendTo {
                        client_id: request.requester,
                        message: Message::MutationFailed(MutationFailed {
                            mutation_id: request.id,
                            reason: failure.reason(),
                        }),
                    }]
                }
            },
        }
    }
}
