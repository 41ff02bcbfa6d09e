//! Client-side replica of the authoritative container.
//!
//! A Replicator never applies its own mutations speculatively. It sends the
//! request, remembers it as pending, and applies it only when the Oracle's
//! broadcast comes back, in the same order as every other client. Because
//! mutations are deterministic, re-applying each broadcast reproduces the
//! Oracle's state exactly.
//!
//! # Invariants
//!
//! - A broadcast mutation that fails locally means the replica diverged from
//!   the Oracle. The replica cannot recover on its own, so the client leaves
//!   (and may reconnect for a fresh snapshot).
//! - Each pending mutation resolves exactly once: acknowledged by its echo or
//!   failed by `MutationFailed`.

use std::{collections::HashMap, sync::Arc};

use karman_proto::{FragmentSet, Message, MutationFailed, MutationRequest};
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::{
    container::{Container, ContainerRegistry},
    error::KarmaxError,
    key::FragmentKey,
    mutation::{Mutation, MutationFailure},
    schema::Schema,
    state::ContainerState,
};
use crate::env::Environment;

/// Effects requested by a Replicator
#[derive(Debug, Clone)]
pub enum ReplicatorAction {
    /// Send to the server
    Send(Message),

    /// The replicated state changed
    StateChanged {
        /// Changed key
        key: FragmentKey,
        /// State after the change
        state: ContainerState,
    },

    /// A mutation this client submitted was applied
    Acknowledged {
        /// Submitted mutation
        mutation_id: Uuid,
    },

    /// A mutation this client submitted was rejected
    Failed {
        /// Submitted mutation
        mutation_id: Uuid,
        /// Target key
        key: FragmentKey,
        /// Debug rendering of the mutation, for diagnostics
        description: String,
        /// Reason given by the Oracle
        failure: MutationFailure,
    },

    /// The replica diverged; leave the server
    Leave {
        /// Diagnostic for the server log
        reason: String,
    },
}

/// Mutation sent and not yet resolved
#[derive(Debug, Clone)]
pub struct PendingMutation {
    /// Target key
    pub key: FragmentKey,
    /// Debug rendering of the mutation
    pub description: String,
}

/// Client replica of one container.
#[derive(Debug)]
pub struct Replicator {
    container: Container,
    schema: Arc<Schema>,
    client_id: Uuid,
    pending: HashMap<Uuid, PendingMutation>,
}

impl Replicator {
    /// Create the replica of container `id` for client `client_id`.
    ///
    /// # Errors
    ///
    /// `ContainerInUse` if `registry` already holds `id`.
    pub fn new(registry: &ContainerRegistry, id: Uuid, client_id: Uuid, schema: Arc<Schema>) -> Result<Self, KarmaxError> {
        let container = Container::new(registry, id)?;
        Ok(Self { container, schema, client_id, pending: HashMap::new() })
    }

    /// Container id
    pub fn id(&self) -> Uuid {
        self.container.id()
    }

    /// Current replicated state
    pub fn state(&self) -> &ContainerState {
        self.container.state()
    }

    /// Unresolved mutations by id
    pub fn pending(&self) -> &HashMap<Uuid, PendingMutation> {
        &self.pending
    }

    /// Request a mutation. Nothing is applied until the Oracle echoes it.
    ///
    /// # Errors
    ///
    /// `Decode` if the mutation type is not in the schema.
    pub fn submit<E: Environment>(
        &mut self,
        env: &E,
        key: FragmentKey,
        mutation: &dyn Mutation,
    ) -> Result<(Uuid, Vec<ReplicatorAction>), KarmaxError> {
        let request = MutationRequest {
            id: env.new_uuid(),
            requester: self.client_id,
            fragment_key: key.to_string(),
            mutation: self.schema.encode_mutation(mutation)?,
        };
        let id = request.id;

        debug!(mutation_id = %id, key = %key, mutation = ?mutation, "mutation submitted");
        self.pending.insert(id, PendingMutation { key, description: format!("{mutation:?}") });
        Ok((id, vec![ReplicatorAction::Send(Message::MutationRequest(request))]))
    }

    /// Install an authoritative fragment.
    ///
    /// # Errors
    ///
    /// `Decode` if the fragment is not a registered type.
    pub fn handle_fragment_set(&mut self, set: &FragmentSet) -> Result<Vec<ReplicatorAction>, KarmaxError> {
        let fragment = self.schema.decode_fragment(&set.fragment)?;
        let key = FragmentKey::from_wire(set.fragment_key.as_str());

        let state = self.container.state().with(key.clone(), fragment);
        self.container.set_state(state.clone());
        Ok(vec![ReplicatorAction::StateChanged { key, state }])
    }

    /// Apply a mutation broadcast by the Oracle.
    ///
    /// # Errors
    ///
    /// `Decode` if the mutation is not a registered type.
    pub fn handle_mutation(&mut self, record: &MutationRequest) -> Result<Vec<ReplicatorAction>, KarmaxError> {
        let mutation = self.schema.decode_mutation(&record.mutation)?;
        let key = FragmentKey::from_wire(record.fragment_key.as_str());

        if let Err(failure) = self.container.apply(&key, mutation.as_ref(), record.requester) {
            error!(
                mutation_id = %record.id,
                key = %key,
                mutation = ?mutation,
                reason = %failure,
                "replica diverged from oracle"
            );
            return Ok(vec![ReplicatorAction::Leave {
                reason: format!("replica diverged: mutation {} ({mutation:?}) on {key} failed with {failure}", record.id),
            }]);
        }

        let mut actions = vec![ReplicatorAction::StateChanged { key, state: self.state().clone() }];
        if self.pending.remove(&record.id).is_some() {
            actions.push(ReplicatorAction::Acknowledged { mutation_id: record.id });
        }
        Ok(actions)
    }

    /// Resolve a pending mutation the Oracle rejected.
    pub fn handle_failure(&mut self, failed: &MutationFailed) -> Vec<ReplicatorAction> {
        let Some(pending) = self.pending.remove(&failed.mutation_id) else {
            warn!(mutation_id = %failed.mutation_id, reason = %failed.reason, "failure for unknown mutation");
            return Vec::new();
        };

        let failure = MutationFailure::from_reason(&failed.reason);
        debug!(mutation_id = %failed.mutation_id, key = %pending.key, reason = %failure, "mutation rejected");
        vec![ReplicatorAction::Failed {
            mutation_id: failed.mutation_id,
            key: pending.key,
            description: pending.description,
            failure,
        }]
    }
}
