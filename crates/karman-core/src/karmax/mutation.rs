//! Mutations and the four mutation shapes.
//!
//! A mutation is a deterministic function of (current state, target key,
//! requester) to a [`MutationResult`]. The Oracle and every Replicator apply
//! the same mutation to the same state, so the result must not depend on
//! anything else: no clocks, no randomness, no I/O.
//!
//! # Shapes
//!
//! ```text
//! shape    requires                     produces
//! ───────  ───────────────────────────  ───────────────────────────
//! insert   key absent                   create()          → Success
//! update   key present, of type F       change(&F)        → Success
//! upsert   key absent, or of type F     change(Option<&F>) → Success
//! delete   key present                  Delete
//! ```
//!
//! A shape callback returning `None` yields `ResultNull`, which marks a bug
//! in the mutation rather than a rejected request. A produced fragment that
//! fails [`WireValue::is_valid`] is refused with `InvalidFragment` before it
//! reaches any state.

use std::{fmt, sync::Arc};

use karman_proto::{WireEncode, WireValue};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use super::{
    fragment::{Fragment, FragmentRef},
    key::FragmentKey,
    state::ContainerState,
};

/// A replicated state change.
pub trait Mutation: WireEncode + Send + Sync + fmt::Debug {
    /// Compute the outcome against `state`.
    ///
    /// `requester` is the client that asked for the mutation, or nil when the
    /// Oracle issued it. Must be deterministic.
    fn apply(&self, state: &ContainerState, key: &FragmentKey, requester: Uuid) -> MutationResult;
}

/// Shared handle to a decoded mutation
pub type MutationRef = Arc<dyn Mutation>;

/// Registry constructor for mutation types.
///
/// ```ignore
/// registry.register::<AddScore>(wrap_mutation)?;
/// ```
pub fn wrap_mutation<M: Mutation + WireValue>(mutation: M) -> MutationRef {
    Arc::new(mutation)
}

/// Outcome of applying a mutation
#[derive(Debug, Clone)]
pub enum MutationResult {
    /// Store this fragment at the key
    Success(FragmentRef),
    /// Remove the key
    Delete,
    /// Leave the state unchanged
    Failure(MutationFailure),
}

impl MutationResult {
    /// Wrap a concrete fragment as a success
    pub fn success<F: Fragment>(fragment: F) -> Self {
        Self::Success(Arc::new(fragment))
    }

    /// Reject with an application reason
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Failure(MutationFailure::Rejected(reason.into()))
    }
}

/// Why a mutation left the state unchanged.
///
/// The `Display` form is the reason string carried by `MutationFailed`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationFailure {
    /// Insert found the key occupied
    #[error("fragment-already-exists")]
    AlreadyExists,

    /// Update or delete found the key empty
    #[error("fragment-not-found")]
    NotFound,

    /// Stored fragment is not the type the mutation expects
    #[error("fragment-type-mismatch")]
    TypeMismatch,

    /// Shape callback produced nothing (a bug in the mutation)
    #[error("result-null")]
    ResultNull,

    /// Produced fragment fails validation or cannot be encoded
    #[error("fragment-invalid")]
    InvalidFragment,

    /// Requester field does not match the sending client
    #[error("imposter")]
    Imposter,

    /// Application-level rejection
    #[error("rejected: {0}")]
    Rejected(String),
}

impl MutationFailure {
    /// Reason string for the wire
    pub fn reason(&self) -> String {
        self.to_string()
    }

    /// Parse a reason string received in `MutationFailed`.
    ///
    /// Unknown reasons come back as `Rejected` carrying the full text.
    pub fn from_reason(reason: &str) -> Self {
        match reason {
            "fragment-already-exists" => Self::AlreadyExists,
            "fragment-not-found" => Self::NotFound,
            "fragment-type-mismatch" => Self::TypeMismatch,
            "result-null" => Self::ResultNull,
            "fragment-invalid" => Self::InvalidFragment,
            "imposter" => Self::Imposter,
            other => Self::Rejected(other.strip_prefix("rejected: ").unwrap_or(other).to_string()),
        }
    }

    /// True if the failure points at a broken mutation implementation
    pub fn is_bug(&self) -> bool {
        matches!(self, Self::ResultNull)
    }
}

/// Create a fragment at an empty key.
pub fn insert<F: Fragment>(state: &ContainerState, key: &FragmentKey, create: impl FnOnce() -> Option<F>) -> MutationResult {
    if state.contains(key) {
        return MutationResult::Failure(MutationFailure::AlreadyExists);
    }
    create().map_or(MutationResult::Failure(MutationFailure::ResultNull), MutationResult::success)
}

/// Replace the fragment at an occupied key.
pub fn update<F: Fragment>(state: &ContainerState, key: &FragmentKey, change: impl FnOnce(&F) -> Option<F>) -> MutationResult {
    let Some(existing) = state.get(key) else {
        return MutationResult::Failure(MutationFailure::NotFound);
    };
    let Some(current) = existing.downcast_ref::<F>() else {
        return mismatch::<F>(key, existing);
    };
    change(current).map_or(MutationResult::Failure(MutationFailure::ResultNull), MutationResult::success)
}

/// Create or replace the fragment at a key.
pub fn upsert<F: Fragment>(
    state: &ContainerState,
    key: &FragmentKey,
    change: impl FnOnce(Option<&F>) -> Option<F>,
) -> MutationResult {
    let current = match state.get(key) {
        None => None,
        Some(existing) => match existing.downcast_ref::<F>() {
            Some(current) => Some(current),
            None => return mismatch::<F>(key, existing),
        },
    };
    change(current).map_or(MutationResult::Failure(MutationFailure::ResultNull), MutationResult::success)
}

/// Remove the fragment at an occupied key.
pub fn delete(state: &ContainerState, key: &FragmentKey) -> MutationResult {
    if state.contains(key) { MutationResult::Delete } else { MutationResult::Failure(MutationFailure::NotFound) }
}

fn mismatch<F: Fragment>(key: &FragmentKey, existing: &FragmentRef) -> MutationResult {
    warn!(
        key = %key,
        expected = std::any::type_name::<F>(),
        found = existing.wire_type_name(),
        "fragment type mismatch"
    );
    MutationResult::Failure(MutationFailure::TypeMismatch)
}
