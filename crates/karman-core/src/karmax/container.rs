//! Containers and the in-use container registry.
//!
//! # Invariants
//!
//! - At most one live container per id within a [`ContainerRegistry`]. The
//!   Oracle and the Replicators of a process (in tests, several clients plus a
//!   server) share one registry, so each side needs its own registry.
//! - The id is released when the container is dropped.

use std::{
    collections::HashSet,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use karman_proto::WireEncode;
use tracing::debug;
use uuid::Uuid;

use super::{
    error::KarmaxError,
    fragment::Fragment,
    key::FragmentKey,
    mutation::{Mutation, MutationFailure, MutationResult},
    state::ContainerState,
};

/// Set of container ids currently in use.
///
/// Cheap to clone; clones share the set.
#[derive(Clone, Default)]
pub struct ContainerRegistry {
    in_use: Arc<Mutex<HashSet<Uuid>>>,
}

impl ContainerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// True if a live container holds `id`
    pub fn is_in_use(&self, id: Uuid) -> bool {
        self.lock().contains(&id)
    }

    /// Number of live containers
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if no container is live
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn claim(&self, id: Uuid) -> Result<Lease, KarmaxError> {
        if !self.lock().insert(id) {
            return Err(KarmaxError::ContainerInUse(id));
        }
        Ok(Lease { id, registry: self.clone() })
    }

    // The set stays consistent even if a holder panicked mid-operation, so a
    // poisoned lock is recovered rather than propagated.
    fn lock(&self) -> MutexGuard<'_, HashSet<Uuid>> {
        self.in_use.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl fmt::Debug for ContainerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerRegistry").field("in_use", &self.len()).finish()
    }
}

struct Lease {
    id: Uuid,
    registry: ContainerRegistry,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}

/// Identified holder of a [`ContainerState`].
pub struct Container {
    lease: Lease,
    state: ContainerState,
}

impl Container {
    /// Claim `id` in `registry` and start with an empty state.
    ///
    /// # Errors
    ///
    /// `ContainerInUse` if a live container already holds `id`.
    pub fn new(registry: &ContainerRegistry, id: Uuid) -> Result<Self, KarmaxError> {
        let lease = registry.claim(id)?;
        debug!(container_id = %id, "container created");
        Ok(Self { lease, state: ContainerState::new() })
    }

    /// Container id
    pub fn id(&self) -> Uuid {
        self.lease.id
    }

    /// Current state
    pub fn state(&self) -> &ContainerState {
        &self.state
    }

    /// Replace the state wholesale
    pub fn set_state(&mut self, state: ContainerState) {
        self.state = state;
    }

    /// Apply `mutation` at `key`, replacing the state on success.
    ///
    /// # Errors
    ///
    /// The mutation's failure; the state is left unchanged.
    pub fn apply(&mut self, key: &FragmentKey, mutation: &dyn Mutation, requester: Uuid) -> Result<(), MutationFailure> {
        self.apply_checked(key, mutation, requester, |_| true)
    }

    /// [`Container::apply`] with an extra check on the produced fragment.
    ///
    /// A fragment that fails its own validation or `accept` is never stored.
    ///
    /// # Errors
    ///
    /// The mutation's failure, or `InvalidFragment`; the state is left
    /// unchanged.
    pub fn apply_checked(
        &mut self,
        key: &FragmentKey,
        mutation: &dyn Mutation,
        requester: Uuid,
        accept: impl FnOnce(&dyn Fragment) -> bool,
    ) -> Result<(), MutationFailure> {
        match mutation.apply(&self.state, key, requester) {
            MutationResult::Success(fragment) => {
                if !fragment.wire_is_valid() || !accept(fragment.as_ref()) {
                    return Err(MutationFailure::InvalidFragment);
                }
                self.state = self.state.with(key.clone(), fragment);
                Ok(())
            },
            MutationResult::Delete => {
                self.state = self.state.without(key);
                Ok(())
            },
            MutationResult::Failure(failure) => Err(failure),
        }
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container").field("id", &self.id()).field("state", &self.state).finish()
    }
}

#[cfg(test)]
mod tests {
    use karman_proto::{Result, WireReader, WireValue, WireWriter};

    use super::*;
    use crate::karmax::mutation::upsert;

    #[derive(Debug)]
    struct Hp(i32);

    impl WireValue for Hp {
        const TYPE_NAME: &'static str = "test.Hp";

        fn encode_body(&self, dst: &mut WireWriter) -> Result<()> {
            dst.put_i32(self.0);
            Ok(())
        }

        fn decode_body(src: &mut WireReader<'_>) -> Result<Self> {
            Ok(Self(src.i32("hp")?))
        }

        fn is_valid(&self) -> bool {
            self.0 >= 0
        }
    }

    #[derive(Debug)]
    struct SetHp(i32);

    impl WireValue for SetHp {
        const TYPE_NAME: &'static str = "test.SetHp";

        fn encode_body(&self, dst: &mut WireWriter) -> Result<()> {
            dst.put_i32(self.0);
            Ok(())
        }

        fn decode_body(src: &mut WireReader<'_>) -> Result<Self> {
            Ok(Self(src.i32("hp")?))
        }
    }

    impl Mutation for SetHp {
        fn apply(&self, state: &ContainerState, key: &FragmentKey, _requester: Uuid) -> MutationResult {
            upsert(state, key, |_: Option<&Hp>| Some(Hp(self.0)))
        }
    }

    #[test]
    fn invalid_fragment_is_never_stored() {
        let registry = ContainerRegistry::new();
        let mut container = Container::new(&registry, Uuid::from_u128(1)).unwrap();
        let key = FragmentKey::from("hp/a");

        container.apply(&key, &SetHp(10), Uuid::nil()).unwrap();
        assert_eq!(container.apply(&key, &SetHp(-1), Uuid::nil()), Err(MutationFailure::InvalidFragment));
        assert_eq!(container.state().get_as::<Hp>(&key).map(|hp| hp.0), Some(10));
    }

    #[test]
    fn refused_by_caller_check() {
        let registry = ContainerRegistry::new();
        let mut container = Container::new(&registry, Uuid::from_u128(1)).unwrap();
        let key = FragmentKey::from("hp/a");

        let result = container.apply_checked(&key, &SetHp(3), Uuid::nil(), |_| false);
        assert_eq!(result, Err(MutationFailure::InvalidFragment));
        assert!(container.state().is_empty());
    }

    #[test]
    fn duplicate_id_is_rejected_until_released() {
        let registry = ContainerRegistry::new();
        let id = Uuid::from_u128(7);

        let first = Container::new(&registry, id).unwrap();
        assert!(registry.is_in_use(id));
        assert_eq!(Container::new(&registry, id).unwrap_err(), KarmaxError::ContainerInUse(id));

        drop(first);
        assert!(!registry.is_in_use(id));
        assert!(Container::new(&registry, id).is_ok());
    }

    #[test]
    fn separate_registries_do_not_conflict() {
        let id = Uuid::from_u128(7);
        let server = ContainerRegistry::new();
        let client = ContainerRegistry::new();

        let _oracle = Container::new(&server, id).unwrap();
        let _replica = Container::new(&client, id).unwrap();
        assert_eq!(server.len(), 1);
        assert_eq!(client.len(), 1);
    }
}
