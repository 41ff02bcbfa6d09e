//! Fragment and mutation type registries shared by Oracle and Replicators.

use bytes::Bytes;
use karman_proto::{Registry, RegistryError, WireValue};

use super::{
    error::KarmaxError,
    fragment::{Fragment, FragmentRef, wrap_fragment},
    mutation::{Mutation, MutationRef, wrap_mutation},
};

/// The replicated types a server and its clients agree on.
///
/// Both sides must register the same types; a type unknown to the receiver
/// is a protocol violation.
#[derive(Debug, Default)]
pub struct Schema {
    fragments: Registry<FragmentRef>,
    mutations: Registry<MutationRef>,
}

impl Schema {
    /// Schema with no types
    pub fn new() -> Self {
        Self::default()
    }

    /// Register fragment type `F`.
    ///
    /// # Errors
    ///
    /// [`RegistryError`] on a duplicate name or type id.
    pub fn register_fragment<F: Fragment + WireValue>(&mut self) -> Result<(), RegistryError> {
        self.fragments.register::<F>(wrap_fragment)?;
        Ok(())
    }

    /// Register mutation type `M`.
    ///
    /// # Errors
    ///
    /// [`RegistryError`] on a duplicate name or type id.
    pub fn register_mutation<M: Mutation + WireValue>(&mut self) -> Result<(), RegistryError> {
        self.mutations.register::<M>(wrap_mutation)?;
        Ok(())
    }

    /// Builder-style [`Schema::register_fragment`]
    pub fn with_fragment<F: Fragment + WireValue>(mut self) -> Result<Self, RegistryError> {
        self.register_fragment::<F>()?;
        Ok(self)
    }

    /// Builder-style [`Schema::register_mutation`]
    pub fn with_mutation<M: Mutation + WireValue>(mut self) -> Result<Self, RegistryError> {
        self.register_mutation::<M>()?;
        Ok(self)
    }

    /// Encode a fragment with its type id
    pub fn encode_fragment(&self, fragment: &dyn Fragment) -> Result<Bytes, KarmaxError> {
        Ok(self.fragments.encode(fragment)?)
    }

    /// Decode a fragment
    pub fn decode_fragment(&self, bytes: &[u8]) -> Result<FragmentRef, KarmaxError> {
        Ok(self.fragments.decode(bytes)?)
    }

    /// Encode a mutation with its type id
    pub fn encode_mutation(&self, mutation: &dyn Mutation) -> Result<Bytes, KarmaxError> {
        Ok(self.mutations.encode(mutation)?)
    }

    /// Decode a mutation
    pub fn decode_mutation(&self, bytes: &[u8]) -> Result<MutationRef, KarmaxError> {
        Ok(self.mutations.decode(bytes)?)
    }
}
