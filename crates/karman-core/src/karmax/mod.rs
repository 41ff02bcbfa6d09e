//! Karmax: server-authoritative replicated state.
//!
//! State lives in a container: an immutable map from [`FragmentKey`] to
//! [`Fragment`]. The server holds the authoritative copy in an [`Oracle`];
//! each client holds a [`Replicator`]. Clients never write to their replica
//! directly. They send a [`Mutation`] to the Oracle, which applies it and
//! broadcasts it to every client in a single total order.
//!
//! # Components
//!
//! - [`key`]: Fragment keys (identity is the rendered string)
//! - [`fragment`]: The `Fragment` trait
//! - [`state`]: Copy-on-write `ContainerState`
//! - [`mutation`]: `Mutation`, results, failures and the four shapes
//! - [`container`]: Containers and the in-use registry
//! - [`schema`]: Fragment and mutation type registries
//! - [`oracle`]: Server side
//! - [`replicator`]: Client side

pub mod container;
pub mod error;
pub mod fragment;
pub mod key;
pub mod mutation;
pub mod oracle;
pub mod replicator;
pub mod schema;
pub mod state;

pub use container::{Container, ContainerRegistry};
pub use error::KarmaxError;
pub use fragment::{Fragment, FragmentRef, wrap_fragment};
pub use key::FragmentKey;
pub use mutation::{Mutation, MutationFailure, MutationRef, MutationResult, wrap_mutation};
pub use oracle::{Oracle, OracleAction};
pub use replicator::{PendingMutation, Replicator, ReplicatorAction};
pub use schema::Schema;
pub use state::ContainerState;
