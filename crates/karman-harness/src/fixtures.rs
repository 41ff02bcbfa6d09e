//! A small replicated game model shared by the scenario tests.
//!
//! One [`Player`] fragment per client under `player/<client id>`:
//!
//! | mutation      | algebra | rule                                    |
//! |---------------|---------|-----------------------------------------|
//! | [`Enter`]     | insert  | only for your own key                   |
//! | [`AddPoints`] | update  | anyone; negative totals are rejected    |
//! | [`Rename`]    | upsert  | only for your own key                   |
//! | [`Retire`]    | delete  | only for your own key                   |
//!
//! The server (nil requester) may do anything.

use std::fmt;

use karman_core::karmax::{ContainerState, FragmentKey, Mutation, MutationResult, Schema, mutation};
use karman_proto::{RegistryError, Result, WireReader, WireValue, WireWriter, cbor_decode, cbor_encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Key of a player's fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerKey(pub Uuid);

impl PlayerKey {
    /// Replicated key
    pub fn key(self) -> FragmentKey {
        FragmentKey::new(&self)
    }

    fn owned_by(key: &FragmentKey, requester: Uuid) -> bool {
        requester.is_nil() || key.as_str() == PlayerKey(requester).to_string()
    }
}

impl fmt::Display for PlayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player/{}", self.0)
    }
}

macro_rules! cbor_wire {
    ($ty:ty, $name:literal) => {
        impl WireValue for $ty {
            const TYPE_NAME: &'static str = $name;

            fn encode_body(&self, dst: &mut WireWriter) -> Result<()> {
                cbor_encode(self, dst)
            }

            fn decode_body(src: &mut WireReader<'_>) -> Result<Self> {
                cbor_decode(src)
            }
        }
    };
}

/// Replicated player record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Display name
    pub name: String,
    /// Current points
    pub points: i64,
}

cbor_wire!(Player, "lobby.Player");

/// Create your player record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enter {
    /// Display name
    pub name: String,
}

cbor_wire!(Enter, "lobby.Enter");

impl Mutation for Enter {
    fn apply(&self, state: &ContainerState, key: &FragmentKey, requester: Uuid) -> MutationResult {
        if !PlayerKey::owned_by(key, requester) {
            return MutationResult::rejected("not your player");
        }
        mutation::insert(state, key, || Some(Player { name: self.name.clone(), points: 0 }))
    }
}

/// Add (or subtract) points
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddPoints {
    /// Change in points
    pub delta: i64,
}

cbor_wire!(AddPoints, "lobby.AddPoints");

impl Mutation for AddPoints {
    fn apply(&self, state: &ContainerState, key: &FragmentKey, _requester: Uuid) -> MutationResult {
        let Some(player) = state.get_as::<Player>(key) else {
            // Missing or another type: the update reports which
            return mutation::update(state, key, |player: &Player| Some(player.clone()));
        };
        let points = player.points + self.delta;
        if points < 0 {
            return MutationResult::rejected("points cannot go negative");
        }
        mutation::update(state, key, |player: &Player| Some(Player { points, ..player.clone() }))
    }
}

/// Set your name, creating the record if needed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rename {
    /// New display name
    pub name: String,
}

cbor_wire!(Rename, "lobby.Rename");

impl Mutation for Rename {
    fn apply(&self, state: &ContainerState, key: &FragmentKey, requester: Uuid) -> MutationResult {
        if !PlayerKey::owned_by(key, requester) {
            return MutationResult::rejected("not your player");
        }
        mutation::upsert(state, key, |existing: Option<&Player>| {
            Some(Player { name: self.name.clone(), points: existing.map_or(0, |player| player.points) })
        })
    }
}

/// Remove your player record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Retire;

cbor_wire!(Retire, "lobby.Retire");

impl Mutation for Retire {
    fn apply(&self, state: &ContainerState, key: &FragmentKey, requester: Uuid) -> MutationResult {
        if !PlayerKey::owned_by(key, requester) {
            return MutationResult::rejected("not your player");
        }
        mutation::delete(state, key)
    }
}

/// Schema with every fixture type registered.
///
/// # Errors
///
/// Never in practice; type names are distinct.
pub fn lobby_schema() -> std::result::Result<Schema, RegistryError> {
    Schema::new()
        .with_fragment::<Player>()?
        .with_mutation::<Enter>()?
        .with_mutation::<AddPoints>()?
        .with_mutation::<Rename>()?
        .with_mutation::<Retire>()
}
