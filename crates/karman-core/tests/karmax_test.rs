//! Oracle and Replicator driven by hand, without a network.
//!
//! Messages are moved between the Oracle and the replicas by the test, which
//! lets each test choose the exact interleaving.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use karman_core::{
    Environment,
    karmax::{
        ContainerRegistry, FragmentKey, KarmaxError, Mutation, MutationFailure, MutationResult, Oracle, OracleAction,
        Replicator, ReplicatorAction, Schema, mutation,
    },
};
use karman_proto::{Message, MutationRequest, Result, WireReader, WireValue, WireWriter, cbor_decode, cbor_encode};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Default)]
struct TestEnv {
    next: Arc<AtomicU64>,
}

impl Environment for TestEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, _duration: Duration) {}

    fn random_bytes(&self, buffer: &mut [u8]) {
        for chunk in buffer.chunks_mut(8) {
            let bytes = (self.next.fetch_add(1, Ordering::Relaxed) + 1).to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}

struct ScoreKey(Uuid);

impl fmt::Display for ScoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "score/{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Score {
    points: i32,
}

impl WireValue for Score {
    const TYPE_NAME: &'static str = "test.Score";

    fn encode_body(&self, dst: &mut WireWriter) -> Result<()> {
        cbor_encode(self, dst)
    }

    fn decode_body(src: &mut WireReader<'_>) -> Result<Self> {
        cbor_decode(src)
    }
}

/// Create a score; only the score's owner may do so.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InsertScore {
    owner: Uuid,
}

impl WireValue for InsertScore {
    const TYPE_NAME: &'static str = "test.InsertScore";

    fn encode_body(&self, dst: &mut WireWriter) -> Result<()> {
        cbor_encode(self, dst)
    }

    fn decode_body(src: &mut WireReader<'_>) -> Result<Self> {
        cbor_decode(src)
    }
}

impl Mutation for InsertScore {
    fn apply(&self, state: &karman_core::karmax::ContainerState, key: &FragmentKey, requester: Uuid) -> MutationResult {
        if !requester.is_nil() && requester != self.owner {
            return MutationResult::rejected("not your score");
        }
        mutation::insert(state, key, || Some(Score { points: 0 }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AddScore {
    delta: i32,
}

impl WireValue for AddScore {
    const TYPE_NAME: &'static str = "test.AddScore";

    fn encode_body(&self, dst: &mut WireWriter) -> Result<()> {
        cbor_encode(self, dst)
    }

    fn decode_body(src: &mut WireReader<'_>) -> Result<Self> {
        cbor_decode(src)
    }
}

impl Mutation for AddScore {
    fn apply(&self, state: &karman_core::karmax::ContainerState, key: &FragmentKey, _requester: Uuid) -> MutationResult {
        mutation::update(state, key, |score: &Score| Some(Score { points: score.points + self.delta }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeleteScore;

impl WireValue for DeleteScore {
    const TYPE_NAME: &'static str = "test.DeleteScore";

    fn encode_body(&self, _dst: &mut WireWriter) -> Result<()> {
        Ok(())
    }

    fn decode_body(_src: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self)
    }
}

impl Mutation for DeleteScore {
    fn apply(&self, state: &karman_core::karmax::ContainerState, key: &FragmentKey, _requester: Uuid) -> MutationResult {
        mutation::delete(state, key)
    }
}

/// Hit points; never negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Health(i32);

impl WireValue for Health {
    const TYPE_NAME: &'static str = "test.Health";

    fn encode_body(&self, dst: &mut WireWriter) -> Result<()> {
        cbor_encode(self, dst)
    }

    fn decode_body(src: &mut WireReader<'_>) -> Result<Self> {
        cbor_decode(src)
    }

    fn is_valid(&self) -> bool {
        self.0 >= 0
    }
}

/// Set hit points without any bounds check of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SetHealth(i32);

impl WireValue for SetHealth {
    const TYPE_NAME: &'static str = "test.SetHealth";

    fn encode_body(&self, dst: &mut WireWriter) -> Result<()> {
        cbor_encode(self, dst)
    }

    fn decode_body(src: &mut WireReader<'_>) -> Result<Self> {
        cbor_decode(src)
    }
}

impl Mutation for SetHealth {
    fn apply(&self, state: &karman_core::karmax::ContainerState, key: &FragmentKey, _requester: Uuid) -> MutationResult {
        mutation::upsert(state, key, |_: Option<&Health>| Some(Health(self.0)))
    }
}

fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::new()
            .with_fragment::<Score>()
            .unwrap()
            .with_fragment::<Health>()
            .unwrap()
            .with_mutation::<SetHealth>()
            .unwrap()
            .with_mutation::<InsertScore>()
            .unwrap()
            .with_mutation::<AddScore>()
            .unwrap()
            .with_mutation::<DeleteScore>()
            .unwrap(),
    )
}

const CONTAINER: Uuid = Uuid::from_u128(0xc0);

struct World {
    env: TestEnv,
    oracle: Oracle,
    replicas: Vec<(Uuid, Replicator)>,
}

impl World {
    fn new(clients: &[u128]) -> Self {
        let schema = schema();
        let oracle = Oracle::new(&ContainerRegistry::new(), CONTAINER, Arc::clone(&schema)).unwrap();
        let replicas = clients
            .iter()
            .map(|&id| {
                let id = Uuid::from_u128(id);
                (id, Replicator::new(&ContainerRegistry::new(), CONTAINER, id, Arc::clone(&schema)).unwrap())
            })
            .collect();
        Self { env: TestEnv::default(), oracle, replicas }
    }

    fn replica(&mut self, client: Uuid) -> &mut Replicator {
        self.replicas.iter_mut().find(|(id, _)| *id == client).map(|(_, replica)| replica).unwrap()
    }

    /// Deliver oracle output to the replicas, returning replica output.
    fn deliver(&mut self, actions: Vec<OracleAction>) -> Vec<(Uuid, ReplicatorAction)> {
        let mut out = Vec::new();
        for action in actions {
            let targets: Vec<(Uuid, Message)> = match action {
                OracleAction::SendTo { client_id, message } => vec![(client_id, message)],
                OracleAction::Broadcast(message) => {
                    self.replicas.iter().map(|(id, _)| (*id, message.clone())).collect()
                },
                OracleAction::StateChanged { .. } | OracleAction::LocalFailure { .. } => continue,
            };
            for (client, message) in targets {
                let replica = self.replica(client);
                let produced = match message {
                    Message::FragmentSet(set) => replica.handle_fragment_set(&set).unwrap(),
                    Message::MutationRequest(record) => replica.handle_mutation(&record).unwrap(),
                    Message::MutationFailed(failed) => replica.handle_failure(&failed),
                    other => panic!("unexpected {other:?}"),
                };
                out.extend(produced.into_iter().map(|action| (client, action)));
            }
        }
        out
    }

    /// Submit from `client` and run the request through the oracle.
    fn submit(&mut self, client: Uuid, key: &FragmentKey, mutation: &dyn Mutation) -> (Uuid, Vec<(Uuid, ReplicatorAction)>) {
        let env = self.env.clone();
        let (id, actions) = self.replica(client).submit(&env, key.clone(), mutation).unwrap();
        let [ReplicatorAction::Send(Message::MutationRequest(request))] = &actions[..] else {
            panic!("expected one request, got {actions:?}");
        };
        let oracle_actions = self.oracle.handle_request(client, request.clone()).unwrap();
        (id, self.deliver(oracle_actions))
    }

    fn points(&mut self, client: Uuid, key: &FragmentKey) -> Option<i32> {
        self.replica(client).state().get_as::<Score>(key).map(|score| score.points)
    }
}

fn a() -> Uuid {
    Uuid::from_u128(0xa)
}

fn b() -> Uuid {
    Uuid::from_u128(0xb)
}

#[test]
fn late_joiner_receives_snapshot_then_updates() {
    let mut world = World::new(&[0xa, 0xb]);
    let key = FragmentKey::new(&ScoreKey(a()));

    world.submit(a(), &key, &InsertScore { owner: a() });
    assert_eq!(world.points(a(), &key), Some(0));

    // B's replica was populated by the broadcast; wipe it to model a late
    // joiner and rebuild it from a snapshot.
    let schema = Arc::clone(world.oracle.schema());
    world.replicas[1].1 = Replicator::new(&ContainerRegistry::new(), CONTAINER, b(), schema).unwrap();
    let snapshot = world.oracle.snapshot_for(b());
    world.deliver(snapshot);
    assert_eq!(world.points(b(), &key), Some(0));

    world.submit(a(), &key, &AddScore { delta: 5 });
    assert_eq!(world.points(a(), &key), Some(5));
    assert_eq!(world.points(b(), &key), Some(5));
    assert_eq!(world.oracle.state().get_as::<Score>(&key), Some(&Score { points: 5 }));
}

#[test]
fn originator_gets_acknowledgement_others_only_state() {
    let mut world = World::new(&[0xa, 0xb]);
    let key = FragmentKey::new(&ScoreKey(a()));

    let (id, out) = world.submit(a(), &key, &InsertScore { owner: a() });

    assert!(out.iter().any(|(c, act)| *c == a() && matches!(act, ReplicatorAction::Acknowledged { mutation_id } if *mutation_id == id)));
    assert!(!out.iter().any(|(c, act)| *c == b() && matches!(act, ReplicatorAction::Acknowledged { .. })));
    assert!(world.replica(a()).pending().is_empty());
}

#[test]
fn rejection_reaches_only_the_originator() {
    let mut world = World::new(&[0xa, 0xb]);
    let key = FragmentKey::new(&ScoreKey(a()));

    let (id, out) = world.submit(b(), &key, &AddScore { delta: 1 });

    assert_eq!(out.len(), 1);
    let (client, ReplicatorAction::Failed { mutation_id, failure, .. }) = &out[0] else {
        panic!("expected failure, got {out:?}");
    };
    assert_eq!(*client, b());
    assert_eq!(*mutation_id, id);
    assert_eq!(*failure, MutationFailure::NotFound);
    assert!(world.oracle.state().is_empty());
}

#[test]
fn application_rejection_carries_its_reason() {
    let mut world = World::new(&[0xa, 0xb]);
    let key = FragmentKey::new(&ScoreKey(a()));

    let (_, out) = world.submit(b(), &key, &InsertScore { owner: a() });
    assert!(matches!(
        &out[..],
        [(_, ReplicatorAction::Failed { failure: MutationFailure::Rejected(reason), .. })] if reason == "not your score"
    ));
}

#[test]
fn impersonation_is_rejected_without_applying() {
    let mut world = World::new(&[0xa, 0xb]);
    let key = FragmentKey::new(&ScoreKey(a()));
    let schema = Arc::clone(world.oracle.schema());

    let forged = MutationRequest {
        id: Uuid::from_u128(0xf00),
        requester: a(),
        fragment_key: key.to_string(),
        mutation: schema.encode_mutation(&InsertScore { owner: a() }).unwrap(),
    };
    let actions = world.oracle.handle_request(b(), forged).unwrap();

    assert!(matches!(
        &actions[..],
        [OracleAction::SendTo { client_id, message: Message::MutationFailed(failed) }]
            if *client_id == b() && failed.reason == "imposter"
    ));
    assert!(world.oracle.state().is_empty());
}

#[test]
fn undecodable_mutation_is_an_error() {
    let mut world = World::new(&[0xa]);
    let request = MutationRequest {
        id: Uuid::from_u128(1),
        requester: a(),
        fragment_key: "score/x".into(),
        mutation: bytes::Bytes::from_static(&[1, 2, 3, 4]),
    };
    assert!(matches!(world.oracle.handle_request(a(), request), Err(KarmaxError::Decode(_))));
}

#[test]
fn oracle_submissions_replicate_with_nil_requester() {
    let mut world = World::new(&[0xa]);
    let key = FragmentKey::new(&ScoreKey(b()));
    let env = world.env.clone();

    let (_, actions) = world.oracle.submit(&env, key.clone(), &InsertScore { owner: b() }).unwrap();
    assert!(matches!(
        &actions[1],
        OracleAction::Broadcast(Message::MutationRequest(record)) if record.requester.is_nil()
    ));
    world.deliver(actions);
    assert_eq!(world.points(a(), &key), Some(0));

    let (id, failed) = world.oracle.submit(&env, key.clone(), &InsertScore { owner: b() }).unwrap();
    assert!(matches!(
        &failed[..],
        [OracleAction::LocalFailure { mutation_id, failure: MutationFailure::AlreadyExists, .. }] if *mutation_id == id
    ));
}

#[test]
fn diverged_replica_asks_to_leave() {
    let mut world = World::new(&[0xa]);
    let key = FragmentKey::new(&ScoreKey(a()));
    let schema = Arc::clone(world.oracle.schema());

    // The oracle has the fragment, the replica never saw it.
    let env = world.env.clone();
    world.oracle.submit(&env, key.clone(), &InsertScore { owner: a() }).unwrap();

    let record = MutationRequest {
        id: Uuid::from_u128(0xd),
        requester: Uuid::nil(),
        fragment_key: key.to_string(),
        mutation: schema.encode_mutation(&AddScore { delta: 1 }).unwrap(),
    };
    let actions = world.replica(a()).handle_mutation(&record).unwrap();
    assert!(matches!(&actions[..], [ReplicatorAction::Leave { reason }] if reason.contains("fragment-not-found")));
}

#[test]
fn delete_replicates() {
    let mut world = World::new(&[0xa, 0xb]);
    let key = FragmentKey::new(&ScoreKey(a()));

    world.submit(a(), &key, &InsertScore { owner: a() });
    world.submit(b(), &key, &DeleteScore);

    assert_eq!(world.points(a(), &key), None);
    assert_eq!(world.points(b(), &key), None);
    assert!(world.oracle.state().is_empty());
}

#[test]
fn invalid_fragment_is_refused_and_never_broadcast() {
    let mut world = World::new(&[0xa, 0xb]);
    let good = FragmentKey::from("hp/good");
    let bad = FragmentKey::from("hp/bad");

    world.submit(a(), &good, &SetHealth(10));
    let (id, out) = world.submit(a(), &bad, &SetHealth(-1));

    assert!(matches!(
        &out[..],
        [(client, ReplicatorAction::Failed { mutation_id, failure: MutationFailure::InvalidFragment, .. })]
            if *client == a() && *mutation_id == id
    ));
    assert_eq!(world.oracle.state().len(), 1);
    assert!(!world.oracle.state().contains(&bad));
    assert!(world.replica(a()).pending().is_empty());
    assert_eq!(world.replica(b()).state().get_as::<Health>(&good), Some(&Health(10)));
}

#[test]
fn invalid_update_keeps_the_previous_fragment() {
    let mut world = World::new(&[0xa]);
    let key = FragmentKey::from("hp/a");
    let env = world.env.clone();

    world.submit(a(), &key, &SetHealth(4));
    let (id, actions) = world.oracle.submit(&env, key.clone(), &SetHealth(-4)).unwrap();

    assert!(matches!(
        &actions[..],
        [OracleAction::LocalFailure { mutation_id, failure: MutationFailure::InvalidFragment, .. }] if *mutation_id == id
    ));
    assert_eq!(world.oracle.state().get_as::<Health>(&key), Some(&Health(4)));
}

#[test]
fn late_joiner_snapshot_after_refused_fragment() {
    let mut world = World::new(&[0xa, 0xb]);
    let good = FragmentKey::from("hp/good");
    let score = FragmentKey::new(&ScoreKey(a()));

    world.submit(a(), &good, &SetHealth(10));
    world.submit(a(), &score, &InsertScore { owner: a() });
    world.submit(a(), &FragmentKey::from("hp/bad"), &SetHealth(-1));

    let schema = Arc::clone(world.oracle.schema());
    world.replicas[1].1 = Replicator::new(&ContainerRegistry::new(), CONTAINER, b(), schema).unwrap();
    let snapshot = world.oracle.snapshot_for(b());
    assert_eq!(snapshot.len(), 2);
    world.deliver(snapshot);

    assert_eq!(world.replica(b()).state().get_as::<Health>(&good), Some(&Health(10)));
    assert_eq!(world.points(b(), &score), Some(0));

    // The late joiner keeps converging afterwards.
    world.submit(a(), &score, &AddScore { delta: 3 });
    assert_eq!(world.points(b(), &score), Some(3));
}

#[test]
fn failure_for_a_mutation_not_pending_is_ignored() {
    let mut world = World::new(&[0xa]);
    let key = FragmentKey::new(&ScoreKey(a()));

    // Resolved by its echo; a late rejection for the same id changes nothing.
    let (id, _) = world.submit(a(), &key, &InsertScore { owner: a() });
    let late = karman_proto::MutationFailed { mutation_id: id, reason: "fragment-not-found".into() };
    assert!(world.replica(a()).handle_failure(&late).is_empty());

    // Sent on an earlier connection and never seen by this replica.
    let stale = karman_proto::MutationFailed { mutation_id: Uuid::from_u128(0x57a1e), reason: "imposter".into() };
    assert!(world.replica(a()).handle_failure(&stale).is_empty());
    assert!(world.replica(a()).pending().is_empty());
    assert_eq!(world.points(a(), &key), Some(0));
}

#[test]
fn duplicate_container_in_one_registry_fails() {
    let registry = ContainerRegistry::new();
    let _oracle = Oracle::new(&registry, CONTAINER, schema()).unwrap();
    assert_eq!(
        Replicator::new(&registry, CONTAINER, a(), schema()).unwrap_err(),
        KarmaxError::ContainerInUse(CONTAINER)
    );
}

proptest! {
    /// Any interleaving of submissions from two clients leaves every replica
    /// equal to the oracle.
    #[test]
    fn replicas_converge_with_oracle(ops in prop::collection::vec((any::<bool>(), 0u8..3, -50i32..50), 1..40)) {
        let mut world = World::new(&[0xa, 0xb]);
        let keys = [FragmentKey::new(&ScoreKey(a())), FragmentKey::new(&ScoreKey(b()))];

        for (from_a, op, delta) in ops {
            let client = if from_a { a() } else { b() };
            let key = &keys[usize::from(!from_a)];
            match op {
                0 => world.submit(client, key, &InsertScore { owner: client }),
                1 => world.submit(client, key, &AddScore { delta }),
                _ => world.submit(client, key, &DeleteScore),
            };
        }

        for key in &keys {
            let expected = world.oracle.state().get_as::<Score>(key).map(|score| score.points);
            prop_assert_eq!(world.points(a(), key), expected);
            prop_assert_eq!(world.points(b(), key), expected);
        }
        prop_assert!(world.replica(a()).pending().is_empty());
        prop_assert!(world.replica(b()).pending().is_empty());
    }
}
