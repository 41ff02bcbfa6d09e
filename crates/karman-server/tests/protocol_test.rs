//! The server against a hand-driven peer speaking raw frames.
//!
//! Covers what a well-behaved client never does: skipping the handshake,
//! sending garbage, lying about frame sizes.

use std::{collections::VecDeque, net::SocketAddr, time::Duration};

use bytes::Bytes;
use karman_core::karmax::Schema;
use karman_proto::{ClientInfo, Framer, Leave, Message, MutationRequest, PROTOCOL_VERSION, Registry};
use karman_runtime::{SystemEnv, TcpTransport};
use karman_server::{KarmanServer, ServerConfig, ServerEvent, ServerEvents, ServerHandle};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use uuid::Uuid;

struct RawPeer {
    stream: TcpStream,
    framer: Framer,
    registry: Registry<Message>,
    ready: VecDeque<Bytes>,
}

impl RawPeer {
    async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
            framer: Framer::new(),
            registry: Message::registry().unwrap(),
            ready: VecDeque::new(),
        }
    }

    /// Next message, or `None` once the server closed the stream
    async fn recv(&mut self) -> Option<Message> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Some(self.registry.decode(&frame).unwrap());
            }
            let n = tokio::time::timeout(Duration::from_secs(5), self.stream.read(&mut buf)).await.unwrap().unwrap_or(0);
            if n == 0 {
                return None;
            }
            self.ready.extend(self.framer.append(&buf[..n]).unwrap());
        }
    }

    async fn send(&mut self, message: &Message) {
        let payload = self.registry.encode(message).unwrap();
        self.send_raw(&self.framer.frame(&payload).unwrap()).await;
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    async fn expect_leave(&mut self) -> String {
        loop {
            match self.recv().await {
                Some(Message::Leave(Leave { reason })) => return reason,
                Some(_) => {},
                None => panic!("closed without Leave"),
            }
        }
    }

    async fn expect_closed(&mut self) {
        while self.recv().await.is_some() {}
    }

    async fn join(&mut self, client_id: Uuid) {
        assert!(matches!(self.recv().await, Some(Message::ServerInfo(_))));
        let info = ClientInfo {
            client_id,
            client_name: "raw".to_string(),
            secret: Uuid::from_u128(77),
            server_password: String::new(),
        };
        self.send(&Message::ClientInfo(info)).await;
    }
}

async fn start() -> (ServerHandle<SystemEnv>, ServerEvents, SocketAddr) {
    let server = KarmanServer::new(ServerConfig::default(), SystemEnv::new(), Schema::new()).unwrap();
    let transport = TcpTransport::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
    let addr = transport.local_addr().unwrap();
    let (handle, events) = server.start(transport).unwrap();
    (handle, events, addr)
}

async fn wait_for(events: &mut ServerEvents, matches: impl Fn(&ServerEvent) -> bool) -> ServerEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
        if matches(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn server_speaks_first() {
    let (server, _events, addr) = start().await;
    let mut peer = RawPeer::connect(addr).await;

    let Some(Message::ServerInfo(info)) = peer.recv().await else {
        panic!("expected ServerInfo");
    };
    assert_eq!(info.protocol_version, PROTOCOL_VERSION);
    assert_eq!(info.server_name, "karman");
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn skipping_the_handshake_is_a_violation() {
    let (server, _events, addr) = start().await;
    let mut peer = RawPeer::connect(addr).await;
    assert!(matches!(peer.recv().await, Some(Message::ServerInfo(_))));

    let request = MutationRequest {
        id: Uuid::from_u128(1),
        requester: Uuid::from_u128(2),
        fragment_key: "score/x".to_string(),
        mutation: Bytes::new(),
    };
    peer.send(&Message::MutationRequest(request)).await;

    assert!(!peer.expect_leave().await.is_empty());
    peer.expect_closed().await;
    assert!(server.connected_clients().await.unwrap().is_empty());
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_type_id_is_a_violation() {
    let (server, _events, addr) = start().await;
    let mut peer = RawPeer::connect(addr).await;
    assert!(matches!(peer.recv().await, Some(Message::ServerInfo(_))));

    let garbage = peer.framer.frame(&[0xde, 0xad, 0xbe, 0xef, 1, 2, 3]).unwrap();
    peer.send_raw(&garbage).await;

    assert!(peer.expect_leave().await.contains("unknown"));
    peer.expect_closed().await;
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn oversized_length_prefix_drops_the_connection() {
    let (server, _events, addr) = start().await;
    let mut peer = RawPeer::connect(addr).await;
    assert!(matches!(peer.recv().await, Some(Message::ServerInfo(_))));

    peer.send_raw(&i32::MAX.to_le_bytes()).await;

    peer.expect_leave().await;
    peer.expect_closed().await;
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn undecodable_mutation_disconnects_but_keeps_identity() {
    let (server, mut events, addr) = start().await;
    let client_id = Uuid::from_u128(42);
    let mut peer = RawPeer::connect(addr).await;
    peer.join(client_id).await;
    wait_for(&mut events, |event| matches!(event, ServerEvent::Connected { .. })).await;

    let request = MutationRequest {
        id: Uuid::from_u128(1),
        requester: client_id,
        fragment_key: "score/x".to_string(),
        mutation: Bytes::from_static(&[9, 9, 9, 9]),
    };
    peer.send(&Message::MutationRequest(request)).await;

    peer.expect_leave().await;
    peer.expect_closed().await;
    wait_for(&mut events, |event| matches!(event, ServerEvent::Disconnected { client_id: id } if *id == client_id)).await;

    // Same secret may come back
    let mut again = RawPeer::connect(addr).await;
    again.join(client_id).await;
    wait_for(&mut events, |event| matches!(event, ServerEvent::Connected { client_id: id } if *id == client_id)).await;
    assert_eq!(server.connected_clients().await.unwrap(), vec![client_id]);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_says_goodbye() {
    let (server, mut events, addr) = start().await;
    let mut peer = RawPeer::connect(addr).await;
    peer.join(Uuid::from_u128(5)).await;
    wait_for(&mut events, |event| matches!(event, ServerEvent::Connected { .. })).await;

    server.shutdown().await.unwrap();

    assert_eq!(peer.expect_leave().await, "server shutting down");
    peer.expect_closed().await;
    assert!(server.connected_clients().await.is_err());
}

#[tokio::test]
async fn no_session_starts_after_shutdown() {
    let (server, _events, addr) = start().await;
    let mut peer = RawPeer::connect(addr).await;
    peer.join(Uuid::from_u128(6)).await;

    server.shutdown().await.unwrap();
    assert_eq!(peer.expect_leave().await, "server shutting down");

    // Either refused outright or closed without a ServerInfo
    if let Ok(mut late) = TcpStream::connect(addr).await {
        let mut buf = [0u8; 64];
        let read = tokio::time::timeout(Duration::from_secs(5), late.read(&mut buf)).await.unwrap();
        assert!(matches!(read, Ok(0) | Err(_)), "late connection got {read:?}");
    }
}
