//! Protocol messages.
//!
//! Every message is a [`WireValue`] with a hand-written little-endian layout
//! (see [`crate::wire`]). The [`Message`] enum is the family the message
//! registry decodes into; applications extend it with their own packet types
//! through [`Message::app`].
//!
//! # Handshake
//!
//! ```text
//! server                         client
//!   │ ── ServerInfo ──────────────> │
//!   │ <────────────── ClientInfo ── │
//!   │ ── FragmentSet × n ─────────> │   (initial snapshot)
//!   │ <────────── MutationRequest ─ │
//!   │ ── MutationRequest (echo) ──> │   (to every client)
//!   │ ── MutationFailed ──────────> │   (originator only)
//!   │ <──────────────────── Leave ─ │
//! ```

use std::{any::Any, fmt, sync::Arc};

use bytes::Bytes;
use uuid::Uuid;

use crate::{
    errors::{RegistryError, Result},
    registry::{Registry, WireEncode, WireValue},
    wire::{WireReader, WireWriter},
};

/// Protocol version announced in [`ServerInfo`]; clients refuse mismatches.
pub const PROTOCOL_VERSION: &str = "karman/1";

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 14641;

/// First message on every connection, sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// Identity of this server process
    pub server_id: Uuid,
    /// Human-readable server name
    pub server_name: String,
    /// Application the server hosts
    pub game_id: Uuid,
    /// Application version
    pub game_version: String,
    /// See [`PROTOCOL_VERSION`]
    pub protocol_version: String,
}

impl WireValue for ServerInfo {
    const TYPE_NAME: &'static str = "karman.ServerInfo";

    fn encode_body(&self, dst: &mut WireWriter) -> Result<()> {
        dst.put_guid(self.server_id);
        dst.put_string(&self.server_name);
        dst.put_guid(self.game_id);
        dst.put_string(&self.game_version);
        dst.put_string(&self.protocol_version);
        Ok(())
    }

    fn decode_body(src: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            server_id: src.guid("server_id")?,
            server_name: src.string("server_name")?,
            game_id: src.guid("game_id")?,
            game_version: src.string("game_version")?,
            protocol_version: src.string("protocol_version")?,
        })
    }
}

/// Client reply to [`ServerInfo`], claiming or creating an identity.
///
/// # Security
///
/// - **Debug Redaction**: `secret` and `server_password` are redacted from
///   the `Debug` output so they never reach the logs.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Durable client identity
    pub client_id: Uuid,
    /// Display name
    pub client_name: String,
    /// Shared secret proving ownership of `client_id` on reconnection
    pub secret: Uuid,
    /// Server password (empty if none)
    pub server_password: String,
}

impl fmt::Debug for ClientInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientInfo")
            .field("client_id", &self.client_id)
            .field("client_name", &self.client_name)
            .field("secret", &"<redacted>")
            .field("server_password", &format!("<redacted {} bytes>", self.server_password.len()))
            .finish()
    }
}

impl WireValue for ClientInfo {
    const TYPE_NAME: &'static str = "karman.ClientInfo";

    fn encode_body(&self, dst: &mut WireWriter) -> Result<()> {
        dst.put_guid(self.client_id);
        dst.put_string(&self.client_name);
        dst.put_guid(self.secret);
        dst.put_string(&self.server_password);
        Ok(())
    }

    fn decode_body(src: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            client_id: src.guid("client_id")?,
            client_name: src.string("client_name")?,
            secret: src.guid("secret")?,
            server_password: src.string("server_password")?,
        })
    }

    fn is_valid(&self) -> bool {
        !self.client_id.is_nil() && !self.secret.is_nil()
    }
}

/// Session termination notice, sent by either side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leave {
    /// Human-readable reason
    pub reason: String,
}

impl Leave {
    /// Create a leave notice
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl WireValue for Leave {
    const TYPE_NAME: &'static str = "karman.Leave";

    fn encode_body(&self, dst: &mut WireWriter) -> Result<()> {
        dst.put_string(&self.reason);
        Ok(())
    }

    fn decode_body(src: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self { reason: src.string("reason")? })
    }
}

/// A mutation against one fragment key.
///
/// Sent client → server as a request, and server → every client as the
/// record of an accepted mutation. `requester` is nil when the server itself
/// issued the mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRequest {
    /// Unique mutation id
    pub id: Uuid,
    /// Client that asked for the mutation
    pub requester: Uuid,
    /// Rendered fragment key
    pub fragment_key: String,
    /// Mutation encoded with the mutation registry
    pub mutation: Bytes,
}

impl WireValue for MutationRequest {
    const TYPE_NAME: &'static str = "karman.MutationRequest";

    fn encode_body(&self, dst: &mut WireWriter) -> Result<()> {
        dst.put_guid(self.id);
        dst.put_guid(self.requester);
        dst.put_string(&self.fragment_key);
        dst.put_bytes(&self.mutation);
        Ok(())
    }

    fn decode_body(src: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            id: src.guid("id")?,
            requester: src.guid("requester")?,
            fragment_key: src.string("fragment_key")?,
            mutation: Bytes::copy_from_slice(src.bytes("mutation")?),
        })
    }

    fn is_valid(&self) -> bool {
        !self.id.is_nil() && !self.fragment_key.is_empty()
    }
}

/// Authoritative content of one fragment key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentSet {
    /// Rendered fragment key
    pub fragment_key: String,
    /// Fragment encoded with the fragment registry
    pub fragment: Bytes,
}

impl WireValue for FragmentSet {
    const TYPE_NAME: &'static str = "karman.FragmentSet";

    fn encode_body(&self, dst: &mut WireWriter) -> Result<()> {
        dst.put_string(&self.fragment_key);
        dst.put_bytes(&self.fragment);
        Ok(())
    }

    fn decode_body(src: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            fragment_key: src.string("fragment_key")?,
            fragment: Bytes::copy_from_slice(src.bytes("fragment")?),
        })
    }

    fn is_valid(&self) -> bool {
        !self.fragment_key.is_empty()
    }
}

/// Rejection of a mutation, sent only to its originator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationFailed {
    /// Id of the rejected mutation
    pub mutation_id: Uuid,
    /// Stable failure reason
    pub reason: String,
}

impl WireValue for MutationFailed {
    const TYPE_NAME: &'static str = "karman.MutationFailed";

    fn encode_body(&self, dst: &mut WireWriter) -> Result<()> {
        dst.put_guid(self.mutation_id);
        dst.put_string(&self.reason);
        Ok(())
    }

    fn decode_body(src: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self { mutation_id: src.guid("mutation_id")?, reason: src.string("reason")? })
    }
}

/// Object-safe application packet.
pub trait AppValue: WireEncode + Any + Send + Sync + fmt::Debug {
    /// Upcast for downcasting to the concrete type
    fn as_any(&self) -> &dyn Any;
}

impl<T: WireValue + fmt::Debug> AppValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An application-defined message carried alongside the protocol messages.
#[derive(Debug, Clone)]
pub struct AppPacket(Arc<dyn AppValue>);

impl AppPacket {
    /// Wrap a concrete application value
    pub fn new<V: WireValue + fmt::Debug>(value: V) -> Self {
        Self(Arc::new(value))
    }

    /// Type name of the wrapped value
    pub fn type_name(&self) -> &'static str {
        self.0.wire_type_name()
    }

    /// Borrow the wrapped value as `V`, if that is its type
    pub fn downcast_ref<V: 'static>(&self) -> Option<&V> {
        self.0.as_any().downcast_ref::<V>()
    }

    /// Borrow the wrapped value as [`Any`]
    pub fn as_any(&self) -> &dyn Any {
        self.0.as_any()
    }
}

impl WireEncode for AppPacket {
    fn wire_type_name(&self) -> &'static str {
        self.0.wire_type_name()
    }

    fn wire_is_valid(&self) -> bool {
        self.0.wire_is_valid()
    }

    fn wire_encode_body(&self, dst: &mut WireWriter) -> Result<()> {
        self.0.wire_encode_body(dst)
    }
}

/// Every message that can travel over a Karman connection.
#[derive(Debug, Clone)]
pub enum Message {
    /// See [`ServerInfo`]
    ServerInfo(ServerInfo),
    /// See [`ClientInfo`]
    ClientInfo(ClientInfo),
    /// See [`Leave`]
    Leave(Leave),
    /// See [`MutationRequest`]
    MutationRequest(MutationRequest),
    /// See [`FragmentSet`]
    FragmentSet(FragmentSet),
    /// See [`MutationFailed`]
    MutationFailed(MutationFailed),
    /// Application packet
    App(AppPacket),
}

impl Message {
    /// Registry with every protocol message registered.
    ///
    /// Applications add their packet types with
    /// `registry.register::<MyPacket>(Message::app)`.
    pub fn registry() -> std::result::Result<Registry<Self>, RegistryError> {
        Registry::new()
            .with(Self::ServerInfo)?
            .with(Self::ClientInfo)?
            .with(Self::Leave)?
            .with(Self::MutationRequest)?
            .with(Self::FragmentSet)?
            .with(Self::MutationFailed)
    }

    /// Wrap an application value; usable as a registry constructor
    pub fn app<V: WireValue + fmt::Debug>(value: V) -> Self {
        Self::App(AppPacket::new(value))
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        self.wire_type_name()
    }

    fn inner(&self) -> &dyn WireEncode {
        match self {
            Self::ServerInfo(inner) => inner,
            Self::ClientInfo(inner) => inner,
            Self::Leave(inner) => inner,
            Self::MutationRequest(inner) => inner,
            Self::FragmentSet(inner) => inner,
            Self::MutationFailed(inner) => inner,
            Self::App(inner) => inner,
        }
    }
}

impl WireEncode for Message {
    fn wire_type_name(&self) -> &'static str {
        self.inner().wire_type_name()
    }

    fn wire_is_valid(&self) -> bool {
        self.inner().wire_is_valid()
    }

    fn wire_encode_body(&self, dst: &mut WireWriter) -> Result<()> {
        self.inner().wire_encode_body(dst)
    }
}

impl From<Leave> for Message {
    fn from(value: Leave) -> Self {
        Self::Leave(value)
    }
}

impl From<MutationRequest> for Message {
    fn from(value: MutationRequest) -> Self {
        Self::MutationRequest(value)
    }
}

impl From<FragmentSet> for Message {
    fn from(value: FragmentSet) -> Self {
        Self::FragmentSet(value)
    }
}

impl From<MutationFailed> for Message {
    fn from(value: MutationFailed) -> Self {
        Self::MutationFailed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProtocolError;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Chat {
        text: String,
    }

    impl WireValue for Chat {
        const TYPE_NAME: &'static str = "test.Chat";

        fn encode_body(&self, dst: &mut WireWriter) -> Result<()> {
            dst.put_raw(self.text.as_bytes());
            Ok(())
        }

        fn decode_body(src: &mut WireReader<'_>) -> Result<Self> {
            Ok(Self { text: src.raw_string("text")? })
        }
    }

    #[test]
    fn leave_wire_layout() {
        let registry = Message::registry().unwrap();
        let bytes = registry.encode(&Message::Leave(Leave::new("bye"))).unwrap();

        insta::assert_snapshot!(hex::encode(&bytes), @"90933ce203000000627965");
    }

    #[test]
    fn server_info_round_trip() {
        let registry = Message::registry().unwrap();
        let info = ServerInfo {
            server_id: Uuid::from_u128(1),
            server_name: "arena".to_string(),
            game_id: Uuid::from_u128(2),
            game_version: "0.3.1".to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
        };

        let bytes = registry.encode(&Message::ServerInfo(info.clone())).unwrap();
        let decoded = registry.decode(&bytes).unwrap();
        assert!(matches!(decoded, Message::ServerInfo(ref got) if *got == info));
    }

    #[test]
    fn mutation_request_round_trip() {
        let registry = Message::registry().unwrap();
        let request = MutationRequest {
            id: Uuid::from_u128(7),
            requester: Uuid::from_u128(8),
            fragment_key: "score/A".to_string(),
            mutation: Bytes::from_static(&[1, 2, 3, 4]),
        };

        let bytes = registry.encode(&Message::from(request.clone())).unwrap();
        let decoded = registry.decode(&bytes).unwrap();
        assert!(matches!(decoded, Message::MutationRequest(ref got) if *got == request));
    }

    #[test]
    fn client_info_with_nil_secret_is_rejected() {
        let registry = Message::registry().unwrap();
        let info = ClientInfo {
            client_id: Uuid::from_u128(1),
            client_name: "ann".to_string(),
            secret: Uuid::from_u128(2),
            server_password: String::new(),
        };
        let mut bytes = registry.encode(&Message::ClientInfo(info)).unwrap().to_vec();

        // Zero the secret in place: id(4) + client_id(16) + name(4 + 3)
        let secret_at = 4 + 16 + 4 + 3;
        bytes[secret_at..secret_at + 16].fill(0);

        let result = registry.decode(&bytes);
        assert!(matches!(result, Err(ProtocolError::InvalidValue { type_name: "karman.ClientInfo" })));
    }

    #[test]
    fn client_info_debug_redacts_secrets() {
        let info = ClientInfo {
            client_id: Uuid::from_u128(1),
            client_name: "ann".to_string(),
            secret: Uuid::from_u128(0xfeed),
            server_password: "hunter2".to_string(),
        };

        let debug = format!("{info:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains(&Uuid::from_u128(0xfeed).to_string()));
    }

    #[test]
    fn app_packets_round_trip_through_the_same_registry() {
        let mut registry = Message::registry().unwrap();
        registry.register::<Chat>(Message::app).unwrap();

        let bytes = registry.encode(&Message::app(Chat { text: "gg".to_string() })).unwrap();
        let decoded = registry.decode(&bytes).unwrap();

        let Message::App(packet) = decoded else { panic!("expected app packet") };
        assert_eq!(packet.type_name(), "test.Chat");
        assert_eq!(packet.downcast_ref::<Chat>(), Some(&Chat { text: "gg".to_string() }));
    }
}
