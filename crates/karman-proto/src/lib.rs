//! Wire format for the Karman transport.
//!
//! A connection carries a stream of length-prefixed frames. Each frame holds
//! one encoded value: a 4-byte type id followed by the value's own body
//! encoding. No schema is negotiated; both ends build the same
//! [`Registry`] at startup by listing their wire types explicitly.
//!
//! ```text
//! [i32 length] [u32 type id] [body ...........]
//! └─ Framer ─┘ └──────── Registry ────────────┘
//! ```
//!
//! # Security
//!
//! Frame lengths are validated before allocation, every decoded value is
//! checked with [`WireValue::is_valid`], and trailing bytes are rejected.
//! Decoding never panics on malformed input; it returns a [`ProtocolError`].
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod framer;
pub mod messages;
pub mod registry;
pub mod wire;

pub use errors::{ProtocolError, RegistryError, Result};
pub use framer::{Framer, MAX_FRAME_SIZE};
pub use messages::{
    AppPacket, ClientInfo, DEFAULT_PORT, FragmentSet, Leave, Message, MutationFailed, MutationRequest,
    PROTOCOL_VERSION, ServerInfo,
};
pub use registry::{Registry, WireEncode, WireTypeId, WireValue, type_id_of};
pub use wire::{WireReader, WireWriter, cbor_decode, cbor_encode};
