//! Error types for the Karman wire format.
//!
//! Two families are kept apart on purpose:
//! - [`ProtocolError`]: the peer sent something we cannot accept. Always fatal
//!   to the offending connection.
//! - [`RegistryError`]: the process registered its wire types inconsistently.
//!   Raised while building a registry at startup, never at runtime.

use thiserror::Error;

/// Protocol-level errors raised while framing, encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    // Framing errors
    /// Payload exceeds the configured maximum frame size
    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    FrameTooLarge {
        /// Actual payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Decoded length prefix lies outside `[0, max]`
    #[error("invalid frame length {length} (allowed 0..={max})")]
    InvalidLength {
        /// Length as read from the wire
        length: i64,
        /// Maximum allowed size
        max: usize,
    },

    // Field decoding errors
    /// Buffer ended before a field could be read
    #[error("truncated {field}: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Field that was being read
        field: &'static str,
        /// Bytes required
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// A string field is not valid UTF-8
    #[error("invalid UTF-8 in {field}")]
    InvalidUtf8 {
        /// Field that was being read
        field: &'static str,
    },

    /// Bytes remain after the last field of a value
    #[error("{remaining} trailing bytes after {type_name}")]
    TrailingBytes {
        /// Value that was decoded
        type_name: &'static str,
        /// Number of unread bytes
        remaining: usize,
    },

    // Registry errors
    /// Encoded value is shorter than the 4-byte type id prefix
    #[error("encoded value too short: {actual} bytes, need at least 4")]
    MissingTypeId {
        /// Bytes available
        actual: usize,
    },

    /// Type id prefix does not name a registered type
    #[error("unknown type id {0:#010x}")]
    UnknownTypeId(u32),

    /// Value was asked to be encoded but its type was never registered
    #[error("type {0} is not registered")]
    Unregistered(&'static str),

    /// Value failed its own validation check
    #[error("invalid {type_name} value")]
    InvalidValue {
        /// Type that failed validation
        type_name: &'static str,
    },

    // CBOR errors (application payloads)
    /// Failed to encode data as CBOR
    #[error("failed to encode CBOR: {0}")]
    CborEncode(String),

    /// Failed to decode CBOR data
    #[error("failed to decode CBOR: {0}")]
    CborDecode(String),
}

/// Configuration errors detected while building a [`crate::Registry`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Two distinct type names hash to the same type id
    #[error("type id {id:#010x} of {new} collides with {existing}")]
    DuplicateTypeId {
        /// Colliding id
        id: u32,
        /// Type already holding the id
        existing: &'static str,
        /// Type that was being registered
        new: &'static str,
    },

    /// The same type name was registered twice
    #[error("type {0} registered twice")]
    DuplicateType(&'static str),
}

/// Convenient Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
