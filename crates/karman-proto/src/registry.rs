//! Polymorphic wire-type registry.
//!
//! A [`Registry<M>`] maps concrete [`WireValue`] types to stable 32-bit type
//! ids and back, producing values of a family type `M` on decode (an enum of
//! protocol messages, an `Arc<dyn Fragment>`, ...). An encoded value is
//!
//! `[type id: u32 little-endian] + [value body]`
//!
//! # Invariants
//!
//! - **One type, one id**: type ids are derived from an explicit
//!   [`WireValue::TYPE_NAME`]. Registering a name twice, or two names hashing
//!   to the same id, fails with a [`RegistryError`]. Registries are built once
//!   at startup with an explicit list of types, so these are configuration
//!   errors and never surface while serving traffic.
//!
//! - **No silent acceptance**: a decoded value that fails
//!   [`WireValue::is_valid`] is a [`ProtocolError::InvalidValue`], and bytes
//!   left over after the body are a [`ProtocolError::TrailingBytes`].

use std::{collections::HashMap, fmt};

use bytes::{BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};

use crate::{
    errors::{ProtocolError, RegistryError, Result},
    wire::{WireReader, WireWriter},
};

/// Stable 32-bit identifier of a concrete wire type.
pub type WireTypeId = u32;

/// Derive the type id for a type name: the first four bytes of its SHA-256
/// digest, read little-endian.
pub fn type_id_of(type_name: &str) -> WireTypeId {
    let digest = Sha256::digest(type_name.as_bytes());
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// A value that knows its own byte encoding.
pub trait WireValue: Sized + Send + Sync + 'static {
    /// Fully qualified, stable name of the type (e.g. `"karman.Leave"`).
    ///
    /// Renaming it changes the type id and breaks wire compatibility.
    const TYPE_NAME: &'static str;

    /// Write the body (without the type id prefix).
    fn encode_body(&self, dst: &mut WireWriter) -> Result<()>;

    /// Reconstruct the value from its body.
    fn decode_body(src: &mut WireReader<'_>) -> Result<Self>;

    /// Semantic self-check applied on both encode and decode.
    fn is_valid(&self) -> bool {
        true
    }
}

/// Object-safe view of [`WireValue`], implemented for every wire value.
///
/// Lets the registry encode trait objects (`dyn Fragment`, `dyn Mutation`)
/// and family enums that delegate to their variants.
pub trait WireEncode {
    /// See [`WireValue::TYPE_NAME`]
    fn wire_type_name(&self) -> &'static str;

    /// See [`WireValue::is_valid`]
    fn wire_is_valid(&self) -> bool;

    /// See [`WireValue::encode_body`]
    fn wire_encode_body(&self, dst: &mut WireWriter) -> Result<()>;
}

impl<T: WireValue> WireEncode for T {
    fn wire_type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn wire_is_valid(&self) -> bool {
        self.is_valid()
    }

    fn wire_encode_body(&self, dst: &mut WireWriter) -> Result<()> {
        self.encode_body(dst)
    }
}

type DecodeFn<M> = Box<dyn Fn(&mut WireReader<'_>) -> Result<M> + Send + Sync>;

struct Entry<M> {
    type_name: &'static str,
    decode: DecodeFn<M>,
}

/// Registry of concrete wire types decoding into the family `M`.
pub struct Registry<M> {
    by_id: HashMap<WireTypeId, Entry<M>>,
    by_name: HashMap<&'static str, WireTypeId>,
}

impl<M: 'static> Registry<M> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self { by_id: HashMap::new(), by_name: HashMap::new() }
    }

    /// Register `V`, wrapping decoded values into the family with `wrap`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the name or its id is already taken.
    pub fn register<V: WireValue>(&mut self, wrap: fn(V) -> M) -> std::result::Result<WireTypeId, RegistryError> {
        let decode: DecodeFn<M> = Box::new(move |src| {
            let value = V::decode_body(src)?;
            if !value.is_valid() {
                return Err(ProtocolError::InvalidValue { type_name: V::TYPE_NAME });
            }
            Ok(wrap(value))
        });

        self.insert(type_id_of(V::TYPE_NAME), V::TYPE_NAME, decode)
    }

    /// Builder-style [`Registry::register`]
    pub fn with<V: WireValue>(mut self, wrap: fn(V) -> M) -> std::result::Result<Self, RegistryError> {
        self.register(wrap)?;
        Ok(self)
    }

    fn insert(
        &mut self,
        id: WireTypeId,
        type_name: &'static str,
        decode: DecodeFn<M>,
    ) -> std::result::Result<WireTypeId, RegistryError> {
        if self.by_name.contains_key(type_name) {
            return Err(RegistryError::DuplicateType(type_name));
        }
        if let Some(existing) = self.by_id.get(&id) {
            return Err(RegistryError::DuplicateTypeId { id, existing: existing.type_name, new: type_name });
        }

        self.by_name.insert(type_name, id);
        self.by_id.insert(id, Entry { type_name, decode });
        Ok(id)
    }

    /// Type id of a registered type name
    pub fn type_id(&self, type_name: &str) -> Option<WireTypeId> {
        self.by_name.get(type_name).copied()
    }

    /// Type name behind a registered id
    pub fn type_name(&self, id: WireTypeId) -> Option<&'static str> {
        self.by_id.get(&id).map(|entry| entry.type_name)
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Encode a value as `type id || body`.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::Unregistered`] if the value's type is unknown here
    /// - [`ProtocolError::InvalidValue`] if the value fails validation
    pub fn encode<V: WireEncode + ?Sized>(&self, value: &V) -> Result<Bytes> {
        let type_name = value.wire_type_name();
        let id = self.type_id(type_name).ok_or(ProtocolError::Unregistered(type_name))?;

        if !value.wire_is_valid() {
            return Err(ProtocolError::InvalidValue { type_name });
        }

        let mut body = WireWriter::new();
        value.wire_encode_body(&mut body)?;

        let mut dst = BytesMut::with_capacity(4 + body.len());
        dst.put_u32_le(id);
        dst.put_slice(&body.into_bytes());
        Ok(dst.freeze())
    }

    /// Decode a value previously produced by [`Registry::encode`].
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::MissingTypeId`] if fewer than 4 bytes are given
    /// - [`ProtocolError::UnknownTypeId`] if the id is not registered
    /// - any body decoding error, including [`ProtocolError::InvalidValue`]
    ///   and [`ProtocolError::TrailingBytes`]
    pub fn decode(&self, bytes: &[u8]) -> Result<M> {
        if bytes.len() < 4 {
            return Err(ProtocolError::MissingTypeId { actual: bytes.len() });
        }

        let id = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let entry = self.by_id.get(&id).ok_or(ProtocolError::UnknownTypeId(id))?;

        let mut src = WireReader::new(&bytes[4..]);
        let value = (entry.decode)(&mut src)?;
        src.finish(entry.type_name)?;
        Ok(value)
    }
}

impl<M: 'static> Default for Registry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for Registry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.by_name.keys().collect();
        names.sort();
        f.debug_struct("Registry").field("types", &names).finish()
    }
}
