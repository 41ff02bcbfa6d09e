//! Typed dispatch of application packets.
//!
//! Applications register one handler per packet type; an incoming
//! [`AppPacket`] is routed by the concrete type it decoded to.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
};

use karman_proto::AppPacket;
use tracing::debug;
use uuid::Uuid;

type Handler<C> = Box<dyn FnMut(&mut C, Uuid, &AppPacket) + Send>;

/// Handlers for application packets, keyed by packet type.
///
/// `C` is the context handed to every handler (a server or client handle).
/// The `Uuid` argument is the sender: a client id on the server, the server
/// id on a client.
pub struct PacketRouter<C> {
    handlers: HashMap<TypeId, (&'static str, Handler<C>)>,
}

impl<C> PacketRouter<C> {
    /// Router with no handlers
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    /// Handle packets of type `V`, replacing any earlier handler for it.
    pub fn on<V: Any>(&mut self, mut handler: impl FnMut(&mut C, Uuid, &V) + Send + 'static) -> &mut Self {
        let erased: Handler<C> = Box::new(move |context, sender, packet| {
            if let Some(value) = packet.downcast_ref::<V>() {
                handler(context, sender, value);
            }
        });
        self.handlers.insert(TypeId::of::<V>(), (std::any::type_name::<V>(), erased));
        self
    }

    /// True if a handler for `V` is registered
    pub fn handles<V: Any>(&self) -> bool {
        self.handlers.contains_key(&TypeId::of::<V>())
    }

    /// Route `packet`. Returns `false` if no handler matched.
    pub fn dispatch(&mut self, context: &mut C, sender: Uuid, packet: &AppPacket) -> bool {
        let Some((_, handler)) = self.handlers.get_mut(&packet.as_any().type_id()) else {
            debug!(sender = %sender, packet = packet.type_name(), "no handler for packet");
            return false;
        };
        handler(context, sender, packet);
        true
    }
}

impl<C> Default for PacketRouter<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for PacketRouter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.handlers.values().map(|(name, _)| *name).collect();
        names.sort_unstable();
        f.debug_struct("PacketRouter").field("handlers", &names).finish()
    }
}
