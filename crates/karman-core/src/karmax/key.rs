//! Fragment keys.
//!
//! A key is any `Display` value; the engine only ever sees its rendered
//! string. Equality, hashing and ordering use that string alone, so two
//! distinct key types rendering to the same text address the same fragment.
//! Callers rely on this to address fragments across key types (a typed key on
//! one side, the raw string off the wire on the other). Pick renderings with
//! a distinguishing prefix (`"score/<id>"`, `"door/<name>"`) to avoid
//! accidental collisions.

use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

/// Address of one fragment in a container
#[derive(Clone)]
pub struct FragmentKey {
    rendered: Arc<str>,
    /// Rust type the key was rendered from, for diagnostics only
    origin: &'static str,
}

impl FragmentKey {
    /// Render a typed key
    pub fn new<K: fmt::Display + ?Sized>(key: &K) -> Self {
        Self { rendered: key.to_string().into(), origin: std::any::type_name::<K>() }
    }

    /// Key received off the wire (no type information)
    pub fn from_wire(rendered: impl Into<Arc<str>>) -> Self {
        Self { rendered: rendered.into(), origin: "wire" }
    }

    /// Rendered form
    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    /// Type the key was rendered from (`"wire"` for received keys)
    pub fn origin(&self) -> &'static str {
        self.origin
    }
}

impl PartialEq for FragmentKey {
    fn eq(&self, other: &Self) -> bool {
        self.rendered == other.rendered
    }
}

impl Eq for FragmentKey {}

impl Hash for FragmentKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rendered.hash(state);
    }
}

impl PartialOrd for FragmentKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FragmentKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rendered.cmp(&other.rendered)
    }
}

impl fmt::Display for FragmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

impl fmt::Debug for FragmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FragmentKey({:?} from {})", self.rendered, self.origin)
    }
}

impl From<&str> for FragmentKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for FragmentKey {
    fn from(value: String) -> Self {
        Self::new(value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    struct PlayerKey(u32);

    impl fmt::Display for PlayerKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "player/{}", self.0)
        }
    }

    struct DoorKey(&'static str);

    impl fmt::Display for DoorKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "player/{}", self.0)
        }
    }

    #[test]
    fn typed_and_wire_keys_address_the_same_slot() {
        let typed = FragmentKey::new(&PlayerKey(7));
        let wire = FragmentKey::from_wire("player/7");

        assert_eq!(typed, wire);
        assert_ne!(typed.origin(), wire.origin());
    }

    #[test]
    fn distinct_key_types_rendering_alike_collide() {
        // Documented tradeoff: identity is the rendered string.
        let player = FragmentKey::new(&PlayerKey(1));
        let door = FragmentKey::new(&DoorKey("1"));

        let mut map = HashMap::new();
        map.insert(player, "player");
        map.insert(door, "door");

        assert_eq!(map.len(), 1);
        assert_eq!(map[&FragmentKey::from_wire("player/1")], "door");
    }

    #[test]
    fn ordering_follows_rendered_text() {
        let mut keys = vec![FragmentKey::from("b"), FragmentKey::from("a"), FragmentKey::from("c")];
        keys.sort();
        let rendered: Vec<_> = keys.iter().map(FragmentKey::as_str).collect();
        assert_eq!(rendered, ["a", "b", "c"]);
    }
}
