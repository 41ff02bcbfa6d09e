//! Immutable container state.

use std::{collections::HashMap, fmt, sync::Arc};

use super::{
    fragment::{Fragment, FragmentRef},
    key::FragmentKey,
};

/// Immutable map from fragment key to fragment.
///
/// Cloning is cheap (shared map). Every change builds a new state; a state
/// handed to observers never changes under them.
#[derive(Clone, Default)]
pub struct ContainerState {
    fragments: Arc<HashMap<FragmentKey, FragmentRef>>,
}

impl ContainerState {
    /// Empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Fragment at `key`
    pub fn get(&self, key: &FragmentKey) -> Option<&FragmentRef> {
        self.fragments.get(key)
    }

    /// Fragment at `key` as `F`; `None` if absent or of another type
    pub fn get_as<F: Fragment>(&self, key: &FragmentKey) -> Option<&F> {
        self.fragments.get(key).and_then(|fragment| fragment.downcast_ref::<F>())
    }

    /// True if `key` holds a fragment
    pub fn contains(&self, key: &FragmentKey) -> bool {
        self.fragments.contains_key(key)
    }

    /// Number of fragments
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// True if no fragment is stored
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Entries in unspecified order
    pub fn iter(&self) -> impl Iterator<Item = (&FragmentKey, &FragmentRef)> {
        self.fragments.iter()
    }

    /// Entries ordered by key
    pub fn sorted(&self) -> Vec<(&FragmentKey, &FragmentRef)> {
        let mut entries: Vec<_> = self.fragments.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// New state with `key` set to `fragment`
    #[must_use]
    pub fn with(&self, key: FragmentKey, fragment: FragmentRef) -> Self {
        let mut fragments = (*self.fragments).clone();
        fragments.insert(key, fragment);
        Self { fragments: Arc::new(fragments) }
    }

    /// New state with `key` removed
    #[must_use]
    pub fn without(&self, key: &FragmentKey) -> Self {
        if !self.contains(key) {
            return self.clone();
        }
        let mut fragments = (*self.fragments).clone();
        fragments.remove(key);
        Self { fragments: Arc::new(fragments) }
    }

    /// True if both handles share the same underlying map
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.fragments, &other.fragments)
    }
}

impl fmt::Debug for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.sorted()).finish()
    }
}
