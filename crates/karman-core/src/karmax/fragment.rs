//! Fragments: immutable, individually replicated values.

use std::{any::Any, fmt, sync::Arc};

use karman_proto::{WireEncode, WireValue};

/// A unit of replicated state.
///
/// Fragments are never modified in place; a mutation produces a replacement.
/// Implemented automatically for every [`WireValue`] with a `Debug` impl.
pub trait Fragment: WireEncode + Any + Send + Sync + fmt::Debug {
    /// Upcast for downcasting to the concrete type
    fn as_any(&self) -> &dyn Any;
}

impl<T: WireValue + fmt::Debug> Fragment for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Shared handle to a stored fragment
pub type FragmentRef = Arc<dyn Fragment>;

impl dyn Fragment {
    /// Borrow as `F`, if that is the concrete type
    pub fn downcast_ref<F: Fragment>(&self) -> Option<&F> {
        self.as_any().downcast_ref::<F>()
    }

    /// True if the concrete type is `F`
    pub fn is<F: Fragment>(&self) -> bool {
        self.as_any().is::<F>()
    }
}

/// Registry constructor for fragment types.
///
/// ```ignore
/// registry.register::<Score>(wrap_fragment)?;
/// ```
pub fn wrap_fragment<F: Fragment>(fragment: F) -> FragmentRef {
    Arc::new(fragment)
}
