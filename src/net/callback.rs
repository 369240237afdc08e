//! Replaceable callback storage

use std::sync::Arc;

use parking_lot::RwLock;

/// Holds an optional callback that can be swapped at any time
///
/// `get` clones the `Arc` out so the caller invokes it with no lock held.
pub(crate) struct CallbackSlot<F: ?Sized> {
    inner: RwLock<Option<Arc<F>>>,
}

impl<F: ?Sized> CallbackSlot<F> {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    pub(crate) fn set(&self, callback: Arc<F>) {
        *self.inner.write() = Some(callback);
    }

    pub(crate) fn get(&self) -> Option<Arc<F>> {
        self.inner.read().clone()
    }
}

impl<F: ?Sized> Default for CallbackSlot<F> {
    fn default() -> Self {
        Self::new()
    }
}
