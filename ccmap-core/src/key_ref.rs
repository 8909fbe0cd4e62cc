//! # KeyRef
//!
//! Purpose: uniform `{get, clear, is_reclaimed}` capability over a strongly
//! or weakly held key. Soft keys are unsupported, so there are only two
//! variants here, unlike `ValueRef`'s three.

use std::ops::Deref;
use std::sync::{Arc, Weak};

use crate::owner::{Owner, OwnerInner};

/// A key as stored inside an `Entry`.
pub(crate) enum KeyRef<K> {
    Strong(Arc<K>),
    Weak(Weak<OwnerInner<K>>),
}

impl<K> KeyRef<K> {
    pub(crate) fn strong(key: K) -> Self {
        KeyRef::Strong(Arc::new(key))
    }

    pub(crate) fn weak(owner: &Owner<K>) -> Self {
        KeyRef::Weak(owner.downgrade())
    }

    /// Returns a guard over the referent, or `None` if it has been
    /// reclaimed (the weak owner's last strong ref already dropped).
    pub(crate) fn get(&self) -> Option<KeyGuard<K>> {
        match self {
            KeyRef::Strong(arc) => Some(KeyGuard::Strong(Arc::clone(arc))),
            KeyRef::Weak(weak) => weak.upgrade().map(KeyGuard::Weak),
        }
    }

    pub(crate) fn is_reclaimed(&self) -> bool {
        match self {
            KeyRef::Strong(_) => false,
            KeyRef::Weak(weak) => weak.strong_count() == 0,
        }
    }
}

/// A guard over a key referent, valid as long as it is held.
pub(crate) enum KeyGuard<K> {
    Strong(Arc<K>),
    Weak(Arc<OwnerInner<K>>),
}

impl<K> Deref for KeyGuard<K> {
    type Target = K;
    fn deref(&self) -> &K {
        match self {
            KeyGuard::Strong(arc) => arc,
            KeyGuard::Weak(inner) => crate::owner::owner_value(inner),
        }
    }
}
