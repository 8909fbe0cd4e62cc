//! # ValueRef
//!
//! Purpose: uniform `{get, clear, is_reclaimed, is_loading}` capability
//! over a strongly, weakly, or softly held value, or one still being
//! computed (spec §4.1).

use std::ops::Deref;
use std::sync::{Arc, Weak};

use crate::loader::LoadingSlot;
use crate::owner::{Owner, OwnerInner};

/// A value as stored inside an `Entry`. This is the sole field an
/// unlocked reader touches (spec §3: "value_ref is the sole mutable
/// attribute visible to unlocked readers").
pub(crate) enum ValueRef<V> {
    Strong(Arc<V>),
    Weak(Weak<OwnerInner<V>>),
    /// Reclaimed under memory pressure only, per the segment's
    /// `MemoryPressurePolicy` (spec §9; see `ccmap-core::pressure`).
    Soft(Weak<OwnerInner<V>>),
    Loading(Arc<LoadingSlot<V>>),
    /// A freshly created entry before its first value is stored.
    Unset,
}

/// What `ValueRef::peek` observed, distinguishing "absent" from "present
/// but reclaimed" from "being computed."
pub(crate) enum ValuePeek<V> {
    Present(ValueGuard<V>),
    Reclaimed,
    Loading(Arc<LoadingSlot<V>>),
    Unset,
}

pub(crate) enum ValueGuard<V> {
    Strong(Arc<V>),
    Weak(Arc<OwnerInner<V>>),
}

impl<V> Deref for ValueGuard<V> {
    type Target = V;
    fn deref(&self) -> &V {
        match self {
            ValueGuard::Strong(arc) => arc,
            ValueGuard::Weak(inner) => crate::owner::owner_value(inner),
        }
    }
}

impl<V> ValueGuard<V> {
    /// Materializes an owned `Arc<V>`, cloning the value out from under a
    /// weak owner if necessary. Used wherever the public API promises an
    /// `Arc<V>` return type regardless of configured strength.
    pub(crate) fn to_arc(&self) -> Arc<V>
    where
        V: Clone,
    {
        match self {
            ValueGuard::Strong(arc) => Arc::clone(arc),
            ValueGuard::Weak(inner) => Arc::new(crate::owner::owner_value(inner).clone()),
        }
    }
}

impl<V> ValueRef<V> {
    pub(crate) fn strong(value: V) -> Self {
        ValueRef::Strong(Arc::new(value))
    }

    pub(crate) fn weak(owner: &Owner<V>) -> Self {
        ValueRef::Weak(owner.downgrade())
    }

    pub(crate) fn soft(owner: &Owner<V>) -> Self {
        ValueRef::Soft(owner.downgrade())
    }

    pub(crate) fn peek(&self) -> ValuePeek<V> {
        match self {
            ValueRef::Strong(arc) => ValuePeek::Present(ValueGuard::Strong(Arc::clone(arc))),
            ValueRef::Weak(weak) | ValueRef::Soft(weak) => match weak.upgrade() {
                Some(inner) => ValuePeek::Present(ValueGuard::Weak(inner)),
                None => ValuePeek::Reclaimed,
            },
            ValueRef::Loading(slot) => ValuePeek::Loading(Arc::clone(slot)),
            ValueRef::Unset => ValuePeek::Unset,
        }
    }

    pub(crate) fn is_reclaimed(&self) -> bool {
        matches!(self.peek(), ValuePeek::Reclaimed)
    }

    pub(crate) fn is_loading(&self) -> bool {
        matches!(self, ValueRef::Loading(_))
    }

    /// True for any variant a `put`/`replace` may overwrite without first
    /// removing the entry (i.e. not a live, present value).
    pub(crate) fn is_vacant(&self) -> bool {
        matches!(self.peek(), ValuePeek::Reclaimed | ValuePeek::Unset)
    }
}
