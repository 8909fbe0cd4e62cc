//! # Owner
//!
//! Purpose: Rust has no tracing GC, so "weak key" / "weak or soft value"
//! cannot mean "the collector tells us when the referent dies." Instead we
//! give the caller a ref-counted `Owner<T>` and have its last `Arc` drop
//! push a token onto the owning segment's reclamation queue - the "Owner"
//! pattern spec §9's design notes call for explicitly: "an `Owner` that
//! grants shared ownership plus a back-channel to the containing entry."
//!
//! A plain `Owner<T>` on its own behaves like any other `Arc`: cheap to
//! clone, dropped when the last clone goes away. It only gains a
//! back-channel once a segment hands it a [`ReclaimToken`] at insertion
//! time (`bind`).

use crossbeam_queue::SegQueue;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Which of a segment's two reclamation queues a token feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefKind {
    Key,
    Value,
}

/// A signal pushed onto a segment's reclamation queue when an `Owner`'s
/// last strong reference is dropped.
///
/// `generation` guards against acting on a stale signal after the arena
/// slot has been recycled for an unrelated entry (see `Segment::drain_*`).
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReclaimSignal {
    pub slot: usize,
    pub generation: u64,
    pub kind: RefKind,
}

/// The back-channel bound into an `Owner` once it is stored in an entry.
pub(crate) struct ReclaimToken {
    queue: Arc<SegQueue<ReclaimSignal>>,
    slot: usize,
    generation: u64,
    kind: RefKind,
}

impl ReclaimToken {
    pub(crate) fn new(
        queue: Arc<SegQueue<ReclaimSignal>>,
        slot: usize,
        generation: u64,
        kind: RefKind,
    ) -> Self {
        ReclaimToken {
            queue,
            slot,
            generation,
            kind,
        }
    }

    fn fire(&self) {
        self.queue.push(ReclaimSignal {
            slot: self.slot,
            generation: self.generation,
            kind: self.kind,
        });
    }
}

pub(crate) struct OwnerInner<T> {
    value: T,
    token: Mutex<Option<ReclaimToken>>,
}

impl<T> Drop for OwnerInner<T> {
    fn drop(&mut self) {
        if let Some(token) = self.token.lock().take() {
            token.fire();
        }
    }
}

/// A ref-counted handle a caller retains to keep a weakly/softly held key
/// or value alive. Dropping the last clone is what makes the map's
/// internal `Weak` reference reclaimable.
#[derive(Clone)]
pub struct Owner<T> {
    inner: Arc<OwnerInner<T>>,
}

impl<T> Owner<T> {
    pub fn new(value: T) -> Self {
        Owner {
            inner: Arc::new(OwnerInner {
                value,
                token: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<OwnerInner<T>> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn inner_arc(&self) -> Arc<OwnerInner<T>> {
        Arc::clone(&self.inner)
    }

    /// Binds a reclamation token into this owner. A no-op if the owner
    /// already has one bound (an owner is only ever inserted once).
    pub(crate) fn bind(&self, token: ReclaimToken) {
        *self.inner.token.lock() = Some(token);
    }

    pub fn get(&self) -> &T {
        &self.inner.value
    }
}

impl<T> Deref for Owner<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.inner.value
    }
}

pub(crate) fn owner_value<T>(inner: &Arc<OwnerInner<T>>) -> &T {
    &inner.value
}
