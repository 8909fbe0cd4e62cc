//! # RemovalNotifier
//!
//! Purpose: asynchronous-at-source queue. Segments enqueue `(key, value,
//! cause)` under lock; the lock holder drains and delivers to the
//! listener after releasing the lock, so listener code never runs while a
//! segment is held.
//!
//! Key and value are each `Option<Arc<_>>`, not a bare `Arc<_>`: a
//! `reclaim_key`/`reclaim_value` notification fires after the reclaimed
//! side's referent is already gone, so there is no `K` or `V` left to
//! hand the listener for that side - only `None`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crossbeam_queue::SegQueue;

use ccmap_common::RemovalCause;

/// A pending delivery: already-detached `Arc`s so the listener runs with
/// no lingering reference into the segment arena.
struct Pending<K, V> {
    key: Option<Arc<K>>,
    value: Option<Arc<V>>,
    cause: RemovalCause,
}

/// Type-erased so `Cache<K, V>` can hold one without threading the
/// listener's closure type through every module.
pub(crate) type Listener<K, V> = Arc<dyn Fn(Option<&K>, Option<&V>, RemovalCause) + Send + Sync>;

pub(crate) struct RemovalNotifier<K, V> {
    queue: SegQueue<Pending<K, V>>,
    listener: Option<Listener<K, V>>,
}

impl<K, V> RemovalNotifier<K, V> {
    pub(crate) fn new(listener: Option<Listener<K, V>>) -> Self {
        RemovalNotifier {
            queue: SegQueue::new(),
            listener,
        }
    }

    /// Enqueues a removal under the segment lock. Cheap even with no
    /// listener registered, since `flush` below is the only place that
    /// pays for delivery.
    pub(crate) fn enqueue(&self, key: Option<Arc<K>>, value: Option<Arc<V>>, cause: RemovalCause) {
        if self.listener.is_some() {
            self.queue.push(Pending { key, value, cause });
        }
    }

    /// Delivers every queued removal to the listener. Called after the
    /// segment lock has been released.
    ///
    /// A panicking listener is caught, logged, and does not corrupt map
    /// state or poison the queue.
    pub(crate) fn flush(&self) {
        let Some(listener) = &self.listener else {
            return;
        };
        while let Some(pending) = self.queue.pop() {
            let result = catch_unwind(AssertUnwindSafe(|| {
                listener(pending.key.as_deref(), pending.value.as_deref(), pending.cause)
            }));
            if result.is_err() {
                tracing::warn!("removal listener panicked; entry delivery continues");
            }
        }
    }
}
