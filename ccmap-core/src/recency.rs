//! # RecencyBuffer
//!
//! Purpose: a lock-free multi-producer FIFO of arena indices touched by
//! unlocked readers, drained under the segment lock (spec §4.4).
//! Over-capacity elements may be dropped silently - LRU stays approximate,
//! exactly as the spec allows.

use crossbeam_queue::ArrayQueue;

use crate::deque::{Deque, DequeKind};
use crate::entry::Entry;

/// Drain at most this many elements per cleanup pass (spec §4.5 constant).
pub(crate) const DRAIN_MAX: usize = 16;

/// Bound on outstanding unconsumed reads; past this, `add` drops the
/// oldest without blocking the reader.
const RECENCY_BUFFER_CAPACITY: usize = 256;

pub(crate) struct RecencyBuffer {
    queue: ArrayQueue<usize>,
}

impl RecencyBuffer {
    pub(crate) fn new() -> Self {
        RecencyBuffer {
            queue: ArrayQueue::new(RECENCY_BUFFER_CAPACITY),
        }
    }

    /// Lock-free push from an unlocked reader. Silently drops the sample
    /// if the buffer is full; approximate LRU is the accepted cost.
    pub(crate) fn add(&self, idx: usize) {
        let _ = self.queue.force_push(idx);
    }

    /// Drains up to `DRAIN_MAX` samples, re-queueing each to the tail of
    /// the access-order deque if it is still linked there. Called only
    /// while the segment write lock is held.
    pub(crate) fn drain_into<K, V>(&self, nodes: &mut [Option<Entry<K, V>>], deque: &mut Deque) {
        for _ in 0..DRAIN_MAX {
            let Some(idx) = self.queue.pop() else {
                break;
            };
            if idx >= nodes.len() {
                continue;
            }
            if deque.contains(nodes, DequeKind::Access, idx) {
                deque.offer(nodes, DequeKind::Access, idx);
            }
        }
    }
}
