//! # Reclamation queues
//!
//! Purpose: the MPSC FIFOs fed whenever a weak/soft referent's `Owner`
//! drops its last strong reference (spec §4.5 "Reclamation queues").
//! Many `Owner`s may enqueue concurrently from arbitrary threads; one
//! drainer at a time - the segment lock holder.

use std::sync::Arc;

use crossbeam_queue::SegQueue;

use crate::owner::ReclaimSignal;
use crate::recency::DRAIN_MAX;

pub(crate) struct ReclaimQueue {
    queue: Arc<SegQueue<ReclaimSignal>>,
}

impl ReclaimQueue {
    pub(crate) fn new() -> Self {
        ReclaimQueue {
            queue: Arc::new(SegQueue::new()),
        }
    }

    pub(crate) fn handle(&self) -> Arc<SegQueue<ReclaimSignal>> {
        Arc::clone(&self.queue)
    }

    /// Pulls up to `DRAIN_MAX` signals, invoking `reclaim` for each. Best
    /// effort: `reclaim` may find the slot already gone (a put/remove beat
    /// the collector) and should simply ignore it.
    pub(crate) fn drain(&self, mut reclaim: impl FnMut(ReclaimSignal)) {
        for _ in 0..DRAIN_MAX {
            match self.queue.pop() {
                Some(signal) => reclaim(signal),
                None => break,
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
