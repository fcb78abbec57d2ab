//! Bounded drop-on-full buffer
//!
//! Sits between a capture loop and its drain loop. A full buffer never blocks
//! the producer: the incoming item is discarded and counted instead, so under
//! sustained overload the stream keeps moving forward in timestamp order.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counter snapshot for a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferStats {
    pub capacity: usize,
    pub occupancy: usize,
    pub accepted: u64,
    pub dropped: u64,
}

/// Fixed-capacity FIFO of `(item, timestamp)` pairs
pub struct BoundedBuffer<T> {
    tx: Sender<(T, f64)>,
    rx: Receiver<(T, f64)>,
    capacity: usize,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl<T> BoundedBuffer<T> {
    /// Create a buffer holding at most `capacity` items.
    ///
    /// A zero capacity is bumped to one; crossbeam's zero-capacity channel is a
    /// rendezvous channel, which would turn every `put` into a drop.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Offer an item. Returns `false` if it was dropped because the buffer was full.
    pub fn put(&self, item: T, timestamp: f64) -> bool {
        match self.tx.try_send((item, timestamp)) {
            Ok(()) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Put back an item that was already accepted once.
    ///
    /// Counters are left alone. If a producer filled the slot in the meantime
    /// the item is lost.
    pub(crate) fn requeue(&self, item: T, timestamp: f64) -> bool {
        let requeued = self.tx.try_send((item, timestamp)).is_ok();
        if !requeued {
            tracing::debug!("Buffer refilled while re-queueing, item discarded");
        }
        requeued
    }

    /// Wait up to `timeout` for the oldest item
    pub fn get(&self, timeout: Duration) -> Option<(T, f64)> {
        match self.rx.recv_timeout(timeout) {
            Ok(entry) => Some(entry),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Take the oldest item without waiting
    pub fn try_get(&self) -> Option<(T, f64)> {
        self.rx.try_recv().ok()
    }

    /// Current occupancy
    pub fn size(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Discard everything pending. Counters are untouched.
    pub fn clear(&self) {
        let discarded = self.rx.try_iter().count();
        if discarded > 0 {
            tracing::debug!("Cleared {} pending buffer items", discarded);
        }
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            capacity: self.capacity,
            occupancy: self.size(),
            accepted: self.accepted(),
            dropped: self.dropped(),
        }
    }
}
