//! Single-slot batch channel between the prefetch worker and the iteration loop
//!
//! Toyota Way: Heijunka (Load Balancing)
//! - Capacity 1 bounds memory to a single batch ahead of the consumer (Poka-Yoke)
//! - Blocking hand-off decouples batch preparation latency from step latency
//! - `close()` wakes every waiter, so shutdown can never hang on a full or empty slot

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::batch::Batch;
use crate::{Error, Result};

/// How often a consumer blocked in [`BatchChannel::take_until`] re-checks its interrupt signal.
pub const INTERRUPT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Manual interrupt flag shared between the operator and the iteration loop.
///
/// Cloning yields a handle to the same flag, so it can be moved into a
/// signal handler or another thread and raised from there.
#[derive(Debug, Clone, Default)]
pub struct InterruptSignal {
    raised: Arc<AtomicBool>,
}

impl InterruptSignal {
    /// Create a lowered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the loop stop at its next blocking point.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    /// Whether an interrupt is pending.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Lower the signal before a new loop invocation.
    pub fn clear(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct Slot<T> {
    item: Option<T>,
    closed: bool,
}

/// Capacity-1 blocking hand-off buffer.
///
/// Exactly one producer and one consumer are assumed. `put`, `take` and
/// `close` are atomic with respect to each other; no other lock is needed
/// around the channel.
#[derive(Debug)]
pub struct BatchChannel<T = Batch> {
    slot: Mutex<Slot<T>>,
    changed: Condvar,
}

impl<T> BatchChannel<T> {
    /// Create an open, empty channel.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                item: None,
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }

    // A panic while holding the lock cannot leave the slot half-written.
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand `item` to the consumer, blocking while the slot is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if the channel is (or becomes) closed.
    pub fn put(&self, item: T) -> Result<()> {
        let mut slot = self.lock();
        loop {
            if slot.closed {
                return Err(Error::ChannelClosed);
            }
            if slot.item.is_none() {
                slot.item = Some(item);
                self.changed.notify_all();
                return Ok(());
            }
            slot = self
                .changed
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Receive the buffered item, blocking while the slot is empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if the channel is (or becomes) closed
    /// with nothing left to take.
    pub fn take(&self) -> Result<T> {
        let mut slot = self.lock();
        loop {
            if let Some(item) = slot.item.take() {
                self.changed.notify_all();
                return Ok(item);
            }
            if slot.closed {
                return Err(Error::ChannelClosed);
            }
            slot = self
                .changed
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`take`](Self::take), but gives up when `signal` is raised.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Interrupted`] if the signal is raised while waiting,
    /// or [`Error::ChannelClosed`] if the channel is closed.
    pub fn take_until(&self, signal: &InterruptSignal) -> Result<T> {
        let mut slot = self.lock();
        loop {
            if signal.is_raised() {
                return Err(Error::Interrupted);
            }
            if let Some(item) = slot.item.take() {
                self.changed.notify_all();
                return Ok(item);
            }
            if slot.closed {
                return Err(Error::ChannelClosed);
            }
            slot = self
                .changed
                .wait_timeout(slot, INTERRUPT_POLL_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Close the channel, dropping any buffered item and waking all waiters.
    ///
    /// Idempotent.
    pub fn close(&self) {
        let mut slot = self.lock();
        slot.closed = true;
        slot.item = None;
        drop(slot);
        self.changed.notify_all();
    }

    /// Close the channel from the producer side, keeping a buffered item.
    ///
    /// The consumer can still take the last item; after that `take` fails
    /// with [`Error::ChannelClosed`]. `put` fails immediately.
    pub fn finish(&self) {
        self.lock().closed = true;
        self.changed.notify_all();
    }

    /// Whether the channel has been closed or finished.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Whether an item is waiting to be taken.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.lock().item.is_some()
    }
}

impl<T> Default for BatchChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}
