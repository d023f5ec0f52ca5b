//! Bounded FIFO of callers waiting for a rate-limit permit.
//!
//! The queue is owned by the limiter state and only touched under its lock.
//! Each waiter holds the sending half of a oneshot channel; resolving a waiter
//! means sending it a [`Permit`] (admitted) or dropping the sender (rejected).

use super::rate_limiter::Permit;
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaiterId(u64);

#[derive(Debug)]
pub(crate) struct Waiter {
    pub(crate) id: WaiterId,
    pub(crate) enqueued_at: Instant,
    slot: oneshot::Sender<Permit>,
}

impl Waiter {
    /// Hand the waiter its permit. Returns `false` if the receiving side is gone.
    pub(crate) fn admit(self, now: Instant) -> bool {
        let permit = Permit {
            admitted_at: now,
            waited: now.saturating_duration_since(self.enqueued_at),
        };
        self.slot.send(permit).is_ok()
    }
}

#[derive(Debug)]
pub(crate) struct WaiterQueue {
    waiters: VecDeque<Waiter>,
    capacity: usize,
    next_id: u64,
}

impl WaiterQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            waiters: VecDeque::new(),
            capacity,
            next_id: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.waiters.len() >= self.capacity
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a waiter at the back. `None` when the queue is at capacity.
    pub(crate) fn push(
        &mut self,
        enqueued_at: Instant,
    ) -> Option<(WaiterId, oneshot::Receiver<Permit>)> {
        if self.is_full() {
            return None;
        }
        let id = WaiterId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        let (slot, rx) = oneshot::channel();
        self.waiters.push_back(Waiter {
            id,
            enqueued_at,
            slot,
        });
        Some((id, rx))
    }

    pub(crate) fn pop_oldest(&mut self) -> Option<Waiter> {
        self.waiters.pop_front()
    }

    /// Remove a waiter that gave up. Returns `false` if it was already resolved.
    pub(crate) fn remove(&mut self, id: WaiterId) -> bool {
        match self.waiters.iter().position(|w| w.id == id) {
            Some(idx) => self.waiters.remove(idx).is_some(),
            None => false,
        }
    }

    pub(crate) fn contains(&self, id: WaiterId) -> bool {
        self.waiters.iter().any(|w| w.id == id)
    }

    pub(crate) fn oldest_enqueued_at(&self) -> Option<Instant> {
        self.waiters.front().map(|w| w.enqueued_at)
    }
}
