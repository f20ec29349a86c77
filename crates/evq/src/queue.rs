//! Bounded deferred-call queue.
//!
//! A fixed-capacity FIFO of work items waiting for the next `Engine::process`
//! pass. The capacity is a compile-time constant: once full, `push` rejects
//! the item instead of blocking or growing.

use heapless::Deque;

use crate::engine::Engine;
use crate::error::Error;
use crate::timer::TimerHandle;

/// A deferred unit of work.
pub enum Deferred {
    /// A one-shot closure submitted through [`Engine::call`].
    Call(Box<dyn FnOnce(&mut Engine)>),
    /// A timer expiry produced by [`Engine::tick`]; resolved against the
    /// timer arena at dispatch time so a freed timer is a no-op.
    TimerFire(TimerHandle),
}

/// Fixed-capacity FIFO of deferred work.
pub struct DeferQueue<const N: usize> {
    items: Deque<Deferred, N>,
}

impl<const N: usize> DeferQueue<N> {
    pub const fn new() -> Self {
        Self { items: Deque::new() }
    }

    /// Enqueues an item, rejecting it when the queue is at capacity.
    pub fn push(&mut self, item: Deferred) -> Result<(), Error> {
        self.items.push_back(item).map_err(|_| Error::QueueFull)
    }

    /// Dequeues the oldest item, if any.
    pub fn pop(&mut self) -> Option<Deferred> {
        self.items.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for DeferQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
