//! The engine: one timer list plus one deferred-call queue.
//!
//! Exactly one logical event loop per engine. Everything the engine ever
//! runs, submitted calls and timer expiries alike, goes through the
//! deferred-call queue and is dispatched by `process`, one callback at a
//! time, on whichever thread drives the engine.

use crate::error::Error;
use crate::queue::{DeferQueue, Deferred};
use crate::runtime::Runtime;
use crate::timer::{TimerFn, TimerHandle, TimerList};

/// Compile-time capacity of the deferred-call queue.
pub const DEFER_QUEUE_CAPACITY: usize = 64;

pub struct Engine {
    tick_ms: u32,
    timers: TimerList,
    queue: DeferQueue<DEFER_QUEUE_CAPACITY>,
}

impl Engine {
    pub fn new(tick_ms: u32) -> Self {
        Self {
            tick_ms,
            timers: TimerList::new(tick_ms),
            queue: DeferQueue::new(),
        }
    }

    pub fn tick_ms(&self) -> u32 {
        self.tick_ms
    }

    /// Defers a call to the next `process` pass. Rejected with
    /// [`Error::QueueFull`] once the queue is at capacity; the caller
    /// decides whether to retry or drop.
    pub fn call(&mut self, f: impl FnOnce(&mut Engine) + 'static) -> Result<(), Error> {
        self.queue.push(Deferred::Call(Box::new(f)))
    }

    /// Advances the timer list by one tick. Expired timer callbacks are
    /// deferred onto the queue, never invoked from here.
    pub fn tick(&mut self) {
        for handle in self.timers.advance() {
            if self.queue.push(Deferred::TimerFire(handle)).is_err() {
                log::error!("deferred-call queue full, dropping expiry of {handle:?}");
            }
        }
    }

    /// Drains the queue to a fixed point: callbacks enqueued while draining
    /// are dispatched in the same pass, in FIFO order.
    pub fn process(&mut self) {
        while let Some(item) = self.queue.pop() {
            match item {
                Deferred::Call(f) => f(self),
                Deferred::TimerFire(handle) => self.fire(handle),
            }
        }
    }

    /// Hands the engine to the runtime's main loop.
    pub fn run_forever(&mut self, runtime: &mut dyn Runtime) -> Result<(), Error> {
        runtime.run_forever(self)
    }

    pub fn timer_init(
        &mut self,
        initial_ms: u32,
        repeat_ms: Option<u32>,
        callback: impl FnMut(&mut Engine) + 'static,
    ) -> TimerHandle {
        self.timers.init(initial_ms, repeat_ms, Box::new(callback))
    }

    pub fn timer_start(&mut self, handle: TimerHandle) -> Result<(), Error> {
        self.timers.start(handle)
    }

    /// Stops the timer against future dispatch. A fire already sitting on
    /// the queue still runs; callbacks re-check liveness themselves.
    pub fn timer_stop(&mut self, handle: TimerHandle) {
        self.timers.stop(handle);
    }

    pub fn timer_is_stopped(&self, handle: TimerHandle) -> bool {
        self.timers.is_stopped(handle)
    }

    pub fn timer_free(&mut self, handle: TimerHandle) {
        self.timers.free(handle);
    }

    pub fn timer_set_initial(&mut self, handle: TimerHandle, ms: u32) -> Result<(), Error> {
        self.timers.set_initial(handle, ms)
    }

    pub fn timer_initial(&self, handle: TimerHandle) -> Option<u32> {
        self.timers.initial(handle)
    }

    pub fn timer_set_repeat(&mut self, handle: TimerHandle, ms: Option<u32>) -> Result<(), Error> {
        self.timers.set_repeat(handle, ms)
    }

    pub fn timer_repeat(&self, handle: TimerHandle) -> Option<Option<u32>> {
        self.timers.repeat(handle)
    }

    /// Ticks left until the timer fires, or `None` if it is not linked.
    pub fn timer_remaining(&self, handle: TimerHandle) -> Option<u32> {
        self.timers.remaining_ticks(handle)
    }

    pub fn pending_calls(&self) -> usize {
        self.queue.len()
    }

    /// Dispatches one timer expiry. The callback is taken out of its slot
    /// for the duration of the call so it may start, stop or free any
    /// timer, including its own.
    fn fire(&mut self, handle: TimerHandle) {
        let Some(mut callback) = self.timers.take_callback(handle) else {
            log::debug!("timer {handle:?} vanished before dispatch");
            return;
        };
        callback(self);
        self.timers.restore_callback(handle, callback);
    }
}
