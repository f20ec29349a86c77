//! # evq
//!
//! A cooperative, single-threaded event-loop core for embedded/Linux
//! targets: software timers on a tick-driven delta list, a bounded
//! deferred-call queue, byte-stream channels, and a pluggable runtime
//! backend that decides how the loop is actually driven.
//!
//! ## Module overview
//! - [`engine`]  – one timer list + one deferred-call queue per loop.
//! - [`timer`]   – timer arena and the delta list behind `Engine` timers.
//! - [`queue`]   – the fixed-capacity FIFO of deferred work.
//! - [`runtime`] – the backend seam (`Runtime`, `Remote`, `NullRuntime`).
//! - [`channel`] – transport-agnostic byte streams with async completion.
//!
//! Scheduling is non-preemptive: a single callback runs at a time, and all
//! waiting is expressed as re-arming a timer or returning from a read.

pub mod channel;
pub mod engine;
pub mod error;
pub mod queue;
pub mod runtime;
pub mod timer;

pub use channel::{Channel, ChannelEvents};
pub use engine::{Engine, DEFER_QUEUE_CAPACITY};
pub use error::Error;
pub use runtime::{NullRuntime, Remote, RemoteFn, Runtime, WorkerJob};
pub use timer::TimerHandle;

#[cfg(test)]
mod tests;
