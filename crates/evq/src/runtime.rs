//! The pluggable execution backend.
//!
//! A runtime decides how the engine is actually driven: where ticks come
//! from, how work enters the loop from other threads, and how TCP channels
//! are made. Exactly one runtime drives an engine; swapping it replaces all
//! I/O behavior without touching engine state.

use crate::channel::Channel;
use crate::engine::Engine;
use crate::error::Error;

/// Closure marshaled onto the logic thread from another thread.
pub type RemoteFn = Box<dyn FnOnce(&mut Engine) + Send>;

/// Detached work: runs off the logic thread, returns the completion closure
/// that is marshaled back onto it.
pub type WorkerJob = Box<dyn FnOnce() -> RemoteFn + Send>;

/// Entry point into the logic thread for arbitrary external threads.
pub trait Remote: Send {
    fn call(&self, f: RemoteFn) -> Result<(), Error>;
}

pub trait Runtime {
    /// Drives the engine until the runtime fails fatally.
    fn run_forever(&mut self, engine: &mut Engine) -> Result<(), Error>;

    /// Hands out a thread-safe handle for injecting calls into the loop.
    fn remote(&self) -> Box<dyn Remote>;

    /// Spawns detached work whose completion runs back on the logic thread.
    fn spawn_worker(&self, job: WorkerJob) -> Result<(), Error>;

    /// Creates an unconnected TCP channel toward `host:port`.
    fn open_tcp(&self, host: &str, port: u16) -> Result<Box<dyn Channel>, Error>;
}

/// A runtime that implements nothing.
///
/// Every operation panics with a description of the missing capability:
/// reaching one of these is a wiring bug, not a runtime condition. Unit
/// tests drive `Engine::tick`/`process` directly and never touch it.
pub struct NullRuntime;

impl Runtime for NullRuntime {
    fn run_forever(&mut self, _engine: &mut Engine) -> Result<(), Error> {
        panic!("null runtime: run_forever is not implemented");
    }

    fn remote(&self) -> Box<dyn Remote> {
        panic!("null runtime: remote calls are not implemented");
    }

    fn spawn_worker(&self, _job: WorkerJob) -> Result<(), Error> {
        panic!("null runtime: worker pool is not implemented");
    }

    fn open_tcp(&self, _host: &str, _port: u16) -> Result<Box<dyn Channel>, Error> {
        panic!("null runtime: tcp client is not implemented");
    }
}
