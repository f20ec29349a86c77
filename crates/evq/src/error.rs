//! Error type shared by the engine and its runtime/channel seams.

use thiserror::Error;

/// Errors that can occur in the engine core or be surfaced by a runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// The deferred-call queue is at capacity; the call was not enqueued.
    #[error("deferred-call queue is full")]
    QueueFull,
    /// The timer handle refers to a freed (or never allocated) arena slot.
    #[error("stale timer handle")]
    StaleTimer,
    /// The channel is not open for the requested operation.
    #[error("channel is not open")]
    NotOpen,
    /// A bounded cross-thread queue rejected the message.
    #[error("runtime queue is full")]
    Backpressure,
    /// The runtime's peer thread has gone away.
    #[error("runtime has shut down")]
    Shutdown,
    /// Transport-level failure (connect refused, reset, resolver error).
    #[error("transport failure: {0}")]
    Transport(String),
}
