//! Byte-stream channels.
//!
//! A channel is a bidirectional, non-blocking byte stream with asynchronous
//! open/close completion. The same shape serves a pipe, a TCP socket or a
//! TLS session; only the transport behind the four data operations changes.

use crate::engine::Engine;
use crate::error::Error;

/// Completion and input notifications for one channel.
///
/// The transport marshals every one of these through the engine's
/// deferred-call queue, so the owner always observes them at a dispatch
/// boundary, never reentrantly inside `open` or `close`.
pub struct ChannelEvents {
    /// Open completed; `Err` carries the transport failure.
    pub on_opened: Box<dyn FnMut(&mut Engine, Result<(), Error>)>,
    /// The peer or the transport closed the stream.
    pub on_closed: Box<dyn FnMut(&mut Engine)>,
    /// Bytes are available. Edge-triggered: drain with repeated `read`
    /// calls until it returns 0, or the rest waits for the next edge.
    pub on_input: Box<dyn FnMut(&mut Engine)>,
}

impl Default for ChannelEvents {
    fn default() -> Self {
        Self {
            on_opened: Box::new(|_, _| {}),
            on_closed: Box::new(|_| {}),
            on_input: Box::new(|_| {}),
        }
    }
}

pub trait Channel {
    /// Requests the transport to open; completion arrives via `on_opened`.
    fn open(&mut self, events: ChannelEvents) -> Result<(), Error>;

    /// Requests the transport to close; completion arrives via `on_closed`.
    fn close(&mut self);

    /// Non-blocking read of buffered input. Returns the number of bytes
    /// copied; 0 means would-block.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Non-blocking write. Returns the number of bytes accepted for
    /// transmission; 0 means would-block (or not open).
    fn write(&mut self, data: &[u8]) -> usize;

    fn is_open(&self) -> bool;
}
