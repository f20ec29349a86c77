//! Messages exchanged between the logic thread and the I/O thread.
//!
//! The two threads share no mutable state; everything crosses over as a
//! value on one of two bounded channels. Closed enums keep the protocol
//! exhaustive: adding a message is a compile error until every match arm
//! handles it.

use evq::{Error, RemoteFn};

/// Identifies one TCP connection across both threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub u64);

/// I/O thread -> logic thread.
pub enum LoopEvent {
    /// One tick period elapsed on the monotonic clock.
    Tick,
    /// A closure marshaled in from another thread (remote or worker).
    Call(RemoteFn),
    /// Connect attempt finished.
    Connected {
        conn: ConnId,
        result: Result<(), Error>,
    },
    /// Bytes read from the socket. No further `Data` arrives for this
    /// connection until the logic thread re-arms reading.
    Data { conn: ConnId, bytes: Vec<u8> },
    /// The peer closed or the transport failed mid-stream.
    Closed { conn: ConnId },
}

/// Logic thread -> I/O thread.
pub enum Command {
    Connect {
        conn: ConnId,
        host: String,
        port: u16,
    },
    Write { conn: ConnId, bytes: Vec<u8> },
    /// The `Data` payload was consumed; resume reading from the socket.
    RearmRead { conn: ConnId },
    Close { conn: ConnId },
    Shutdown,
}
