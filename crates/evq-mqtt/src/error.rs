//! Protocol-level errors. Transport and engine errors stay [`evq::Error`].

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// Remaining-length varint ran past its 4-byte maximum.
    #[error("remaining length exceeds four bytes")]
    LengthOverflow,
    /// Declared packet size exceeds the configured maximum.
    #[error("packet of {size} bytes exceeds maximum of {max}")]
    PacketTooLarge { size: usize, max: usize },
    /// A complete packet failed to parse.
    #[error("malformed {0} packet")]
    Malformed(&'static str),
}
