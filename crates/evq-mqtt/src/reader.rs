//! Incremental packet framing.
//!
//! The reader consumes one byte at a time, so packets split across any
//! number of TCP segments reassemble without lookahead. Three states:
//! the fixed-header type byte, the remaining-length varint, then the body.
//! Any framing violation resets the reader to the type state and surfaces
//! an error for the connection owner to act on.

use crate::error::ProtocolError;

/// One complete packet: the raw fixed-header byte (type and flags) plus the
/// variable header and payload, undecoded.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame {
    pub first_byte: u8,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn packet_type(&self) -> u8 {
        self.first_byte >> 4
    }

    pub fn flags(&self) -> u8 {
        self.first_byte & 0x0f
    }
}

enum State {
    ReadType,
    ReadSize {
        first_byte: u8,
        value: u32,
        count: u8,
    },
    ReadData {
        first_byte: u8,
        remaining: usize,
        body: Vec<u8>,
    },
}

pub struct PacketReader {
    max_packet: usize,
    state: State,
}

impl PacketReader {
    pub fn new(max_packet: usize) -> Self {
        Self {
            max_packet,
            state: State::ReadType,
        }
    }

    /// Drops any partial packet and waits for a fresh type byte.
    pub fn reset(&mut self) {
        self.state = State::ReadType;
    }

    /// Feeds one byte. Returns a frame when it completes a packet, `None`
    /// while one is still accumulating, or an error on a framing violation
    /// (after which the reader has already reset itself).
    pub fn push(&mut self, byte: u8) -> Result<Option<Frame>, ProtocolError> {
        match std::mem::replace(&mut self.state, State::ReadType) {
            State::ReadType => {
                self.state = State::ReadSize {
                    first_byte: byte,
                    value: 0,
                    count: 0,
                };
                Ok(None)
            }
            State::ReadSize {
                first_byte,
                mut value,
                count,
            } => {
                value |= u32::from(byte & 0x7f) << (7 * count);
                if byte & 0x80 != 0 {
                    if count == 3 {
                        return Err(ProtocolError::LengthOverflow);
                    }
                    self.state = State::ReadSize {
                        first_byte,
                        value,
                        count: count + 1,
                    };
                    return Ok(None);
                }
                let size = value as usize;
                if size > self.max_packet {
                    return Err(ProtocolError::PacketTooLarge {
                        size,
                        max: self.max_packet,
                    });
                }
                if size == 0 {
                    return Ok(Some(Frame {
                        first_byte,
                        body: Vec::new(),
                    }));
                }
                self.state = State::ReadData {
                    first_byte,
                    remaining: size,
                    body: Vec::with_capacity(size),
                };
                Ok(None)
            }
            State::ReadData {
                first_byte,
                remaining,
                mut body,
            } => {
                body.push(byte);
                if remaining == 1 {
                    return Ok(Some(Frame { first_byte, body }));
                }
                self.state = State::ReadData {
                    first_byte,
                    remaining: remaining - 1,
                    body,
                };
                Ok(None)
            }
        }
    }
}
