//! MQTT 5.0 packet encoding and field-level decoding.
//!
//! Encoders build the packet body first and prefix the fixed header last,
//! since the remaining-length varint needs the final body size. Integers are
//! big-endian; strings are UTF-8 with a u16 length prefix. Only the fields
//! this client uses are emitted; property blocks go out empty.

/// Largest value a remaining-length varint can carry (four bytes).
pub const MAX_REMAINING_LENGTH: u32 = 268_435_455;

pub(crate) mod packet_type {
    pub(crate) const CONNECT: u8 = 1;
    pub(crate) const CONNACK: u8 = 2;
    pub(crate) const PUBLISH: u8 = 3;
    pub(crate) const SUBSCRIBE: u8 = 8;
    pub(crate) const SUBACK: u8 = 9;
    pub(crate) const UNSUBSCRIBE: u8 = 10;
    pub(crate) const UNSUBACK: u8 = 11;
    pub(crate) const PINGREQ: u8 = 12;
    pub(crate) const PINGRESP: u8 = 13;
    pub(crate) const DISCONNECT: u8 = 14;
}

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_VERSION: u8 = 5;

const CONNECT_FLAG_CLEAN_START: u8 = 0x02;
const CONNECT_FLAG_WILL: u8 = 0x04;
const CONNECT_FLAG_WILL_RETAIN: u8 = 0x20;

/// Last-will message registered with the broker at connect time.
#[derive(Debug, Clone)]
pub struct Will {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

pub(crate) fn connect(client_id: &str, keep_alive_s: u16, clean_start: bool, will: Option<&Will>) -> Vec<u8> {
    let mut flags = 0u8;
    if clean_start {
        flags |= CONNECT_FLAG_CLEAN_START;
    }
    if let Some(will) = will {
        flags |= CONNECT_FLAG_WILL;
        if will.retain {
            flags |= CONNECT_FLAG_WILL_RETAIN;
        }
    }

    let mut body = Vec::new();
    write_str(&mut body, PROTOCOL_NAME);
    body.push(PROTOCOL_VERSION);
    body.push(flags);
    body.extend_from_slice(&keep_alive_s.to_be_bytes());
    body.push(0); // no connect properties
    write_str(&mut body, client_id);
    if let Some(will) = will {
        body.push(0); // no will properties
        write_str(&mut body, &will.topic);
        write_bytes(&mut body, &will.payload);
    }
    finish(packet_type::CONNECT << 4, body)
}

pub(crate) fn publish(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    write_str(&mut body, topic);
    body.push(0); // no publish properties
    body.extend_from_slice(payload);
    finish(packet_type::PUBLISH << 4, body)
}

pub(crate) fn subscribe(packet_id: u16, topic: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&packet_id.to_be_bytes());
    body.push(0); // no subscribe properties
    write_str(&mut body, topic);
    body.push(0); // subscription options: QoS 0
    finish((packet_type::SUBSCRIBE << 4) | 0x02, body)
}

pub(crate) fn unsubscribe(packet_id: u16, topic: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&packet_id.to_be_bytes());
    body.push(0); // no unsubscribe properties
    write_str(&mut body, topic);
    finish((packet_type::UNSUBSCRIBE << 4) | 0x02, body)
}

pub(crate) fn pingreq() -> Vec<u8> {
    vec![packet_type::PINGREQ << 4, 0]
}

pub(crate) fn disconnect() -> Vec<u8> {
    // Normal disconnection: reason 0x00 followed by an empty property block.
    vec![packet_type::DISCONNECT << 4, 2, 0x00, 0]
}

fn finish(first_byte: u8, body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 5);
    out.push(first_byte);
    write_varint(&mut out, body.len() as u32);
    out.extend_from_slice(&body);
    out
}

pub(crate) fn write_varint(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    write_bytes(out, s.as_bytes());
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// Field-level reader over one packet body. Every accessor returns `None`
/// on underrun, so parse functions bail with a single `?` chain.
pub(crate) struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn u8(&mut self) -> Option<u8> {
        let byte = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    pub(crate) fn u16(&mut self) -> Option<u16> {
        let bytes = self.take(2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn str(&mut self) -> Option<&'a str> {
        let len = usize::from(self.u16()?);
        std::str::from_utf8(self.take(len)?).ok()
    }

    pub(crate) fn varint(&mut self) -> Option<u32> {
        let mut value = 0u32;
        for count in 0..4 {
            let byte = self.u8()?;
            value |= u32::from(byte & 0x7f) << (7 * count);
            if byte & 0x80 == 0 {
                return Some(value);
            }
        }
        None
    }

    pub(crate) fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(|_| ())
    }

    pub(crate) fn rest(self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_packet_matches_wire_capture() {
        let bytes = connect("async-12345", 30, false, None);
        let expected = [
            0x10, 0x18, // CONNECT, remaining length 24
            0x00, 0x04, b'M', b'Q', b'T', b'T', 0x05, // protocol name + version
            0x00, // connect flags
            0x00, 0x1e, // keep-alive 30 s
            0x00, // property length
            0x00, 0x0b, b'a', b's', b'y', b'n', b'c', b'-', b'1', b'2', b'3', b'4', b'5',
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn connect_flags_carry_clean_start_and_will() {
        let will = Will {
            topic: "status".into(),
            payload: b"gone".to_vec(),
            retain: true,
        };
        let bytes = connect("c", 10, true, Some(&will));
        // flags byte sits right after "MQTT" + version
        assert_eq!(bytes[9], 0x02 | 0x04 | 0x20);
        // will topic and payload land after the client id
        let tail = &bytes[bytes.len() - 15..];
        assert_eq!(tail, b"\x00\x00\x06status\x00\x04gone");
    }

    #[test]
    fn publish_packet_matches_wire_capture() {
        let bytes = publish("barfoo", &[0x56, 0x78]);
        let expected = [
            0x30, 0x0b, 0x00, 0x06, b'b', b'a', b'r', b'f', b'o', b'o', 0x00, 0x56, 0x78,
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn subscribe_packet_layout() {
        let bytes = subscribe(1, "foo");
        let expected = [
            0x82, 0x09, // SUBSCRIBE with reserved flags, remaining length 9
            0x00, 0x01, // packet id
            0x00, // property length
            0x00, 0x03, b'f', b'o', b'o', 0x00, // filter + QoS 0 options
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn unsubscribe_packet_layout() {
        let bytes = unsubscribe(7, "foo");
        let expected = [
            0xa2, 0x08, 0x00, 0x07, 0x00, 0x00, 0x03, b'f', b'o', b'o',
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn pingreq_has_an_empty_body() {
        assert_eq!(pingreq(), [0xc0, 0x00]);
    }

    #[test]
    fn disconnect_carries_reason_and_empty_properties() {
        assert_eq!(disconnect(), [0xe0, 0x02, 0x00, 0x00]);
    }

    #[test]
    fn varint_round_trips_at_length_boundaries() {
        for value in [0u32, 1, 127, 128, 16_383, 16_384, 2_097_151, 2_097_152, MAX_REMAINING_LENGTH] {
            let mut out = Vec::new();
            write_varint(&mut out, value);
            let mut dec = Decoder::new(&out);
            assert_eq!(dec.varint(), Some(value), "value {value}");
            assert!(dec.rest().is_empty());
        }
    }

    #[test]
    fn varint_encoding_uses_minimal_bytes() {
        let mut out = Vec::new();
        write_varint(&mut out, 127);
        assert_eq!(out, [0x7f]);
        out.clear();
        write_varint(&mut out, 128);
        assert_eq!(out, [0x80, 0x01]);
    }

    #[test]
    fn decoder_underrun_is_none() {
        let mut dec = Decoder::new(&[0x00]);
        assert_eq!(dec.u16(), None);
        let mut dec = Decoder::new(&[0x00, 0x05, b'a']);
        assert_eq!(dec.str(), None);
    }
}
