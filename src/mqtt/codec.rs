//! MQTT 3.1.1 packet codec
//!
//! Builds CONNECT, PUBLISH (QoS 0) and DISCONNECT packets and validates
//! CONNACK responses. Pure functions only: nothing in here touches a socket.

use crate::error::CodecError;

/// CONNECT packet type
pub const CONNECT: u8 = 0x10;
/// CONNACK packet type
pub const CONNACK: u8 = 0x20;
/// PUBLISH packet type with QoS 0, no DUP, no RETAIN
pub const PUBLISH: u8 = 0x30;
/// DISCONNECT packet type
pub const DISCONNECT: u8 = 0xE0;

/// Protocol name field
const PROTOCOL_NAME: &[u8] = b"MQTT";
/// Protocol level for MQTT 3.1.1
const PROTOCOL_LEVEL: u8 = 0x04;
/// Clean session, no credentials, no will
const CONNECT_FLAGS: u8 = 0x00;

/// Size of a CONNACK packet on the wire
pub const CONNACK_LEN: usize = 4;

/// Largest length of a length-prefixed string field
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Largest remaining length a 4-byte variable byte integer can carry
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Largest remaining length that fits in a single byte
pub const MAX_SINGLE_BYTE_LENGTH: usize = 127;

/// How the remaining-length field is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LengthMode {
    /// Full MQTT variable byte integer, 1 to 4 bytes
    #[default]
    Variable,
    /// One byte only, for brokers and tools that expect the legacy framing.
    /// Packets whose remaining length exceeds 127 are rejected.
    SingleByte,
}

impl LengthMode {
    /// Largest remaining length this mode can represent
    pub fn max_remaining_length(self) -> usize {
        match self {
            LengthMode::Variable => MAX_REMAINING_LENGTH,
            LengthMode::SingleByte => MAX_SINGLE_BYTE_LENGTH,
        }
    }
}

/// Build a CONNECT packet
///
/// Layout: `10 <len> 00 04 'M' 'Q' 'T' 'T' 04 00 <keep alive> <id len> <id>`
pub fn encode_connect(
    client_id: &str,
    keep_alive_secs: u16,
    mode: LengthMode,
) -> Result<Vec<u8>, CodecError> {
    let id = client_id.as_bytes();
    check_string_len("client id", id)?;

    // name field (6) + level + flags + keep alive (2)
    let variable_header_len = 2 + PROTOCOL_NAME.len() + 1 + 1 + 2;
    let remaining_length = variable_header_len + 2 + id.len();

    let mut packet = start_packet(CONNECT, remaining_length, mode)?;
    put_string(&mut packet, PROTOCOL_NAME);
    packet.push(PROTOCOL_LEVEL);
    packet.push(CONNECT_FLAGS);
    packet.extend_from_slice(&keep_alive_secs.to_be_bytes());
    put_string(&mut packet, id);

    Ok(packet)
}

/// Build a QoS 0 PUBLISH packet
///
/// QoS 0 carries no packet identifier, so the variable header is just the
/// topic name.
pub fn encode_publish(topic: &str, payload: &[u8], mode: LengthMode) -> Result<Vec<u8>, CodecError> {
    let topic = topic.as_bytes();
    check_string_len("topic", topic)?;

    let remaining_length = 2 + topic.len() + payload.len();

    let mut packet = start_packet(PUBLISH, remaining_length, mode)?;
    put_string(&mut packet, topic);
    packet.extend_from_slice(payload);

    Ok(packet)
}

/// Build a DISCONNECT packet
pub fn encode_disconnect() -> [u8; 2] {
    [DISCONNECT, 0x00]
}

/// Validate the CONNACK read after sending CONNECT
///
/// Only the type byte and the return code are checked. Byte 1 (remaining
/// length) and byte 2 (acknowledge flags) are not interpreted.
pub fn decode_connack(bytes: &[u8]) -> Result<(), CodecError> {
    if bytes.len() < CONNACK_LEN {
        return Err(CodecError::ProtocolViolation(format!(
            "CONNACK needs {} bytes, got {}",
            CONNACK_LEN,
            bytes.len()
        )));
    }

    if bytes[0] != CONNACK {
        return Err(CodecError::ProtocolViolation(format!(
            "expected CONNACK (0x{:02X}), got packet type 0x{:02X}",
            CONNACK, bytes[0]
        )));
    }

    match bytes[3] {
        0 => Ok(()),
        code => Err(CodecError::ConnectionRejected(code)),
    }
}

/// Append `value` as a variable byte integer
///
/// Returns the number of bytes written.
pub fn encode_remaining_length(value: usize, buf: &mut Vec<u8>) -> Result<usize, CodecError> {
    if value > MAX_REMAINING_LENGTH {
        return Err(CodecError::EncodingTooLarge {
            field: "remaining length",
            len: value,
            max: MAX_REMAINING_LENGTH,
        });
    }

    let start = buf.len();
    let mut value = value;
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
    Ok(buf.len() - start)
}

/// Number of bytes the variable byte integer for `value` occupies
pub fn remaining_length_len(value: usize) -> usize {
    match value {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

/// Decode a variable byte integer from the start of `buf`
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the value and the
/// number of bytes consumed.
#[cfg(test)]
pub fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, CodecError> {
    let mut multiplier = 1usize;
    let mut value = 0usize;

    for (i, &byte) in buf.iter().enumerate() {
        if i >= 4 {
            return Err(CodecError::ProtocolViolation(
                "remaining length longer than 4 bytes".to_string(),
            ));
        }

        value += (byte & 0x7F) as usize * multiplier;

        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }

        multiplier *= 128;
    }

    Ok(None)
}

/// Allocate a packet buffer holding the fixed header
fn start_packet(packet_type: u8, remaining_length: usize, mode: LengthMode) -> Result<Vec<u8>, CodecError> {
    let max = mode.max_remaining_length();
    if remaining_length > max {
        return Err(CodecError::EncodingTooLarge {
            field: "remaining length",
            len: remaining_length,
            max,
        });
    }

    let mut packet = Vec::with_capacity(1 + remaining_length_len(remaining_length) + remaining_length);
    packet.push(packet_type);
    encode_remaining_length(remaining_length, &mut packet)?;
    Ok(packet)
}

fn check_string_len(field: &'static str, bytes: &[u8]) -> Result<(), CodecError> {
    if bytes.len() > MAX_STRING_LEN {
        return Err(CodecError::EncodingTooLarge {
            field,
            len: bytes.len(),
            max: MAX_STRING_LEN,
        });
    }
    Ok(())
}

/// Length-prefixed string, callers check the length first
fn put_string(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(bytes);
}
