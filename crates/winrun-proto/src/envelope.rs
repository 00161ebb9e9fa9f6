//! Envelope framing: `<type:u8><length:u32 LE><payload>`.
//!
//! The parser is byte-exact and tolerates partial buffers: [`try_read`]
//! consumes nothing until a complete envelope is available, then consumes
//! exactly `5 + length` bytes. Callers accumulate socket reads in a buffer
//! and call [`try_read`] in a loop, draining consumed bytes between calls.
//!
//! # Security
//!
//! The payload is parsed only after the type byte passes the catalog and
//! direction checks, and only when the declared length is under
//! [`MAX_PAYLOAD_SIZE`]. A header claiming more than the maximum is rejected
//! immediately instead of stalling the connection waiting for bytes that
//! will never arrive.

use bytes::BufMut;

use crate::errors::{ProtocolError, Result};
use crate::message_type::{Direction, MessageType};
use crate::messages::Message;

/// Fixed envelope header size: one type byte plus a little-endian u32 length.
pub const HEADER_LEN: usize = 5;

/// Maximum payload size (64 MiB).
///
/// Sized so an uncompressed 4K BGRA frame pushed via `FrameData` still fits
/// with JSON overhead.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// Outcome of a [`try_read`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct TryRead {
    /// Bytes consumed from the front of the buffer. Zero when the buffer
    /// does not yet hold a complete envelope.
    pub consumed: usize,
    /// The parsed message, when one was consumed.
    pub message: Option<Message>,
}

impl TryRead {
    const fn incomplete() -> Self {
        Self { consumed: 0, message: None }
    }
}

/// Serialize a message into a fresh envelope.
pub fn serialize(message: &Message) -> Result<Vec<u8>> {
    let payload = message.encode_payload()?;
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge { size: payload.len(), max: MAX_PAYLOAD_SIZE });
    }

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.put_u8(message.message_type().to_u8());
    out.put_u32_le(payload.len() as u32);
    out.put_slice(&payload);
    Ok(out)
}

/// Try to read one envelope from the front of `buffer`.
///
/// Returns `consumed = 0` when fewer than [`HEADER_LEN`] bytes are present
/// or the declared payload has not fully arrived. Otherwise consumes exactly
/// `HEADER_LEN + length` bytes and yields the message.
///
/// # Errors
///
/// - [`ProtocolError::UnknownMessageType`] for a type byte outside the
///   catalog or on the wrong side of `0x80` for `origin`; nothing is
///   consumed and the caller should disconnect.
/// - [`ProtocolError::PayloadTooLarge`] for a length over the maximum.
/// - [`ProtocolError::DecodeFailure`] when the payload JSON does not parse.
pub fn try_read(buffer: &[u8], origin: Direction) -> Result<TryRead> {
    if buffer.len() < HEADER_LEN {
        return Ok(TryRead::incomplete());
    }

    let ty = MessageType::from_u8_inbound(buffer[0], origin)?;

    // INVARIANT: length check above guarantees 5 header bytes.
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&buffer[1..HEADER_LEN]);
    let length = u32::from_le_bytes(len_bytes) as usize;

    if length > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge { size: length, max: MAX_PAYLOAD_SIZE });
    }

    let total = HEADER_LEN + length;
    if buffer.len() < total {
        return Ok(TryRead::incomplete());
    }

    let message = Message::decode_payload(ty, &buffer[HEADER_LEN..total])?;
    Ok(TryRead { consumed: total, message: Some(message) })
}

/// Parse exactly one envelope from the front of `buffer`.
///
/// `None` when the buffer does not yet hold a complete envelope; otherwise
/// the catalog type and the parsed message. Trailing bytes are ignored.
pub fn deserialize(buffer: &[u8], origin: Direction) -> Result<Option<(MessageType, Message)>> {
    let outcome = try_read(buffer, origin)?;
    Ok(outcome.message.map(|m| (m.message_type(), m)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::session::{Ack, Heartbeat};
    use crate::messages::window::FrameReady;

    fn heartbeat() -> Message {
        Message::Heartbeat(Heartbeat { uptime_seconds: 7 })
    }

    #[test]
    fn serialize_layout() {
        let wire = serialize(&heartbeat()).unwrap();
        assert_eq!(wire[0], 0x87);
        let declared = u32::from_le_bytes([wire[1], wire[2], wire[3], wire[4]]) as usize;
        assert_eq!(declared, wire.len() - HEADER_LEN);
    }

    #[test]
    fn round_trip() {
        let wire = serialize(&heartbeat()).unwrap();
        let (ty, msg) = deserialize(&wire, Direction::GuestToHost).unwrap().unwrap();
        assert_eq!(ty, MessageType::Heartbeat);
        assert_eq!(msg, heartbeat());
    }

    #[test]
    fn partial_header_consumes_nothing() {
        let wire = serialize(&heartbeat()).unwrap();
        for cut in 0..HEADER_LEN {
            let outcome = try_read(&wire[..cut], Direction::GuestToHost).unwrap();
            assert_eq!(outcome, TryRead { consumed: 0, message: None });
        }
    }

    #[test]
    fn partial_payload_consumes_nothing() {
        let wire = serialize(&heartbeat()).unwrap();
        for cut in HEADER_LEN..wire.len() {
            let outcome = try_read(&wire[..cut], Direction::GuestToHost).unwrap();
            assert_eq!(outcome.consumed, 0, "cut at {cut}");
        }
    }

    #[test]
    fn consumes_exactly_one_envelope() {
        let mut wire = serialize(&heartbeat()).unwrap();
        let first_len = wire.len();
        let second = serialize(&Message::FrameReady(FrameReady {
            window_id: 3,
            slot_index: 0,
            frame_number: 1,
        }))
        .unwrap();
        wire.extend_from_slice(&second);

        let outcome = try_read(&wire, Direction::GuestToHost).unwrap();
        assert_eq!(outcome.consumed, first_len);
        assert_eq!(outcome.message, Some(heartbeat()));

        let outcome = try_read(&wire[first_len..], Direction::GuestToHost).unwrap();
        assert_eq!(outcome.consumed, second.len());
        assert!(matches!(outcome.message, Some(Message::FrameReady(_))));
    }

    #[test]
    fn unknown_type_consumes_nothing() {
        let mut wire = serialize(&heartbeat()).unwrap();
        wire[0] = 0x7F; // not in the catalog
        let err = try_read(&wire, Direction::GuestToHost).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownMessageType { type_byte: 0x7F });
    }

    #[test]
    fn wrong_direction_is_unknown_type() {
        // Ack is guest→host; reading it as guest-bound input must fail.
        let wire = serialize(&Message::Ack(Ack::ok(1))).unwrap();
        let err = try_read(&wire, Direction::HostToGuest).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownMessageType { type_byte: 0xFF });
    }

    #[test]
    fn oversized_length_rejected_immediately() {
        let mut wire = vec![0x87u8];
        wire.extend_from_slice(&(MAX_PAYLOAD_SIZE as u32 + 1).to_le_bytes());
        let err = try_read(&wire, Direction::GuestToHost).unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadTooLarge { .. }));
    }

    #[test]
    fn garbage_payload_is_decode_failure() {
        let mut wire = vec![0x87u8];
        wire.extend_from_slice(&3u32.to_le_bytes());
        wire.extend_from_slice(b"{{{");
        let err = try_read(&wire, Direction::GuestToHost).unwrap_err();
        assert!(matches!(err, ProtocolError::DecodeFailure { type_byte: 0x87, .. }));
    }
}
