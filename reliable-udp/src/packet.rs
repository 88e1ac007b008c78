//! Wire-format definitions for reliability framing.
//!
//! Every datagram exchanged between peers is a [`Frame`].  This module is
//! responsible for:
//! - Defining the on-wire header (flag byte, optional sequence byte).
//! - Serialising payloads into byte buffers ready for transmission
//!   ([`encode_unreliable`], [`encode_data`], [`encode_ack`]).
//! - Deserialising a raw datagram back into a [`Frame`], returning errors for
//!   empty or truncated input.
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! ```text
//!  Unreliable datagram:   +------+----------------+
//!                         | 0x00 | payload ...    |
//!                         +------+----------------+
//!
//!  Reliable data packet:  +------+-----+----------------+
//!                         | 0xC0 | seq | payload ...    |
//!                         +------+-----+----------------+
//!
//!  Ack packet:            +------+-----+
//!                         | 0xA0 | seq |
//!                         +------+-----+
//! ```
//!
//! Every datagram carries at least the 1-byte flag header; reliable ones carry
//! [`RELIABLE_HEADER_LEN`] = 2 bytes.

/// Bit-flag constants for the first header byte.
pub mod flags {
    /// Reliability metadata (a sequence byte) follows the flag byte.
    pub const REALIZABLE: u8 = 0b1000_0000;
    /// Data packet that the receiver must acknowledge.
    pub const SEQ: u8 = 0b0100_0000;
    /// Pure acknowledgement; carries no payload.
    pub const ACK: u8 = 0b0010_0000;
}

/// Header length of an unreliable datagram.
pub const UNRELIABLE_HEADER_LEN: usize = 1;

/// Header length of a data or ack packet (flags + sequence number).
pub const RELIABLE_HEADER_LEN: usize = 2;

/// A decoded datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Best-effort payload with no reliability metadata.
    Unreliable(Vec<u8>),
    /// Payload that must be acknowledged with the same `seq`.
    Data { seq: u8, payload: Vec<u8> },
    /// Acknowledgement of the data packet carrying `seq`.
    Ack { seq: u8 },
}

impl Frame {
    /// Parse a [`Frame`] from a raw datagram.
    ///
    /// When the `REALIZABLE` bit is clear the first byte is stripped without
    /// further inspection.  An ack that happens to carry trailing bytes is
    /// accepted and the trailing bytes are ignored.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is empty,
    /// - `REALIZABLE` is set but the sequence byte is missing, or
    /// - `REALIZABLE` is set with neither `SEQ` nor `ACK`.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        let (&head, rest) = buf.split_first().ok_or(FrameError::Empty)?;

        if head & flags::REALIZABLE == 0 {
            return Ok(Frame::Unreliable(rest.to_vec()));
        }

        let (&seq, payload) = rest.split_first().ok_or(FrameError::Truncated)?;

        if head & flags::SEQ != 0 {
            Ok(Frame::Data {
                seq,
                payload: payload.to_vec(),
            })
        } else if head & flags::ACK != 0 {
            Ok(Frame::Ack { seq })
        } else {
            Err(FrameError::UnknownFlags(head))
        }
    }
}

/// Frame `payload` as an unreliable datagram.
pub fn encode_unreliable(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(UNRELIABLE_HEADER_LEN + payload.len());
    buf.push(0);
    buf.extend_from_slice(payload);
    buf
}

/// Frame `payload` as a data packet with sequence number `seq`.
pub fn encode_data(seq: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RELIABLE_HEADER_LEN + payload.len());
    buf.push(flags::REALIZABLE | flags::SEQ);
    buf.push(seq);
    buf.extend_from_slice(payload);
    buf
}

/// Build the ack datagram for sequence number `seq`.
pub fn encode_ack(seq: u8) -> Vec<u8> {
    vec![flags::REALIZABLE | flags::ACK, seq]
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Zero-length datagram; not even a flag byte.
    #[error("empty datagram")]
    Empty,
    /// `REALIZABLE` flag set but no sequence byte follows.
    #[error("reliable header truncated before sequence byte")]
    Truncated,
    /// `REALIZABLE` flag set with neither `SEQ` nor `ACK`.
    #[error("unrecognised flag combination {0:#04x}")]
    UnknownFlags(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreliable_layout() {
        let bytes = encode_unreliable(b"hello");
        assert_eq!(bytes, b"\x00hello");
        assert_eq!(Frame::decode(&bytes), Ok(Frame::Unreliable(b"hello".to_vec())));
    }

    #[test]
    fn data_layout() {
        let bytes = encode_data(7, b"hello");
        assert_eq!(&bytes[..2], &[0xC0, 7]);
        assert_eq!(
            Frame::decode(&bytes),
            Ok(Frame::Data {
                seq: 7,
                payload: b"hello".to_vec()
            })
        );
    }

    #[test]
    fn ack_layout_matches_wire_format() {
        assert_eq!(encode_ack(200), vec![0xA0, 200]);
        assert_eq!(Frame::decode(&[0xA0, 200]), Ok(Frame::Ack { seq: 200 }));
    }

    #[test]
    fn flag_values() {
        assert_eq!(flags::REALIZABLE, 0x80);
        assert_eq!(flags::SEQ, 0x40);
        assert_eq!(flags::ACK, 0x20);
        assert_eq!(encode_ack(0)[0], 0xA0);
        assert_eq!(encode_data(0, b"")[0], 0xC0);
    }

    #[test]
    fn empty_payloads_still_carry_a_header() {
        assert_eq!(encode_unreliable(b""), vec![0]);
        assert_eq!(encode_data(3, b""), vec![0xC0, 3]);
        assert_eq!(Frame::decode(&[0]), Ok(Frame::Unreliable(vec![])));
        assert_eq!(
            Frame::decode(&[0xC0, 3]),
            Ok(Frame::Data {
                seq: 3,
                payload: vec![]
            })
        );
    }

    #[test]
    fn decode_empty_buffer_returns_error() {
        assert_eq!(Frame::decode(&[]), Err(FrameError::Empty));
    }

    #[test]
    fn decode_reliable_without_sequence_byte_returns_error() {
        assert_eq!(Frame::decode(&[0xC0]), Err(FrameError::Truncated));
        assert_eq!(Frame::decode(&[0xA0]), Err(FrameError::Truncated));
    }

    #[test]
    fn decode_realizable_without_seq_or_ack_returns_error() {
        assert_eq!(Frame::decode(&[0x80, 1]), Err(FrameError::UnknownFlags(0x80)));
    }

    #[test]
    fn seq_takes_precedence_when_both_bits_set() {
        let decoded = Frame::decode(&[0xE0, 9, 1]).unwrap();
        assert_eq!(
            decoded,
            Frame::Data {
                seq: 9,
                payload: vec![1]
            }
        );
    }

    #[test]
    fn ack_with_trailing_bytes_ignores_them() {
        assert_eq!(Frame::decode(&[0xA0, 4, 1, 2]), Ok(Frame::Ack { seq: 4 }));
    }

    #[test]
    fn unreliable_strips_first_byte_regardless_of_low_bits() {
        assert_eq!(Frame::decode(&[0x01, b'x']), Ok(Frame::Unreliable(b"x".to_vec())));
    }
}
