//! WebSocket frame parsing and serialization
//!
//! Byte-exact RFC 6455 framing: a 2-byte base header, extended 16/64-bit
//! big-endian length fields selected by base lengths 126/127, and an
//! optional 4-byte masking key for client→server frames.
//!
//! Decoding never consumes bytes until a complete frame is available, so
//! the caller can keep the unconsumed remainder in the connection's inbound
//! buffer and retry on the next read. A single read may also carry several
//! frames; callers parse in a loop until `Ok(None)`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::mask::{apply_mask, generate_mask};
use crate::{MEDIUM_PAYLOAD_MAX, SMALL_PAYLOAD_MAX};

/// WebSocket opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Continuation frame
    Continuation = 0x0,
    /// Text frame
    Text = 0x1,
    /// Binary frame
    Binary = 0x2,
    /// Connection close
    Close = 0x8,
    /// Ping
    Ping = 0x9,
    /// Pong
    Pong = 0xA,
}

impl OpCode {
    /// Parse opcode from byte
    #[inline]
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }
}

/// A decoded WebSocket frame
///
/// Transient: produced per decode call, handed to the opcode dispatcher,
/// never persisted. Masked payloads arrive already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag
    pub fin: bool,
    /// Frame opcode
    pub opcode: OpCode,
    /// Frame payload (already unmasked)
    pub payload: Bytes,
}

/// Incremental frame parser over a retained inbound buffer
///
/// `parse` consumes nothing until the buffer holds the declared header and
/// full payload, so a frame split across any number of reads reassembles
/// identically to a single-read delivery.
#[derive(Debug, Clone)]
pub struct FrameParser {
    /// Maximum accepted payload size
    max_frame_size: usize,
}

impl FrameParser {
    /// Create a new frame parser
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Parse one frame from the buffer
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was parsed (its bytes are
    ///   consumed from `buf`)
    /// - `Ok(None)` if more data is needed (`buf` is untouched)
    /// - `Err(e)` if the frame is unparseable
    pub fn parse(&self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let b0 = buf[0];
        let b1 = buf[1];

        let fin = b0 & 0x80 != 0;
        let opcode = OpCode::from_u8(b0 & 0x0F).ok_or(Error::InvalidFrame("invalid opcode"))?;

        let masked = b1 & 0x80 != 0;
        let len_byte = b1 & 0x7F;

        // Extended length field width is selected by the 7-bit base length
        let (payload_len, len_field_end) = match len_byte {
            126 => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4)
            }
            127 => {
                if buf.len() < 10 {
                    return Ok(None);
                }
                let len = u64::from_be_bytes([
                    buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8], buf[9],
                ]);
                (len, 10)
            }
            n => (n as u64, 2),
        };

        if payload_len > self.max_frame_size as u64 {
            return Err(Error::FrameTooLarge);
        }

        let header_len = len_field_end + if masked { 4 } else { 0 };
        let payload_len = payload_len as usize;

        if buf.len() < header_len + payload_len {
            return Ok(None);
        }

        let mask = if masked {
            Some([
                buf[len_field_end],
                buf[len_field_end + 1],
                buf[len_field_end + 2],
                buf[len_field_end + 3],
            ])
        } else {
            None
        };

        buf.advance(header_len);
        let mut payload = buf.split_to(payload_len);

        if let Some(key) = mask {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Frame {
            fin,
            opcode,
            payload: payload.freeze(),
        }))
    }
}

/// Encode a server→client frame into a buffer
///
/// FIN is always set (no fragmentation is emitted) and the MASK bit is
/// never set in this direction.
pub fn encode_frame(buf: &mut BytesMut, opcode: OpCode, payload: &[u8]) {
    encode_header(buf, opcode, payload.len(), 0x00);
    buf.put_slice(payload);
}

/// Encode a client→server frame into a buffer
///
/// Sets the MASK bit, appends a random 4-byte key, and XOR-masks the
/// payload. Used by the diagnostic client and protocol tests, never by the
/// server.
pub fn encode_frame_masked(buf: &mut BytesMut, opcode: OpCode, payload: &[u8]) {
    encode_header(buf, opcode, payload.len(), 0x80);

    let key = generate_mask();
    buf.put_slice(&key);

    let start = buf.len();
    buf.put_slice(payload);
    apply_mask(&mut buf[start..], key);
}

fn encode_header(buf: &mut BytesMut, opcode: OpCode, payload_len: usize, mask_bit: u8) {
    let header_size = 2
        + if payload_len > MEDIUM_PAYLOAD_MAX {
            8
        } else if payload_len > SMALL_PAYLOAD_MAX {
            2
        } else {
            0
        }
        + if mask_bit != 0 { 4 } else { 0 };

    buf.reserve(header_size + payload_len);
    buf.put_u8(0x80 | opcode as u8);

    if payload_len <= SMALL_PAYLOAD_MAX {
        buf.put_u8(mask_bit | payload_len as u8);
    } else if payload_len <= MEDIUM_PAYLOAD_MAX {
        buf.put_u8(mask_bit | 126);
        buf.put_u16(payload_len as u16);
    } else {
        buf.put_u8(mask_bit | 127);
        buf.put_u64(payload_len as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 64 * 1024 * 1024;

    fn roundtrip(payload: &[u8], opcode: OpCode) -> Frame {
        let mut buf = BytesMut::new();
        encode_frame_masked(&mut buf, opcode, payload);

        let parser = FrameParser::new(MAX);
        let frame = parser.parse(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty(), "decoder must consume the whole frame");
        frame
    }

    #[test]
    fn test_roundtrip_boundary_lengths() {
        for len in [0usize, 1, 125, 126, 65535, 65536] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let frame = roundtrip(&payload, OpCode::Text);
            assert!(frame.fin);
            assert_eq!(frame.opcode, OpCode::Text);
            assert_eq!(frame.payload.as_ref(), &payload[..], "length {}", len);
        }
    }

    #[test]
    fn test_length_field_width_selection() {
        let cases = [
            (125usize, 0x7du8, 2usize),
            (126, 126, 4),
            (65535, 126, 4),
            (65536, 127, 10),
        ];
        for (len, expected_len_byte, header) in cases {
            let mut buf = BytesMut::new();
            encode_frame(&mut buf, OpCode::Text, &vec![0u8; len]);
            assert_eq!(buf[1] & 0x7F, expected_len_byte, "length {}", len);
            assert_eq!(buf.len(), header + len, "length {}", len);
        }
    }

    #[test]
    fn test_zero_length_payload() {
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, OpCode::Text, b"");
        assert_eq!(buf.as_ref(), &[0x81, 0x00]);

        let frame = FrameParser::new(MAX).parse(&mut buf).unwrap().unwrap();
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_server_frames_unmasked() {
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, OpCode::Text, b"hello");
        assert_eq!(buf[0], 0x81);
        assert_eq!(buf[1], 0x05); // no mask bit
        assert_eq!(&buf[2..], b"hello");
    }

    #[test]
    fn test_incomplete_consumes_nothing() {
        let mut full = BytesMut::new();
        encode_frame_masked(&mut full, OpCode::Text, b"partial frame payload");
        let total = full.len();

        let parser = FrameParser::new(MAX);
        for cut in 0..total {
            let mut buf = BytesMut::from(&full[..cut]);
            assert!(parser.parse(&mut buf).unwrap().is_none(), "cut {}", cut);
            assert_eq!(buf.len(), cut, "no bytes consumed at cut {}", cut);
        }
    }

    #[test]
    fn test_split_delivery_matches_single_read() {
        let payload = b"split me across two reads";
        let mut reference = BytesMut::new();
        encode_frame_masked(&mut reference, OpCode::Text, payload);
        let wire = reference.clone().freeze();

        let parser = FrameParser::new(MAX);
        let expected = parser.parse(&mut reference).unwrap().unwrap();

        for cut in 0..wire.len() {
            let mut buf = BytesMut::from(&wire[..cut]);
            assert!(parser.parse(&mut buf).unwrap().is_none());

            buf.extend_from_slice(&wire[cut..]);
            let frame = parser.parse(&mut buf).unwrap().unwrap();
            assert_eq!(frame, expected, "split at byte {}", cut);
        }
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut buf = BytesMut::new();
        encode_frame_masked(&mut buf, OpCode::Text, b"first");
        encode_frame_masked(&mut buf, OpCode::Text, b"second");
        encode_frame_masked(&mut buf, OpCode::Ping, b"");

        let parser = FrameParser::new(MAX);
        assert_eq!(
            parser.parse(&mut buf).unwrap().unwrap().payload.as_ref(),
            b"first"
        );
        assert_eq!(
            parser.parse(&mut buf).unwrap().unwrap().payload.as_ref(),
            b"second"
        );
        assert_eq!(
            parser.parse(&mut buf).unwrap().unwrap().opcode,
            OpCode::Ping
        );
        assert!(parser.parse(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_unmasked_client_payload_passes_through() {
        // The decoder tolerates unmasked frames in either direction
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, OpCode::Text, b"plain");

        let frame = FrameParser::new(MAX).parse(&mut buf).unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), b"plain");
    }

    #[test]
    fn test_invalid_opcode_rejected() {
        let mut buf = BytesMut::from(&[0x83u8, 0x00][..]); // opcode 0x3 is reserved
        assert!(FrameParser::new(MAX).parse(&mut buf).is_err());
    }

    #[test]
    fn test_frame_too_large() {
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, OpCode::Text, &vec![0u8; 2048]);
        assert!(matches!(
            FrameParser::new(1024).parse(&mut buf),
            Err(Error::FrameTooLarge)
        ));
    }
}
