//! Record-delimited and length-prefixed byte framing.
//!
//! Two framing strategies sit under the per-message codecs:
//! - [`text`]: record-separator (`0x1E`) delimited, used by the JSON hub
//!   codec and the negotiation handshake.
//! - [`binary`]: 7-bit varint length-prefix, used by the MessagePack hub
//!   codec.
//!
//! Both follow the same contract: a decode function that either returns a
//! whole record and advances the caller's cursor, or reports "not enough
//! data yet" without consuming anything. Partial records are never
//! returned.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::HubError;

/// The record separator byte terminating every text-framed message.
pub const RECORD_SEPARATOR: u8 = 0x1E;

/// Record-separator framing for the text wire format.
pub mod text {
    use super::*;

    /// Append `payload` followed by the record separator.
    pub fn encode(payload: &[u8], out: &mut BytesMut) {
        out.put_slice(payload);
        out.put_u8(RECORD_SEPARATOR);
    }

    /// Slice the first complete record out of `buf`, advancing past it
    /// (including the separator) on success.
    ///
    /// Returns `Ok(None)` if no separator is present yet — `buf` is left
    /// untouched so more bytes can be appended by the caller.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<BytesMut>, HubError> {
        let Some(pos) = buf.iter().position(|&b| b == RECORD_SEPARATOR) else {
            return Ok(None);
        };
        let mut record = buf.split_to(pos);
        buf.advance(1); // drop the separator itself
        record.truncate(record.len());
        Ok(Some(record))
    }
}

/// 7-bit varint length-prefix framing for the binary wire format.
///
/// Continuation bit is the high bit of each byte; up to 5 bytes, which
/// bounds payload length to `2^35 - 1` but the practical ceiling quoted
/// in §4.C is ~2 GiB (fits comfortably in `u32`).
pub mod binary {
    use super::*;

    const MAX_VARINT_BYTES: usize = 5;

    /// Write the varint length prefix followed by `payload`.
    pub fn encode(payload: &[u8], out: &mut BytesMut) {
        write_varint(payload.len() as u64, out);
        out.put_slice(payload);
    }

    fn write_varint(mut value: u64, out: &mut BytesMut) {
        loop {
            let mut byte = (value & 0x7f) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            out.put_u8(byte);
            if value == 0 {
                break;
            }
        }
    }

    /// Decode one length-prefixed record from `buf`, advancing past it on
    /// success.
    ///
    /// Returns `Ok(None)` if the prefix or the payload isn't fully
    /// buffered yet. Returns `Err` if the varint exceeds
    /// [`MAX_VARINT_BYTES`] without terminating.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<BytesMut>, HubError> {
        let mut len: u64 = 0;
        let mut shift = 0u32;
        let mut consumed = 0usize;

        loop {
            if consumed >= buf.len() {
                return Ok(None); // prefix incomplete
            }
            if consumed >= MAX_VARINT_BYTES {
                return Err(HubError::protocol("length prefix exceeds 5 bytes"));
            }
            let byte = buf[consumed];
            len |= ((byte & 0x7f) as u64) << shift;
            consumed += 1;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }

        let total = consumed + len as usize;
        if buf.len() < total {
            return Ok(None); // payload incomplete
        }

        buf.advance(consumed);
        Ok(Some(buf.split_to(len as usize)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_round_trip() {
        let mut out = BytesMut::new();
        text::encode(b"hello", &mut out);
        assert_eq!(&out[..], b"hello\x1e");

        let decoded = text::decode(&mut out).unwrap().unwrap();
        assert_eq!(&decoded[..], b"hello");
        assert!(out.is_empty());
    }

    #[test]
    fn text_decode_leaves_partial_buffer_intact() {
        let mut buf = BytesMut::from(&b"no separator yet"[..]);
        let result = text::decode(&mut buf).unwrap();
        assert!(result.is_none());
        assert_eq!(&buf[..], b"no separator yet");
    }

    #[test]
    fn text_decode_consumes_only_first_record() {
        let mut buf = BytesMut::from(&b"one\x1etwo\x1e"[..]);
        let first = text::decode(&mut buf).unwrap().unwrap();
        assert_eq!(&first[..], b"one");
        assert_eq!(&buf[..], b"two\x1e");
    }

    #[test]
    fn binary_round_trip_small() {
        let mut out = BytesMut::new();
        binary::encode(b"hi", &mut out);
        assert_eq!(&out[..], &[2, b'h', b'i']);

        let decoded = binary::decode(&mut out).unwrap().unwrap();
        assert_eq!(&decoded[..], b"hi");
    }

    #[test]
    fn binary_varint_multi_byte() {
        let payload = vec![0u8; 300];
        let mut out = BytesMut::new();
        binary::encode(&payload, &mut out);
        // 300 = 0b1_0010_1100 -> low 7 bits 0x2c | 0x80, then 0x02
        assert_eq!(&out[..2], &[0xac, 0x02]);

        let decoded = binary::decode(&mut out).unwrap().unwrap();
        assert_eq!(decoded.len(), 300);
    }

    #[test]
    fn binary_decode_waits_for_full_payload() {
        let mut buf = BytesMut::from(&[5u8, b'h', b'i'][..]); // len=5 but only 2 bytes present
        let result = binary::decode(&mut buf).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), 3); // untouched
    }

    #[test]
    fn binary_decode_rejects_runaway_varint() {
        let mut buf = BytesMut::from(&[0x80u8, 0x80, 0x80, 0x80, 0x80, 0x01][..]);
        let result = binary::decode(&mut buf);
        assert!(result.is_err());
    }
}
