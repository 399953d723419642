//! The 5-byte length-prefixed message frame used inside HTTP/2 DATA frames.
//!
//! `[compression-flag: 1][length: 4 big-endian][payload: length]`. Frames
//! concatenate within a stream; decoding them back out of arbitrary chunk
//! boundaries is [`talon_codec::StreamDecoder`](../talon_codec/struct.StreamDecoder.html).

use bytes::{BufMut, Bytes, BytesMut};

/// Size of the frame header: 1 compression-flag byte + 4 length bytes.
pub const FRAME_HEADER_LEN: usize = 5;

/// Only `identity` (uncompressed) framing is implemented; the flag byte is
/// still part of the wire format so a future compression hook can use it.
pub const COMPRESSION_IDENTITY: u8 = 0;

/// Encodes one message as a complete length-prefixed frame.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u8(COMPRESSION_IDENTITY);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_header_then_payload() {
        let frame = encode_frame(b"hello");
        assert_eq!(frame.len(), FRAME_HEADER_LEN + 5);
        assert_eq!(frame[0], COMPRESSION_IDENTITY);
        assert_eq!(&frame[1..5], &5u32.to_be_bytes());
        assert_eq!(&frame[5..], b"hello");
    }

    #[test]
    fn encodes_empty_payload() {
        let frame = encode_frame(b"");
        assert_eq!(frame.len(), FRAME_HEADER_LEN);
        assert_eq!(&frame[1..5], &0u32.to_be_bytes());
    }
}
