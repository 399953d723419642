//! A stateful decoder that accepts arbitrary HTTP/2 DATA chunks — which may
//! split a frame anywhere, or bundle several frames together — and yields
//! whole length-prefixed messages in order. A partial trailing frame is
//! buffered across calls.

use bytes::{Buf, Bytes, BytesMut};
use talon_wire::frame::FRAME_HEADER_LEN;

#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for the 5-byte header (flag + length).
    Header,
    /// Header parsed; waiting for `remaining` more payload bytes.
    Payload { compressed: bool, remaining: u32 },
}

/// Decodes a byte stream into a sequence of message payloads.
///
/// `push` may be called with chunks of any size, including zero-length or
/// multi-frame chunks; `decoded` is filled with every message that became
/// complete as a result. The decoder itself never inspects payload content —
/// the `compressed` flag is surfaced to the caller since message compression
/// is an integration hook this runtime does not implement itself.
pub struct StreamDecoder {
    state: State,
    buf: BytesMut,
}

/// One fully reassembled message frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub compressed: bool,
    pub payload: Bytes,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        StreamDecoder {
            state: State::Header,
            buf: BytesMut::new(),
        }
    }

    /// Feeds a chunk of bytes in, returning every message that became
    /// complete. Messages arriving split across many `push` calls, or many
    /// messages arriving in one chunk, are both handled.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<DecodedMessage> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        loop {
            match self.state {
                State::Header => {
                    if self.buf.len() < FRAME_HEADER_LEN {
                        break;
                    }
                    let flag = self.buf[0];
                    let len = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]);
                    self.buf.advance(FRAME_HEADER_LEN);
                    self.state = State::Payload {
                        compressed: flag != 0,
                        remaining: len,
                    };
                }
                State::Payload {
                    compressed,
                    remaining,
                } => {
                    let remaining = remaining as usize;
                    if self.buf.len() < remaining {
                        break;
                    }
                    let payload = self.buf.split_to(remaining).freeze();
                    out.push(DecodedMessage { compressed, payload });
                    self.state = State::Header;
                }
            }
        }

        out
    }

    /// True if the decoder is sitting on a partial frame (a header with more
    /// payload expected, or fewer than 5 header bytes).
    pub fn has_pending_partial_frame(&self) -> bool {
        match self.state {
            State::Header => !self.buf.is_empty(),
            State::Payload { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talon_wire::frame::encode_frame;

    #[test]
    fn decodes_one_complete_frame() {
        let mut decoder = StreamDecoder::new();
        let frame = encode_frame(b"hello");
        let messages = decoder.push(&frame);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, Bytes::from_static(b"hello"));
        assert!(!messages[0].compressed);
    }

    #[test]
    fn decodes_across_arbitrary_chunk_boundaries() {
        let frame = encode_frame(b"hello world");
        let mut decoder = StreamDecoder::new();
        let mut out = Vec::new();

        // Feed the frame back one byte at a time.
        for byte in frame.iter() {
            out.extend(decoder.push(&[*byte]));
        }

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload, Bytes::from_static(b"hello world"));
    }

    #[test]
    fn decodes_multiple_frames_in_one_chunk() {
        let mut combined = Vec::new();
        combined.extend_from_slice(&encode_frame(b"one"));
        combined.extend_from_slice(&encode_frame(b"two"));
        combined.extend_from_slice(&encode_frame(b"three"));

        let mut decoder = StreamDecoder::new();
        let messages = decoder.push(&combined);

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].payload, Bytes::from_static(b"one"));
        assert_eq!(messages[1].payload, Bytes::from_static(b"two"));
        assert_eq!(messages[2].payload, Bytes::from_static(b"three"));
    }

    #[test]
    fn buffers_partial_trailing_frame() {
        let frame = encode_frame(b"hello");
        let mut decoder = StreamDecoder::new();

        let (first, second) = frame.split_at(3);
        assert!(decoder.push(first).is_empty());
        assert!(decoder.has_pending_partial_frame());

        let messages = decoder.push(second);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, Bytes::from_static(b"hello"));
        assert!(!decoder.has_pending_partial_frame());
    }

    #[test]
    fn empty_payload_frame_decodes_to_empty_message() {
        let frame = encode_frame(b"");
        let mut decoder = StreamDecoder::new();
        let messages = decoder.push(&frame);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload.len(), 0);
    }

    #[test]
    fn arbitrary_chunk_boundaries_across_many_messages_preserve_order() {
        let payloads: Vec<Bytes> = (0..20)
            .map(|i| Bytes::from(format!("message-{i}")))
            .collect();
        let mut combined = BytesMut::new();
        for p in &payloads {
            combined.extend_from_slice(&encode_frame(p));
        }

        // Split at pseudo-random offsets.
        let mut decoder = StreamDecoder::new();
        let mut decoded = Vec::new();
        let bytes = combined.freeze();
        let mut offset = 0;
        let mut step = 1usize;
        while offset < bytes.len() {
            let end = (offset + step).min(bytes.len());
            decoded.extend(decoder.push(&bytes[offset..end]));
            offset = end;
            step = step % 7 + 1;
        }

        assert_eq!(decoded.len(), payloads.len());
        for (decoded_msg, original) in decoded.iter().zip(payloads.iter()) {
            assert_eq!(&decoded_msg.payload, original);
        }
    }
}
