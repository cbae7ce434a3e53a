//! Frame header encoding and decoding.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     preamble ('cisco', 5B)   |     type      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         length (8B, big-endian)              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         seq (8B, big-endian)                 |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size is 22 bytes. The body that follows is exactly
//! `length` opaque bytes; see [`crate::pipe::PayloadReader`] for how those
//! bytes are exposed to callers without buffering them.

use crate::error::TunnelError;
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// `cisco` — literal bytes identifying a well-formed frame boundary.
pub const PREAMBLE: [u8; 5] = [0x63, 0x69, 0x73, 0x63, 0x6f];

/// Length of the type field, in bytes.
const TYPE_LEN: usize = 1;
/// Length of the length field, in bytes.
const LEN_LEN: usize = 8;
/// Length of the sequence field, in bytes.
const SEQ_LEN: usize = 8;

/// Total length of a frame header.
pub const HEADER_LEN: usize = PREAMBLE.len() + TYPE_LEN + LEN_LEN + SEQ_LEN;

/// Advisory framing kind. The multiplexer treats both identically; the
/// distinction exists purely for observability and for callers that want
/// to tag an exchange as "control" vs "data" (the forwarding adapter
/// treats forwarded HTTP bodies as data, for example).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Control,
    Data,
}

impl FrameKind {
    fn from_byte(byte: u8) -> Self {
        if byte == 1 {
            FrameKind::Data
        } else {
            FrameKind::Control
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            FrameKind::Control => 0,
            FrameKind::Data => 1,
        }
    }
}

/// A decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub length: u64,
    pub seq: u64,
}

impl FrameHeader {
    pub fn new(kind: FrameKind, length: u64, seq: u64) -> Self {
        Self { kind, length, seq }
    }

    /// Encodes this header to its 22-byte wire representation.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        buf.put_slice(&PREAMBLE);
        buf.put_u8(self.kind.to_byte());
        buf.put_u64(self.length);
        buf.put_u64(self.seq);
        buf
    }

    /// Reads exactly [`HEADER_LEN`] bytes from `reader` and decodes them.
    ///
    /// Any short read (including a clean EOF before the header completes)
    /// is reported as [`TunnelError::StreamClosed`] — the stream is
    /// desynchronized either way and the tunnel must be torn down. A
    /// preamble mismatch is reported as [`TunnelError::MalformedPreamble`].
    pub async fn decode<R>(reader: &mut R) -> Result<Self, TunnelError>
    where
        R: AsyncRead + Unpin,
    {
        let mut raw = [0u8; HEADER_LEN];
        reader
            .read_exact(&mut raw)
            .await
            .map_err(|_| TunnelError::StreamClosed)?;

        if raw[..PREAMBLE.len()] != PREAMBLE {
            return Err(TunnelError::MalformedPreamble);
        }

        let mut cursor = &raw[PREAMBLE.len()..];
        let kind = FrameKind::from_byte(cursor.get_u8());
        let length = cursor.get_u64();
        let seq = cursor.get_u64();

        Ok(FrameHeader { kind, length, seq })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_matches_literal_scenario_a() {
        let header = FrameHeader::new(FrameKind::Control, 5, 7);
        let expected = [
            0x63, 0x69, 0x73, 0x63, 0x6f, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07,
        ];
        assert_eq!(&header.encode()[..], &expected[..]);
    }

    #[tokio::test]
    async fn decode_round_trips_encode() {
        let header = FrameHeader::new(FrameKind::Data, 1234, 98765);
        let bytes = header.encode();
        let mut reader = &bytes[..];
        let decoded = FrameHeader::decode(&mut reader).await.unwrap();
        assert_eq!(decoded, header);
    }

    #[tokio::test]
    async fn decode_rejects_malformed_preamble() {
        let mut raw = vec![0u8; HEADER_LEN];
        raw[13] = 5;
        let mut reader = &raw[..];
        let err = FrameHeader::decode(&mut reader).await.unwrap_err();
        assert!(matches!(err, TunnelError::MalformedPreamble));
    }

    #[tokio::test]
    async fn decode_reports_stream_closed_on_short_read() {
        let raw = vec![0x63, 0x69, 0x73];
        let mut reader = &raw[..];
        let err = FrameHeader::decode(&mut reader).await.unwrap_err();
        assert!(matches!(err, TunnelError::StreamClosed));
    }
}
