//! A duplex byte stream wrapper that serializes header parsing and exposes
//! one logical message at a time as a bounded, streaming payload reader.
//!
//! [`Pipe::new`] splits a connected [`TcpStream`] into a [`PipeWriter`],
//! touched only by the tunnel's write-pump, and a [`PipeReader`], touched
//! only by the tunnel's read-pump. Nothing else reads or writes the
//! underlying socket, per the caller discipline these types assume rather
//! than enforce.

use crate::error::TunnelError;
use crate::wire::{FrameHeader, FrameKind};
use std::io::{self, ErrorKind};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Splits a connected stream into its write-pump and read-pump halves.
pub struct Pipe;

impl Pipe {
    pub fn new(stream: TcpStream) -> (PipeWriter, PipeReader) {
        let (read_half, write_half) = stream.into_split();
        (
            PipeWriter { write_half },
            PipeReader {
                read_half: Arc::new(Mutex::new(read_half)),
            },
        )
    }
}

/// The write side of a pipe. Owned exclusively by the tunnel's write-pump.
pub struct PipeWriter {
    write_half: OwnedWriteHalf,
}

impl PipeWriter {
    /// Frames `length` bytes of `body` under `(kind, seq)` and writes the
    /// header followed by the body to the underlying stream.
    pub async fn write_header_and_body<R>(
        &mut self,
        kind: FrameKind,
        length: u64,
        seq: u64,
        mut body: R,
    ) -> Result<(), TunnelError>
    where
        R: AsyncRead + Unpin,
    {
        let header = FrameHeader::new(kind, length, seq).encode();
        self.write_half
            .write_all(&header)
            .await
            .map_err(|_| TunnelError::StreamClosed)?;

        tokio::io::copy(&mut body, &mut self.write_half)
            .await
            .map_err(|_| TunnelError::StreamClosed)?;

        Ok(())
    }
}

/// The read side of a pipe. Owned exclusively by the tunnel's read-pump,
/// which hands out [`PayloadReader`]s to whoever should drain each message.
pub struct PipeReader {
    read_half: Arc<Mutex<OwnedReadHalf>>,
}

impl PipeReader {
    /// Acquires the read-exclusion lock, decodes the next header, and
    /// returns a [`PayloadReader`] that owns the exclusion until it is
    /// drained (or dropped). Blocks until any previously-issued
    /// `PayloadReader` has released the lock.
    pub async fn next_message(&self) -> Result<PayloadReader, TunnelError> {
        let mut guard = self.read_half.clone().lock_owned().await;
        let header = FrameHeader::decode(&mut *guard).await?;
        Ok(PayloadReader {
            length: header.length,
            seq: header.seq,
            kind: header.kind,
            progress: 0,
            guard: Some(guard),
            closed: false,
        })
    }
}

/// A read-only view over exactly one message's payload bytes.
///
/// Reads return at most `length - progress` bytes and yield end-of-stream
/// once `length` bytes have been delivered. While alive, a `PayloadReader`
/// holds the pipe's read-exclusion lock, so the next
/// [`PipeReader::next_message`] call blocks until this reader is drained or
/// dropped.
pub struct PayloadReader {
    length: u64,
    seq: u64,
    kind: FrameKind,
    progress: u64,
    guard: Option<OwnedMutexGuard<OwnedReadHalf>>,
    closed: bool,
}

impl PayloadReader {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Closes the reader, releasing the pipe's read-exclusion lock. Unlike
    /// reaching natural end-of-stream, an explicit close marks the reader so
    /// that any further read fails with [`TunnelError::ReReadAfterEnd`]
    /// rather than reporting another clean EOF. Safe to call more than once.
    pub fn close(&mut self) {
        self.closed = true;
        self.guard = None;
    }

    /// Releases the read-exclusion lock on natural end-of-stream, without
    /// marking the reader closed — a read after this still reports a clean
    /// EOF (`progress >= length`), matching `read_to_end`/`tokio::io::copy`,
    /// which poll once more after the last data chunk.
    fn release_guard(&mut self) {
        self.guard = None;
    }
}

impl AsyncRead for PayloadReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.closed {
            return Poll::Ready(Err(io::Error::new(
                ErrorKind::Other,
                TunnelError::ReReadAfterEnd,
            )));
        }

        if this.progress >= this.length {
            this.release_guard();
            return Poll::Ready(Ok(()));
        }

        let remaining = (this.length - this.progress) as usize;
        let mut limited = buf.take(remaining);
        let guard = this
            .guard
            .as_mut()
            .expect("payload reader open without a read guard");

        match Pin::new(&mut **guard).poll_read(cx, &mut limited) {
            Poll::Ready(Ok(())) => {
                let n = limited.filled().len();
                unsafe {
                    buf.assume_init(n);
                }
                buf.advance(n);

                if n == 0 {
                    // Underlying stream ended before `length` bytes arrived.
                    this.close();
                    return Poll::Ready(Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        TunnelError::StreamClosed,
                    )));
                }

                this.progress += n as u64;
                if this.progress >= this.length {
                    this.release_guard();
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(err)) => {
                this.close();
                Poll::Ready(Err(err))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::FrameKind;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client_fut = TcpStream::connect(addr);
        let (server_stream, client_stream) =
            tokio::join!(async { listener.accept().await.unwrap().0 }, client_fut);
        (server_stream, client_stream.unwrap())
    }

    #[tokio::test]
    async fn zero_length_payload_round_trips() {
        let (server_stream, client_stream) = connected_pair().await;
        let (mut writer, _) = Pipe::new(server_stream);
        let (_, reader) = Pipe::new(client_stream);

        writer
            .write_header_and_body(FrameKind::Control, 0, 1, &b""[..])
            .await
            .unwrap();

        let mut payload = reader.next_message().await.unwrap();
        assert_eq!(payload.len(), 0);
        let mut buf = [0u8; 4];
        let n = payload.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn payload_reader_yields_exact_bytes_then_eof() {
        let (server_stream, client_stream) = connected_pair().await;
        let (mut writer, _) = Pipe::new(server_stream);
        let (_, reader) = Pipe::new(client_stream);

        writer
            .write_header_and_body(FrameKind::Control, 5, 7, &b"hello"[..])
            .await
            .unwrap();

        let mut payload = reader.next_message().await.unwrap();
        assert_eq!(payload.seq(), 7);
        assert_eq!(payload.len(), 5);

        let mut out = Vec::new();
        payload.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn next_message_blocks_until_previous_reader_drains() {
        let (server_stream, client_stream) = connected_pair().await;
        let (mut writer, _) = Pipe::new(server_stream);
        let (_, reader) = Pipe::new(client_stream);

        writer
            .write_header_and_body(FrameKind::Data, 3, 1, &b"abc"[..])
            .await
            .unwrap();
        writer
            .write_header_and_body(FrameKind::Data, 3, 2, &b"xyz"[..])
            .await
            .unwrap();

        let mut first = reader.next_message().await.unwrap();

        let reader_ref = &reader;
        let second = tokio::select! {
            _ = reader_ref.next_message() => panic!("second header decoded before first payload drained"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(20)) => None::<PayloadReader>,
        };
        assert!(second.is_none());

        let mut drained = Vec::new();
        first.read_to_end(&mut drained).await.unwrap();
        assert_eq!(drained, b"abc");

        let second = reader.next_message().await.unwrap();
        assert_eq!(second.seq(), 2);
    }
}
