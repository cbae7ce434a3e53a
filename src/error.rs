//! Error kinds shared between the wire codec, the pipe, the multiplexer,
//! and the forwarding adapter.

use thiserror::Error;

/// Errors that the core tunnel machinery can produce.
///
/// The codec and the pumps never attempt to recover from any of these: any
/// I/O error or protocol violation initiates tunnel tear-down. Higher
/// layers (the forwarding adapter, the control plane) are the ones that
/// turn a `TunnelError` into a response for whoever asked for the exchange.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The 5-byte preamble at the start of a frame header did not match.
    /// The byte stream is desynchronized; fatal for the tunnel.
    #[error("malformed frame preamble")]
    MalformedPreamble,

    /// The underlying stream ended or errored while reading or writing.
    /// Fatal for the tunnel.
    #[error("stream closed")]
    StreamClosed,

    /// A [`crate::pipe::PayloadReader`] was read from after it had already
    /// reached end-of-stream or been closed. Local programmer error; does
    /// not affect the tunnel.
    #[error("re-read after payload reader end")]
    ReReadAfterEnd,

    /// An egress send was attempted on a tunnel whose write-pump is not
    /// currently accepting messages (no multiplexer attached, or it was
    /// already torn down).
    #[error("tunnel not ready")]
    TunnelNotReady,

    /// A waiter was fulfilled with a terminal error because the tunnel was
    /// torn down before the matching reply arrived.
    #[error("peer gone")]
    PeerGone,

    /// No tunnel is registered under the requested id.
    #[error("no such tunnel")]
    NoSuchTunnel,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
