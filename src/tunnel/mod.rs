//! The tunnel multiplexer: a per-connection write-pump and read-pump that
//! share a sequence→waiter table, turning one duplex byte stream into many
//! concurrent request/response exchanges.
//!
//! A tunnel's write-pump and read-pump are modeled as two `async fn`s
//! raced inside one `tokio::select!` within a single spawned task, rather
//! than as two independently spawned tasks, so each tunnel still has
//! exactly one write-pump and one read-pump running concurrently.

pub mod dialer;
pub mod registry;

use crate::error::TunnelError;
use crate::pipe::{PayloadReader, Pipe, PipeReader, PipeWriter};
use crate::wire::FrameKind;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};

/// 16-bit tunnel id, unique among currently-live tunnels on a peer.
pub type TunnelId = u16;

/// Depth of the `outbox`/`inbox` channels. Tokio does not support a true
/// zero-capacity bounded channel, so capacity 1 is the closest available
/// analogue to a rendezvous channel.
const CHANNEL_DEPTH: usize = 1;

/// A boxed, owned payload stream headed out over the wire.
pub type PayloadStream = Pin<Box<dyn AsyncRead + Send>>;

/// An outbound message queued on a tunnel's `outbox`.
pub struct Egress {
    /// Explicit sequence to frame this message under. `None` means "assign
    /// the next value from this tunnel's sequence counter", which is only
    /// valid when `reply_to` is `Some` — replies to an inbound exchange
    /// always reuse the inbound sequence explicitly.
    pub seq: Option<u64>,
    pub kind: FrameKind,
    pub length: u64,
    pub payload: PayloadStream,
    pub reply_to: Option<oneshot::Sender<Ingress>>,
}

/// An inbound message: either a freshly-read payload or a terminal error
/// delivered to a waiter whose tunnel tore down before a reply arrived.
pub struct Ingress {
    pub seq: u64,
    pub kind: FrameKind,
    pub length: u64,
    pub body: IngressBody,
}

pub enum IngressBody {
    Payload(PayloadReader),
    Error(TunnelError),
}

impl Ingress {
    fn terminal(seq: u64, err: TunnelError) -> Self {
        Ingress {
            seq,
            kind: FrameKind::Control,
            length: 0,
            body: IngressBody::Error(err),
        }
    }
}

/// Sequence→waiter map plus the monotonic per-tunnel sequence counter.
/// Guarded by one `parking_lot::Mutex` with short, non-`.await` critical
/// sections.
#[derive(Default)]
struct WaiterTable {
    next_seq: u64,
    waiters: HashMap<u64, oneshot::Sender<Ingress>>,
}

impl WaiterTable {
    /// Installs `tx` under `seq` (or an allocated sequence if `seq` is
    /// `None`), returning the sequence it was installed under. Must be
    /// called before the corresponding frame is written.
    fn register(&mut self, seq: Option<u64>, tx: oneshot::Sender<Ingress>) -> u64 {
        let seq = seq.unwrap_or_else(|| {
            let seq = self.next_seq;
            self.next_seq = self.next_seq.wrapping_add(1);
            seq
        });
        self.waiters.insert(seq, tx);
        seq
    }

    fn resolve(&mut self, seq: u64) -> Option<oneshot::Sender<Ingress>> {
        self.waiters.remove(&seq)
    }

    fn drain(&mut self) -> Vec<oneshot::Sender<Ingress>> {
        self.waiters.drain().map(|(_, tx)| tx).collect()
    }
}

/// Observational snapshot of a tunnel, as returned by the registry.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionInfo {
    pub id: TunnelId,
    pub remote: String,
}

/// Abstracts over "a set of tunnels addressable by id" so the control
/// plane (`crate::control`) can be written once against either side: the
/// listener's [`registry::Registry`] (many tunnels, real ids) or the
/// dialer's [`dialer::Dialer`] (exactly one tunnel, any id resolves to
/// it).
pub trait TunnelSource: Send + Sync {
    fn get(&self, id: TunnelId) -> Option<TunnelHandle>;
    fn get_all(&self) -> Vec<ConnectionInfo>;
}

/// A handle to a live tunnel. Cheap to clone; shared between the
/// forwarding adapter, the control plane, and the registry.
#[derive(Clone)]
pub struct TunnelHandle {
    pub id: TunnelId,
    pub remote: SocketAddr,
    outbox: mpsc::Sender<Egress>,
    inbox: Arc<AsyncMutex<mpsc::Receiver<Ingress>>>,
    waiters: Arc<parking_lot::Mutex<WaiterTable>>,
}

impl TunnelHandle {
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            remote: self.remote.to_string(),
        }
    }

    /// Enqueues a new outbound exchange and blocks until the write-pump
    /// accepts it (rendezvous semantics). Used by the forwarding adapter,
    /// whose producers are expected to wait rather than fail fast.
    pub async fn request(
        &self,
        kind: FrameKind,
        length: u64,
        payload: PayloadStream,
    ) -> Result<oneshot::Receiver<Ingress>, TunnelError> {
        let (tx, rx) = oneshot::channel();
        let egress = Egress {
            seq: None,
            kind,
            length,
            payload,
            reply_to: Some(tx),
        };
        self.outbox
            .send(egress)
            .await
            .map_err(|_| TunnelError::TunnelNotReady)?;
        Ok(rx)
    }

    /// Enqueues a new outbound exchange without blocking: fails fast with
    /// [`TunnelError::TunnelNotReady`] if the write-pump isn't currently
    /// accepting. This is the deliberate non-blocking path the control
    /// plane's `PUT /connections/:id` uses.
    pub fn try_request(
        &self,
        kind: FrameKind,
        length: u64,
        payload: PayloadStream,
    ) -> Result<oneshot::Receiver<Ingress>, TunnelError> {
        let (tx, rx) = oneshot::channel();
        let egress = Egress {
            seq: None,
            kind,
            length,
            payload,
            reply_to: Some(tx),
        };
        self.outbox
            .try_send(egress)
            .map_err(|_| TunnelError::TunnelNotReady)?;
        Ok(rx)
    }

    /// Sends a reply to an inbound exchange, reusing its sequence so the
    /// originating peer's waiter matches it.
    pub async fn reply(
        &self,
        seq: u64,
        kind: FrameKind,
        length: u64,
        payload: PayloadStream,
    ) -> Result<(), TunnelError> {
        let egress = Egress {
            seq: Some(seq),
            kind,
            length,
            payload,
            reply_to: None,
        };
        self.outbox
            .send(egress)
            .await
            .map_err(|_| TunnelError::TunnelNotReady)
    }

    /// Waits for the next unsolicited inbound message. May be called
    /// concurrently from more than one consumer (e.g. the forwarding
    /// adapter's tunnel-side task and a blocked control-plane `GET`); they
    /// contend for delivery like any other shared channel consumer.
    pub async fn recv_inbound(&self) -> Option<Ingress> {
        self.inbox.lock().await.recv().await
    }
}

/// Spawns the write-pump/read-pump task for a freshly accepted or dialed
/// connection and returns a handle to it. `teardown` is invoked exactly
/// once, with `id`, when the tunnel tears down — this is how the cyclic
/// dependency between the multiplexer and the registry is broken.
pub fn spawn(
    id: TunnelId,
    remote: SocketAddr,
    stream: TcpStream,
    teardown: impl FnOnce(TunnelId) + Send + 'static,
) -> TunnelHandle {
    let (writer, reader) = Pipe::new(stream);
    let (outbox_tx, outbox_rx) = mpsc::channel(CHANNEL_DEPTH);
    let (inbox_tx, inbox_rx) = mpsc::channel(CHANNEL_DEPTH);
    let waiters = Arc::new(parking_lot::Mutex::new(WaiterTable::default()));

    let handle = TunnelHandle {
        id,
        remote,
        outbox: outbox_tx,
        inbox: Arc::new(AsyncMutex::new(inbox_rx)),
        waiters: waiters.clone(),
    };

    tokio::spawn(run(id, writer, reader, outbox_rx, inbox_tx, waiters, teardown));

    handle
}

async fn run(
    id: TunnelId,
    mut writer: PipeWriter,
    reader: PipeReader,
    mut outbox_rx: mpsc::Receiver<Egress>,
    inbox_tx: mpsc::Sender<Ingress>,
    waiters: Arc<parking_lot::Mutex<WaiterTable>>,
    teardown: impl FnOnce(TunnelId),
) {
    let outcome = tokio::select! {
        result = write_pump(&mut writer, &mut outbox_rx, &waiters) => result,
        result = read_pump(&reader, &inbox_tx, &waiters) => result,
    };

    if let Err(err) = outcome {
        log::debug!("tunnel {id} tearing down: {err}");
    }

    for tx in waiters.lock().drain() {
        let _ = tx.send(Ingress::terminal(0, TunnelError::PeerGone));
    }

    teardown(id);
}

async fn write_pump(
    writer: &mut PipeWriter,
    outbox_rx: &mut mpsc::Receiver<Egress>,
    waiters: &Arc<parking_lot::Mutex<WaiterTable>>,
) -> Result<(), TunnelError> {
    while let Some(msg) = outbox_rx.recv().await {
        let seq = match msg.reply_to {
            Some(reply_to) => waiters.lock().register(msg.seq, reply_to),
            None => msg
                .seq
                .expect("egress without a reply slot must carry an explicit seq"),
        };

        if let Err(err) = writer
            .write_header_and_body(msg.kind, msg.length, seq, msg.payload)
            .await
        {
            if let Some(tx) = waiters.lock().resolve(seq) {
                let _ = tx.send(Ingress::terminal(seq, TunnelError::PeerGone));
            }
            return Err(err);
        }
    }

    // All producers dropped their senders; nothing fatal, just done.
    Ok(())
}

async fn read_pump(
    reader: &PipeReader,
    inbox_tx: &mpsc::Sender<Ingress>,
    waiters: &Arc<parking_lot::Mutex<WaiterTable>>,
) -> Result<(), TunnelError> {
    loop {
        let payload = reader.next_message().await?;
        let seq = payload.seq();
        let kind = payload.kind();
        let length = payload.len();

        let ingress = Ingress {
            seq,
            kind,
            length,
            body: IngressBody::Payload(payload),
        };

        if let Some(tx) = waiters.lock().resolve(seq) {
            // Recipient owns draining the payload reader from here.
            let _ = tx.send(ingress);
        } else if inbox_tx.send(ingress).await.is_err() {
            // No one is consuming unsolicited messages; drop it.
        }
    }
}

impl From<TunnelError> for io::Error {
    fn from(err: TunnelError) -> Self {
        io::Error::new(io::ErrorKind::Other, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client_fut = TcpStream::connect(addr);
        let (server_stream, client_stream) =
            tokio::join!(async { listener.accept().await.unwrap().0 }, client_fut);
        (server_stream, client_stream.unwrap())
    }

    fn payload(bytes: &'static [u8]) -> PayloadStream {
        Box::pin(Cursor::new(bytes))
    }

    async fn drain(body: IngressBody) -> Vec<u8> {
        match body {
            IngressBody::Payload(mut reader) => {
                let mut out = Vec::new();
                tokio::io::copy(&mut reader, &mut out).await.unwrap();
                out
            }
            IngressBody::Error(err) => panic!("expected payload, got error: {err}"),
        }
    }

    // Scenario C: originator's request correlates with the peer's reply by
    // sequence; the originator's inbox receives nothing.
    #[tokio::test]
    async fn request_reply_correlates_by_sequence() {
        let (stream_a, stream_b) = connected_pair().await;
        let a = spawn(1, stream_a.peer_addr().unwrap(), stream_a, |_| {});
        let b = spawn(2, stream_b.peer_addr().unwrap(), stream_b, |_| {});

        let rx = a.request(FrameKind::Data, 3, payload(b"abc")).await.unwrap();

        let inbound = b.recv_inbound().await.expect("b should see a's request");
        assert_eq!(drain(inbound.body).await, b"abc");
        b.reply(inbound.seq, FrameKind::Data, 3, payload(b"xyz")).await.unwrap();

        let reply = rx.await.expect("a's waiter should resolve");
        assert_eq!(drain(reply.body).await, b"xyz");

        // Nothing unsolicited landed in a's own inbox.
        let nothing = tokio::select! {
            ingress = a.recv_inbound() => Some(ingress),
            _ = tokio::time::sleep(Duration::from_millis(20)) => None,
        };
        assert!(nothing.is_none());
    }

    // Scenario D: a frame with no matching waiter is delivered to inbox
    // exactly once.
    #[tokio::test]
    async fn unsolicited_frame_lands_in_inbox() {
        let (stream_a, stream_b) = connected_pair().await;
        let a = spawn(1, stream_a.peer_addr().unwrap(), stream_a, |_| {});
        let b = spawn(2, stream_b.peer_addr().unwrap(), stream_b, |_| {});

        // b sends a frame under a sequence a never registered a waiter for.
        b.reply(9, FrameKind::Control, 4, payload(b"ping")).await.unwrap();

        let ingress = a.recv_inbound().await.expect("unsolicited frame should arrive");
        assert_eq!(ingress.seq, 9);
        assert_eq!(drain(ingress.body).await, b"ping");
    }

    // Scenario E: a malformed preamble tears the tunnel down and resolves
    // every outstanding waiter with PeerGone.
    #[tokio::test]
    async fn malformed_preamble_tears_down_and_resolves_waiters() {
        let (stream_a, mut stream_b) = connected_pair().await;
        let a = spawn(1, stream_a.peer_addr().unwrap(), stream_a, |_| {});

        let rx = a.request(FrameKind::Data, 3, payload(b"abc")).await.unwrap();

        // Peer writes garbage instead of a well-formed header.
        stream_b.write_all(&[0u8; HEADER_LEN_FOR_TEST]).await.unwrap();

        let ingress = rx.await.expect("waiter should still resolve, with an error");
        match ingress.body {
            IngressBody::Error(TunnelError::PeerGone) => {}
            other => panic!("expected PeerGone, got a different outcome: {}", matches_desc(&other)),
        }
    }

    // Scenario F: the underlying stream is severed mid-flight; the waiter
    // resolves to a terminal error within bounded time, exactly once.
    #[tokio::test]
    async fn severed_stream_resolves_waiter_with_terminal_error() {
        let (stream_a, stream_b) = connected_pair().await;
        let a = spawn(1, stream_a.peer_addr().unwrap(), stream_a, |_| {});

        let rx = a.request(FrameKind::Data, 3, payload(b"abc")).await.unwrap();

        drop(stream_b);

        let ingress = tokio::time::timeout(Duration::from_millis(500), rx)
            .await
            .expect("waiter should resolve within bounded time")
            .expect("oneshot should not be dropped without a value");

        assert!(matches!(ingress.body, IngressBody::Error(TunnelError::PeerGone)));
    }

    const HEADER_LEN_FOR_TEST: usize = crate::wire::HEADER_LEN;

    fn matches_desc(body: &IngressBody) -> String {
        match body {
            IngressBody::Payload(_) => "a payload".to_string(),
            IngressBody::Error(err) => err.to_string(),
        }
    }
}
