//! The HTTP-style forwarding adapter: bridges local TCP traffic into and
//! out of tunnel exchanges.
//!
//! Two roles run concurrently per tunnel:
//!
//! - [`run_local_ingress`] binds a local TCP listener on an ephemeral port.
//!   Every accepted connection is a *new outbound exchange*: parse an
//!   HTTP-style request off it, enqueue it as an egress with a reply slot,
//!   and stream the reply back once it arrives.
//! - [`run_tunnel_ingress`] drains the tunnel's `inbox` for *unsolicited
//!   inbound exchanges*: dial the configured local target, copy the
//!   payload in, parse an HTTP-style response, and reply with the same
//!   sequence so the originating peer's waiter matches it.
//!
//! Grounded on `original_source/socket/httpforwarder.go`
//! (`onLANRead`/`listenForLANData` and `onNewWANRequest`/
//! `listenForWANData`), with sequence assignment already folded into
//! [`crate::tunnel::TunnelHandle::request`].

use crate::error::TunnelError;
use crate::httpmsg;
use crate::tunnel::{FrameKind, Ingress, IngressBody, PayloadStream, TunnelHandle};
use std::io::Cursor;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Spawns both adapter roles for `tunnel` and runs until either the local
/// listener or the tunnel's inbox is torn down.
pub async fn attach(tunnel: TunnelHandle, target: SocketAddr) {
    let local = tokio::spawn(run_local_ingress(tunnel.clone()));
    let remote = tokio::spawn(run_tunnel_ingress(tunnel, target));
    let _ = tokio::join!(local, remote);
}

async fn run_local_ingress(tunnel: TunnelHandle) {
    let listener = match TcpListener::bind(("127.0.0.1", 0)).await {
        Ok(listener) => listener,
        Err(err) => {
            log::error!("tunnel {}: failed to bind local ingress: {err}", tunnel.id);
            return;
        }
    };

    log::info!(
        "tunnel {}: local ingress listening on {}",
        tunnel.id,
        listener.local_addr().expect("bound listener has a local address")
    );

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                log::warn!("tunnel {}: local accept failed: {err}", tunnel.id);
                continue;
            }
        };

        let tunnel = tunnel.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_local_exchange(stream, &tunnel).await {
                log::debug!("tunnel {}: exchange with local peer {peer} failed: {err}", tunnel.id);
            }
        });
    }
}

async fn serve_local_exchange(stream: TcpStream, tunnel: &TunnelHandle) -> Result<(), TunnelError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let (head_line, headers) = httpmsg::read_head(&mut reader)
        .await
        .map_err(|_| TunnelError::StreamClosed)?;
    let content_length = httpmsg::content_length(&headers);
    let head_bytes = httpmsg::reserialize(&head_line, &headers);
    let total = head_bytes.len() as u64 + content_length;

    let payload: PayloadStream = Box::pin(Cursor::new(head_bytes).chain(reader.take(content_length)));

    let rx = tunnel.request(FrameKind::Data, total, payload).await?;
    let ingress = rx.await.map_err(|_| TunnelError::PeerGone)?;

    match ingress.body {
        IngressBody::Payload(mut reply) => {
            tokio::io::copy(&mut reply, &mut write_half)
                .await
                .map_err(|_| TunnelError::StreamClosed)?;
            let _ = write_half.shutdown().await;
            Ok(())
        }
        IngressBody::Error(err) => Err(err),
    }
}

async fn run_tunnel_ingress(tunnel: TunnelHandle, target: SocketAddr) {
    loop {
        let ingress = match tunnel.recv_inbound().await {
            Some(ingress) => ingress,
            None => return,
        };

        let tunnel = tunnel.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_tunnel_exchange(ingress, &tunnel, target).await {
                log::debug!("tunnel {}: forwarding to {target} failed: {err}", tunnel.id);
            }
        });
    }
}

async fn serve_tunnel_exchange(
    ingress: Ingress,
    tunnel: &TunnelHandle,
    target: SocketAddr,
) -> Result<(), TunnelError> {
    let seq = ingress.seq;
    let mut payload = match ingress.body {
        IngressBody::Payload(reader) => reader,
        // Nothing to forward; this only happens on a tunnel that was
        // already torn down, in which case there is no one left to reply to.
        IngressBody::Error(_) => return Ok(()),
    };

    let stream = TcpStream::connect(target).await.map_err(TunnelError::from)?;
    let (read_half, mut write_half) = stream.into_split();

    tokio::io::copy(&mut payload, &mut write_half)
        .await
        .map_err(|_| TunnelError::StreamClosed)?;
    let _ = write_half.shutdown().await;

    let mut reader = BufReader::new(read_half);
    let (head_line, headers) = httpmsg::read_head(&mut reader)
        .await
        .map_err(|_| TunnelError::StreamClosed)?;
    let content_length = httpmsg::content_length(&headers);
    let head_bytes = httpmsg::reserialize(&head_line, &headers);
    let total = head_bytes.len() as u64 + content_length;

    let reply: PayloadStream = Box::pin(Cursor::new(head_bytes).chain(reader.take(content_length)));

    tunnel.reply(seq, FrameKind::Data, total, reply).await
}
