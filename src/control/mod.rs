//! The control-plane HTTP surface: lets an operator list
//! active tunnels and send a payload into a chosen tunnel, synchronously
//! receiving the correlated reply. Treated as an external collaborator by
//! the core — this module is the boundary adapter that turns the
//! multiplexer's primitives into `GET`/`PUT` semantics, grounded on
//! `original_source/api/controller.go`.

mod error;

pub use error::ControlError;

use crate::tunnel::{FrameKind, IngressBody, PayloadStream, TunnelSource};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::io::Cursor;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

#[derive(Clone)]
struct AppState {
    source: Arc<dyn TunnelSource>,
}

/// Builds the control-plane router over `source` (a listener's
/// [`crate::tunnel::registry::Registry`] or a dialer's
/// [`crate::tunnel::dialer::Dialer`]).
pub fn router(source: Arc<dyn TunnelSource>) -> Router {
    Router::new()
        .route(
            "/connections",
            get(list_connections).fallback(method_not_allowed),
        )
        .route(
            "/connections/:id",
            get(receive).put(transmit).fallback(method_not_allowed),
        )
        .with_state(AppState { source })
}

/// Any method other than the ones a route explicitly registers falls back
/// here, so the 405 response carries the same JSON error shape as every
/// other control-plane error (spec.md §6) instead of axum's bare default.
async fn method_not_allowed() -> Response {
    ControlError::MethodNotAllowed.into_response()
}

#[derive(Serialize)]
struct ConnectionsResponse {
    connections: Vec<crate::tunnel::ConnectionInfo>,
}

async fn list_connections(State(state): State<AppState>) -> impl IntoResponse {
    Json(ConnectionsResponse {
        connections: state.source.get_all(),
    })
}

fn parse_id(raw: &str) -> Result<u16, ControlError> {
    raw.parse::<u16>().map_err(|_| ControlError::BadId)
}

/// `GET /connections/<id>` — blocks on the tunnel's `inbox` and streams
/// the next unsolicited inbound payload back as the response body.
async fn receive(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ControlError> {
    let id = parse_id(&id)?;
    let tunnel = state.source.get(id).ok_or(ControlError::TunnelNotReady)?;

    let ingress = tunnel
        .recv_inbound()
        .await
        .ok_or(ControlError::UnexpectedDisconnect)?;

    drain_ingress(ingress.body).await
}

/// `PUT /connections/<id>` — the body is forwarded as an egress on tunnel
/// `id`; this handler waits for the reply and streams it back as the
/// response body. Uses `try_request` (non-blocking `outbox` send): a
/// tunnel whose write-pump isn't accepting fails fast instead of queueing.
async fn transmit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ControlError> {
    let id = parse_id(&id)?;

    let length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .ok_or(ControlError::BadContentLength)?;

    let tunnel = state.source.get(id).ok_or(ControlError::TunnelNotReady)?;

    let payload: PayloadStream = Box::pin(Cursor::new(body));
    let rx = tunnel
        .try_request(FrameKind::Data, length, payload)
        .map_err(|_| ControlError::TunnelNotReady)?;

    let ingress = rx.await.map_err(|_| ControlError::UnexpectedDisconnect)?;
    drain_ingress(ingress.body).await
}

async fn drain_ingress(body: IngressBody) -> Result<Response, ControlError> {
    match body {
        IngressBody::Payload(mut reader) => {
            let mut buf = Vec::new();
            reader
                .read_to_end(&mut buf)
                .await
                .map_err(|_| ControlError::UnexpectedDisconnect)?;
            Ok(buf.into_response())
        }
        IngressBody::Error(err) => Err(ControlError::Downstream(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::{spawn, ConnectionInfo, TunnelHandle};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::io::Cursor;
    use tokio::net::{TcpListener, TcpStream};
    use tower::ServiceExt;

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client_fut = TcpStream::connect(addr);
        let (server_stream, client_stream) =
            tokio::join!(async { listener.accept().await.unwrap().0 }, client_fut);
        (server_stream, client_stream.unwrap())
    }

    /// A `TunnelSource` with exactly one tunnel, always under id 1 — just
    /// enough to drive the router's handlers without a real registry.
    struct OneTunnel(TunnelHandle);

    impl TunnelSource for OneTunnel {
        fn get(&self, id: crate::tunnel::TunnelId) -> Option<TunnelHandle> {
            (id == 1).then(|| self.0.clone())
        }

        fn get_all(&self) -> Vec<ConnectionInfo> {
            vec![self.0.info()]
        }
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn list_connections_reports_the_one_tunnel() {
        let (stream_a, stream_b) = connected_pair().await;
        let handle = spawn(1, stream_a.peer_addr().unwrap(), stream_a, |_| {});
        let _peer = spawn(2, stream_b.peer_addr().unwrap(), stream_b, |_| {});
        let source: Arc<dyn TunnelSource> = Arc::new(OneTunnel(handle));

        let response = router(source)
            .oneshot(Request::get("/connections").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_bytes(response).await;
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["connections"][0]["id"], 1);
    }

    #[tokio::test]
    async fn put_forwards_and_returns_the_reply() {
        let (stream_a, stream_b) = connected_pair().await;
        let handle = spawn(1, stream_a.peer_addr().unwrap(), stream_a, |_| {});
        let peer = spawn(2, stream_b.peer_addr().unwrap(), stream_b, |_| {});
        let source: Arc<dyn TunnelSource> = Arc::new(OneTunnel(handle));

        let responder = tokio::spawn(async move {
            let ingress = peer.recv_inbound().await.unwrap();
            peer.reply(ingress.seq, FrameKind::Data, 3, Box::pin(Cursor::new(b"xyz".to_vec())))
                .await
                .unwrap();
        });

        let request = Request::put("/connections/1")
            .header("content-length", "3")
            .body(Body::from("abc"))
            .unwrap();
        let response = router(source).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"xyz".to_vec());
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn put_without_content_length_is_precondition_failed() {
        let (stream_a, stream_b) = connected_pair().await;
        let handle = spawn(1, stream_a.peer_addr().unwrap(), stream_a, |_| {});
        let _peer = spawn(2, stream_b.peer_addr().unwrap(), stream_b, |_| {});
        let source: Arc<dyn TunnelSource> = Arc::new(OneTunnel(handle));

        let request = Request::put("/connections/1").body(Body::from("abc")).unwrap();
        let response = router(source).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn wrong_method_is_method_not_allowed() {
        let (stream_a, stream_b) = connected_pair().await;
        let handle = spawn(1, stream_a.peer_addr().unwrap(), stream_a, |_| {});
        let _peer = spawn(2, stream_b.peer_addr().unwrap(), stream_b, |_| {});
        let source: Arc<dyn TunnelSource> = Arc::new(OneTunnel(handle));

        let request = Request::post("/connections").body(Body::empty()).unwrap();
        let response = router(source).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let parsed: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(parsed["error"], "ERR_METHOD_NOT_ALLOWED");
    }

    #[tokio::test]
    async fn unknown_tunnel_id_is_service_unavailable() {
        let (stream_a, stream_b) = connected_pair().await;
        let handle = spawn(1, stream_a.peer_addr().unwrap(), stream_a, |_| {});
        let _peer = spawn(2, stream_b.peer_addr().unwrap(), stream_b, |_| {});
        let source: Arc<dyn TunnelSource> = Arc::new(OneTunnel(handle));

        let request = Request::get("/connections/42").body(Body::empty()).unwrap();
        let response = router(source).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
