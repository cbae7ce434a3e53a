//! Translation from core/adapter error kinds to the control plane's JSON
//! error shape and status codes.

use crate::error::TunnelError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug)]
pub enum ControlError {
    /// Wrong HTTP method for the route.
    MethodNotAllowed,
    /// Missing or unparsable tunnel id in the path.
    BadId,
    /// Missing or unparsable `content-length` on a `PUT`.
    BadContentLength,
    /// The downstream peer reported a failure handling the exchange.
    Downstream(TunnelError),
    /// The peer disconnected, or the tunnel tore down, before a reply
    /// could be produced.
    UnexpectedDisconnect,
    /// No tunnel is registered under the requested id, or its write-pump
    /// isn't currently accepting new exchanges.
    TunnelNotReady,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let (status, code, message): (StatusCode, &'static str, String) = match self {
            ControlError::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                "ERR_METHOD_NOT_ALLOWED",
                "method not allowed on this route".to_string(),
            ),
            ControlError::BadId => (
                StatusCode::PRECONDITION_FAILED,
                "ERR_NO_CONNECTION_ID",
                "connection id missing or unparsable; check it against GET /connections".to_string(),
            ),
            ControlError::BadContentLength => (
                StatusCode::PRECONDITION_FAILED,
                "ERR_CONTENT_LENGTH",
                "missing or unparsable content-length header".to_string(),
            ),
            ControlError::Downstream(err) => (
                StatusCode::NOT_ACCEPTABLE,
                "ERR_DOWNSTREAM",
                err.to_string(),
            ),
            ControlError::UnexpectedDisconnect => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "ERR_REMOTE_NA",
                "remote peer went away before a reply arrived".to_string(),
            ),
            ControlError::TunnelNotReady => (
                StatusCode::SERVICE_UNAVAILABLE,
                "ERR_TUNNEL_NOT_READY",
                "tunnel is not connected or not currently accepting requests".to_string(),
            ),
        };

        (status, Json(ErrorBody { error: code, message })).into_response()
    }
}
