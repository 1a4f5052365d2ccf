//! Response construction.
//!
//! # Responsibilities
//! - Relay upstream responses to the client without buffering
//! - Strip hop-by-hop headers from relayed responses
//! - Render proxy-generated errors as JSON `{code, message}`

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::http::request::strip_hop_by_hop;

/// JSON body for every error the proxy itself produces.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

/// Build a JSON error response whose `code` mirrors the HTTP status.
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        code: status.as_u16(),
        message: message.into(),
    };
    (status, Json(body)).into_response()
}

/// Response extension marking a response relayed from a backend.
#[derive(Debug, Clone, Copy)]
pub struct Relayed;

/// Convert an upstream response into one we can hand back to axum.
pub fn from_upstream(response: Response<hyper::body::Incoming>) -> Response {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    parts.extensions.insert(Relayed);
    Response::from_parts(parts, Body::new(body))
}

/// Give the timeout and body-limit layers' own responses the JSON error shape.
///
/// Relayed backend responses and bodies that are already JSON pass through.
pub async fn render_layer_errors(response: Response) -> Response {
    if response.extensions().get::<Relayed>().is_some() {
        return response;
    }

    let status = response.status();
    let message = match status {
        StatusCode::PAYLOAD_TOO_LARGE => "Payload Too Large",
        StatusCode::GATEWAY_TIMEOUT => "Gateway Timeout",
        _ => return response,
    };

    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .is_some_and(|v| v.as_bytes().starts_with(b"application/json"));
    if is_json {
        return response;
    }

    error_response(status, message)
}
