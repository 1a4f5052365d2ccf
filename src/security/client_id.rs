//! Client identity resolution for rate limiting.
//!
//! Priority: `X-Client-ID`, then `X-Real-IP`, then the left-most
//! `X-Forwarded-For` entry, then the transport peer address.

use std::net::SocketAddr;

use axum::http::HeaderMap;

use crate::http::request::X_FORWARDED_FOR;

pub const X_CLIENT_ID: &str = "x-client-id";
pub const X_REAL_IP: &str = "x-real-ip";

/// Identity used when no header is present and the peer address is unknown.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Derive the rate-limit key for a request.
pub fn resolve_client_id(headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
    header_value(headers, X_CLIENT_ID)
        .or_else(|| header_value(headers, X_REAL_IP))
        .or_else(|| {
            header_value(headers, X_FORWARDED_FOR)
                .and_then(|v| v.split(',').map(str::trim).find(|s| !s.is_empty()))
        })
        .map(str::to_string)
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)?
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
