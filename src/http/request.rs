//! Request transformation for forwarding.
//!
//! # Responsibilities
//! - Rewrite the request URI onto the upstream's base address
//! - Strip hop-by-hop headers
//! - Record the client address in X-Forwarded-For
//!
//! # Design Decisions
//! - Path joining matches single-host reverse proxies: exactly one `/` between base and request path
//! - The inbound Host header is preserved; HTTP/2 requests pick it up from the rewritten authority

use std::net::{IpAddr, SocketAddr};

use axum::http::{header, request::Parts, HeaderMap, HeaderValue, Uri, Version};
use url::Url;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Rewrite request parts in place so they can be sent to `target`.
pub fn prepare_upstream_request(
    parts: &mut Parts,
    target: &Url,
    client_addr: Option<SocketAddr>,
) -> Result<(), axum::http::Error> {
    parts.uri = upstream_uri(target, &parts.uri)?;
    parts.version = Version::HTTP_11;
    strip_hop_by_hop(&mut parts.headers);
    if let Some(addr) = client_addr {
        append_forwarded_for(&mut parts.headers, addr.ip());
    }
    Ok(())
}

/// Build the outgoing URI: upstream scheme and authority, joined path, merged query.
pub fn upstream_uri(target: &Url, incoming: &Uri) -> Result<Uri, axum::http::Error> {
    let host = target.host_str().unwrap_or_default();
    let authority = match target.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let mut path_and_query = join_paths(target.path(), incoming.path());
    let query: Vec<&str> = [target.query(), incoming.query()]
        .into_iter()
        .flatten()
        .filter(|q| !q.is_empty())
        .collect();
    if !query.is_empty() {
        path_and_query.push('?');
        path_and_query.push_str(&query.join("&"));
    }

    Uri::builder()
        .scheme(target.scheme())
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
}

fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in &named {
        headers.remove(name.as_str());
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Append `client` to X-Forwarded-For, folding any existing values into one header.
pub fn append_forwarded_for(headers: &mut HeaderMap, client: IpAddr) {
    let prior: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    let value = if prior.is_empty() {
        client.to_string()
    } else {
        format!("{}, {}", prior.join(", "), client)
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}
