//! Header management for the gateway.
//!
//! Covers what is stripped or replaced on the way to the upstream, what is
//! stripped on the way back, and how inbound headers are rendered into the
//! capture log.

use std::collections::BTreeMap;

use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use uuid::Uuid;

/// Header name for request ID.
pub static HEADER_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Hop-by-hop headers (RFC 9110 §7.6.1) never relayed in either direction.
pub static HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Headers whose values are replaced in the capture log.
pub static REDACTED_HEADERS: &[&str] = &["authorization", "cookie", "proxy-authorization"];

/// Replacement for redacted header values.
pub const REDACTED: &str = "[REDACTED]";

/// Generate a new request ID.
pub fn new_request_id() -> String {
    Uuid::now_v7().to_string()
}

/// Check if a header is hop-by-hop.
pub fn is_hop_by_hop_header(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Header names listed in `Connection`, which are hop-by-hop for this
/// message only.
fn connection_listed(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Copy `headers` without hop-by-hop headers.
pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let listed = connection_listed(headers);
    let mut filtered = HeaderMap::with_capacity(headers.len());

    for (name, value) in headers {
        let name_str = name.as_str();
        if is_hop_by_hop_header(name_str) || listed.iter().any(|l| l == name_str) {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }

    filtered
}

/// Build the header set sent upstream.
///
/// Hop-by-hop headers, `host` and `content-length` are dropped (the client
/// sets both for the new connection). A configured bearer credential
/// replaces any caller-supplied `authorization`.
pub fn upstream_request_headers(
    inbound: &HeaderMap,
    bearer_token: Option<&str>,
    request_id: &str,
) -> HeaderMap {
    let mut headers = strip_hop_by_hop(inbound);
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);

    if let Some(token) = bearer_token {
        if let Ok(mut value) = HeaderValue::from_str(&format!("Bearer {token}")) {
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }
    }

    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(HEADER_REQUEST_ID.clone(), value);
    }

    headers
}

/// Render headers for the capture log.
///
/// Repeated headers are joined with `", "`; sensitive values are redacted
/// and values that are not valid UTF-8 are converted lossily.
pub fn redacted_header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut rendered: BTreeMap<String, String> = BTreeMap::new();

    for (name, value) in headers {
        let name = name.as_str();
        let value = if REDACTED_HEADERS.contains(&name) {
            REDACTED.to_string()
        } else {
            String::from_utf8_lossy(value.as_bytes()).into_owned()
        };

        rendered
            .entry(name.to_string())
            .and_modify(|existing| {
                if existing != REDACTED {
                    existing.push_str(", ");
                    existing.push_str(&value);
                }
            })
            .or_insert(value);
    }

    rendered
}

/// Set the request ID header on a response header map.
pub fn set_request_id(headers: &mut HeaderMap, request_id: &str) {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(HEADER_REQUEST_ID.clone(), value);
    }
}
