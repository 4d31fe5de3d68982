//! Outbound request construction.
//!
//! # Responsibilities
//! - Rewrite the inbound request onto the selected upstream URL
//! - Merge query strings (upstream first, then inbound)
//! - Strip hop-by-hop headers, keeping what trailers and upgrades need
//! - Set the X-Forwarded-* headers and overlay per-request proxy headers
//!
//! # Design Decisions
//! - The outbound Host header is removed; the transport derives it from the URI
//! - An absent User-Agent is sent empty so the transport adds none
//! - Bodies that are known to be empty are dropped entirely
//! - The outbound request is always HTTP/1.1; the transport negotiates
//!   nothing else with the upstream

use axum::body::Body;
use axum::http::header::{
    CONNECTION, CONTENT_LENGTH, HOST, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE, TRAILER,
    TRANSFER_ENCODING, UPGRADE, USER_AGENT,
};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Version};
use http_body::Body as _;
use url::Url;

use crate::http::context::{is_tls, remote_addr, ProxyHeaders};
use crate::load_balancer::filter::request_host;

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PORT: HeaderName = HeaderName::from_static("x-forwarded-port");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Headers that only apply to a single transport hop.
pub const HOP_BY_HOP: [HeaderName; 9] = [
    CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION,
    TE,
    TRAILER,
    TRANSFER_ENCODING,
    UPGRADE,
];

/// Whether any value of `name` contains the comma-separated `token`.
pub fn has_token(headers: &HeaderMap, name: &HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// The requested upgrade protocol, if `Connection` asks for one.
pub fn upgrade_type(headers: &HeaderMap) -> Option<String> {
    if !has_token(headers, &CONNECTION, "upgrade") {
        return None;
    }
    headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase())
}

/// Remove headers listed in `Connection`, then the fixed hop-by-hop set.
pub fn remove_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|t| HeaderName::from_bytes(t.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
}

/// Join the upstream query and the inbound query with `&`.
pub fn merge_query(upstream: Option<&str>, inbound: Option<&str>) -> Option<String> {
    match (upstream.filter(|q| !q.is_empty()), inbound.filter(|q| !q.is_empty())) {
        (Some(a), Some(b)) => Some(format!("{a}&{b}")),
        (Some(a), None) => Some(a.to_string()),
        (None, Some(b)) => Some(b.to_string()),
        (None, None) => None,
    }
}

/// Outbound URI string: upstream scheme, authority and path, merged query.
pub fn outbound_uri(target: &Url, inbound_query: Option<&str>) -> String {
    let mut uri = format!("{}://", target.scheme());
    if let Some(host) = target.host() {
        uri.push_str(&host.to_string());
    }
    if let Some(port) = target.port() {
        uri.push_str(&format!(":{port}"));
    }
    uri.push_str(target.path());
    if let Some(query) = merge_query(target.query(), inbound_query) {
        uri.push('?');
        uri.push_str(&query);
    }
    uri
}

/// Outbound headers for the inbound request.
pub fn outbound_headers(parts: &Parts) -> HeaderMap {
    let inbound = &parts.headers;
    let mut headers = inbound.clone();
    headers.remove(HOST);
    remove_hop_by_hop(&mut headers);

    if has_token(inbound, &TE, "trailers") {
        headers.insert(TE, HeaderValue::from_static("trailers"));
    }

    if has_token(inbound, &CONNECTION, "upgrade") {
        if let Some(upgrade) = inbound.get(UPGRADE) {
            headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
            headers.insert(UPGRADE, upgrade.clone());
        }
    }

    if !headers.contains_key(USER_AGENT) {
        headers.insert(USER_AGENT, HeaderValue::from_static(""));
    }

    match remote_addr(parts) {
        Some(addr) => {
            let ip = addr.ip().to_string();
            let prior: Vec<&str> = inbound
                .get_all(&X_FORWARDED_FOR)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect();
            let forwarded = if prior.is_empty() {
                ip
            } else {
                format!("{}, {}", prior.join(", "), ip)
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded) {
                headers.insert(X_FORWARDED_FOR, value);
            }
            headers.insert(X_FORWARDED_PORT, HeaderValue::from(addr.port()));
        }
        None => {
            headers.remove(X_FORWARDED_FOR);
            headers.remove(X_FORWARDED_PORT);
        }
    }

    if let Some(host) = request_host(parts).and_then(|h| HeaderValue::from_str(h).ok()) {
        headers.insert(X_FORWARDED_HOST, host);
    }

    let proto = if is_tls(parts) { "https" } else { "http" };
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto));

    if let Some(ProxyHeaders(extra)) = parts.extensions.get::<ProxyHeaders>() {
        for name in extra.keys() {
            headers.remove(name);
        }
        for (name, value) in extra.iter() {
            headers.append(name.clone(), value.clone());
        }
    }

    headers
}

/// Whether the inbound body is known to be empty.
fn body_is_empty(parts: &Parts, body: &Body) -> bool {
    let zero_length = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");
    zero_length || body.is_end_stream()
}

/// Build the request sent to the upstream at `target`.
pub fn outbound_request(
    parts: &Parts,
    body: Body,
    target: &Url,
) -> Result<Request<Body>, axum::http::Error> {
    let body = if body_is_empty(parts, &body) {
        Body::empty()
    } else {
        body
    };

    let mut req = Request::builder()
        .method(parts.method.clone())
        .uri(outbound_uri(target, parts.uri.query()))
        .version(Version::HTTP_11)
        .body(body)?;
    *req.headers_mut() = outbound_headers(parts);
    Ok(req)
}
