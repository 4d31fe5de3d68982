//! Rendering of relay errors.
//!
//! # Responsibilities
//! - Log every relay error with its kind
//! - Turn errors that carry a status into a client response
//!
//! # Design Decisions
//! - Log-only errors still produce a response value; it is an empty 499
//!   that the server discards once the client has gone
//! - Handlers are plug-ins selected by name at build time

use std::fmt::Debug;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::request::Parts;
use axum::http::{HeaderValue, Response, StatusCode};
use serde::Serialize;

use crate::error::ProxyError;

/// `499 Client Closed Request`, used for responses nobody reads.
pub fn client_closed() -> StatusCode {
    StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
}

/// Renders a relay error as a response.
pub trait ErrorHandler: Send + Sync + Debug {
    fn handle_error(&self, parts: &Parts, err: ProxyError) -> Response<Body>;
}

fn log_error(parts: &Parts, err: &ProxyError) {
    let status = err.status().map(|s| s.as_u16());
    let kind = err.kind().as_str();
    if status.is_some_and(|s| s < 500) {
        tracing::info!(method = %parts.method, uri = %parts.uri, kind, status, error = %err, "Request rejected");
    } else {
        tracing::warn!(
            method = %parts.method,
            uri = %parts.uri,
            kind,
            status,
            error = %err,
            cause = std::error::Error::source(err).map(tracing::field::display),
            "Proxy error"
        );
    }
}

fn empty(status: StatusCode) -> Response<Body> {
    let mut res = Response::new(Body::empty());
    *res.status_mut() = status;
    res
}

/// Empty body with the status of the error kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorHandler;

impl ErrorHandler for DefaultErrorHandler {
    fn handle_error(&self, parts: &Parts, err: ProxyError) -> Response<Body> {
        log_error(parts, &err);
        empty(err.status().unwrap_or_else(client_closed))
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    status: u16,
    kind: &'a str,
    message: String,
}

/// JSON body `{"status", "kind", "message"}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonErrorHandler;

impl ErrorHandler for JsonErrorHandler {
    fn handle_error(&self, parts: &Parts, err: ProxyError) -> Response<Body> {
        log_error(parts, &err);
        let Some(status) = err.status() else {
            return empty(client_closed());
        };

        let body = ErrorBody {
            status: status.as_u16(),
            kind: err.kind().as_str(),
            message: err.to_string(),
        };
        match serde_json::to_vec(&body) {
            Ok(bytes) => {
                let mut res = Response::new(Body::from(bytes));
                *res.status_mut() = status;
                res.headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                res
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode error body");
                empty(status)
            }
        }
    }
}
