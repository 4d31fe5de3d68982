//! Per-request context carried in the request extensions.
//!
//! # Responsibilities
//! - Pre-proxy hooks run before upstream selection
//! - Extra headers overlaid onto the outbound request
//! - Path parameters bound by the server's route template
//! - Connection facts (remote address, TLS, cancellation, deadline)
//!
//! # Design Decisions
//! - Everything lives in `http::Extensions`, keyed by type
//! - Absent extensions mean "not provided", never an error

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use tokio::time::Instant;

use crate::error::ProxyError;

/// A pre-proxy hook. The first hook returning an error aborts the request.
pub type PreProxyHook = Arc<dyn Fn(&mut Parts) -> Result<(), ProxyError> + Send + Sync>;

/// Ordered pre-proxy hooks.
#[derive(Clone, Default)]
pub struct PreProxyHooks(Vec<PreProxyHook>);

impl PreProxyHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Parts) -> Result<(), ProxyError> + Send + Sync + 'static,
    {
        self.0.push(Arc::new(hook));
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Run the hooks in the request's extensions, in order.
    pub fn run(parts: &mut Parts) -> Result<(), ProxyError> {
        let Some(hooks) = parts.extensions.get::<PreProxyHooks>().cloned() else {
            return Ok(());
        };
        for hook in &hooks.0 {
            hook(parts)?;
        }
        Ok(())
    }
}

impl fmt::Debug for PreProxyHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreProxyHooks")
            .field("len", &self.0.len())
            .finish()
    }
}

/// Headers set on the outbound request after all other rewriting.
#[derive(Debug, Clone, Default)]
pub struct ProxyHeaders(pub HeaderMap);

/// Path variables bound by the server's route template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(HashMap<String, String>);

impl PathParams {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PathParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Marker inserted by a TLS-terminating front end.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsConnection;

/// Point in time after which the round trip counts as timed out.
#[derive(Debug, Clone, Copy)]
pub struct RequestDeadline(pub Instant);

/// Remote address of the inbound connection, when the server recorded it.
pub fn remote_addr(parts: &Parts) -> Option<SocketAddr> {
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Whether the inbound request arrived over TLS.
pub fn is_tls(parts: &Parts) -> bool {
    parts.extensions.get::<TlsConnection>().is_some()
        || parts.uri.scheme_str() == Some("https")
}
