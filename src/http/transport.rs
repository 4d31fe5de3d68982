//! Outbound round-trip abstraction.
//!
//! # Responsibilities
//! - Perform exactly one HTTP round trip per call
//! - Classify failures (cancellation, deadline, connect, other)
//! - Allow transports to be wrapped by named layers
//!
//! # Design Decisions
//! - Object-safe trait returning a boxed future, so transports can be
//!   swapped at build time and mocked in tests
//! - The hyper legacy client is the default; it keeps pooled connections
//!   and supports HTTP/1.1 upgrades
//! - Wrappers listed first end up outermost

use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use thiserror::Error;

use crate::error::BoxError;

/// HTTP/3 `H3_REQUEST_CANCELLED` error code.
pub const H3_REQUEST_CANCELLED: u64 = 0x010c;

/// Failure of a single round trip.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request canceled")]
    Canceled,

    #[error("http/3 stream error {code:#06x}")]
    Http3 { code: u64 },

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("connect failed: {0}")]
    Connect(#[source] BoxError),

    #[error("{0}")]
    Other(#[source] BoxError),
}

impl TransportError {
    /// True for client-side cancellation, including HTTP/3 request cancel.
    pub fn is_canceled(&self) -> bool {
        matches!(
            self,
            TransportError::Canceled | TransportError::Http3 { code: H3_REQUEST_CANCELLED }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::DeadlineExceeded)
    }
}

impl From<hyper_util::client::legacy::Error> for TransportError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        if err.is_connect() {
            TransportError::Connect(Box::new(err))
        } else {
            TransportError::Other(Box::new(err))
        }
    }
}

/// Performs a single HTTP round trip.
pub trait RoundTripper: Send + Sync + Debug {
    fn round_trip(
        &self,
        req: Request<Body>,
    ) -> BoxFuture<'static, Result<Response<Body>, TransportError>>;
}

/// Wraps a transport with extra behavior.
pub trait RoundTripperLayer: Send + Sync + Debug {
    fn wrap(&self, inner: Arc<dyn RoundTripper>) -> Arc<dyn RoundTripper>;
}

/// Apply `layers` around `base`, the first layer outermost.
pub fn layered(
    base: Arc<dyn RoundTripper>,
    layers: &[Arc<dyn RoundTripperLayer>],
) -> Arc<dyn RoundTripper> {
    layers
        .iter()
        .rev()
        .fold(base, |inner, layer| layer.wrap(inner))
}

/// Default transport on the hyper legacy client.
#[derive(Debug, Clone)]
pub struct HyperTransport {
    client: Client<HttpConnector, Body>,
    timeout: Option<Duration>,
}

impl HyperTransport {
    pub fn new() -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self {
            client,
            timeout: None,
        }
    }

    /// Bound the wait for response headers.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundTripper for HyperTransport {
    fn round_trip(
        &self,
        req: Request<Body>,
    ) -> BoxFuture<'static, Result<Response<Body>, TransportError>> {
        let client = self.client.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let pending = client.request(req);
            let res = match timeout {
                Some(limit) => tokio::time::timeout(limit, pending)
                    .await
                    .map_err(|_| TransportError::DeadlineExceeded)?,
                None => pending.await,
            }?;
            Ok(res.map(Body::new))
        })
    }
}

/// Logs every round trip at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceLayer;

impl RoundTripperLayer for TraceLayer {
    fn wrap(&self, inner: Arc<dyn RoundTripper>) -> Arc<dyn RoundTripper> {
        Arc::new(TracedTransport { inner })
    }
}

#[derive(Debug)]
struct TracedTransport {
    inner: Arc<dyn RoundTripper>,
}

impl RoundTripper for TracedTransport {
    fn round_trip(
        &self,
        req: Request<Body>,
    ) -> BoxFuture<'static, Result<Response<Body>, TransportError>> {
        let method = req.method().clone();
        let uri = req.uri().clone();
        let pending = self.inner.round_trip(req);

        Box::pin(async move {
            let start = Instant::now();
            let result = pending.await;
            let elapsed_ms = start.elapsed().as_millis() as u64;
            match &result {
                Ok(res) => tracing::debug!(
                    %method,
                    %uri,
                    status = res.status().as_u16(),
                    elapsed_ms,
                    "Round trip completed"
                ),
                Err(e) => tracing::debug!(%method, %uri, error = %e, elapsed_ms, "Round trip failed"),
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[derive(Debug)]
    struct Echo;

    impl RoundTripper for Echo {
        fn round_trip(
            &self,
            req: Request<Body>,
        ) -> BoxFuture<'static, Result<Response<Body>, TransportError>> {
            let mut res = Response::new(Body::empty());
            if let Some(trail) = req.headers().get("x-trail") {
                res.headers_mut().insert("x-trail", trail.clone());
            }
            Box::pin(async move { Ok(res) })
        }
    }

    #[derive(Debug)]
    struct Tag(&'static str);

    #[derive(Debug)]
    struct Tagged {
        tag: &'static str,
        inner: Arc<dyn RoundTripper>,
    }

    impl RoundTripper for Tagged {
        fn round_trip(
            &self,
            mut req: Request<Body>,
        ) -> BoxFuture<'static, Result<Response<Body>, TransportError>> {
            let trail = match req.headers().get("x-trail") {
                Some(v) => format!("{},{}", v.to_str().unwrap(), self.tag),
                None => self.tag.to_string(),
            };
            req.headers_mut()
                .insert("x-trail", HeaderValue::from_str(&trail).unwrap());
            self.inner.round_trip(req)
        }
    }

    impl RoundTripperLayer for Tag {
        fn wrap(&self, inner: Arc<dyn RoundTripper>) -> Arc<dyn RoundTripper> {
            Arc::new(Tagged { tag: self.0, inner })
        }
    }

    #[tokio::test]
    async fn test_first_layer_is_outermost() {
        let layers: Vec<Arc<dyn RoundTripperLayer>> =
            vec![Arc::new(Tag("outer")), Arc::new(TraceLayer), Arc::new(Tag("inner"))];
        let transport = layered(Arc::new(Echo), &layers);

        let res = transport
            .round_trip(Request::new(Body::empty()))
            .await
            .unwrap();
        assert_eq!(res.headers()["x-trail"], "outer,inner");
    }

    #[test]
    fn test_cancellation_classification() {
        assert!(TransportError::Canceled.is_canceled());
        assert!(TransportError::Http3 { code: H3_REQUEST_CANCELLED }.is_canceled());
        assert!(!TransportError::Http3 { code: 0x0102 }.is_canceled());
        assert!(TransportError::DeadlineExceeded.is_timeout());
        assert!(!TransportError::Other("boom".into()).is_canceled());
    }

    #[tokio::test]
    async fn test_connect_failure_is_classified() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport = HyperTransport::new();
        let req = Request::builder()
            .uri(format!("http://127.0.0.1:{port}/"))
            .body(Body::empty())
            .unwrap();
        let err = transport.round_trip(req).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)));
    }
}
