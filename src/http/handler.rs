//! The reverse proxy handler.
//!
//! # Responsibilities
//! - Run pre-proxy hooks
//! - Ask each load balancer in turn for an upstream
//! - Round-trip the rewritten request under cancellation and deadline
//! - Feed every round-trip outcome back to the upstream
//! - Hand 101 responses to the tunnel, stream everything else
//!
//! # Data Flow
//! ```text
//! Request<Body>
//!     → PreProxyHooks::run (first error is rendered)
//!     → LoadBalancer::upstream, in order
//!         - Declined: next load balancer
//!         - Unavailable: ProxyUnavailable (502)
//!         - none claims: NoUpstream (404)
//!     → request.rs (outbound URL and headers)
//!     → transport (select on cancellation, timeout at the deadline)
//!         - canceled: log only
//!         - deadline: ProxyTimeout (504)
//!         - other: ProxyRoundtrip (500)
//!     → upstream.notify(status)
//!     → upgrade.rs (101) or response.rs (stream)
//! ```
//!
//! # Design Decisions
//! - Transports, wrappers and error handlers are looked up by name in a
//!   `Components` registry at build time; unknown names fail the build
//! - The handler is cheap to clone and is a `tower::Service` with
//!   `Error = Infallible`, so it mounts directly on an axum router

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{Request, Response, StatusCode};
use futures_util::future::BoxFuture;
use hyper::upgrade::OnUpgrade;
use tokio_util::sync::CancellationToken;
use tower::Service;

use crate::clock::{Clock, SystemClock};
use crate::config::schema::ReverseProxyHandlerSpec;
use crate::error::{BuildError, ProxyError};
use crate::http::context::{PreProxyHooks, RequestDeadline};
use crate::http::error::{client_closed, DefaultErrorHandler, ErrorHandler, JsonErrorHandler};
use crate::http::request::{outbound_request, upgrade_type};
use crate::http::response::relay_response;
use crate::http::transport::{
    layered, HyperTransport, RoundTripper, RoundTripperLayer, TraceLayer, TransportError,
};
use crate::http::upgrade::switch_protocols;
use crate::load_balancer::upstream::{Upstream, UpstreamContext};
use crate::load_balancer::{LoadBalancer, Selection};
use crate::observability::metrics;

const DEFAULT_COMPONENT: &str = "default";

/// Named building blocks a handler spec refers to.
#[derive(Debug, Clone)]
pub struct Components {
    clock: Arc<dyn Clock>,
    transports: HashMap<String, Arc<dyn RoundTripper>>,
    layers: HashMap<String, Arc<dyn RoundTripperLayer>>,
    error_handlers: HashMap<String, Arc<dyn ErrorHandler>>,
}

impl Default for Components {
    fn default() -> Self {
        let hyper: Arc<dyn RoundTripper> = Arc::new(HyperTransport::new());
        Self {
            clock: Arc::new(SystemClock::new()),
            transports: HashMap::new(),
            layers: HashMap::new(),
            error_handlers: HashMap::new(),
        }
        .with_transport(DEFAULT_COMPONENT, hyper.clone())
        .with_transport("hyper", hyper)
        .with_layer("trace", Arc::new(TraceLayer))
        .with_error_handler(DEFAULT_COMPONENT, Arc::new(DefaultErrorHandler))
        .with_error_handler("json", Arc::new(JsonErrorHandler))
    }
}

impl Components {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_transport(mut self, name: &str, transport: Arc<dyn RoundTripper>) -> Self {
        self.transports.insert(name.to_string(), transport);
        self
    }

    pub fn with_layer(mut self, name: &str, layer: Arc<dyn RoundTripperLayer>) -> Self {
        self.layers.insert(name.to_string(), layer);
        self
    }

    pub fn with_error_handler(mut self, name: &str, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handlers.insert(name.to_string(), handler);
        self
    }

    fn transport(&self, name: Option<&str>) -> Result<Arc<dyn RoundTripper>, BuildError> {
        lookup(&self.transports, "transport", name)
    }

    fn layer(&self, name: &str) -> Result<Arc<dyn RoundTripperLayer>, BuildError> {
        lookup(&self.layers, "transport wrapper", Some(name))
    }

    fn error_handler(&self, name: Option<&str>) -> Result<Arc<dyn ErrorHandler>, BuildError> {
        lookup(&self.error_handlers, "error handler", name)
    }
}

fn lookup<T: ?Sized>(
    registry: &HashMap<String, Arc<T>>,
    kind: &'static str,
    name: Option<&str>,
) -> Result<Arc<T>, BuildError> {
    let name = name.filter(|n| !n.is_empty()).unwrap_or(DEFAULT_COMPONENT);
    registry
        .get(name)
        .cloned()
        .ok_or_else(|| BuildError::UnknownReference {
            kind,
            name: name.to_string(),
        })
}

#[derive(Debug)]
struct Inner {
    name: String,
    load_balancers: Vec<LoadBalancer>,
    transport: Arc<dyn RoundTripper>,
    error_handler: Arc<dyn ErrorHandler>,
    shutdown: CancellationToken,
}

/// HTTP handler relaying requests to load-balanced upstreams.
#[derive(Debug, Clone)]
pub struct ReverseProxyHandler {
    inner: Arc<Inner>,
}

/// Assembles a [`ReverseProxyHandler`] from parts.
#[derive(Debug, Default)]
pub struct ReverseProxyHandlerBuilder {
    name: String,
    load_balancers: Vec<LoadBalancer>,
    transport: Option<Arc<dyn RoundTripper>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    shutdown: Option<CancellationToken>,
}

impl ReverseProxyHandlerBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn load_balancer(mut self, lb: LoadBalancer) -> Self {
        self.load_balancers.push(lb);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn RoundTripper>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Token whose cancellation stops in-flight round trips and tunnels.
    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    pub fn build(self) -> ReverseProxyHandler {
        ReverseProxyHandler {
            inner: Arc::new(Inner {
                name: self.name,
                load_balancers: self.load_balancers,
                transport: self
                    .transport
                    .unwrap_or_else(|| Arc::new(HyperTransport::new())),
                error_handler: self
                    .error_handler
                    .unwrap_or_else(|| Arc::new(DefaultErrorHandler)),
                shutdown: self.shutdown.unwrap_or_default(),
            }),
        }
    }
}

impl ReverseProxyHandler {
    pub fn builder() -> ReverseProxyHandlerBuilder {
        ReverseProxyHandlerBuilder::default()
    }

    /// Build a handler from its declarative spec.
    ///
    /// Must run inside a tokio runtime when any upstream enables active
    /// health checks.
    pub fn from_spec(
        spec: &ReverseProxyHandlerSpec,
        components: &Components,
    ) -> Result<Self, BuildError> {
        let layers = spec
            .transport_wrappers
            .iter()
            .map(|name| components.layer(name))
            .collect::<Result<Vec<_>, _>>()?;
        let transport = layered(components.transport(spec.transport.as_deref())?, &layers);
        let error_handler = components.error_handler(spec.error_handler.as_deref())?;

        let ctx = UpstreamContext {
            clock: components.clock.clone(),
            transport: transport.clone(),
        };

        let mut builder = Self::builder()
            .name(spec.name.clone())
            .transport(transport)
            .error_handler(error_handler);
        for lb_spec in &spec.load_balancers {
            builder = builder.load_balancer(LoadBalancer::from_spec(lb_spec, &ctx)?);
        }
        let handler = builder.build();

        tracing::info!(
            handler = %handler.inner.name,
            load_balancers = handler.inner.load_balancers.len(),
            wrappers = layers.len(),
            "Reverse proxy handler built"
        );
        Ok(handler)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn load_balancers(&self) -> &[LoadBalancer] {
        &self.inner.load_balancers
    }

    /// Root cancellation token; cancelling it stops in-flight relays.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Relay one request.
    pub async fn serve(&self, req: Request<Body>) -> Response<Body> {
        let start = Instant::now();
        let (mut parts, body) = req.into_parts();
        let method = parts.method.clone();

        let (res, upstream) = match self.relay(&mut parts, body).await {
            Ok((res, upstream)) => (res, Some(upstream)),
            Err((err, upstream)) => (
                self.inner.error_handler.handle_error(&parts, err),
                upstream,
            ),
        };

        let upstream_id = upstream.as_ref().map_or("none", |u| u.id());
        metrics::record_request(
            method.as_str(),
            res.status().as_u16(),
            upstream_id,
            start.elapsed(),
        );
        res
    }

    async fn relay(
        &self,
        parts: &mut Parts,
        body: Body,
    ) -> Result<(Response<Body>, Arc<dyn Upstream>), (ProxyError, Option<Arc<dyn Upstream>>)> {
        PreProxyHooks::run(parts).map_err(|e| (e, None))?;

        let (upstream, url) = self.select(parts).map_err(|e| (e, None))?;
        let fail = |err: ProxyError| (err, Some(upstream.clone()));

        let inbound_upgrade = parts.extensions.remove::<OnUpgrade>();
        let requested = upgrade_type(&parts.headers);
        let cancel = parts
            .extensions
            .get::<CancellationToken>()
            .cloned()
            .unwrap_or_else(|| self.inner.shutdown.child_token());
        let deadline = parts.extensions.get::<RequestDeadline>().copied();

        let outbound = outbound_request(parts, body, &url).map_err(|e| {
            fail(ProxyError::ProxyRoundtrip {
                upstream: upstream.id().to_string(),
                source: TransportError::Other(Box::new(e)),
            })
        })?;

        tracing::debug!(
            handler = %self.inner.name,
            upstream = upstream.id(),
            uri = %outbound.uri(),
            "Forwarding request"
        );

        let pending = self.inner.transport.round_trip(outbound);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Canceled),
            res = async {
                match deadline {
                    Some(RequestDeadline(at)) => tokio::time::timeout_at(at, pending)
                        .await
                        .unwrap_or(Err(TransportError::DeadlineExceeded)),
                    None => pending.await,
                }
            } => res,
        };

        let res = match result {
            Ok(res) => res,
            Err(source) => return Err(fail(classify(upstream.as_ref(), source))),
        };
        upstream.notify(res.status().as_u16(), None);

        if res.status() == StatusCode::SWITCHING_PROTOCOLS {
            let res = switch_protocols(
                inbound_upgrade,
                requested.as_deref(),
                res,
                upstream.id(),
                cancel,
            )
            .map_err(fail)?;
            return Ok((res, upstream));
        }

        Ok((relay_response(res, upstream.id()), upstream))
    }

    fn select(&self, parts: &Parts) -> Result<(Arc<dyn Upstream>, url::Url), ProxyError> {
        for lb in &self.inner.load_balancers {
            match lb.upstream(parts) {
                Selection::Declined => continue,
                Selection::Unavailable => {
                    return Err(ProxyError::ProxyUnavailable {
                        path: parts.uri.path().to_string(),
                    })
                }
                Selection::Selected { upstream, url } => return Ok((upstream, url)),
            }
        }
        Err(ProxyError::NoUpstream {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
        })
    }
}

/// Map a transport failure to its error kind and report it upstream.
///
/// Cancellation reports 499, which passive health checks do not count as a
/// failure.
fn classify(upstream: &dyn Upstream, source: TransportError) -> ProxyError {
    let id = upstream.id().to_string();
    if source.is_canceled() {
        upstream.notify(client_closed().as_u16(), None);
        return ProxyError::ProxyNoRecovery {
            upstream: id,
            source: Box::new(source),
        };
    }
    if source.is_timeout() {
        upstream.notify(StatusCode::GATEWAY_TIMEOUT.as_u16(), None);
        return ProxyError::ProxyTimeout {
            upstream: id,
            source,
        };
    }
    upstream.notify(StatusCode::INTERNAL_SERVER_ERROR.as_u16(), None);
    ProxyError::ProxyRoundtrip {
        upstream: id,
        source,
    }
}

impl Service<Request<Body>> for ReverseProxyHandler {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response<Body>, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let handler = self.clone();
        Box::pin(async move { Ok(handler.serve(req).await) })
    }
}
