//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the Axum router the handler is mounted on
//! - Bind path parameters from the route templates
//! - Reject methods outside the accept list
//! - Wire up middleware (request ID, tracing)
//! - Serve with connect info, upgrades and graceful shutdown
//!
//! # Design Decisions
//! - One `any` route per accept pattern; no patterns mounts the handler
//!   as the fallback so every path reaches it
//! - The request timeout is a deadline on the round trip, so an expired
//!   request is rendered by the handler's error handler as a 504
//! - Shutdown cancels the handler's root token, which also stops tunnels

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{RawPathParams, State},
    http::{HeaderValue, Method, Request, Response, StatusCode},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::config::schema::{ReverseProxyHandlerSpec, TimeoutConfig};
use crate::error::BuildError;
use crate::http::context::{PathParams, RequestDeadline};
use crate::http::handler::ReverseProxyHandler;

/// Generates a UUID v4 `x-request-id` for requests that carry none.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Application state injected into the route handlers.
#[derive(Clone)]
struct AppState {
    handler: ReverseProxyHandler,
    methods: Arc<[Method]>,
    timeout: Option<Duration>,
}

/// HTTP server for the reverse proxy handler.
pub struct HttpServer {
    router: Router,
    shutdown: CancellationToken,
}

impl HttpServer {
    /// Mount `handler` on the patterns and methods named by `spec`.
    pub fn new(
        handler: ReverseProxyHandler,
        spec: &ReverseProxyHandlerSpec,
        timeouts: &TimeoutConfig,
    ) -> Result<Self, BuildError> {
        let methods = spec
            .methods
            .iter()
            .map(|m| Method::from_bytes(m.as_bytes()).map_err(|_| BuildError::BadMethod(m.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        let mut patterns: Vec<&str> = Vec::new();
        for pattern in &spec.patterns {
            if !pattern.starts_with('/') {
                return Err(BuildError::BadPathPattern {
                    pattern: pattern.clone(),
                    source: "route patterns must start with '/'".into(),
                });
            }
            if !patterns.contains(&pattern.as_str()) {
                patterns.push(pattern);
            }
        }

        let shutdown = handler.shutdown_token();
        let state = AppState {
            handler,
            methods: methods.into(),
            timeout: (timeouts.request_secs > 0)
                .then(|| Duration::from_secs(timeouts.request_secs)),
        };

        Ok(Self {
            router: Self::build_router(&patterns, state),
            shutdown,
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(patterns: &[&str], state: AppState) -> Router {
        let router = if patterns.is_empty() {
            Router::new().fallback(proxy_fallback)
        } else {
            patterns
                .iter()
                .fold(Router::new(), |router, pattern| {
                    router.route(pattern, any(proxy_route))
                })
        };

        router.with_state(state).layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
    }

    /// The router, for embedding or in-process tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(self.shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn proxy_route(
    State(state): State<AppState>,
    params: RawPathParams,
    mut req: Request<Body>,
) -> Response<Body> {
    let params: PathParams = params.iter().collect();
    req.extensions_mut().insert(params);
    dispatch(state, req).await
}

async fn proxy_fallback(State(state): State<AppState>, req: Request<Body>) -> Response<Body> {
    dispatch(state, req).await
}

async fn dispatch(state: AppState, mut req: Request<Body>) -> Response<Body> {
    if !state.methods.is_empty() && !state.methods.contains(req.method()) {
        tracing::debug!(method = %req.method(), "Method not accepted");
        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return res;
    }

    if let Some(timeout) = state.timeout {
        req.extensions_mut()
            .insert(RequestDeadline(tokio::time::Instant::now() + timeout));
    }
    state.handler.serve(req).await
}

/// Wait for Ctrl+C or an external cancel, then cancel everything in flight.
async fn shutdown_signal(token: CancellationToken) {
    tokio::select! {
        res = tokio::signal::ctrl_c() => match res {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                token.cancelled().await;
            }
        },
        _ = token.cancelled() => tracing::info!("Shutdown requested"),
    }
    token.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{
        LoadBalancerSpec, MatchType, ParamKind, ParamMatcherSpec, PathMatcherSpec, UpstreamSpec,
    };
    use crate::http::handler::Components;
    use crate::http::transport::{RoundTripper, TransportError};
    use futures_util::future::BoxFuture;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    /// Answers with the outbound URI and the request id it was given.
    #[derive(Debug)]
    struct Echo;

    impl RoundTripper for Echo {
        fn round_trip(
            &self,
            req: Request<Body>,
        ) -> BoxFuture<'static, Result<Response<Body>, TransportError>> {
            let uri = req.uri().to_string();
            Box::pin(async move { Ok(Response::new(Body::from(uri))) })
        }
    }

    fn handler_spec(patterns: &[&str], methods: &[&str]) -> ReverseProxyHandlerSpec {
        ReverseProxyHandlerSpec {
            name: "server-test".to_string(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
            load_balancers: vec![LoadBalancerSpec {
                path_matchers: vec![PathMatcherSpec {
                    pattern: "/".to_string(),
                    match_type: MatchType::Prefix,
                    ..Default::default()
                }],
                param_matchers: vec![ParamMatcherSpec {
                    kind: ParamKind::PathParam,
                    key: "id".to_string(),
                    pattern: "^[0-9]+$".to_string(),
                    match_type: MatchType::Regex,
                }],
                upstreams: vec![UpstreamSpec {
                    url: "http://backend/".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn server(patterns: &[&str], methods: &[&str]) -> HttpServer {
        let spec = handler_spec(patterns, methods);
        let components = Components::default().with_transport("default", Arc::new(Echo));
        let handler = ReverseProxyHandler::from_spec(&spec, &components).unwrap();
        HttpServer::new(handler, &spec, &TimeoutConfig::default()).unwrap()
    }

    async fn call(server: &HttpServer, method: &str, uri: &str) -> (StatusCode, String) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let res = server.router().oneshot(req).await.unwrap();
        let status = res.status();
        let body = res.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn test_route_template_binds_path_params() {
        let s = server(&["/users/{id}"], &[]);

        let (status, body) = call(&s, "GET", "/users/42").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "http://backend/users/42");

        let (status, _) = call(&s, "GET", "/users/abc").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unmatched_route_is_not_proxied() {
        let s = server(&["/users/{id}"], &[]);
        let (status, body) = call(&s, "GET", "/orders/1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_method_accept_list() {
        let s = server(&["/users/{id}"], &["GET"]);
        assert_eq!(call(&s, "GET", "/users/1").await.0, StatusCode::OK);
        assert_eq!(
            call(&s, "DELETE", "/users/1").await.0,
            StatusCode::METHOD_NOT_ALLOWED
        );
    }

    #[tokio::test]
    async fn test_request_id_is_set() {
        let s = server(&["/users/{id}"], &[]);
        let req = Request::builder()
            .uri("/users/1")
            .body(Body::empty())
            .unwrap();
        let res = s.router().oneshot(req).await.unwrap();
        let id = res.headers()["x-request-id"].to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }

    #[test]
    fn test_bad_configuration_is_rejected() {
        let spec = handler_spec(&["users"], &[]);
        let handler = ReverseProxyHandler::builder().build();
        assert!(matches!(
            HttpServer::new(handler.clone(), &spec, &TimeoutConfig::default()),
            Err(BuildError::BadPathPattern { .. })
        ));

        let spec = handler_spec(&[], &["G ET"]);
        assert!(matches!(
            HttpServer::new(handler, &spec, &TimeoutConfig::default()),
            Err(BuildError::BadMethod(_))
        ));
    }
}
