//! Handler scenarios against an in-process transport.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, Response, StatusCode};
use http_body_util::BodyExt;

use proxy_handler::config::schema::{
    CircuitBreakerSpec, MatchType, PathMatcherSpec, ReverseProxyHandlerSpec,
};
use proxy_handler::ReverseProxyHandler;

mod common;
use common::{handler_spec, lb_spec, MockTransport};

fn urls(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|u| u.to_string()).collect()
}

fn json(spec: ReverseProxyHandlerSpec) -> ReverseProxyHandlerSpec {
    ReverseProxyHandlerSpec {
        error_handler: Some("json".to_string()),
        ..spec
    }
}

fn build(spec: &ReverseProxyHandlerSpec, transport: &MockTransport) -> ReverseProxyHandler {
    ReverseProxyHandler::from_spec(spec, &transport.components()).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(res: Response<Body>) -> serde_json::Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_round_robin_over_two_upstreams() {
    let transport = MockTransport::status(200);
    let handler = build(
        &handler_spec(vec![lb_spec(&urls(&["http://a/", "http://b/"]))]),
        &transport,
    );

    for _ in 0..4 {
        let res = handler.serve(get("http://x/foo")).await;
        assert_eq!(res.status(), StatusCode::OK);
    }
    assert_eq!(
        transport.uris(),
        ["http://a/foo", "http://b/foo", "http://a/foo", "http://b/foo"]
    );
}

#[tokio::test]
async fn test_open_breaker_makes_upstream_unavailable() {
    let transport = MockTransport::status(503);
    let mut lb = lb_spec(&urls(&["http://a/"]));
    lb.upstreams[0].enable_passive = true;
    lb.upstreams[0].circuit_breaker = Some(CircuitBreakerSpec {
        failure_threshold: 1,
        ..Default::default()
    });
    let handler = build(&handler_spec(vec![lb]), &transport);

    // The 503 is relayed and opens the breaker.
    assert_eq!(
        handler.serve(get("/x")).await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );

    let res = handler.serve(get("/x")).await;
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert!(body.is_empty());
    assert_eq!(transport.uris().len(), 1);
}

#[tokio::test]
async fn test_unavailable_kind_is_reported() {
    let transport = MockTransport::status(500);
    let mut lb = lb_spec(&urls(&["http://a/"]));
    lb.upstreams[0].enable_passive = true;
    lb.upstreams[0].circuit_breaker = Some(CircuitBreakerSpec {
        failure_threshold: 1,
        ..Default::default()
    });
    let handler = build(&json(handler_spec(vec![lb])), &transport);

    handler.serve(get("/x")).await;
    let res = handler.serve(get("/x")).await;
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(res).await["kind"], "ProxyUnavailable");
}

#[tokio::test]
async fn test_no_load_balancer_claims_the_request() {
    let transport = MockTransport::status(200);
    let mut lb = lb_spec(&urls(&["http://a/"]));
    lb.hosts = vec!["api.example.com".to_string()];
    let handler = build(&json(handler_spec(vec![lb])), &transport);

    let res = handler.serve(get("http://www.example.com/x")).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(res).await["kind"], "NoUpstream");
    assert!(transport.uris().is_empty());
}

#[tokio::test]
async fn test_upgrade_protocol_mismatch() {
    let transport = MockTransport::new(|_| {
        Ok(Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header("connection", "Upgrade")
            .header("upgrade", "h2c")
            .body(Body::empty())
            .unwrap())
    });
    let handler = build(
        &json(handler_spec(vec![lb_spec(&urls(&["http://a/"]))])),
        &transport,
    );

    let req = Request::builder()
        .uri("/chat")
        .header("connection", "Upgrade")
        .header("upgrade", "websocket")
        .body(Body::empty())
        .unwrap();
    let res = handler.serve(req).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(res).await["kind"], "ProxyProtocolSwitch");

    let seen = transport.seen();
    assert_eq!(seen[0].headers()["connection"], "Upgrade");
    assert_eq!(seen[0].headers()["upgrade"], "websocket");
}

#[tokio::test]
async fn test_regex_rewrite_swaps_segments() {
    let transport = MockTransport::status(200);
    let mut lb = lb_spec(&urls(&["http://a/"]));
    lb.path_matchers = vec![PathMatcherSpec {
        pattern: r"^/(?P<k>\w+)/(?P<v>\w+)$".to_string(),
        match_type: MatchType::Regex,
        rewrite: "/$v/$k".to_string(),
        ..Default::default()
    }];
    let handler = build(&handler_spec(vec![lb]), &transport);

    handler.serve(get("/foo/bar")).await;
    assert_eq!(transport.uris(), ["http://a/bar/foo"]);
}

#[tokio::test]
async fn test_forwarded_for_is_appended() {
    let transport = MockTransport::status(200);
    let handler = build(
        &handler_spec(vec![lb_spec(&urls(&["http://a/"]))]),
        &transport,
    );

    let remote: SocketAddr = "10.0.0.2:41000".parse().unwrap();
    let mut req = Request::builder()
        .uri("/x")
        .header("host", "front.example.com")
        .header("x-forwarded-for", "10.0.0.1")
        .header("connection", "keep-alive, x-secret")
        .header("x-secret", "1")
        .header("proxy-authorization", "Basic Zm9vOmJhcg==")
        .body(Body::empty())
        .unwrap();
    req.extensions_mut().insert(ConnectInfo(remote));
    handler.serve(req).await;

    let seen = transport.seen();
    let headers = seen[0].headers();
    assert_eq!(headers["x-forwarded-for"], "10.0.0.1, 10.0.0.2");
    assert_eq!(headers["x-forwarded-port"], "41000");
    assert_eq!(headers["x-forwarded-host"], "front.example.com");
    assert_eq!(headers["x-forwarded-proto"], "http");
    assert_eq!(headers["user-agent"], "");
    assert!(!headers.contains_key("host"));
    assert!(!headers.contains_key("connection"));
    assert!(!headers.contains_key("x-secret"));
    assert!(!headers.contains_key("proxy-authorization"));
}

#[tokio::test]
async fn test_handlers_from_one_spec_rewrite_identically() {
    let spec = handler_spec(vec![lb_spec(&urls(&["http://a:8080/base?k=v"]))]);
    let first = MockTransport::status(200);
    let second = MockTransport::status(200);
    let h1 = build(&spec, &first);
    let h2 = build(&spec, &second);

    let req = || {
        Request::builder()
            .method("POST")
            .uri("/items?page=2")
            .header("te", "trailers, deflate")
            .header("x-custom", "1")
            .body(Body::from("payload"))
            .unwrap()
    };
    h1.serve(req()).await;
    h2.serve(req()).await;

    let (a, b) = (&first.seen()[0], &second.seen()[0]);
    assert_eq!(a.uri().to_string(), "http://a:8080/items?k=v&page=2");
    assert_eq!(a.uri(), b.uri());
    assert_eq!(a.method(), b.method());
    assert_eq!(a.headers(), b.headers());
    assert_eq!(a.headers()["te"], "trailers");
}
