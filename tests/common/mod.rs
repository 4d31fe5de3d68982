//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use proxy_handler::config::schema::{
    LoadBalancerSpec, MatchType, PathMatcherSpec, ReverseProxyHandlerSpec, UpstreamSpec,
};
use proxy_handler::config::ProxyConfig;
use proxy_handler::http::transport::{RoundTripper, TransportError};
use proxy_handler::{Components, HttpServer, ReverseProxyHandler};

/// Read one request or response head, up to the blank line.
pub async fn read_head(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match socket.read(&mut byte).await {
            Ok(0) | Err(_) => break,
            Ok(_) => head.push(byte[0]),
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

fn status_line(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        404 => "404 Not Found",
        500 => "500 Internal Server Error",
        502 => "502 Bad Gateway",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    }
}

/// Start a backend on an ephemeral port that answers every request from
/// `f`, which receives the raw request head.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let head = read_head(&mut socket).await;
                let (status, body) = f(head).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_line(status),
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Start a backend that returns a fixed 200 body.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    start_programmable_backend(move |_| async move { (200, response.to_string()) }).await
}

/// Start a backend that writes `chunks` one by one, pausing between them.
pub async fn start_raw_backend(chunks: Vec<&'static str>, pause: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let chunks = Arc::new(chunks);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let chunks = chunks.clone();
            tokio::spawn(async move {
                read_head(&mut socket).await;
                for chunk in chunks.iter() {
                    if socket.write_all(chunk.as_bytes()).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(pause).await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Start a backend that switches to `protocol` and then echoes bytes.
pub async fn start_upgrade_backend(protocol: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                read_head(&mut socket).await;
                let response = format!(
                    "HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: {protocol}\r\n\r\n"
                );
                if socket.write_all(response.as_bytes()).await.is_err() {
                    return;
                }
                let (mut read, mut write) = socket.into_split();
                let _ = tokio::io::copy(&mut read, &mut write).await;
            });
        }
    });
    addr
}

/// A port nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Load balancer claiming every path, over the given upstream URLs.
pub fn lb_spec(urls: &[String]) -> LoadBalancerSpec {
    LoadBalancerSpec {
        path_matchers: vec![PathMatcherSpec {
            pattern: "/".to_string(),
            match_type: MatchType::Prefix,
            ..Default::default()
        }],
        upstreams: urls
            .iter()
            .map(|url| UpstreamSpec {
                url: url.clone(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

pub fn handler_spec(lbs: Vec<LoadBalancerSpec>) -> ReverseProxyHandlerSpec {
    ReverseProxyHandlerSpec {
        name: "it".to_string(),
        load_balancers: lbs,
        ..Default::default()
    }
}

/// Run a proxy for `spec` on an ephemeral port. Cancel the token to stop it.
pub async fn start_proxy(spec: ReverseProxyHandlerSpec) -> (SocketAddr, CancellationToken) {
    let mut config = ProxyConfig::default();
    config.handler = spec;

    let handler = ReverseProxyHandler::from_spec(&config.handler, &Components::default()).unwrap();
    let shutdown = handler.shutdown_token();
    let server = HttpServer::new(handler, &config.handler, &config.timeouts).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run(listener).await;
    });
    (addr, shutdown)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

type Reply = Arc<dyn Fn(&Request<Body>) -> Result<Response<Body>, TransportError> + Send + Sync>;

/// In-process transport answering from a closure.
#[derive(Clone)]
pub struct MockTransport {
    reply: Reply,
    seen: Arc<Mutex<Vec<Request<()>>>>,
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MockTransport")
    }
}

impl MockTransport {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Request<Body>) -> Result<Response<Body>, TransportError> + Send + Sync + 'static,
    {
        Self {
            reply: Arc::new(f),
            seen: Arc::default(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self::new(move |_| {
            Ok(Response::builder()
                .status(status)
                .body(Body::empty())
                .unwrap())
        })
    }

    /// Requests seen so far, without bodies.
    pub fn seen(&self) -> Vec<Request<()>> {
        self.seen
            .lock()
            .iter()
            .map(|r| {
                let mut copy = Request::new(());
                *copy.method_mut() = r.method().clone();
                *copy.uri_mut() = r.uri().clone();
                *copy.headers_mut() = r.headers().clone();
                copy
            })
            .collect()
    }

    pub fn uris(&self) -> Vec<String> {
        self.seen().iter().map(|r| r.uri().to_string()).collect()
    }

    pub fn components(&self) -> Components {
        Components::default().with_transport("default", Arc::new(self.clone()))
    }
}

impl RoundTripper for MockTransport {
    fn round_trip(
        &self,
        req: Request<Body>,
    ) -> BoxFuture<'static, Result<Response<Body>, TransportError>> {
        let mut head = Request::new(());
        *head.method_mut() = req.method().clone();
        *head.uri_mut() = req.uri().clone();
        *head.headers_mut() = req.headers().clone();
        self.seen.lock().push(head);

        let result = (self.reply)(&req);
        Box::pin(async move { result })
    }
}
