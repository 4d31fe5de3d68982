//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe one upstream (HTTP, TCP or UDP)
//! - Feed each result into the upstream's circuit breaker
//!
//! # Design Decisions
//! - One task per upstream, spawned at build time
//! - The task holds the breaker, not the upstream, so dropping the
//!   upstream cancels the task instead of keeping it alive
//! - HTTP probes go through the handler's transport and drain the body

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Uri};
use http_body_util::BodyExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::schema::{HealthCheckKind, HealthCheckSpec};
use crate::error::BuildError;
use crate::health::passive;
use crate::http::transport::RoundTripper;
use crate::observability::metrics;
use crate::resilience::circuit_breaker::CircuitBreaker;

const USER_AGENT: &str = "proxy-handler-health-check";

/// Probe interval for a configured number of seconds; non-positive means 1 s.
pub fn interval_from_secs(secs: i64) -> Duration {
    if secs <= 0 {
        Duration::from_secs(1)
    } else {
        Duration::from_secs(secs as u64)
    }
}

/// A single kind of health probe.
#[derive(Debug, Clone)]
pub enum Probe {
    Http {
        transport: Arc<dyn RoundTripper>,
        method: Method,
        uri: Uri,
        timeout: Duration,
    },
    Tcp {
        address: String,
        timeout: Duration,
    },
    Udp {
        address: String,
        timeout: Duration,
    },
}

impl Probe {
    pub fn from_spec(
        spec: &HealthCheckSpec,
        url: &Url,
        transport: Arc<dyn RoundTripper>,
    ) -> Result<Self, String> {
        let timeout = Duration::from_secs(spec.timeout.max(1));

        match spec.kind {
            HealthCheckKind::Http => {
                let method = Method::from_bytes(spec.method.as_bytes())
                    .map_err(|_| format!("invalid probe method {:?}", spec.method))?;
                let mut target = url.clone();
                target.set_path(&spec.path);
                let uri = target
                    .as_str()
                    .parse::<Uri>()
                    .map_err(|e| format!("invalid probe url {target}: {e}"))?;
                Ok(Probe::Http {
                    transport,
                    method,
                    uri,
                    timeout,
                })
            }
            HealthCheckKind::Tcp => Ok(Probe::Tcp {
                address: dial_address(spec, url)?,
                timeout,
            }),
            HealthCheckKind::Udp => Ok(Probe::Udp {
                address: dial_address(spec, url)?,
                timeout,
            }),
        }
    }

    /// Run the probe once.
    pub async fn check(&self) -> Result<(), String> {
        match self {
            Probe::Http {
                transport,
                method,
                uri,
                timeout,
            } => {
                let req = Request::builder()
                    .method(method.clone())
                    .uri(uri.clone())
                    .header("user-agent", USER_AGENT)
                    .body(Body::empty())
                    .map_err(|e| e.to_string())?;

                let exchange = async {
                    let res = transport.round_trip(req).await.map_err(|e| e.to_string())?;
                    let status = res.status();
                    res.into_body()
                        .collect()
                        .await
                        .map_err(|e| format!("reading body: {e}"))?;
                    if passive::is_failure(status.as_u16(), None) {
                        return Err(format!("status {status}"));
                    }
                    Ok(())
                };

                time::timeout(*timeout, exchange)
                    .await
                    .map_err(|_| "timeout".to_string())?
            }
            Probe::Tcp { address, timeout } => {
                let stream = time::timeout(*timeout, TcpStream::connect(address.as_str()))
                    .await
                    .map_err(|_| "timeout".to_string())?
                    .map_err(|e| e.to_string())?;
                drop(stream);
                Ok(())
            }
            Probe::Udp { address, timeout } => {
                time::timeout(*timeout, udp_connect(address))
                    .await
                    .map_err(|_| "timeout".to_string())?
            }
        }
    }
}

fn dial_address(spec: &HealthCheckSpec, url: &Url) -> Result<String, String> {
    if let Some(address) = &spec.address {
        return Ok(address.clone());
    }
    let host = url.host().ok_or_else(|| "upstream has no host".to_string())?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| format!("no port for scheme {:?}", url.scheme()))?;
    Ok(format!("{host}:{port}"))
}

async fn udp_connect(address: &str) -> Result<(), String> {
    let target: SocketAddr = tokio::net::lookup_host(address)
        .await
        .map_err(|e| e.to_string())?
        .next()
        .ok_or_else(|| format!("{address} did not resolve"))?;
    let local = if target.is_ipv4() {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
    } else {
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
    };
    let socket = UdpSocket::bind(local).await.map_err(|e| e.to_string())?;
    socket.connect(target).await.map_err(|e| e.to_string())
}

/// Periodic probe bound to one upstream's breaker.
#[derive(Debug)]
pub struct ActiveCheck {
    pub upstream: String,
    pub breaker: Arc<CircuitBreaker>,
    pub probe: Probe,
    pub initial_delay: Duration,
    pub interval: Duration,
}

impl ActiveCheck {
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            upstream = %self.upstream,
            interval_secs = self.interval.as_secs(),
            "Active health check starting"
        );

        tokio::select! {
            _ = time::sleep(self.initial_delay) => {}
            _ = shutdown.cancelled() => return,
        }

        let mut ticker = time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.check_once().await,
                _ = shutdown.cancelled() => {
                    tracing::debug!(upstream = %self.upstream, "Active health check stopped");
                    break;
                }
            }
        }
    }

    async fn check_once(&self) {
        let result = self.probe.check().await;
        metrics::record_active_check(&self.upstream, result.is_ok());

        match result {
            Ok(()) => self.breaker.count_success(),
            Err(reason) => {
                tracing::warn!(upstream = %self.upstream, reason = %reason, "Active health check failed");
                self.breaker.count_failure();
            }
        }
    }
}

/// Spawn `check` on the current runtime until `shutdown` fires.
pub fn spawn(check: ActiveCheck, shutdown: CancellationToken) -> Result<JoinHandle<()>, BuildError> {
    let handle = tokio::runtime::Handle::try_current().map_err(|_| BuildError::NoRuntime)?;
    Ok(handle.spawn(check.run(shutdown)))
}
