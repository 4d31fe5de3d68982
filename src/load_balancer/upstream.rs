//! Upstream abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream server (identity, URL, weight)
//! - Report availability to the selectors
//! - Receive request outcomes through `notify`
//!
//! # Design Decisions
//! - Two kinds: `NoopUpstream` is always active, `HealthCheckedUpstream`
//!   gates on its circuit breaker
//! - The identity is the configured URL with a trailing `/` removed
//! - Only plain `http` upstreams are accepted; the relay transport has no TLS
//! - Dropping a health-checked upstream stops its active check task

use std::error::Error as StdError;
use std::fmt::Debug;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::clock::Clock;
use crate::config::schema::UpstreamSpec;
use crate::error::BuildError;
use crate::health::{active, passive};
use crate::http::transport::RoundTripper;
use crate::resilience::circuit_breaker::{BreakerState, CircuitBreaker};

/// A server requests can be relayed to.
pub trait Upstream: Send + Sync + Debug {
    /// Stable identity, the configured URL without a trailing slash.
    fn id(&self) -> &str;

    fn url(&self) -> &Url;

    fn weight(&self) -> u32;

    /// Whether the upstream may receive traffic now.
    fn active(&self) -> bool;

    /// Report the outcome of a request relayed to this upstream.
    fn notify(&self, status: u16, err: Option<&(dyn StdError + 'static)>);
}

/// Dependencies shared by every upstream a handler builds.
#[derive(Debug, Clone)]
pub struct UpstreamContext {
    pub clock: Arc<dyn Clock>,
    /// Transport used by HTTP active checks.
    pub transport: Arc<dyn RoundTripper>,
}

/// Largest accepted upstream weight. Weighted selectors allocate one slot per
/// unit of weight.
pub const MAX_WEIGHT: i32 = 10_000;

/// Schemes the relay transport can dial.
pub const SUPPORTED_SCHEMES: &[&str] = &["http"];

fn parse_url(raw: &str) -> Result<(String, Url), BuildError> {
    let id = raw.strip_suffix('/').unwrap_or(raw).to_string();
    let url = Url::parse(raw).map_err(|source| BuildError::BadUpstreamUrl {
        url: raw.to_string(),
        source,
    })?;
    if url.host_str().is_none() {
        return Err(BuildError::UpstreamWithoutHost(raw.to_string()));
    }
    if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
        return Err(BuildError::UnsupportedScheme {
            url: raw.to_string(),
            scheme: url.scheme().to_string(),
        });
    }
    Ok((id, url))
}

/// Upstream without health tracking; always active.
#[derive(Debug)]
pub struct NoopUpstream {
    id: String,
    url: Url,
    weight: u32,
}

impl NoopUpstream {
    pub fn new(raw_url: &str, weight: u32) -> Result<Self, BuildError> {
        let (id, url) = parse_url(raw_url)?;
        Ok(Self {
            id,
            url,
            weight: weight.max(1),
        })
    }
}

impl Upstream for NoopUpstream {
    fn id(&self) -> &str {
        &self.id
    }

    fn url(&self) -> &Url {
        &self.url
    }

    fn weight(&self) -> u32 {
        self.weight
    }

    fn active(&self) -> bool {
        true
    }

    fn notify(&self, _status: u16, _err: Option<&(dyn StdError + 'static)>) {}
}

/// Upstream whose availability follows a circuit breaker.
#[derive(Debug)]
pub struct HealthCheckedUpstream {
    id: String,
    url: Url,
    weight: u32,
    breaker: Arc<CircuitBreaker>,
    passive: bool,
    shutdown: CancellationToken,
}

impl HealthCheckedUpstream {
    pub fn new(raw_url: &str, weight: u32, breaker: Arc<CircuitBreaker>, passive: bool) -> Result<Self, BuildError> {
        let (id, url) = parse_url(raw_url)?;
        Ok(Self {
            id,
            url,
            weight: weight.max(1),
            breaker,
            passive,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Token cancelled when this upstream is dropped.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

impl Upstream for HealthCheckedUpstream {
    fn id(&self) -> &str {
        &self.id
    }

    fn url(&self) -> &Url {
        &self.url
    }

    fn weight(&self) -> u32 {
        self.weight
    }

    fn active(&self) -> bool {
        self.breaker.active()
    }

    fn notify(&self, status: u16, err: Option<&(dyn StdError + 'static)>) {
        if self.passive {
            passive::record_outcome(&self.id, &self.breaker, status, err);
        }
    }
}

impl Drop for HealthCheckedUpstream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Build an upstream from its spec, starting active checks if enabled.
///
/// Returns `Ok(None)` for negative weights, which remove the upstream.
/// Weights above [`MAX_WEIGHT`] are rejected.
pub fn build_upstream(
    spec: &UpstreamSpec,
    ctx: &UpstreamContext,
) -> Result<Option<Arc<dyn Upstream>>, BuildError> {
    if spec.weight < 0 {
        tracing::debug!(url = %spec.url, weight = spec.weight, "Dropping upstream with negative weight");
        return Ok(None);
    }
    if spec.weight > MAX_WEIGHT {
        return Err(BuildError::WeightTooLarge {
            url: spec.url.clone(),
            weight: spec.weight,
            max: MAX_WEIGHT,
        });
    }
    let weight = spec.weight.max(1) as u32;

    if !spec.enable_passive && !spec.enable_active {
        return Ok(Some(Arc::new(NoopUpstream::new(&spec.url, weight)?)));
    }

    let breaker_spec = spec.circuit_breaker.clone().unwrap_or_default();
    let (id, _) = parse_url(&spec.url)?;
    let breaker = CircuitBreaker::from_spec(id, &breaker_spec, ctx.clock.clone());
    let upstream = HealthCheckedUpstream::new(&spec.url, weight, breaker, spec.enable_passive)?;

    if spec.enable_active {
        let probe = active::Probe::from_spec(&spec.health_check, upstream.url(), ctx.transport.clone())
            .map_err(|reason| BuildError::InvalidHealthCheck {
                upstream: upstream.id().to_string(),
                reason,
            })?;
        active::spawn(
            active::ActiveCheck {
                upstream: upstream.id().to_string(),
                breaker: upstream.breaker().clone(),
                probe,
                initial_delay: std::time::Duration::from_secs(spec.initial_delay),
                interval: active::interval_from_secs(spec.interval),
            },
            upstream.shutdown_token(),
        )?;
    }

    Ok(Some(Arc::new(upstream)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::schema::{CircuitBreakerSpec, CounterSpec};
    use crate::http::transport::HyperTransport;

    fn ctx() -> UpstreamContext {
        UpstreamContext {
            clock: Arc::new(SystemClock::new()),
            transport: Arc::new(HyperTransport::new()),
        }
    }

    fn spec(url: &str, weight: i32) -> UpstreamSpec {
        UpstreamSpec {
            url: url.to_string(),
            weight,
            ..Default::default()
        }
    }

    #[test]
    fn test_identity_trims_trailing_slash() {
        let up = NoopUpstream::new("http://a.example:8080/base/", 1).unwrap();
        assert_eq!(up.id(), "http://a.example:8080/base");
        assert_eq!(up.url().as_str(), "http://a.example:8080/base/");
        assert_eq!(up.url().host_str(), Some("a.example"));
    }

    #[test]
    fn test_bad_urls_fail_build() {
        assert!(matches!(
            NoopUpstream::new("not a url", 1),
            Err(BuildError::BadUpstreamUrl { .. })
        ));
        assert!(matches!(
            NoopUpstream::new("unix:/tmp/sock", 1),
            Err(BuildError::UpstreamWithoutHost(_))
        ));
    }

    #[test]
    fn test_only_plain_http_upstreams_build() {
        for raw in ["https://a.example/", "ws://a.example/", "ftp://a.example/"] {
            let err = build_upstream(&spec(raw, 1), &ctx()).unwrap_err();
            assert!(
                matches!(err, BuildError::UnsupportedScheme { ref url, .. } if url == raw),
                "{raw}: {err}"
            );
        }
        let mut s = spec("https://a.example/", 1);
        s.enable_passive = true;
        assert!(matches!(
            build_upstream(&s, &ctx()),
            Err(BuildError::UnsupportedScheme { .. })
        ));
        let up = NoopUpstream::new("HTTP://A.example/", 1).unwrap();
        assert_eq!(up.url().scheme(), "http");
    }

    #[test]
    fn test_weights() {
        let ctx = ctx();
        assert!(build_upstream(&spec("http://a/", -1), &ctx).unwrap().is_none());
        let zero = build_upstream(&spec("http://a/", 0), &ctx).unwrap().unwrap();
        assert_eq!(zero.weight(), 1);
        let three = build_upstream(&spec("http://a/", 3), &ctx).unwrap().unwrap();
        assert_eq!(three.weight(), 3);
        let max = build_upstream(&spec("http://a/", MAX_WEIGHT), &ctx).unwrap().unwrap();
        assert_eq!(max.weight(), MAX_WEIGHT as u32);
    }

    #[test]
    fn test_oversized_weight_fails_build() {
        let err = build_upstream(&spec("http://a/", i32::MAX), &ctx()).unwrap_err();
        assert!(matches!(
            err,
            BuildError::WeightTooLarge { weight: i32::MAX, max: MAX_WEIGHT, .. }
        ));
        assert!(matches!(
            build_upstream(&spec("http://a/", MAX_WEIGHT + 1), &ctx()),
            Err(BuildError::WeightTooLarge { .. })
        ));
    }

    #[test]
    fn test_noop_is_always_active() {
        let up = build_upstream(&spec("http://a/", 1), &ctx()).unwrap().unwrap();
        up.notify(500, None);
        up.notify(503, None);
        assert!(up.active());
    }

    #[tokio::test]
    async fn test_passive_upstream_trips_breaker() {
        let mut s = spec("http://a/", 1);
        s.enable_passive = true;
        s.circuit_breaker = Some(CircuitBreakerSpec {
            failure_threshold: 2,
            counter: CounterSpec::Consecutive,
            ..Default::default()
        });
        let up = build_upstream(&s, &ctx()).unwrap().unwrap();

        up.notify(200, None);
        up.notify(502, None);
        assert!(up.active());
        let err = std::io::Error::other("reset");
        up.notify(200, Some(&err));
        assert!(!up.active());
    }

    #[tokio::test]
    async fn test_active_without_passive_ignores_notify() {
        let mut s = spec("http://a/", 1);
        s.enable_active = true;
        s.initial_delay = 3600;
        s.circuit_breaker = Some(CircuitBreakerSpec {
            failure_threshold: 1,
            ..Default::default()
        });
        let up = build_upstream(&s, &ctx()).unwrap().unwrap();
        up.notify(500, None);
        assert!(up.active());
    }

    #[test]
    fn test_active_check_requires_runtime() {
        let mut s = spec("http://a/", 1);
        s.enable_active = true;
        assert!(matches!(
            build_upstream(&s, &ctx()),
            Err(BuildError::NoRuntime)
        ));
    }
}
