//! Configuration schema definitions.
//!
//! This module defines the declarative shape of the proxy handler.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the proxy binary.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// The reverse proxy handler served by the listener.
    pub handler: ReverseProxyHandlerSpec,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Whole-request timeout in seconds. Zero disables it.
    pub request_secs: u64,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human readable format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Reverse proxy handler definition.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ReverseProxyHandlerSpec {
    /// Handler name used in logs.
    pub name: String,

    /// Error handler reference ("default" or "json").
    pub error_handler: Option<String>,

    /// Transport reference. Only the built-in hyper transport is known to
    /// the binary; library users inject their own.
    pub transport: Option<String>,

    /// Names of transport wrappers, outermost first.
    pub transport_wrappers: Vec<String>,

    /// Load balancers, evaluated in order.
    pub load_balancers: Vec<LoadBalancerSpec>,

    /// Route patterns the server mounts the handler on (axum syntax).
    pub patterns: Vec<String>,

    /// HTTP methods the server accepts. Empty accepts all.
    pub methods: Vec<String>,
}

/// Upstream selection algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum LbAlgorithm {
    #[default]
    RoundRobin,
    Random,
    DirectHash,
    RingHash,
    Maglev,
}

/// Load balancer definition.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadBalancerSpec {
    pub algorithm: LbAlgorithm,

    /// Size of the ring or Maglev table. Non-positive selects the default.
    pub hash_table_size: i32,

    /// Legacy single matcher, evaluated before `path_matchers`.
    pub path_matcher: Option<PathMatcherSpec>,

    pub path_matchers: Vec<PathMatcherSpec>,

    pub param_matchers: Vec<ParamMatcherSpec>,

    /// Allowed Host values. Empty allows any host.
    pub hosts: Vec<String>,

    /// Allowed methods. Empty allows any method.
    pub methods: Vec<String>,

    pub upstreams: Vec<UpstreamSpec>,

    /// Hashers consulted in order by the hash based algorithms.
    pub hashers: Vec<HasherSpec>,
}

/// String match strategy shared by path and parameter matchers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum MatchType {
    Exact,
    #[default]
    Prefix,
    Suffix,
    Contains,
    /// Shell glob where `*` never crosses `/`.
    Path,
    /// Glob using the platform's path separator.
    FilePath,
    Regex,
    #[serde(rename = "RegexPOSIX")]
    RegexPosix,
    /// Anything unrecognised; treated as `Prefix`.
    #[serde(other)]
    Unknown,
}

/// Path matcher definition.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PathMatcherSpec {
    #[serde(rename = "match")]
    pub pattern: String,
    pub match_type: MatchType,
    /// Expansion template for regex matchers (`$1`, `${name}`).
    pub rewrite: String,
    pub trim_prefix: String,
    pub append_prefix: String,
}

/// Where a parameter matcher reads its value from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum ParamKind {
    #[default]
    Header,
    Query,
    PathParam,
}

/// Parameter matcher definition.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ParamMatcherSpec {
    pub kind: ParamKind,
    pub key: String,
    #[serde(rename = "match")]
    pub pattern: String,
    pub match_type: MatchType,
}

/// Request attribute a hasher reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum HasherKind {
    #[default]
    ClientAddr,
    Header,
    Cookie,
    Query,
    PathParam,
}

/// Hasher definition.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HasherSpec {
    pub kind: HasherKind,
    /// Header, cookie, query or path parameter name. Unused for `ClientAddr`.
    pub key: String,
}

/// Upstream server definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamSpec {
    pub url: String,

    /// Weight for weighted selection. Zero is treated as one, negative
    /// weights remove the upstream.
    pub weight: i32,

    /// Feed request outcomes into the circuit breaker.
    pub enable_passive: bool,

    /// Probe the upstream periodically.
    pub enable_active: bool,

    /// Delay before the first active probe, in seconds.
    pub initial_delay: u64,

    /// Active probe interval in seconds. Non-positive means one second.
    pub interval: i64,

    pub circuit_breaker: Option<CircuitBreakerSpec>,

    pub health_check: HealthCheckSpec,
}

impl Default for UpstreamSpec {
    fn default() -> Self {
        Self {
            url: String::new(),
            weight: 1,
            enable_passive: false,
            enable_active: false,
            initial_delay: 0,
            interval: 1,
            circuit_breaker: None,
            health_check: HealthCheckSpec::default(),
        }
    }
}

/// Circuit breaker definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSpec {
    /// Failure rate (percent) or consecutive count that opens the breaker.
    pub failure_threshold: u32,

    /// Success rate (percent) or consecutive count that closes it again.
    pub success_threshold: u32,

    pub effective_failure_samples: u32,

    pub effective_success_samples: u32,

    /// Time spent open before probing, in seconds.
    pub wait_duration: u64,

    pub counter: CounterSpec,
}

impl Default for CircuitBreakerSpec {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            effective_failure_samples: 0,
            effective_success_samples: 0,
            wait_duration: 10,
            counter: CounterSpec::default(),
        }
    }
}

/// Counter algorithm backing a circuit breaker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum CounterSpec {
    #[default]
    Consecutive,
    CountFixedWindow {
        samples: u32,
    },
    TimeFixedWindow {
        /// Window width in seconds.
        window_width: u64,
    },
    CountSlidingWindow {
        samples: u32,
        history_limit: u32,
    },
    TimeSlidingWindow {
        /// Window width in seconds.
        window_width: u64,
        history_limit: u32,
    },
}

/// Probe used by active health checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum HealthCheckKind {
    #[default]
    Http,
    Tcp,
    Udp,
}

/// Active health check definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckSpec {
    pub kind: HealthCheckKind,

    /// HTTP method of the probe request.
    pub method: String,

    /// Path probed on the upstream URL.
    pub path: String,

    /// Dial address for TCP/UDP probes. Defaults to the upstream host:port.
    pub address: Option<String>,

    /// Probe timeout in seconds.
    pub timeout: u64,
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            kind: HealthCheckKind::Http,
            method: "GET".to_string(),
            path: "/".to_string(),
            address: None,
            timeout: 5,
        }
    }
}
