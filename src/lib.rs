//! Reverse proxy handler library.
//!
//! Builds an HTTP handler from a declarative spec: load balancers claim
//! requests by path, host, method and parameters, pick an upstream
//! (round robin, random, direct hash, ring hash or Maglev), and the relay
//! forwards the request with header hygiene, protocol upgrades, streaming
//! and trailers. Upstreams may carry a circuit breaker fed passively by
//! relay outcomes and actively by probes.

// Core subsystems
pub mod config;
pub mod http;
pub mod routing;

// Traffic management
pub mod health;
pub mod load_balancer;

// Cross-cutting concerns
pub mod clock;
pub mod error;
pub mod observability;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use error::{BuildError, ErrorKind, ProxyError};
pub use http::{Components, HttpServer, ReverseProxyHandler};
