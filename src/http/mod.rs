//! HTTP relay subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, path params, accepted methods)
//!     → handler.rs (hooks, load balancer selection)
//!     → request.rs (outbound URL, header hygiene, X-Forwarded-*)
//!     → transport.rs (round trip, wrappers)
//!     → upgrade.rs (101: tunnel both directions)
//!       response.rs (otherwise: hop-by-hop strip, trailers, flush policy)
//!     → error.rs (render failures)
//! ```

pub mod context;
pub mod error;
pub mod handler;
pub mod request;
pub mod response;
pub mod server;
pub mod transport;
pub mod upgrade;

pub use context::{PathParams, PreProxyHooks, ProxyHeaders, RequestDeadline, TlsConnection};
pub use error::{DefaultErrorHandler, ErrorHandler, JsonErrorHandler};
pub use handler::{Components, ReverseProxyHandler};
pub use server::HttpServer;
pub use transport::{HyperTransport, RoundTripper, RoundTripperLayer, TransportError};
