//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Initial delay, then periodic timer
//!     → Probe the upstream (HTTP / TCP / UDP)
//!     → Feed the upstream's circuit breaker
//!
//! Passive health checks (passive.rs):
//!     Request outcome reported via Upstream::notify
//!     → Classify (error or 5xx = failure)
//!     → Feed the upstream's circuit breaker
//! ```
//!
//! # Design Decisions
//! - Active and passive checks are complementary and share one breaker
//! - The breaker owns the state machine; this module only reports outcomes
//! - Health state is per-upstream, not per-pool

pub mod active;
pub mod passive;
