//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request outcome (status, error):
//!     → upstream notify (passive) or active probe result
//!     → circuit_breaker.rs (count_success / count_failure by state)
//!     → counter.rs (rate over the configured window)
//!     → breaker transition when the rate crosses a threshold
//! ```
//!
//! # Design Decisions
//! - One breaker per upstream, owned by that upstream
//! - Counters are single-threaded; the breaker's mutex serializes them
//! - The open state ends on a deferred timer, never on a request

pub mod circuit_breaker;
pub mod counter;
