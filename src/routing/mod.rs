//! Request matching subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request (method, host, path, headers, query, path params)
//!     → params.rs (every parameter matcher must pass)
//!     → matcher.rs (path matchers in declaration order)
//!     → First match: rewritten proxy path
//!
//! Matcher compilation (at build):
//!     PathMatcherSpec[] / ParamMatcherSpec[]
//!     → Compile globs and regexes
//!     → Freeze inside the owning load balancer
//! ```
//!
//! # Design Decisions
//! - Patterns compiled once; a bad pattern fails the build
//! - Deterministic: same input always matches the same way
//! - First path match wins

pub mod matcher;
pub mod params;
