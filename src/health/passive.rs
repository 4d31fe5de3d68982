//! Passive health checking (failure detection).
//!
//! # Responsibilities
//! - Observe request outcomes reported through `Upstream::notify`
//! - Classify each outcome as success or failure
//! - Feed the upstream's circuit breaker
//!
//! # Design Decisions
//! - Transport errors and 5xx count as failures
//! - 4xx are NOT failures (client error, not upstream)
//! - The breaker decides whether the outcome is counted in its state

use std::error::Error as StdError;
use std::sync::Arc;

use crate::resilience::circuit_breaker::CircuitBreaker;

/// Whether an outcome counts against the upstream.
pub fn is_failure(status: u16, err: Option<&(dyn StdError + 'static)>) -> bool {
    err.is_some() || status >= 500
}

/// Feed one outcome into `breaker`.
pub fn record_outcome(
    upstream: &str,
    breaker: &Arc<CircuitBreaker>,
    status: u16,
    err: Option<&(dyn StdError + 'static)>,
) {
    if is_failure(status, err) {
        tracing::debug!(
            upstream,
            status,
            error = err.map(tracing::field::display),
            "Upstream failure observed"
        );
        breaker.count_failure();
    } else {
        breaker.count_success();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(!is_failure(200, None));
        assert!(!is_failure(404, None));
        assert!(!is_failure(499, None));
        assert!(is_failure(500, None));
        assert!(is_failure(504, None));

        let err = std::io::Error::other("reset");
        assert!(is_failure(200, Some(&err)));
    }
}
