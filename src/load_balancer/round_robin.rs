//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::http::request::Parts;

use crate::load_balancer::upstream::Upstream;
use crate::load_balancer::{weighted_expansion, Selector};

/// Round-robin selector.
/// Rotates a shared counter through the weighted expansion of upstreams.
#[derive(Debug)]
pub struct RoundRobin {
    upstreams: Vec<Arc<dyn Upstream>>,
    expansion: Vec<usize>,
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new(upstreams: Vec<Arc<dyn Upstream>>) -> Self {
        let expansion = weighted_expansion(&upstreams);
        Self {
            upstreams,
            expansion,
            counter: AtomicUsize::new(0),
        }
    }
}

impl Selector for RoundRobin {
    fn select(&self, _parts: &Parts) -> Option<Arc<dyn Upstream>> {
        let len = self.expansion.len();
        if len == 0 {
            return None;
        }

        let start = self.counter.fetch_add(1, Ordering::Relaxed);
        (0..len)
            .map(|i| &self.upstreams[self.expansion[(start + i) % len]])
            .find(|u| u.active())
            .cloned()
    }
}
