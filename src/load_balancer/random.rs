//! Weighted random load balancing strategy.

use std::sync::Arc;

use axum::http::request::Parts;
use rand::Rng;

use crate::load_balancer::upstream::Upstream;
use crate::load_balancer::{weighted_expansion, Selector};

/// Picks a random slot of the weighted expansion, probing forward past
/// inactive upstreams.
#[derive(Debug)]
pub struct Random {
    upstreams: Vec<Arc<dyn Upstream>>,
    expansion: Vec<usize>,
}

impl Random {
    pub fn new(upstreams: Vec<Arc<dyn Upstream>>) -> Self {
        let expansion = weighted_expansion(&upstreams);
        Self {
            upstreams,
            expansion,
        }
    }
}

impl Selector for Random {
    fn select(&self, _parts: &Parts) -> Option<Arc<dyn Upstream>> {
        let len = self.expansion.len();
        if len == 0 {
            return None;
        }

        let start = rand::thread_rng().gen_range(0..len);
        (0..len)
            .map(|i| &self.upstreams[self.expansion[(start + i) % len]])
            .find(|u| u.active())
            .cloned()
    }
}
