//! Direct-hash load balancing strategy.

use std::sync::Arc;

use axum::http::request::Parts;

use crate::load_balancer::hasher::Hasher;
use crate::load_balancer::upstream::Upstream;
use crate::load_balancer::{weighted_expansion, Selector};

/// Maps `key mod total_weight` onto the weighted expansion.
///
/// An inactive pick moves on to the next hasher rather than probing.
#[derive(Debug)]
pub struct DirectHash {
    upstreams: Vec<Arc<dyn Upstream>>,
    expansion: Vec<usize>,
    hashers: Vec<Hasher>,
}

impl DirectHash {
    pub fn new(upstreams: Vec<Arc<dyn Upstream>>, hashers: Vec<Hasher>) -> Self {
        let expansion = weighted_expansion(&upstreams);
        Self {
            upstreams,
            expansion,
            hashers,
        }
    }
}

impl Selector for DirectHash {
    fn select(&self, parts: &Parts) -> Option<Arc<dyn Upstream>> {
        let len = self.expansion.len() as u64;
        if len == 0 {
            return None;
        }

        self.hashers
            .iter()
            .filter_map(|h| h.hash(parts))
            .map(|key| &self.upstreams[self.expansion[(key % len) as usize]])
            .find(|u| u.active())
            .cloned()
    }
}
