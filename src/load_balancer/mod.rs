//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request parts
//!     → filter.rs (methods, hosts, params, path matchers)
//!         - no match: Declined, the handler tries the next load balancer
//!     → Apply the selection algorithm:
//!         - round_robin.rs (rotate through the weighted expansion)
//!         - random.rs (random slot of the weighted expansion)
//!         - direct_hash.rs (key mod total weight, per hasher)
//!         - ring_hash.rs (consistent-hash ring)
//!         - maglev.rs (Maglev lookup table)
//!     → upstream.rs (active upstream or Unavailable)
//!     → Rewrite the upstream URL path to the proxy path
//! ```
//!
//! # Design Decisions
//! - Upstream sets and lookup tables are built once and never mutated
//! - Weighted expansions are precomputed so selection does not allocate
//! - Unhealthy upstreams excluded from selection
//! - Algorithm selection per load balancer

pub mod direct_hash;
pub mod filter;
pub mod hasher;
pub mod maglev;
pub mod random;
pub mod ring_hash;
pub mod round_robin;
pub mod upstream;

use std::fmt::Debug;
use std::sync::Arc;

use axum::http::request::Parts;
use url::Url;

use crate::config::schema::{LbAlgorithm, LoadBalancerSpec};
use crate::error::BuildError;

use self::direct_hash::DirectHash;
use self::filter::RequestFilter;
use self::hasher::build_hashers;
use self::maglev::Maglev;
use self::random::Random;
use self::ring_hash::RingHash;
use self::round_robin::RoundRobin;
use self::upstream::{build_upstream, Upstream, UpstreamContext};

/// Table size for ring and Maglev tables when none is configured.
pub const DEFAULT_HASH_TABLE_SIZE: usize = 1021;

/// Selection algorithm over a fixed upstream set.
pub trait Selector: Send + Sync + Debug {
    /// An active upstream for the request, or `None`.
    fn select(&self, parts: &Parts) -> Option<Arc<dyn Upstream>>;
}

/// Upstream indices repeated by weight, interleaved round by round.
///
/// Weights `[2, 1]` expand to `[0, 1, 0]`.
pub fn weighted_expansion(upstreams: &[Arc<dyn Upstream>]) -> Vec<usize> {
    let max = upstreams.iter().map(|u| u.weight().max(1)).max().unwrap_or(0);
    let mut expansion = Vec::new();
    for round in 0..max {
        for (idx, upstream) in upstreams.iter().enumerate() {
            if upstream.weight().max(1) > round {
                expansion.push(idx);
            }
        }
    }
    expansion
}

/// Outcome of asking one load balancer for an upstream.
#[derive(Debug, Clone)]
pub enum Selection {
    /// The request is not for this load balancer.
    Declined,
    /// Claimed, but no upstream is active.
    Unavailable,
    /// Claimed, with the outbound URL (upstream base plus proxy path).
    Selected {
        upstream: Arc<dyn Upstream>,
        url: Url,
    },
}

/// Request filter plus selection policy over an upstream set.
#[derive(Debug)]
pub struct LoadBalancer {
    filter: RequestFilter,
    selector: Box<dyn Selector>,
    upstreams: Vec<Arc<dyn Upstream>>,
}

impl LoadBalancer {
    pub fn new(
        filter: RequestFilter,
        selector: Box<dyn Selector>,
        upstreams: Vec<Arc<dyn Upstream>>,
    ) -> Self {
        Self {
            filter,
            selector,
            upstreams,
        }
    }

    pub fn from_spec(spec: &LoadBalancerSpec, ctx: &UpstreamContext) -> Result<Self, BuildError> {
        let filter = RequestFilter::from_spec(spec)?;

        let mut upstreams = Vec::with_capacity(spec.upstreams.len());
        for upstream_spec in &spec.upstreams {
            if let Some(upstream) = build_upstream(upstream_spec, ctx)? {
                upstreams.push(upstream);
            }
        }

        let table_size = if spec.hash_table_size > 0 {
            spec.hash_table_size as usize
        } else {
            DEFAULT_HASH_TABLE_SIZE
        };

        let selector: Box<dyn Selector> = match spec.algorithm {
            LbAlgorithm::RoundRobin => Box::new(RoundRobin::new(upstreams.clone())),
            LbAlgorithm::Random => Box::new(Random::new(upstreams.clone())),
            LbAlgorithm::DirectHash => Box::new(DirectHash::new(
                upstreams.clone(),
                build_hashers(&spec.hashers)?,
            )),
            LbAlgorithm::RingHash => Box::new(RingHash::new(
                upstreams.clone(),
                build_hashers(&spec.hashers)?,
                table_size,
            )),
            LbAlgorithm::Maglev => Box::new(Maglev::new(
                upstreams.clone(),
                build_hashers(&spec.hashers)?,
                table_size,
            )),
        };

        tracing::debug!(
            algorithm = ?spec.algorithm,
            upstreams = upstreams.len(),
            "Load balancer built"
        );

        Ok(Self::new(filter, selector, upstreams))
    }

    pub fn upstreams(&self) -> &[Arc<dyn Upstream>] {
        &self.upstreams
    }

    /// Claim the request and pick an upstream for it.
    pub fn upstream(&self, parts: &Parts) -> Selection {
        let Some(proxy_path) = self.filter.proxy_path(parts) else {
            return Selection::Declined;
        };

        match self.selector.select(parts) {
            Some(upstream) => {
                let mut url = upstream.url().clone();
                url.set_path(&proxy_path);
                Selection::Selected { upstream, url }
            }
            None => Selection::Unavailable,
        }
    }
}
