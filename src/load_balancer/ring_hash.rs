//! Consistent-hash ring load balancing strategy.

use std::sync::Arc;

use axum::http::request::Parts;
use xxhash_rust::xxh3::xxh3_64;

use crate::load_balancer::hasher::Hasher;
use crate::load_balancer::upstream::Upstream;
use crate::load_balancer::Selector;

/// Ring of virtual nodes, proportional to weight, sorted by hash.
///
/// The first hasher producing a key picks the node at or after it. An
/// inactive upstream there yields no selection; the ring is not probed.
#[derive(Debug)]
pub struct RingHash {
    upstreams: Vec<Arc<dyn Upstream>>,
    ring: Vec<(u64, usize)>,
    hashers: Vec<Hasher>,
}

impl RingHash {
    pub fn new(upstreams: Vec<Arc<dyn Upstream>>, hashers: Vec<Hasher>, size: usize) -> Self {
        let total: u64 = upstreams.iter().map(|u| u64::from(u.weight())).sum();
        let mut ring = Vec::with_capacity(size.max(upstreams.len()));

        for (idx, upstream) in upstreams.iter().enumerate() {
            let share = (size as u64 * u64::from(upstream.weight()) / total.max(1)).max(1);
            for n in 0..share {
                let key = format!("{}-{}", upstream.id(), n);
                ring.push((xxh3_64(key.as_bytes()), idx));
            }
        }
        ring.sort_unstable();

        Self {
            upstreams,
            ring,
            hashers,
        }
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl Selector for RingHash {
    fn select(&self, parts: &Parts) -> Option<Arc<dyn Upstream>> {
        if self.ring.is_empty() {
            return None;
        }

        let key = self.hashers.iter().find_map(|h| h.hash(parts))?;
        let mut pos = self.ring.partition_point(|(hash, _)| *hash < key);
        if pos == self.ring.len() {
            pos = 0;
        }

        let upstream = &self.upstreams[self.ring[pos].1];
        upstream.active().then(|| upstream.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{HasherKind, HasherSpec};
    use crate::load_balancer::tests::{pool, request_with_header, FakeUpstream};

    fn hashers() -> Vec<Hasher> {
        vec![Hasher::new(&HasherSpec {
            kind: HasherKind::Header,
            key: "x-user".to_string(),
        })
        .unwrap()]
    }

    #[test]
    fn test_ring_size_follows_weights() {
        let a = FakeUpstream::new("http://a", 3);
        let b = FakeUpstream::new("http://b", 1);
        let lb = RingHash::new(pool(&[a, b]), hashers(), 100);
        assert_eq!(lb.len(), 100);

        let on_a = lb.ring.iter().filter(|(_, idx)| *idx == 0).count();
        assert_eq!(on_a, 75);
        assert!(lb.ring.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn test_keys_are_sticky_and_spread() {
        let ups: Vec<_> = (0..4)
            .map(|i| FakeUpstream::new(&format!("http://u{i}"), 1))
            .collect();
        let lb = RingHash::new(pool(&ups), hashers(), 1021);

        let mut seen = std::collections::HashSet::new();
        for user in 0..200 {
            let p = request_with_header("x-user", &format!("user-{user}"));
            let first = lb.select(&p).unwrap().id().to_string();
            assert_eq!(lb.select(&p).unwrap().id(), first);
            seen.insert(first);
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_inactive_pick_is_not_probed() {
        let a = FakeUpstream::new("http://a", 1);
        let b = FakeUpstream::new("http://b", 1);
        let lb = RingHash::new(pool(&[a.clone(), b.clone()]), hashers(), 64);
        let p = request_with_header("x-user", "alice");

        let picked = lb.select(&p).unwrap().id().to_string();
        let target = if picked == "http://a" { &a } else { &b };
        target.set_active(false);
        assert!(lb.select(&p).is_none());
    }
}
