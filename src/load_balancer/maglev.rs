//! Maglev consistent-hash load balancing strategy.

use std::sync::Arc;

use axum::http::request::Parts;
use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::load_balancer::hasher::Hasher;
use crate::load_balancer::upstream::Upstream;
use crate::load_balancer::Selector;

const OFFSET_SEED: u64 = 0x5bd1_e995;
const SKIP_SEED: u64 = 0x1b87_3593;

/// Maglev lookup table of prime size.
///
/// Each upstream walks its own permutation of the slots, taking as many
/// turns per round as its weight, until the table is full.
#[derive(Debug)]
pub struct Maglev {
    upstreams: Vec<Arc<dyn Upstream>>,
    table: Vec<usize>,
    hashers: Vec<Hasher>,
}

impl Maglev {
    /// `size` is rounded up to a prime larger than the upstream count.
    pub fn new(upstreams: Vec<Arc<dyn Upstream>>, hashers: Vec<Hasher>, size: usize) -> Self {
        let table = if upstreams.is_empty() {
            Vec::new()
        } else {
            populate(&upstreams, next_prime(size.max(upstreams.len() + 1)))
        };
        Self {
            upstreams,
            table,
            hashers,
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

fn populate(upstreams: &[Arc<dyn Upstream>], size: usize) -> Vec<usize> {
    let m = size as u64;
    let perms: Vec<(u64, u64)> = upstreams
        .iter()
        .map(|u| {
            let offset = xxh3_64_with_seed(u.id().as_bytes(), OFFSET_SEED) % m;
            let skip = xxh3_64_with_seed(u.id().as_bytes(), SKIP_SEED) % (m - 1) + 1;
            (offset, skip)
        })
        .collect();

    let mut next = vec![0u64; upstreams.len()];
    let mut table = vec![usize::MAX; size];
    let mut filled = 0;

    'fill: loop {
        for (idx, upstream) in upstreams.iter().enumerate() {
            let (offset, skip) = perms[idx];
            for _ in 0..upstream.weight().max(1) {
                let mut slot = ((offset + next[idx] * skip) % m) as usize;
                while table[slot] != usize::MAX {
                    next[idx] += 1;
                    slot = ((offset + next[idx] * skip) % m) as usize;
                }
                table[slot] = idx;
                next[idx] += 1;
                filled += 1;
                if filled == size {
                    break 'fill;
                }
            }
        }
    }

    table
}

/// Smallest prime `>= n`.
pub fn next_prime(n: usize) -> usize {
    let is_prime = |c: usize| c >= 2 && (2..).take_while(|d| d * d <= c).all(|d| c % d != 0);
    (n.max(2)..).find(|c| is_prime(*c)).unwrap_or(2)
}

impl Selector for Maglev {
    fn select(&self, parts: &Parts) -> Option<Arc<dyn Upstream>> {
        if self.table.is_empty() {
            return None;
        }

        let key = self.hashers.iter().find_map(|h| h.hash(parts))?;
        let upstream = &self.upstreams[self.table[(key % self.table.len() as u64) as usize]];
        upstream.active().then(|| upstream.clone())
    }
}
