//! Bounded cache for computed jump distances.
//!
//! Keys carry a discretized security tier so filtered and unfiltered paths
//! never collide. The graph is undirected, so a lookup also probes the
//! reversed key before reporting a miss.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::models::SystemId;

/// Discretize a security threshold into 20 buckets of 0.05.
/// Tier 0 means "no filter"; thresholds at or below zero filter nothing
/// reachable and collapse into it.
pub fn security_tier(min_security: Option<f64>) -> u8 {
    match min_security {
        None => 0,
        Some(s) if s <= 0.0 => 0,
        Some(s) => ((s / 0.05).ceil() as i64).clamp(1, 20) as u8,
    }
}

type Key = (SystemId, SystemId, u8);

struct Inner {
    map: HashMap<Key, i32>,
    // Insertion order; eviction pops the oldest entry regardless of reads.
    order: VecDeque<Key>,
    capacity: usize,
}

pub struct PathCache {
    inner: RwLock<Inner>,
}

impl PathCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                map: HashMap::with_capacity(capacity.min(4096)),
                order: VecDeque::with_capacity(capacity.min(4096)),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Look up a cached distance, probing both key directions.
    pub fn get(&self, from: SystemId, to: SystemId, tier: u8) -> Option<i32> {
        let inner = self.inner.read();
        inner
            .map
            .get(&(from, to, tier))
            .or_else(|| inner.map.get(&(to, from, tier)))
            .copied()
    }

    /// Insert a distance, evicting the oldest entry at capacity.
    /// Re-inserting an existing key updates the value in place.
    pub fn insert(&self, from: SystemId, to: SystemId, tier: u8, jumps: i32) {
        let key = (from, to, tier);
        let mut inner = self.inner.write();
        if inner.map.insert(key, jumps).is_some() {
            return;
        }
        inner.order.push_back(key);
        while inner.order.len() > inner.capacity {
            if let Some(old) = inner.order.pop_front() {
                inner.map.remove(&old);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_tiers() {
        assert_eq!(security_tier(None), 0);
        assert_eq!(security_tier(Some(0.0)), 0);
        assert_eq!(security_tier(Some(-0.5)), 0);
        assert_eq!(security_tier(Some(0.05)), 1);
        assert_eq!(security_tier(Some(0.45)), 9);
        assert_eq!(security_tier(Some(0.5)), 10);
        assert_eq!(security_tier(Some(1.0)), 20);
        // Anything past 1.0 clamps into the top bucket.
        assert_eq!(security_tier(Some(5.0)), 20);
    }

    #[test]
    fn test_reverse_probe() {
        let cache = PathCache::new(16);
        cache.insert(1, 2, 0, 4);
        assert_eq!(cache.get(1, 2, 0), Some(4));
        assert_eq!(cache.get(2, 1, 0), Some(4));
        // Different tier is a different key.
        assert_eq!(cache.get(1, 2, 10), None);
    }

    #[test]
    fn test_fifo_eviction() {
        let cache = PathCache::new(2);
        cache.insert(1, 2, 0, 1);
        cache.insert(3, 4, 0, 2);
        // Reading the oldest entry does not protect it from eviction.
        assert_eq!(cache.get(1, 2, 0), Some(1));
        cache.insert(5, 6, 0, 3);
        assert_eq!(cache.get(1, 2, 0), None);
        assert_eq!(cache.get(3, 4, 0), Some(2));
        assert_eq!(cache.get(5, 6, 0), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_reinsert_updates_in_place() {
        let cache = PathCache::new(2);
        cache.insert(1, 2, 0, 1);
        cache.insert(1, 2, 0, 7);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(1, 2, 0), Some(7));
    }
}
