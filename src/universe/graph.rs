//! Stargate connectivity graph.
//!
//! Read-only after construction; every scanner borrows it through the
//! shared context. All gates cost one jump, so plain BFS gives minimum-hop
//! distances and anything weighted would be wasted work.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};

use crate::models::{RegionId, SystemId};
use crate::universe::catalog::UniverseCatalog;
use crate::universe::path_cache::{security_tier, PathCache};

/// Distance used when no path exists between two systems.
pub const UNREACHABLE_JUMPS: i32 = 999;

/// FIFO queue over a growable buffer. Instead of popping from the front,
/// the read head walks forward; once it clears half the occupied length
/// the dead prefix is reclaimed so deep scans don't hold the whole
/// frontier history in memory.
struct BfsQueue {
    buf: Vec<(SystemId, u32)>,
    head: usize,
}

impl BfsQueue {
    fn new() -> Self {
        Self {
            buf: Vec::with_capacity(64),
            head: 0,
        }
    }

    fn push(&mut self, item: (SystemId, u32)) {
        self.buf.push(item);
    }

    fn pop(&mut self) -> Option<(SystemId, u32)> {
        if self.head >= self.buf.len() {
            return None;
        }
        let item = self.buf[self.head];
        self.head += 1;
        if self.head * 2 >= self.buf.len() && self.head >= 32 {
            self.buf.drain(..self.head);
            self.head = 0;
        }
        Some(item)
    }
}

struct SystemAttrs {
    security: f64,
    region_id: RegionId,
}

pub struct UniverseGraph {
    adjacency: HashMap<SystemId, Vec<SystemId>>,
    attrs: HashMap<SystemId, SystemAttrs>,
    region_systems: HashMap<RegionId, Vec<SystemId>>,
    path_cache: PathCache,
}

impl UniverseGraph {
    /// Build the adjacency from the catalog's systems and stargates.
    /// Gates referencing unknown systems are rejected: a half-loaded graph
    /// would silently produce wrong distances everywhere.
    pub fn build(catalog: &UniverseCatalog, path_cache_capacity: usize) -> Result<Self> {
        let mut attrs = HashMap::new();
        let mut region_systems: HashMap<RegionId, Vec<SystemId>> = HashMap::new();
        let mut adjacency: HashMap<SystemId, Vec<SystemId>> = HashMap::new();

        for sys in catalog.systems() {
            attrs.insert(
                sys.system_id,
                SystemAttrs {
                    security: sys.security,
                    region_id: sys.region_id,
                },
            );
            region_systems
                .entry(sys.region_id)
                .or_default()
                .push(sys.system_id);
            adjacency.entry(sys.system_id).or_default();
        }

        for &(a, b) in catalog.stargates() {
            if !attrs.contains_key(&a) || !attrs.contains_key(&b) {
                bail!("stargate {}-{} references an unknown system", a, b);
            }
            let fwd = adjacency.entry(a).or_default();
            if !fwd.contains(&b) {
                fwd.push(b);
            }
            let rev = adjacency.entry(b).or_default();
            if !rev.contains(&a) {
                rev.push(a);
            }
        }

        Ok(Self {
            adjacency,
            attrs,
            region_systems,
            path_cache: PathCache::new(path_cache_capacity),
        })
    }

    fn passes(&self, system_id: SystemId, min_security: Option<f64>) -> bool {
        match min_security {
            None => true,
            Some(threshold) => self
                .attrs
                .get(&system_id)
                .map(|a| a.security >= threshold)
                .unwrap_or(false),
        }
    }

    /// All systems within `max_jumps` of `origin`, mapped to their jump
    /// distance. Neighbors below the security threshold are skipped. The
    /// origin is always present at distance 0, even when it fails the
    /// filter itself; callers that care treat that case at the boundary.
    pub fn systems_within_radius(
        &self,
        origin: SystemId,
        max_jumps: u32,
        min_security: Option<f64>,
    ) -> HashMap<SystemId, u32> {
        let mut dist = HashMap::new();
        dist.insert(origin, 0);
        if max_jumps == 0 || !self.attrs.contains_key(&origin) {
            return dist;
        }

        let mut queue = BfsQueue::new();
        queue.push((origin, 0));
        while let Some((sys, d)) = queue.pop() {
            if d >= max_jumps {
                continue;
            }
            let Some(neighbors) = self.adjacency.get(&sys) else {
                continue;
            };
            for &next in neighbors {
                if dist.contains_key(&next) || !self.passes(next, min_security) {
                    continue;
                }
                dist.insert(next, d + 1);
                queue.push((next, d + 1));
            }
        }
        dist
    }

    /// Minimum jumps between two systems, or -1 when unreachable or when
    /// either endpoint fails the security threshold. Served from the path
    /// cache when possible; the cache probes both directions since the
    /// graph is undirected.
    pub fn shortest_path(
        &self,
        origin: SystemId,
        dest: SystemId,
        min_security: Option<f64>,
    ) -> i32 {
        if origin == dest {
            return 0;
        }
        let tier = security_tier(min_security);
        if let Some(jumps) = self.path_cache.get(origin, dest, tier) {
            return jumps;
        }

        let jumps = self.compute_shortest_path(origin, dest, min_security);
        self.path_cache.insert(origin, dest, tier, jumps);
        jumps
    }

    fn compute_shortest_path(
        &self,
        origin: SystemId,
        dest: SystemId,
        min_security: Option<f64>,
    ) -> i32 {
        if !self.attrs.contains_key(&origin) || !self.attrs.contains_key(&dest) {
            return -1;
        }
        if !self.passes(origin, min_security) || !self.passes(dest, min_security) {
            return -1;
        }

        let mut visited = HashSet::new();
        visited.insert(origin);
        let mut queue = BfsQueue::new();
        queue.push((origin, 0));

        while let Some((sys, d)) = queue.pop() {
            let Some(neighbors) = self.adjacency.get(&sys) else {
                continue;
            };
            for &next in neighbors {
                if next == dest {
                    return d as i32 + 1;
                }
                if visited.contains(&next) || !self.passes(next, min_security) {
                    continue;
                }
                visited.insert(next);
                queue.push((next, d + 1));
            }
        }
        -1
    }

    /// Regions containing any of the given systems.
    pub fn regions_in_set<'a>(
        &self,
        systems: impl IntoIterator<Item = &'a SystemId>,
    ) -> HashSet<RegionId> {
        systems
            .into_iter()
            .filter_map(|sys| self.attrs.get(sys).map(|a| a.region_id))
            .collect()
    }

    /// All member systems of the given regions, mapped to 0. The zero
    /// distance mirrors the radius map shape so whole-region scans reuse
    /// the same downstream filtering.
    pub fn systems_in_regions<'a>(
        &self,
        regions: impl IntoIterator<Item = &'a RegionId>,
    ) -> HashMap<SystemId, u32> {
        let mut out = HashMap::new();
        for region in regions {
            if let Some(members) = self.region_systems.get(region) {
                for &sys in members {
                    out.insert(sys, 0);
                }
            }
        }
        out
    }

    pub fn region_of(&self, system_id: SystemId) -> Option<RegionId> {
        self.attrs.get(&system_id).map(|a| a.region_id)
    }

    pub fn security_of(&self, system_id: SystemId) -> Option<f64> {
        self.attrs.get(&system_id).map(|a| a.security)
    }

    pub fn contains(&self, system_id: SystemId) -> bool {
        self.attrs.contains_key(&system_id)
    }

    pub fn path_cache(&self) -> &PathCache {
        &self.path_cache
    }
}
