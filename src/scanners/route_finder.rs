//! Multi-hop trade route search.
//!
//! Nodes are (system, type) pairs; an edge is one buy-here, haul, sell-
//! there leg priced exactly like a flip. Routes are acyclic: a system is
//! never revisited, so the search walks a DAG of profitable legs.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::AppContext;
use crate::esi::dto::EsiOrder;
use crate::models::{sanitize, MarketOrder, SystemId, TypeId};
use crate::progress::{ProgressSink, ScanCancelled};

const MAX_HOPS_CEILING: usize = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct RouteScanParams {
    pub origin_system: SystemId,
    #[serde(default = "default_radius")]
    pub radius: u32,
    pub cargo_m3: f64,
    #[serde(default = "default_sales_tax")]
    pub sales_tax_pct: f64,
    #[serde(default = "default_min_hops")]
    pub min_hops: usize,
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    #[serde(default)]
    pub min_leg_profit: f64,
    #[serde(default)]
    pub min_security: Option<f64>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_radius() -> u32 {
    5
}

fn default_sales_tax() -> f64 {
    8.0
}

fn default_min_hops() -> usize {
    1
}

fn default_max_hops() -> usize {
    3
}

fn default_max_results() -> usize {
    20
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteLeg {
    pub from_system: SystemId,
    pub from_system_name: String,
    pub to_system: SystemId,
    pub to_system_name: String,
    pub type_id: TypeId,
    pub type_name: String,
    pub units: i64,
    pub buy_price: f64,
    pub sell_price: f64,
    pub profit: f64,
    pub jumps: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeRoute {
    pub legs: Vec<RouteLeg>,
    pub total_profit: f64,
    pub total_jumps: i32,
}

impl TradeRoute {
    fn sanitized(mut self) -> Self {
        self.total_profit = sanitize(self.total_profit);
        for leg in &mut self.legs {
            leg.buy_price = sanitize(leg.buy_price);
            leg.sell_price = sanitize(leg.sell_price);
            leg.profit = sanitize(leg.profit);
        }
        self
    }
}

pub struct RouteFinder {
    ctx: Arc<AppContext>,
}

impl RouteFinder {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub async fn scan(
        &self,
        params: &RouteScanParams,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<TradeRoute>> {
        let params = Self::clamped(params.clone());
        let graph = &self.ctx.graph;
        let systems =
            graph.systems_within_radius(params.origin_system, params.radius, params.min_security);
        let regions = graph.regions_in_set(systems.keys());

        progress
            .send(format!(
                "Fetching books for {} systems across {} regions",
                systems.len(),
                regions.len()
            ))
            .await;

        // Both sides of every candidate region, filtered to the bubble.
        let mut orders = Vec::new();
        let fetches = regions.iter().map(|&region_id| {
            let url = self
                .ctx
                .esi
                .url(&format!("markets/{}/orders/?order_type=all", region_id));
            async move {
                (
                    region_id,
                    self.ctx.esi.get_paginated_json::<EsiOrder>(&url).await,
                )
            }
        });
        for (region_id, result) in futures_util::future::join_all(fetches).await {
            match result {
                Ok(raw) => orders.extend(
                    raw.into_iter()
                        .map(|o| o.into_order(region_id))
                        .filter(|o| {
                            systems.contains_key(&o.system_id)
                                && o.price > 0.0
                                && o.volume_remain > 0
                        }),
                ),
                Err(e) => warn!(region_id, error = %e, "region fetch failed, omitting"),
            }
        }
        if cancel.is_cancelled() {
            return Err(anyhow!(ScanCancelled));
        }

        let edges = self.build_edges(orders, &params);
        progress
            .send(format!(
                "Searching routes over {} profitable legs",
                edges.values().map(Vec::len).sum::<usize>()
            ))
            .await;

        let routes = Self::enumerate(&edges, &params);
        info!(routes = routes.len(), "route scan complete");
        Ok(routes.into_iter().map(|r| r.sanitized()).collect())
    }

    fn clamped(mut params: RouteScanParams) -> RouteScanParams {
        params.max_hops = params.max_hops.clamp(1, MAX_HOPS_CEILING);
        params.min_hops = params.min_hops.clamp(1, params.max_hops);
        params
    }

    /// Best ask and bid per (system, type), crossed into every profitable
    /// single-hop leg.
    fn build_edges(
        &self,
        orders: Vec<MarketOrder>,
        params: &RouteScanParams,
    ) -> HashMap<SystemId, Vec<RouteLeg>> {
        let mut best_asks: HashMap<(SystemId, TypeId), (f64, i64)> = HashMap::new();
        let mut best_bids: HashMap<(SystemId, TypeId), (f64, i64)> = HashMap::new();
        for order in orders {
            let key = (order.system_id, order.type_id);
            if order.is_buy_order {
                let entry = best_bids.entry(key).or_insert((order.price, order.volume_remain));
                if order.price > entry.0 {
                    *entry = (order.price, order.volume_remain);
                }
            } else {
                let entry = best_asks.entry(key).or_insert((order.price, order.volume_remain));
                if order.price < entry.0 {
                    *entry = (order.price, order.volume_remain);
                }
            }
        }

        let tax = params.sales_tax_pct.clamp(0.0, 100.0) / 100.0;
        let mut edges: HashMap<SystemId, Vec<RouteLeg>> = HashMap::new();
        for (&(from, type_id), &(ask_price, ask_remain)) in &best_asks {
            let Some(item) = self.ctx.catalog.item_type(type_id) else {
                continue;
            };
            if item.volume <= 0.0 {
                continue;
            }
            let cargo_units = (params.cargo_m3 / item.volume).floor() as i64;
            if cargo_units <= 0 {
                continue;
            }

            for (&(to, bid_type), &(bid_price, bid_remain)) in &best_bids {
                if bid_type != type_id || to == from {
                    continue;
                }
                let effective_sell = bid_price * (1.0 - tax);
                let profit_per_unit = effective_sell - ask_price;
                if profit_per_unit <= 0.0 {
                    continue;
                }
                let units = cargo_units.min(ask_remain).min(bid_remain);
                if units <= 0 {
                    continue;
                }
                let profit = profit_per_unit * units as f64;
                if profit < params.min_leg_profit {
                    continue;
                }
                let jumps = self
                    .ctx
                    .graph
                    .shortest_path(from, to, params.min_security);
                if jumps < 0 {
                    continue;
                }

                edges.entry(from).or_default().push(RouteLeg {
                    from_system: from,
                    from_system_name: self.ctx.catalog.system_name(from),
                    to_system: to,
                    to_system_name: self.ctx.catalog.system_name(to),
                    type_id,
                    type_name: item.name.clone(),
                    units,
                    buy_price: ask_price,
                    sell_price: bid_price,
                    profit,
                    jumps,
                });
            }
        }

        // Most profitable legs first so the search fills its candidate
        // list with good routes early and the bound starts cutting.
        for legs in edges.values_mut() {
            legs.sort_by(|a, b| {
                b.profit
                    .partial_cmp(&a.profit)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        edges
    }

    /// Depth-first enumeration of acyclic leg chains from the origin,
    /// keeping the top `max_results` routes whose length lands in
    /// [min_hops, max_hops]. Partial routes are pruned by accumulated
    /// profit: once the candidate list is full, a branch is abandoned
    /// when even `remaining hops x best single leg` cannot lift its
    /// running total past the worst kept route.
    fn enumerate(
        edges: &HashMap<SystemId, Vec<RouteLeg>>,
        params: &RouteScanParams,
    ) -> Vec<TradeRoute> {
        let max_leg_profit = edges
            .values()
            .flatten()
            .map(|l| l.profit)
            .fold(0.0, f64::max);

        let mut best = Vec::new();
        let mut stack = Vec::new();
        let mut visited = vec![params.origin_system];
        Self::dfs(
            edges,
            params,
            params.origin_system,
            0.0,
            max_leg_profit,
            &mut stack,
            &mut visited,
            &mut best,
        );
        best
    }

    #[allow(clippy::too_many_arguments)]
    fn dfs(
        edges: &HashMap<SystemId, Vec<RouteLeg>>,
        params: &RouteScanParams,
        at: SystemId,
        total: f64,
        max_leg_profit: f64,
        stack: &mut Vec<RouteLeg>,
        visited: &mut Vec<SystemId>,
        best: &mut Vec<TradeRoute>,
    ) {
        if stack.len() >= params.min_hops {
            Self::keep(
                best,
                TradeRoute {
                    legs: stack.clone(),
                    total_profit: total,
                    total_jumps: stack.iter().map(|l| l.jumps).sum(),
                },
                params.max_results,
            );
        }
        if stack.len() >= params.max_hops {
            return;
        }
        // Optimistic bound on any extension of this partial route. Only
        // legal once the list is full; until then every route competes.
        // Strict comparison keeps equal-profit routes alive for the
        // fewer-jumps tiebreak.
        if best.len() >= params.max_results {
            let remaining = (params.max_hops - stack.len()) as f64;
            let worst_kept = best.last().map(|r| r.total_profit).unwrap_or(0.0);
            if total + remaining * max_leg_profit < worst_kept {
                return;
            }
        }
        let Some(outgoing) = edges.get(&at) else {
            return;
        };
        for leg in outgoing {
            if visited.contains(&leg.to_system) {
                continue;
            }
            visited.push(leg.to_system);
            stack.push(leg.clone());
            Self::dfs(
                edges,
                params,
                leg.to_system,
                total + leg.profit,
                max_leg_profit,
                stack,
                visited,
                best,
            );
            stack.pop();
            visited.pop();
        }
    }

    /// Insert a candidate into the bounded list, kept sorted by total
    /// profit descending with fewer jumps breaking ties.
    fn keep(best: &mut Vec<TradeRoute>, route: TradeRoute, max_results: usize) {
        let position = best
            .iter()
            .position(|kept| {
                route
                    .total_profit
                    .partial_cmp(&kept.total_profit)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(kept.total_jumps.cmp(&route.total_jumps))
                    .is_gt()
            })
            .unwrap_or(best.len());
        best.insert(position, route);
        best.truncate(max_results.max(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leg(from: SystemId, to: SystemId, profit: f64, jumps: i32) -> RouteLeg {
        RouteLeg {
            from_system: from,
            from_system_name: format!("S{}", from),
            to_system: to,
            to_system_name: format!("S{}", to),
            type_id: 34,
            type_name: "Tritanium".to_string(),
            units: 100,
            buy_price: 10.0,
            sell_price: 12.0,
            profit,
            jumps,
        }
    }

    fn params(min_hops: usize, max_hops: usize) -> RouteScanParams {
        RouteScanParams {
            origin_system: 1,
            radius: 5,
            cargo_m3: 1000.0,
            sales_tax_pct: 8.0,
            min_hops,
            max_hops,
            min_leg_profit: 0.0,
            min_security: None,
            max_results: 10,
        }
    }

    #[test]
    fn test_enumeration_respects_hop_bounds() {
        let mut edges = HashMap::new();
        edges.insert(1, vec![leg(1, 2, 100.0, 2)]);
        edges.insert(2, vec![leg(2, 3, 50.0, 1)]);
        edges.insert(3, vec![leg(3, 4, 25.0, 3)]);

        let routes = RouteFinder::enumerate(&edges, &params(2, 3));
        // Chains of length 2 and 3 only.
        assert_eq!(routes.len(), 2);
        assert!(routes.iter().all(|r| r.legs.len() >= 2 && r.legs.len() <= 3));
        // Longest chain carries the most profit and ranks first.
        assert_eq!(routes[0].legs.len(), 3);
        assert!((routes[0].total_profit - 175.0).abs() < 1e-9);
        assert_eq!(routes[0].total_jumps, 6);
    }

    #[test]
    fn test_routes_never_revisit_a_system() {
        let mut edges = HashMap::new();
        edges.insert(1, vec![leg(1, 2, 100.0, 1)]);
        // A cycle back to the origin must be ignored.
        edges.insert(2, vec![leg(2, 1, 500.0, 1), leg(2, 3, 10.0, 1)]);
        edges.insert(3, vec![]);

        let routes = RouteFinder::enumerate(&edges, &params(1, 4));
        for route in &routes {
            let mut seen = vec![route.legs[0].from_system];
            for leg in &route.legs {
                assert!(!seen.contains(&leg.to_system), "route revisits a system");
                seen.push(leg.to_system);
            }
        }
        // Best route is 1 -> 2 -> 3, not the cycle.
        assert!((routes[0].total_profit - 110.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_hop_routes_allowed() {
        let mut edges = HashMap::new();
        edges.insert(1, vec![leg(1, 2, 100.0, 1), leg(1, 3, 40.0, 2)]);

        let routes = RouteFinder::enumerate(&edges, &params(1, 1));
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].legs.len(), 1);
        assert!((routes[0].total_profit - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_weak_first_leg_with_strong_continuation_wins() {
        // Many outgoing legs from the origin; the weakest of them leads
        // into the single most profitable continuation. Pruning partial
        // routes by accumulated profit must still surface it as the top
        // route.
        let fan: Vec<RouteLeg> = (2..=9)
            .map(|to| leg(1, to, (10 - to) as f64 * 10.0, 1))
            .collect();
        let mut edges = HashMap::new();
        edges.insert(1, fan); // profits 80, 70, ... 10 down to system 9
        edges.insert(9, vec![leg(9, 20, 1000.0, 1)]);

        let routes = RouteFinder::enumerate(&edges, &params(1, 2));
        assert!((routes[0].total_profit - 1010.0).abs() < 1e-9);
        assert_eq!(routes[0].legs[0].to_system, 9);
        assert_eq!(routes[0].legs[1].to_system, 20);
    }

    #[test]
    fn test_candidate_list_is_bounded_and_sorted() {
        // A wide fan produces more routes than max_results; the kept
        // list must hold exactly the best ones in descending order.
        let fan: Vec<RouteLeg> = (2..=30)
            .map(|to| leg(1, to, to as f64, 1))
            .collect();
        let mut edges = HashMap::new();
        edges.insert(1, fan);

        let routes = RouteFinder::enumerate(&edges, &params(1, 1));
        assert_eq!(routes.len(), 10);
        assert!((routes[0].total_profit - 30.0).abs() < 1e-9);
        assert!((routes[9].total_profit - 21.0).abs() < 1e-9);
        assert!(routes
            .windows(2)
            .all(|w| w[0].total_profit >= w[1].total_profit));
    }
}
