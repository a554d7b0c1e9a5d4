//! Radius flip scanner: buy low inside one BFS bubble, haul, sell high
//! inside another.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::analyzer::metrics::mean_daily_volume;
use crate::context::AppContext;
use crate::esi::dto::EsiOrder;
use crate::models::{sanitize, LocationId, MarketOrder, RegionId, SystemId, TypeId};
use crate::progress::{ProgressSink, ScanCancelled};
use crate::universe::graph::UNREACHABLE_JUMPS;

#[derive(Debug, Clone, Deserialize)]
pub struct FlipScanParams {
    pub origin_system: SystemId,
    pub cargo_m3: f64,
    pub buy_radius: u32,
    pub sell_radius: u32,
    #[serde(default)]
    pub min_margin_pct: f64,
    #[serde(default = "default_sales_tax")]
    pub sales_tax_pct: f64,
    #[serde(default)]
    pub min_daily_volume: Option<f64>,
    #[serde(default)]
    pub max_investment: Option<f64>,
    #[serde(default)]
    pub min_security: Option<f64>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_sales_tax() -> f64 {
    8.0
}

fn default_max_results() -> usize {
    100
}

#[derive(Debug, Clone, Serialize)]
pub struct FlipOpportunity {
    pub type_id: TypeId,
    pub type_name: String,
    pub buy_price: f64,
    pub sell_price: f64,
    pub effective_sell_price: f64,
    pub units: i64,
    pub profit_per_unit: f64,
    pub total_profit: f64,
    pub margin_pct: f64,
    pub investment: f64,
    pub buy_station_id: LocationId,
    pub buy_station_name: String,
    pub buy_system_id: SystemId,
    pub sell_station_id: LocationId,
    pub sell_station_name: String,
    pub sell_system_id: SystemId,
    pub jumps_to_buy: i32,
    pub jumps_buy_to_sell: i32,
    /// Mean units traded per day in the sell region over the trailing week.
    pub velocity: f64,
}

impl FlipOpportunity {
    fn sanitized(mut self) -> Self {
        self.buy_price = sanitize(self.buy_price);
        self.sell_price = sanitize(self.sell_price);
        self.effective_sell_price = sanitize(self.effective_sell_price);
        self.profit_per_unit = sanitize(self.profit_per_unit);
        self.total_profit = sanitize(self.total_profit);
        self.margin_pct = sanitize(self.margin_pct);
        self.investment = sanitize(self.investment);
        self.velocity = sanitize(self.velocity);
        self
    }
}

/// Sized economics of one buy-here-sell-there leg.
#[derive(Debug, Clone, Copy)]
struct LegEconomics {
    units: i64,
    effective_sell: f64,
    profit_per_unit: f64,
    margin_pct: f64,
}

/// Steps 5 and 6 of the scan for one type: tax-adjusted profit, margin
/// floor, and unit sizing against cargo, both books, and the optional
/// investment ceiling. Items with a non-positive volume are skipped, not
/// errors.
fn evaluate_leg(
    item_volume: f64,
    ask: &MarketOrder,
    bid: &MarketOrder,
    params: &FlipScanParams,
) -> Option<LegEconomics> {
    if item_volume <= 0.0 || ask.price <= 0.0 {
        return None;
    }

    let tax = params.sales_tax_pct.clamp(0.0, 100.0) / 100.0;
    let effective_sell = bid.price * (1.0 - tax);
    let profit_per_unit = effective_sell - ask.price;
    if profit_per_unit <= 0.0 {
        return None;
    }
    let margin_pct = profit_per_unit / ask.price * 100.0;
    if margin_pct < params.min_margin_pct {
        return None;
    }

    let mut units = (params.cargo_m3 / item_volume).floor() as i64;
    units = units.min(ask.volume_remain).min(bid.volume_remain);
    if let Some(max_investment) = params.max_investment {
        if max_investment > 0.0 {
            units = units.min((max_investment / ask.price).floor() as i64);
        }
    }
    if units <= 0 {
        return None;
    }

    Some(LegEconomics {
        units,
        effective_sell,
        profit_per_unit,
        margin_pct,
    })
}

pub struct FlipScanner {
    ctx: Arc<AppContext>,
}

impl FlipScanner {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub async fn scan(
        &self,
        params: &FlipScanParams,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<FlipOpportunity>> {
        let graph = &self.ctx.graph;

        // Step 1: both BFS bubbles, side by side.
        progress.send("Mapping buy and sell systems").await;
        let (buy_systems, sell_systems) = rayon::join(
            || {
                graph.systems_within_radius(
                    params.origin_system,
                    params.buy_radius,
                    params.min_security,
                )
            },
            || {
                graph.systems_within_radius(
                    params.origin_system,
                    params.sell_radius,
                    params.min_security,
                )
            },
        );

        // Step 2: region unions.
        let buy_regions = graph.regions_in_set(buy_systems.keys());
        let sell_regions = graph.regions_in_set(sell_systems.keys());
        progress
            .send(format!(
                "Scanning {} buy regions and {} sell regions",
                buy_regions.len(),
                sell_regions.len()
            ))
            .await;

        // Step 3: all asks in buy regions and all bids in sell regions,
        // fetched in parallel. A failed region is logged and skipped.
        let (asks, bids) = tokio::join!(
            self.fetch_side(&buy_regions, "sell", &buy_systems),
            self.fetch_side(&sell_regions, "buy", &sell_systems),
        );
        if cancel.is_cancelled() {
            return Err(anyhow!(ScanCancelled));
        }

        // Step 4: one pass per side, keeping the extreme per type.
        let best_asks = Self::best_per_type(asks, false);
        let best_bids = Self::best_per_type(bids, true);
        progress
            .send(format!(
                "Matching {} ask types against {} bid types",
                best_asks.len(),
                best_bids.len()
            ))
            .await;

        // Steps 5-7: economics and routing per matched type.
        let mut rows = Vec::new();
        for (type_id, ask) in &best_asks {
            let Some(bid) = best_bids.get(type_id) else {
                continue;
            };
            let Some(item) = self.ctx.catalog.item_type(*type_id) else {
                continue;
            };
            let Some(econ) = evaluate_leg(item.volume, ask, bid, params) else {
                continue;
            };

            // Step 7: buy leg from the prebuilt map, sell leg via BFS.
            let jumps_to_buy = buy_systems
                .get(&ask.system_id)
                .map(|&d| d as i32)
                .unwrap_or(UNREACHABLE_JUMPS);
            let jumps_buy_to_sell = match self.ctx.graph.shortest_path(
                ask.system_id,
                bid.system_id,
                params.min_security,
            ) {
                -1 => UNREACHABLE_JUMPS,
                jumps => jumps,
            };

            rows.push(FlipOpportunity {
                type_id: *type_id,
                type_name: item.name.clone(),
                buy_price: ask.price,
                sell_price: bid.price,
                effective_sell_price: econ.effective_sell,
                units: econ.units,
                profit_per_unit: econ.profit_per_unit,
                total_profit: econ.profit_per_unit * econ.units as f64,
                margin_pct: econ.margin_pct,
                investment: ask.price * econ.units as f64,
                buy_station_id: ask.location_id,
                buy_station_name: String::new(),
                buy_system_id: ask.system_id,
                sell_station_id: bid.location_id,
                sell_station_name: String::new(),
                sell_system_id: bid.system_id,
                jumps_to_buy,
                jumps_buy_to_sell,
                velocity: 0.0,
            });
        }
        if cancel.is_cancelled() {
            return Err(anyhow!(ScanCancelled));
        }

        // Step 8: rank, truncate, then resolve names for survivors only.
        rows.sort_by(|a, b| {
            b.total_profit
                .partial_cmp(&a.total_profit)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.type_id.cmp(&b.type_id))
        });
        rows.truncate(params.max_results);

        progress
            .send(format!("Resolving names for {} opportunities", rows.len()))
            .await;
        let station_ids: HashSet<LocationId> = rows
            .iter()
            .flat_map(|r| [r.buy_station_id, r.sell_station_id])
            .collect();
        self.ctx.names.prefetch_station_names(&station_ids).await;
        for row in &mut rows {
            row.buy_station_name = self.ctx.names.station_name(row.buy_station_id).await;
            row.sell_station_name = self.ctx.names.station_name(row.sell_station_id).await;
        }

        self.enrich_velocity(&mut rows).await;
        if let Some(min_velocity) = params.min_daily_volume {
            rows.retain(|r| r.velocity >= min_velocity);
        }

        let rows: Vec<FlipOpportunity> = rows.into_iter().map(|r| r.sanitized()).collect();
        info!(
            origin = params.origin_system,
            results = rows.len(),
            "flip scan complete"
        );
        Ok(rows)
    }

    /// Fetch one side of the book across regions, keeping only orders
    /// whose system lies in the matching BFS set. Partial failures must
    /// not abort the scan.
    async fn fetch_side(
        &self,
        regions: &HashSet<RegionId>,
        order_type: &str,
        systems: &HashMap<SystemId, u32>,
    ) -> Vec<MarketOrder> {
        let fetches = regions.iter().map(|&region_id| {
            let url = self.ctx.esi.url(&format!(
                "markets/{}/orders/?order_type={}",
                region_id, order_type
            ));
            async move {
                (
                    region_id,
                    self.ctx.esi.get_paginated_json::<EsiOrder>(&url).await,
                )
            }
        });

        let mut orders = Vec::new();
        for (region_id, result) in futures_util::future::join_all(fetches).await {
            match result {
                Ok(raw) => {
                    orders.extend(
                        raw.into_iter()
                            .map(|o| o.into_order(region_id))
                            .filter(|o| {
                                systems.contains_key(&o.system_id)
                                    && o.price > 0.0
                                    && o.volume_remain > 0
                            }),
                    );
                }
                Err(e) => warn!(region_id, order_type, error = %e, "region fetch failed, omitting"),
            }
        }
        orders
    }

    /// Reduce a pile of orders to the best order per type: highest price
    /// for bids, lowest for asks.
    fn best_per_type(orders: Vec<MarketOrder>, bids: bool) -> HashMap<TypeId, MarketOrder> {
        let mut best: HashMap<TypeId, MarketOrder> = HashMap::new();
        for order in orders {
            match best.get(&order.type_id) {
                Some(current) => {
                    let better = if bids {
                        order.price > current.price
                    } else {
                        order.price < current.price
                    };
                    if better {
                        best.insert(order.type_id, order);
                    }
                }
                None => {
                    best.insert(order.type_id, order);
                }
            }
        }
        best
    }

    /// Velocity enrichment for ranked rows: trailing 7-day mean volume in
    /// the sell region.
    async fn enrich_velocity(&self, rows: &mut [FlipOpportunity]) {
        let lookups: Vec<(usize, RegionId, TypeId)> = rows
            .iter()
            .enumerate()
            .filter_map(|(i, r)| {
                self.ctx
                    .graph
                    .region_of(r.sell_system_id)
                    .map(|region| (i, region, r.type_id))
            })
            .collect();

        let fetches = lookups.into_iter().map(|(i, region, type_id)| {
            let history = self.ctx.history.clone();
            async move {
                let days = history.get(region, type_id).await.unwrap_or_default();
                (i, mean_daily_volume(&days, 7))
            }
        });
        for (i, velocity) in futures_util::future::join_all(fetches).await {
            rows[i].velocity = velocity;
        }
    }
}
