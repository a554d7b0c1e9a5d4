//! Public contract scanner: prices item-exchange contracts against the
//! cheapest regional asks and keeps the ones someone forgot to value.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::AppContext;
use crate::esi::dto::{EsiContract, EsiContractItem, EsiOrder};
use crate::models::{sanitize, LocationId, RegionId, SystemId, TypeId};
use crate::progress::{ProgressSink, ScanCancelled};
use crate::universe::graph::UNREACHABLE_JUMPS;

/// Contracts below this price are noise: fee dodges, 1-ISK junk, courier
/// bait.
const MIN_CONTRACT_PRICE: f64 = 1_000_000.0;
/// At least this share of included non-blueprint types must have a market
/// price or the valuation is guesswork.
const MIN_PRICED_COVERAGE: f64 = 0.7;
/// Margins above this are assumed to be scams (mislabeled blueprint
/// copies, lookalike items).
const MAX_SANE_MARGIN_PCT: f64 = 200.0;

#[derive(Debug, Clone, Deserialize)]
pub struct ContractScanParams {
    pub origin_system: SystemId,
    #[serde(default = "default_radius")]
    pub radius: u32,
    #[serde(default)]
    pub min_margin_pct: f64,
    #[serde(default)]
    pub min_security: Option<f64>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_radius() -> u32 {
    10
}

fn default_max_results() -> usize {
    100
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractOpportunity {
    pub contract_id: i64,
    pub title: String,
    pub price: f64,
    pub market_value: f64,
    pub profit: f64,
    pub margin_pct: f64,
    pub jumps: i32,
    pub region_id: RegionId,
    pub start_location_id: Option<LocationId>,
    pub items_total: usize,
    pub items_priced: usize,
}

impl ContractOpportunity {
    fn sanitized(mut self) -> Self {
        self.price = sanitize(self.price);
        self.market_value = sanitize(self.market_value);
        self.profit = sanitize(self.profit);
        self.margin_pct = sanitize(self.margin_pct);
        self
    }
}

/// Valuation of one contract's item list against the ask map.
struct Valuation {
    market_value: f64,
    items_total: usize,
    items_priced: usize,
    /// (value, type_id, quantity) of priced stacks, for title synthesis.
    top_items: Vec<(f64, TypeId, i64)>,
}

pub struct ContractScanner {
    ctx: Arc<AppContext>,
}

impl ContractScanner {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub async fn scan(
        &self,
        params: &ContractScanParams,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<ContractOpportunity>> {
        let graph = &self.ctx.graph;
        let systems =
            graph.systems_within_radius(params.origin_system, params.radius, params.min_security);
        let regions = graph.regions_in_set(systems.keys());

        progress
            .send(format!("Pricing items across {} regions", regions.len()))
            .await;
        let cheapest_asks = self.cheapest_asks(&regions).await;
        if cancel.is_cancelled() {
            return Err(anyhow!(ScanCancelled));
        }

        progress
            .send(format!("Fetching contracts in {} regions", regions.len()))
            .await;
        let contracts = self.fetch_contracts(&regions).await;
        let now = Utc::now();
        let candidates: Vec<(RegionId, EsiContract)> = contracts
            .into_iter()
            .filter(|(_, c)| {
                c.contract_type == "item_exchange"
                    && c.date_expired > now
                    && c.price >= MIN_CONTRACT_PRICE
            })
            .collect();
        progress
            .send(format!("Evaluating {} candidate contracts", candidates.len()))
            .await;

        let mut rows = Vec::new();
        for (region_id, contract) in candidates {
            if cancel.is_cancelled() {
                return Err(anyhow!(ScanCancelled));
            }
            match self.evaluate(region_id, &contract, &cheapest_asks, params).await {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => {}
                Err(e) => warn!(
                    contract_id = contract.contract_id,
                    error = %e,
                    "contract evaluation failed, omitting"
                ),
            }
        }

        rows.sort_by(|a, b| {
            b.profit
                .partial_cmp(&a.profit)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.contract_id.cmp(&b.contract_id))
        });
        rows.truncate(params.max_results);

        info!(results = rows.len(), "contract scan complete");
        Ok(rows.into_iter().map(|r| r.sanitized()).collect())
    }

    async fn evaluate(
        &self,
        region_id: RegionId,
        contract: &EsiContract,
        cheapest_asks: &HashMap<TypeId, f64>,
        params: &ContractScanParams,
    ) -> Result<Option<ContractOpportunity>> {
        let url = self.ctx.esi.url(&format!(
            "contracts/public/items/{}/",
            contract.contract_id
        ));
        let items: Vec<EsiContractItem> = self.ctx.esi.get_paginated_json(&url).await?;

        let Some(valuation) = self.value_items(&items, cheapest_asks) else {
            return Ok(None);
        };

        let profit = valuation.market_value - contract.price;
        let margin_pct = profit / contract.price * 100.0;
        if margin_pct < params.min_margin_pct || margin_pct > MAX_SANE_MARGIN_PCT {
            return Ok(None);
        }

        let jumps = contract
            .start_location_id
            .and_then(|loc| self.ctx.catalog.system_of_location(loc))
            .map(|sys| {
                match self
                    .ctx
                    .graph
                    .shortest_path(params.origin_system, sys, params.min_security)
                {
                    -1 => UNREACHABLE_JUMPS,
                    jumps => jumps,
                }
            })
            .unwrap_or(UNREACHABLE_JUMPS);

        let title = match contract.title.as_deref() {
            Some(t) if !t.trim().is_empty() => t.to_string(),
            _ => self.synthesize_title(&valuation),
        };

        Ok(Some(ContractOpportunity {
            contract_id: contract.contract_id,
            title,
            price: contract.price,
            market_value: valuation.market_value,
            profit,
            margin_pct,
            jumps,
            region_id,
            start_location_id: contract.start_location_id,
            items_total: valuation.items_total,
            items_priced: valuation.items_priced,
        }))
    }

    /// Value the included items. Returns None when the contract fails a
    /// structural gate: all blueprint originals, or too few priced
    /// non-blueprint types to trust the number.
    fn value_items(
        &self,
        items: &[EsiContractItem],
        cheapest_asks: &HashMap<TypeId, f64>,
    ) -> Option<Valuation> {
        let included: Vec<&EsiContractItem> = items.iter().filter(|i| i.is_included).collect();
        if included.is_empty() {
            return None;
        }

        let is_blueprint_original = |item: &EsiContractItem| {
            !item.is_blueprint_copy.unwrap_or(false)
                && self
                    .ctx
                    .catalog
                    .item_type(item.type_id)
                    .map(|t| t.name.contains("Blueprint"))
                    .unwrap_or(false)
        };
        if included.iter().all(|i| is_blueprint_original(i)) {
            return None;
        }

        let mut market_value = 0.0;
        let mut top_items = Vec::new();
        let mut non_blueprint_types: HashMap<TypeId, bool> = HashMap::new();
        for item in &included {
            let blueprint = self
                .ctx
                .catalog
                .item_type(item.type_id)
                .map(|t| t.name.contains("Blueprint"))
                .unwrap_or(false);
            let priced = cheapest_asks.contains_key(&item.type_id);
            if !blueprint {
                let entry = non_blueprint_types.entry(item.type_id).or_insert(false);
                *entry |= priced;
            }
            if let Some(&ask) = cheapest_asks.get(&item.type_id) {
                let value = ask * item.quantity as f64;
                market_value += value;
                top_items.push((value, item.type_id, item.quantity));
            }
        }

        let total = non_blueprint_types.len();
        let priced = non_blueprint_types.values().filter(|&&p| p).count();
        if total == 0 || (priced as f64 / total as f64) < MIN_PRICED_COVERAGE {
            return None;
        }

        top_items.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Some(Valuation {
            market_value,
            items_total: included.len(),
            items_priced: top_items.len(),
            top_items,
        })
    }

    /// Display title from the most valuable stacks when the issuer left
    /// the title blank.
    fn synthesize_title(&self, valuation: &Valuation) -> String {
        let mut parts = Vec::new();
        for (_, type_id, quantity) in valuation.top_items.iter().take(2) {
            let name = self
                .ctx
                .catalog
                .item_type(*type_id)
                .map(|t| t.name.clone())
                .unwrap_or_else(|| format!("Type #{}", type_id));
            if *quantity > 1 {
                parts.push(format!("{} x{}", name, quantity));
            } else {
                parts.push(name);
            }
        }
        let rest = valuation.top_items.len().saturating_sub(2);
        if rest > 0 {
            parts.push(format!("+{} more", rest));
        }
        if parts.is_empty() {
            "[Multiple Items]".to_string()
        } else {
            parts.join(", ")
        }
    }

    /// Cheapest ask per type across the candidate regions.
    async fn cheapest_asks(&self, regions: &std::collections::HashSet<RegionId>) -> HashMap<TypeId, f64> {
        let fetches = regions.iter().map(|&region_id| {
            let url = self
                .ctx
                .esi
                .url(&format!("markets/{}/orders/?order_type=sell", region_id));
            async move {
                (
                    region_id,
                    self.ctx.esi.get_paginated_json::<EsiOrder>(&url).await,
                )
            }
        });

        let mut cheapest: HashMap<TypeId, f64> = HashMap::new();
        for (region_id, result) in futures_util::future::join_all(fetches).await {
            match result {
                Ok(orders) => {
                    for order in orders {
                        if order.price <= 0.0 || order.volume_remain <= 0 {
                            continue;
                        }
                        cheapest
                            .entry(order.type_id)
                            .and_modify(|p| *p = p.min(order.price))
                            .or_insert(order.price);
                    }
                }
                Err(e) => warn!(region_id, error = %e, "ask fetch failed, omitting region"),
            }
        }
        cheapest
    }

    async fn fetch_contracts(
        &self,
        regions: &std::collections::HashSet<RegionId>,
    ) -> Vec<(RegionId, EsiContract)> {
        let fetches = regions.iter().map(|&region_id| {
            let url = self.ctx.esi.url(&format!("contracts/public/{}/", region_id));
            async move {
                (
                    region_id,
                    self.ctx.esi.get_paginated_json::<EsiContract>(&url).await,
                )
            }
        });

        let mut out = Vec::new();
        for (region_id, result) in futures_util::future::join_all(fetches).await {
            match result {
                Ok(contracts) => out.extend(contracts.into_iter().map(|c| (region_id, c))),
                Err(e) => warn!(region_id, error = %e, "contract fetch failed, omitting region"),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(type_id: TypeId, quantity: i64, bpc: Option<bool>) -> EsiContractItem {
        EsiContractItem {
            type_id,
            quantity,
            is_blueprint_copy: bpc,
            is_included: true,
        }
    }

    fn scanner() -> ContractScanner {
        // Catalog-only context pieces are enough for the pure gates.
        let catalog = Arc::new(crate::universe::catalog::testutil::small_catalog());
        let graph = Arc::new(crate::universe::UniverseGraph::build(&catalog, 16).unwrap());
        let storage = Arc::new(crate::storage::Storage::open_in_memory().unwrap());
        let esi = Arc::new(
            crate::esi::EsiClient::new("https://esi.invalid/latest", "test", 1).unwrap(),
        );
        let names = Arc::new(crate::esi::NameService::new(esi.clone(), storage.clone()));
        let history = Arc::new(crate::esi::HistoryCache::new(esi.clone(), storage.clone()));
        let config = crate::models::Config {
            database_path: ":memory:".into(),
            static_data_path: String::new(),
            port: 0,
            esi_base_url: "https://esi.invalid/latest".into(),
            esi_user_agent: "test".into(),
            max_concurrent_requests: 1,
            path_cache_capacity: 16,
        };
        ContractScanner::new(Arc::new(crate::context::AppContext {
            config,
            catalog,
            graph,
            esi,
            names,
            history,
            storage,
        }))
    }

    #[test]
    fn test_valuation_sums_cheapest_asks() {
        let scanner = scanner();
        let mut asks = HashMap::new();
        asks.insert(34, 5.0);
        asks.insert(603, 1_000_000.0);

        let items = vec![item(34, 1000, None), item(603, 1, None)];
        let v = scanner.value_items(&items, &asks).unwrap();
        assert!((v.market_value - 1_005_000.0).abs() < 1e-9);
        assert_eq!(v.items_total, 2);
        assert_eq!(v.items_priced, 2);
        // Most valuable stack first.
        assert_eq!(v.top_items[0].1, 603);
    }

    #[test]
    fn test_low_priced_coverage_rejected() {
        let scanner = scanner();
        let mut asks = HashMap::new();
        asks.insert(34, 5.0);
        // Only 1 of 3 non-blueprint types priced: 33% < 70%.
        let items = vec![item(34, 10, None), item(9999, 1, None), item(8888, 1, None)];
        assert!(scanner.value_items(&items, &asks).is_none());
    }

    #[test]
    fn test_excluded_items_ignored() {
        let scanner = scanner();
        let mut asks = HashMap::new();
        asks.insert(34, 5.0);
        let mut wanted = item(9999, 1, None);
        wanted.is_included = false; // the issuer is asking for this one
        let items = vec![item(34, 10, None), wanted];
        let v = scanner.value_items(&items, &asks).unwrap();
        assert_eq!(v.items_total, 1);
    }

    #[test]
    fn test_title_synthesis() {
        let scanner = scanner();
        let mut asks = HashMap::new();
        asks.insert(34, 5.0);
        asks.insert(603, 1_000_000.0);
        let items = vec![item(34, 1000, None), item(603, 1, None)];
        let v = scanner.value_items(&items, &asks).unwrap();
        let title = scanner.synthesize_title(&v);
        assert!(title.starts_with("Merlin"));
        assert!(title.contains("Tritanium x1000"));
    }
}
