//! Per-item station analysis pipeline.
//!
//! Every item moves through Observed → Priced → EnrichedWithHistory →
//! FilteredByRisk → Ranked; an item can drop out at any stage with a
//! recorded reason, and ranking only ever sees fully enriched rows.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::analyzer::fees::FeeInputs;
use crate::analyzer::metrics::{self, ScamFlag};
use crate::analyzer::scoring::{self, CtsProfile, ScoreComponents};
use crate::esi::dto::EsiOrder;
use crate::esi::{EsiClient, HistoryCache};
use crate::models::{sanitize, HistoryDay, LocationId, MarketOrder, RegionId, TypeId};
use crate::progress::{ProgressSink, ScanCancelled};
use crate::universe::UniverseCatalog;

#[derive(Debug, Clone, Deserialize)]
pub struct StationScanParams {
    pub region_id: RegionId,
    pub station_id: LocationId,
    #[serde(default)]
    pub fees: FeeInputs,
    #[serde(default)]
    pub profile: CtsProfile,
    /// Capital a position would tie up; the denominator of the depth score.
    #[serde(default = "default_capital")]
    pub capital_isk: f64,
    #[serde(default)]
    pub min_margin_pct: f64,
    #[serde(default = "default_max_sds")]
    pub max_sds: f64,
    #[serde(default)]
    pub min_daily_volume: f64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Restrict the scan to these types (e.g. a watchlist).
    #[serde(default)]
    pub type_ids: Option<Vec<TypeId>>,
}

fn default_capital() -> f64 {
    50_000_000.0
}

fn default_max_sds() -> f64 {
    60.0
}

fn default_max_results() -> usize {
    200
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Observed,
    Priced,
    EnrichedWithHistory,
    FilteredByRisk,
    Ranked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    NoBids,
    NoAsks,
    NoHistory,
    ScamRisk,
    ThinMargin,
    LowVolume,
}

#[derive(Debug, Clone, Serialize)]
pub struct DroppedItem {
    pub type_id: TypeId,
    pub stage: PipelineStage,
    pub reason: DropReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct StationOpportunity {
    pub type_id: TypeId,
    pub type_name: String,
    pub best_bid: f64,
    pub best_ask: f64,
    pub spread: f64,
    pub now_roi_pct: f64,
    pub real_margin_pct: f64,
    pub spread_roi_pct: f64,
    pub vwap: f64,
    pub drvi_pct: f64,
    pub obds: f64,
    pub competition_index: f64,
    pub sds: f64,
    pub scam_flags: Vec<ScamFlag>,
    pub confidence: f64,
    pub cts: f64,
    pub daily_volume: f64,
    pub bid_orders: usize,
    pub ask_orders: usize,
}

impl StationOpportunity {
    fn sanitized(mut self) -> Self {
        self.best_bid = sanitize(self.best_bid);
        self.best_ask = sanitize(self.best_ask);
        self.spread = sanitize(self.spread);
        self.now_roi_pct = sanitize(self.now_roi_pct);
        self.real_margin_pct = sanitize(self.real_margin_pct);
        self.spread_roi_pct = sanitize(self.spread_roi_pct);
        self.vwap = sanitize(self.vwap);
        self.drvi_pct = sanitize(self.drvi_pct);
        self.obds = sanitize(self.obds);
        self.competition_index = sanitize(self.competition_index);
        self.sds = sanitize(self.sds);
        self.confidence = sanitize(self.confidence);
        self.cts = sanitize(self.cts);
        self.daily_volume = sanitize(self.daily_volume);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StationScanReport {
    pub opportunities: Vec<StationOpportunity>,
    pub dropped: Vec<DroppedItem>,
}

/// One item's order book at the station.
struct ItemBook {
    type_id: TypeId,
    bids: Vec<MarketOrder>,
    asks: Vec<MarketOrder>,
}

pub struct StationAnalyzer {
    esi: Arc<EsiClient>,
    history: Arc<HistoryCache>,
    catalog: Arc<UniverseCatalog>,
}

impl StationAnalyzer {
    pub fn new(
        esi: Arc<EsiClient>,
        history: Arc<HistoryCache>,
        catalog: Arc<UniverseCatalog>,
    ) -> Self {
        Self {
            esi,
            history,
            catalog,
        }
    }

    pub async fn analyze(
        &self,
        params: &StationScanParams,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<StationScanReport> {
        progress
            .send(format!(
                "Fetching order book for region {}",
                self.catalog.region_name(params.region_id)
            ))
            .await;

        let url = self.esi.url(&format!(
            "markets/{}/orders/?order_type=all",
            params.region_id
        ));
        let raw: Vec<EsiOrder> = self.esi.get_paginated_json(&url).await?;
        if cancel.is_cancelled() {
            return Err(anyhow!(ScanCancelled));
        }

        let books = Self::station_books(raw, params);
        progress
            .send(format!("Observed {} items at the station", books.len()))
            .await;

        let mut dropped = Vec::new();
        let priced: Vec<ItemBook> = books
            .into_iter()
            .filter_map(|book| {
                if book.bids.is_empty() {
                    dropped.push(DroppedItem {
                        type_id: book.type_id,
                        stage: PipelineStage::Priced,
                        reason: DropReason::NoBids,
                    });
                    return None;
                }
                if book.asks.is_empty() {
                    dropped.push(DroppedItem {
                        type_id: book.type_id,
                        stage: PipelineStage::Priced,
                        reason: DropReason::NoAsks,
                    });
                    return None;
                }
                Some(book)
            })
            .collect();

        progress
            .send(format!("Enriching {} priced items with history", priced.len()))
            .await;

        let histories = self.fetch_histories(&priced, params.region_id).await;
        if cancel.is_cancelled() {
            return Err(anyhow!(ScanCancelled));
        }

        // CPU pass: metrics, scoring, and the risk gate, one item per task.
        let today = Utc::now().date_naive();
        let results: Vec<std::result::Result<StationOpportunity, DroppedItem>> = priced
            .par_iter()
            .map(|book| self.evaluate(book, &histories, params, today))
            .collect();

        let mut opportunities = Vec::new();
        for result in results {
            match result {
                Ok(row) => opportunities.push(row),
                Err(drop) => dropped.push(drop),
            }
        }

        // Ranking operates only on rows that survived every gate.
        opportunities.sort_by(|a, b| {
            b.cts
                .partial_cmp(&a.cts)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        opportunities.truncate(params.max_results);

        info!(
            station = params.station_id,
            ranked = opportunities.len(),
            dropped = dropped.len(),
            "station analysis complete"
        );

        Ok(StationScanReport {
            opportunities,
            dropped,
        })
    }

    /// Group the region book down to the station, split by side, and apply
    /// the optional type restriction.
    fn station_books(raw: Vec<EsiOrder>, params: &StationScanParams) -> Vec<ItemBook> {
        let allowed = params
            .type_ids
            .as_ref()
            .map(|ids| ids.iter().copied().collect::<std::collections::HashSet<_>>());

        let mut by_type: HashMap<TypeId, ItemBook> = HashMap::new();
        for order in raw {
            if order.location_id != params.station_id || order.price <= 0.0 {
                continue;
            }
            if let Some(allowed) = &allowed {
                if !allowed.contains(&order.type_id) {
                    continue;
                }
            }
            let order = order.into_order(params.region_id);
            let book = by_type.entry(order.type_id).or_insert_with(|| ItemBook {
                type_id: order.type_id,
                bids: Vec::new(),
                asks: Vec::new(),
            });
            if order.is_buy_order {
                book.bids.push(order);
            } else {
                book.asks.push(order);
            }
        }
        by_type.into_values().collect()
    }

    async fn fetch_histories(
        &self,
        priced: &[ItemBook],
        region_id: RegionId,
    ) -> HashMap<TypeId, Vec<HistoryDay>> {
        let fetches = priced.iter().map(|book| {
            let type_id = book.type_id;
            async move {
                let days = self.history.get(region_id, type_id).await.unwrap_or_default();
                (type_id, days)
            }
        });
        futures_util::future::join_all(fetches).await.into_iter().collect()
    }

    fn evaluate(
        &self,
        book: &ItemBook,
        histories: &HashMap<TypeId, Vec<HistoryDay>>,
        params: &StationScanParams,
        today: chrono::NaiveDate,
    ) -> std::result::Result<StationOpportunity, DroppedItem> {
        let days = histories.get(&book.type_id).map(Vec::as_slice).unwrap_or(&[]);
        if days.is_empty() {
            return Err(DroppedItem {
                type_id: book.type_id,
                stage: PipelineStage::EnrichedWithHistory,
                reason: DropReason::NoHistory,
            });
        }

        let bids: Vec<&MarketOrder> = book.bids.iter().collect();
        let asks: Vec<&MarketOrder> = book.asks.iter().collect();
        let best_bid = bids.iter().map(|o| o.price).fold(f64::MIN, f64::max);
        let best_ask = asks.iter().map(|o| o.price).fold(f64::MAX, f64::min);

        let daily_volume = metrics::mean_daily_volume(days, 7);
        let scam = metrics::scam_score(&bids, &asks, days, today);
        let components = ScoreComponents {
            spread_roi_pct: metrics::spread_roi(days),
            obds: metrics::obds(&bids, &asks, params.capital_isk),
            drvi_pct: metrics::drvi(days),
            competition: metrics::competition_index(&bids, &asks),
            sds: scam.score,
            daily_volume,
        };
        let confidence = scoring::confidence(&components, days.len());
        let now_roi = params.fees.now_roi_pct(best_bid, best_ask);
        // With history in hand the nominal margin is superseded by what a
        // maker can realistically capture.
        let realization = scoring::maker_realization_factor(confidence, components.competition);
        let real_margin = now_roi * realization;

        let risk_drop = |reason: DropReason| DroppedItem {
            type_id: book.type_id,
            stage: PipelineStage::FilteredByRisk,
            reason,
        };
        if scam.score > params.max_sds {
            return Err(risk_drop(DropReason::ScamRisk));
        }
        if real_margin < params.min_margin_pct {
            return Err(risk_drop(DropReason::ThinMargin));
        }
        if daily_volume < params.min_daily_volume {
            return Err(risk_drop(DropReason::LowVolume));
        }

        let type_name = self
            .catalog
            .item_type(book.type_id)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| format!("Type #{}", book.type_id));

        Ok(StationOpportunity {
            type_id: book.type_id,
            type_name,
            best_bid,
            best_ask,
            spread: best_ask - best_bid,
            now_roi_pct: now_roi,
            real_margin_pct: real_margin,
            spread_roi_pct: components.spread_roi_pct,
            vwap: metrics::vwap(days),
            drvi_pct: components.drvi_pct,
            obds: components.obds,
            competition_index: components.competition,
            sds: scam.score,
            scam_flags: scam.flags,
            confidence,
            cts: scoring::composite_score(&components, params.profile),
            daily_volume,
            bid_orders: bids.len(),
            ask_orders: asks.len(),
        }
        .sanitized())
    }
}
