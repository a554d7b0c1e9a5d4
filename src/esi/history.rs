//! Per-(region, type) daily history cache with a 24-hour TTL.
//!
//! Reads check the in-memory map, then the SQLite cache, then upstream.
//! Writes are per-key last-writer-wins. A failed refresh falls back to a
//! stale entry when one exists; history is enrichment, not a hard
//! dependency.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::esi::client::EsiClient;
use crate::esi::dto::EsiHistoryDay;
use crate::models::{HistoryDay, RegionId, TypeId};
use crate::storage::Storage;

const TTL_HOURS: i64 = 24;
const WINDOW_DAYS: usize = 90;

pub struct HistoryCache {
    esi: Arc<EsiClient>,
    storage: Arc<Storage>,
    mem: RwLock<HashMap<(RegionId, TypeId), (Vec<HistoryDay>, DateTime<Utc>)>>,
}

impl HistoryCache {
    pub fn new(esi: Arc<EsiClient>, storage: Arc<Storage>) -> Self {
        Self {
            esi,
            storage,
            mem: RwLock::new(HashMap::new()),
        }
    }

    fn fresh(stamp: DateTime<Utc>) -> bool {
        Utc::now() - stamp < Duration::hours(TTL_HOURS)
    }

    /// Daily history for a type in a region, most recent last, at most 90
    /// days.
    pub async fn get(&self, region_id: RegionId, type_id: TypeId) -> Result<Vec<HistoryDay>> {
        let key = (region_id, type_id);

        if let Some((days, stamp)) = self.mem.read().get(&key) {
            if Self::fresh(*stamp) {
                return Ok(days.clone());
            }
        }

        match self.storage.history(region_id, type_id) {
            Ok(Some((days, stamp))) if Self::fresh(stamp) => {
                self.mem.write().insert(key, (days.clone(), stamp));
                return Ok(days);
            }
            Ok(_) => {}
            Err(e) => warn!(region_id, type_id, error = %e, "history cache read failed"),
        }

        match self.fetch(region_id, type_id).await {
            Ok(days) => {
                if let Err(e) = self.storage.upsert_history(region_id, type_id, &days) {
                    warn!(region_id, type_id, error = %e, "history cache write failed");
                }
                self.mem.write().insert(key, (days.clone(), Utc::now()));
                Ok(days)
            }
            Err(e) => {
                // Serve stale data over nothing.
                if let Some((days, _)) = self.mem.read().get(&key) {
                    warn!(region_id, type_id, error = %e, "history refresh failed, serving stale");
                    return Ok(days.clone());
                }
                if let Ok(Some((days, _))) = self.storage.history(region_id, type_id) {
                    warn!(region_id, type_id, error = %e, "history refresh failed, serving stale");
                    return Ok(days);
                }
                Err(e)
            }
        }
    }

    async fn fetch(&self, region_id: RegionId, type_id: TypeId) -> Result<Vec<HistoryDay>> {
        let url = self.esi.url(&format!(
            "markets/{}/history/?type_id={}",
            region_id, type_id
        ));
        let raw: Vec<EsiHistoryDay> = self.esi.get_json(&url).await?;
        let mut days: Vec<HistoryDay> = raw.into_iter().map(Into::into).collect();
        days.sort_by_key(|d| d.date);
        if days.len() > WINDOW_DAYS {
            days.drain(..days.len() - WINDOW_DAYS);
        }
        debug!(region_id, type_id, days = days.len(), "fetched history");
        Ok(days)
    }
}
