//! Name resolution caches.
//!
//! Station names persist in SQLite with an in-memory overlay so scan
//! result rows never pay a per-row network lookup. Character names are
//! memory-only: one batched POST refills them cheaply after restart.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::esi::client::EsiClient;
use crate::esi::dto::EsiStation;
use crate::models::{CharacterId, LocationId};
use crate::storage::Storage;

pub struct NameService {
    esi: Arc<EsiClient>,
    storage: Arc<Storage>,
    stations: RwLock<HashMap<LocationId, String>>,
    characters: RwLock<HashMap<CharacterId, String>>,
}

impl NameService {
    pub fn new(esi: Arc<EsiClient>, storage: Arc<Storage>) -> Self {
        Self {
            esi,
            storage,
            stations: RwLock::new(HashMap::new()),
            characters: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a station name: memory overlay, then the persistent cache,
    /// then upstream. A failed upstream lookup synthesizes a stable
    /// placeholder so result rows always render.
    pub async fn station_name(&self, location_id: LocationId) -> String {
        if let Some(name) = self.stations.read().get(&location_id) {
            return name.clone();
        }

        match self.storage.station_name(location_id) {
            Ok(Some(name)) => {
                self.stations.write().insert(location_id, name.clone());
                return name;
            }
            Ok(None) => {}
            Err(e) => warn!(location_id, error = %e, "station name cache read failed"),
        }

        let name = match self.fetch_station_name(location_id).await {
            Ok(name) => {
                if let Err(e) = self.storage.upsert_station_name(location_id, &name) {
                    warn!(location_id, error = %e, "station name cache write failed");
                }
                name
            }
            Err(e) => {
                debug!(location_id, error = %e, "station lookup failed, synthesizing");
                format!("Station #{}", location_id)
            }
        };
        self.stations.write().insert(location_id, name.clone());
        name
    }

    async fn fetch_station_name(&self, location_id: LocationId) -> Result<String> {
        let url = self.esi.url(&format!("universe/stations/{}/", location_id));
        let station: EsiStation = self.esi.get_json(&url).await?;
        Ok(station.name)
    }

    /// Warm the station cache for a set of locations before rendering
    /// result rows. Lookups run concurrently; the client's semaphore is
    /// the only concurrency bound.
    pub async fn prefetch_station_names(&self, ids: &HashSet<LocationId>) {
        let missing: Vec<LocationId> = {
            let overlay = self.stations.read();
            ids.iter()
                .copied()
                .filter(|id| !overlay.contains_key(id))
                .collect()
        };
        if missing.is_empty() {
            return;
        }
        debug!(count = missing.len(), "prefetching station names");
        futures_util::future::join_all(missing.iter().map(|&id| self.station_name(id))).await;
    }

    /// Resolve character names through the batch endpoint, consulting the
    /// in-memory cache first. Unresolvable ids are simply absent from the
    /// returned map.
    pub async fn character_names(
        &self,
        ids: &[CharacterId],
    ) -> HashMap<CharacterId, String> {
        let mut out = HashMap::with_capacity(ids.len());
        let mut missing = Vec::new();
        {
            let cache = self.characters.read();
            for &id in ids {
                match cache.get(&id) {
                    Some(name) => {
                        out.insert(id, name.clone());
                    }
                    None => missing.push(id),
                }
            }
        }
        if missing.is_empty() {
            return out;
        }

        match self.esi.resolve_names(&missing).await {
            Ok(resolved) => {
                let mut cache = self.characters.write();
                for (id, name) in resolved {
                    cache.insert(id, name.clone());
                    out.insert(id, name);
                }
            }
            Err(e) => warn!(count = missing.len(), error = %e, "character name resolution failed"),
        }
        out
    }
}
