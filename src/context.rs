//! Process-wide context: catalog, graph, client, and caches, created once
//! at startup and passed by reference to every scanner. No scanner reads
//! global mutable state.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::info;

use crate::esi::{EsiClient, HistoryCache, NameService};
use crate::models::Config;
use crate::storage::Storage;
use crate::universe::{UniverseCatalog, UniverseGraph};

#[derive(Clone)]
pub struct AppContext {
    pub config: Config,
    pub catalog: Arc<UniverseCatalog>,
    pub graph: Arc<UniverseGraph>,
    pub esi: Arc<EsiClient>,
    pub names: Arc<NameService>,
    pub history: Arc<HistoryCache>,
    pub storage: Arc<Storage>,
}

impl AppContext {
    /// Build everything the scanners share. Catalog or database failures
    /// abort startup; there is no degraded mode without a universe.
    pub fn initialize(config: Config) -> Result<Self> {
        let catalog = Arc::new(
            UniverseCatalog::load(&config.static_data_path)
                .context("universe catalog load failed")?,
        );
        let graph = Arc::new(
            UniverseGraph::build(&catalog, config.path_cache_capacity)
                .context("universe graph build failed")?,
        );
        let storage =
            Arc::new(Storage::open(&config.database_path).context("database open failed")?);
        let esi = Arc::new(EsiClient::new(
            &config.esi_base_url,
            &config.esi_user_agent,
            config.max_concurrent_requests,
        )?);
        let names = Arc::new(NameService::new(esi.clone(), storage.clone()));
        let history = Arc::new(HistoryCache::new(esi.clone(), storage.clone()));

        info!("application context ready");
        Ok(Self {
            config,
            catalog,
            graph,
            esi,
            names,
            history,
            storage,
        })
    }
}
