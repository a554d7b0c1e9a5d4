use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Integer keys used across the catalog and the market API.
/// Location ids are 64-bit because player structures live above the
/// 32-bit station range.
pub type TypeId = i32;
pub type SystemId = i32;
pub type RegionId = i32;
pub type ConstellationId = i32;
pub type LocationId = i64;
pub type CharacterId = i64;
pub type CorporationId = i64;

/// A single order from a regional order book, normalized to the shape the
/// scanners consume. `region_id` is derived at ingestion time from the
/// region the page was fetched for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketOrder {
    pub order_id: i64,
    pub is_buy_order: bool,
    pub type_id: TypeId,
    pub location_id: LocationId,
    pub system_id: SystemId,
    pub region_id: RegionId,
    pub price: f64,
    pub volume_remain: i64,
    pub volume_total: i64,
    pub issued: DateTime<Utc>,
    pub duration: i32,
}

/// One day of regional trade history for a type. Dates are calendar days UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryDay {
    pub date: NaiveDate,
    pub average: f64,
    pub highest: f64,
    pub lowest: f64,
    pub volume: u64,
    pub order_count: u64,
}

/// Replace NaN and ±∞ with 0 so every number we emit is legal JSON.
pub fn sanitize(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub static_data_path: String,
    pub port: u16,
    pub esi_base_url: String,
    pub esi_user_agent: String,
    pub max_concurrent_requests: usize,
    pub path_cache_capacity: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./flipbot.db".to_string());

        let static_data_path =
            std::env::var("STATIC_DATA_PATH").unwrap_or_else(|_| "./static-data.json".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "13370".to_string())
            .parse()
            .unwrap_or(13370);

        let esi_base_url = std::env::var("ESI_BASE_URL")
            .unwrap_or_else(|_| "https://esi.evetech.net/latest".to_string());

        let esi_user_agent = std::env::var("ESI_USER_AGENT")
            .unwrap_or_else(|_| "FlipBot/1.0 (market analytics)".to_string());

        let max_concurrent_requests = std::env::var("ESI_MAX_CONCURRENT")
            .unwrap_or_else(|_| "20".to_string())
            .parse()
            .unwrap_or(20);

        let path_cache_capacity = std::env::var("PATH_CACHE_CAPACITY")
            .unwrap_or_else(|_| "50000".to_string())
            .parse()
            .unwrap_or(50_000);

        Ok(Self {
            database_path,
            static_data_path,
            port,
            esi_base_url,
            esi_user_agent,
            max_concurrent_requests,
            path_cache_capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_passes_finite_values() {
        assert_eq!(sanitize(42.5), 42.5);
        assert_eq!(sanitize(-0.001), -0.001);
        assert_eq!(sanitize(0.0), 0.0);
    }

    #[test]
    fn test_sanitize_zeroes_non_finite() {
        assert_eq!(sanitize(f64::NAN), 0.0);
        assert_eq!(sanitize(f64::INFINITY), 0.0);
        assert_eq!(sanitize(f64::NEG_INFINITY), 0.0);
    }
}
