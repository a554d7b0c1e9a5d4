//! Wire DTOs for the upstream API. These mirror the JSON shapes exactly;
//! scanners consume the normalized types from `models` instead.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use crate::models::{
    CharacterId, HistoryDay, LocationId, MarketOrder, RegionId, SystemId, TypeId,
};

#[derive(Debug, Clone, Deserialize)]
pub struct EsiOrder {
    pub order_id: i64,
    #[serde(default)]
    pub is_buy_order: bool,
    pub type_id: TypeId,
    pub location_id: LocationId,
    pub system_id: SystemId,
    pub price: f64,
    pub volume_remain: i64,
    pub volume_total: i64,
    pub issued: DateTime<Utc>,
    pub duration: i32,
}

impl EsiOrder {
    /// Attach the region the page was fetched for.
    pub fn into_order(self, region_id: RegionId) -> MarketOrder {
        MarketOrder {
            order_id: self.order_id,
            is_buy_order: self.is_buy_order,
            type_id: self.type_id,
            location_id: self.location_id,
            system_id: self.system_id,
            region_id,
            price: self.price,
            volume_remain: self.volume_remain,
            volume_total: self.volume_total,
            issued: self.issued,
            duration: self.duration,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsiHistoryDay {
    pub date: NaiveDate,
    pub average: f64,
    pub highest: f64,
    pub lowest: f64,
    pub volume: u64,
    pub order_count: u64,
}

impl From<EsiHistoryDay> for HistoryDay {
    fn from(d: EsiHistoryDay) -> Self {
        HistoryDay {
            date: d.date,
            average: d.average,
            highest: d.highest,
            lowest: d.lowest,
            volume: d.volume,
            order_count: d.order_count,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsiContract {
    pub contract_id: i64,
    #[serde(rename = "type")]
    pub contract_type: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub title: Option<String>,
    pub date_expired: DateTime<Utc>,
    #[serde(default)]
    pub start_location_id: Option<LocationId>,
    #[serde(default)]
    pub volume: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsiContractItem {
    pub type_id: TypeId,
    pub quantity: i64,
    #[serde(default)]
    pub is_blueprint_copy: Option<bool>,
    #[serde(default = "default_true")]
    pub is_included: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsiStation {
    pub station_id: LocationId,
    pub name: String,
    pub system_id: SystemId,
}

// --- corporation dashboard endpoints ------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct EsiWalletDivision {
    pub division: u8,
    pub balance: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsiJournalEntry {
    pub id: i64,
    #[serde(default)]
    pub amount: f64,
    pub date: DateTime<Utc>,
    pub ref_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub first_party_id: Option<CharacterId>,
    #[serde(default)]
    pub second_party_id: Option<CharacterId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsiIndustryJob {
    pub job_id: i64,
    pub installer_id: CharacterId,
    pub activity_id: i32,
    pub status: String,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub product_type_id: Option<TypeId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsiMiningEntry {
    pub character_id: CharacterId,
    pub date: NaiveDate,
    pub type_id: TypeId,
    pub quantity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsiMemberTracking {
    pub character_id: CharacterId,
    #[serde(default)]
    pub ship_type_id: Option<TypeId>,
    #[serde(default)]
    pub logon_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location_id: Option<LocationId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_parse_and_region_attach() {
        let raw = r#"{
            "order_id": 5551212,
            "is_buy_order": false,
            "type_id": 34,
            "location_id": 60000001,
            "system_id": 30000142,
            "price": 5.05,
            "volume_remain": 100000,
            "volume_total": 250000,
            "issued": "2024-03-01T12:00:00Z",
            "duration": 90
        }"#;
        let order: EsiOrder = serde_json::from_str(raw).unwrap();
        let order = order.into_order(10000002);
        assert_eq!(order.region_id, 10000002);
        assert!(!order.is_buy_order);
        assert_eq!(order.volume_remain, 100000);
    }

    #[test]
    fn test_contract_item_defaults_to_included() {
        let raw = r#"{"type_id": 603, "quantity": 1}"#;
        let item: EsiContractItem = serde_json::from_str(raw).unwrap();
        assert!(item.is_included);
        assert_eq!(item.is_blueprint_copy, None);
    }

    #[test]
    fn test_journal_entry_parse() {
        let raw = r#"{
            "id": 99,
            "amount": -150000.5,
            "date": "2024-03-01T00:00:00Z",
            "ref_type": "brokers_fee",
            "first_party_id": 2112
        }"#;
        let entry: EsiJournalEntry = serde_json::from_str(raw).unwrap();
        assert_eq!(entry.amount, -150000.5);
        assert_eq!(entry.ref_type, "brokers_fee");
        assert_eq!(entry.second_party_id, None);
    }
}
