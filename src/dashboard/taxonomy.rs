//! Closed taxonomies over journal ref-types and member roles.
//!
//! Every journal `ref_type` maps into exactly one income category;
//! `Other` is the explicit default for anything unrecognized, so the
//! mapping stays total as the upstream adds ref-types.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncomeCategory {
    Bounties,
    Market,
    Mining,
    Pi,
    Industry,
    Taxes,
    Srp,
    Other,
}

impl IncomeCategory {
    pub const ALL: [IncomeCategory; 8] = [
        IncomeCategory::Bounties,
        IncomeCategory::Market,
        IncomeCategory::Mining,
        IncomeCategory::Pi,
        IncomeCategory::Industry,
        IncomeCategory::Taxes,
        IncomeCategory::Srp,
        IncomeCategory::Other,
    ];

    pub fn from_ref_type(ref_type: &str) -> Self {
        match ref_type {
            "bounty_prize"
            | "bounty_prizes"
            | "agent_mission_reward"
            | "agent_mission_time_bonus_reward"
            | "ess_escrow_transfer" => IncomeCategory::Bounties,
            "market_transaction"
            | "market_escrow"
            | "brokers_fee"
            | "transaction_tax"
            | "market_provider_tax" => IncomeCategory::Market,
            "mining_tax" | "reprocessing_tax" => IncomeCategory::Mining,
            "planetary_import_tax" | "planetary_export_tax" | "planetary_construction" => {
                IncomeCategory::Pi
            }
            "industry_job_tax" | "manufacturing" | "researching_technology" | "copying"
            | "reaction" => IncomeCategory::Industry,
            "corporate_tax" | "war_fee" | "alliance_maintainance_fee" | "office_rental_fee"
            | "sovereignity_bill" => IncomeCategory::Taxes,
            "insurance" | "ship_replacement" => IncomeCategory::Srp,
            _ => IncomeCategory::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Miner,
    Hauler,
    Combat,
    Industrialist,
    Trader,
    Unknown,
}

impl MemberRole {
    /// Primary classification: where the member's journal ISK comes from.
    pub fn from_income(category: IncomeCategory) -> Self {
        match category {
            IncomeCategory::Bounties => MemberRole::Combat,
            IncomeCategory::Mining => MemberRole::Miner,
            IncomeCategory::Market => MemberRole::Trader,
            IncomeCategory::Industry | IncomeCategory::Pi => MemberRole::Industrialist,
            IncomeCategory::Taxes | IncomeCategory::Srp | IncomeCategory::Other => {
                MemberRole::Unknown
            }
        }
    }

    /// Fallback classification from the member's current ship name.
    /// Keyword sets are closed; a miss is Unknown, never a guess.
    pub fn from_ship_name(ship_name: &str) -> Self {
        const MINING: &[&str] = &[
            "Venture", "Procurer", "Retriever", "Covetor", "Skiff", "Mackinaw", "Hulk",
            "Prospect", "Endurance", "Orca", "Rorqual",
        ];
        const HAULING: &[&str] = &[
            "Badger", "Tayra", "Nereus", "Kryos", "Epithal", "Iteron", "Mammoth", "Hoarder",
            "Wreathe", "Bustard", "Occator", "Mastodon", "Impel", "Fenrir", "Providence",
            "Obelisk", "Charon",
        ];
        const COMBAT: &[&str] = &[
            "Rifter", "Merlin", "Punisher", "Incursus", "Caracal", "Vexor", "Rupture",
            "Omen", "Drake", "Hurricane", "Myrmidon", "Harbinger", "Raven", "Dominix",
            "Megathron", "Tempest", "Apocalypse", "Rokh", "Abaddon", "Maelstrom",
        ];

        let matches = |keywords: &[&str]| keywords.iter().any(|k| ship_name.contains(k));
        if matches(MINING) {
            MemberRole::Miner
        } else if matches(HAULING) {
            MemberRole::Hauler
        } else if matches(COMBAT) {
            MemberRole::Combat
        } else {
            MemberRole::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_type_mapping_is_total() {
        assert_eq!(
            IncomeCategory::from_ref_type("bounty_prizes"),
            IncomeCategory::Bounties
        );
        assert_eq!(
            IncomeCategory::from_ref_type("market_transaction"),
            IncomeCategory::Market
        );
        assert_eq!(
            IncomeCategory::from_ref_type("planetary_export_tax"),
            IncomeCategory::Pi
        );
        // Unknown ref-types land in the explicit default.
        assert_eq!(
            IncomeCategory::from_ref_type("some_future_ref_type"),
            IncomeCategory::Other
        );
        assert_eq!(IncomeCategory::from_ref_type(""), IncomeCategory::Other);
    }

    #[test]
    fn test_role_from_income_bucket() {
        assert_eq!(
            MemberRole::from_income(IncomeCategory::Bounties),
            MemberRole::Combat
        );
        assert_eq!(
            MemberRole::from_income(IncomeCategory::Mining),
            MemberRole::Miner
        );
        assert_eq!(
            MemberRole::from_income(IncomeCategory::Other),
            MemberRole::Unknown
        );
    }

    #[test]
    fn test_role_from_ship_keywords() {
        assert_eq!(MemberRole::from_ship_name("Retriever"), MemberRole::Miner);
        assert_eq!(
            MemberRole::from_ship_name("Iteron Mark V"),
            MemberRole::Hauler
        );
        assert_eq!(MemberRole::from_ship_name("Drake Navy Issue"), MemberRole::Combat);
        assert_eq!(MemberRole::from_ship_name("Ibis"), MemberRole::Unknown);
        assert_eq!(MemberRole::from_ship_name(""), MemberRole::Unknown);
    }
}
