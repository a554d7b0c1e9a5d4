//! Corporation dashboard aggregation.
//!
//! One fan-out fetches wallets, member tracking, industry jobs, the
//! mining ledger, open orders, and the journal of each of the seven
//! wallet divisions concurrently, joins them all, and derives the
//! dashboard views. Journal entries can appear in more than one division
//! stream; the merge deduplicates by entry id before anything is summed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::context::AppContext;
use crate::dashboard::taxonomy::{IncomeCategory, MemberRole};
use crate::esi::dto::{
    EsiIndustryJob, EsiJournalEntry, EsiMemberTracking, EsiMiningEntry, EsiWalletDivision,
};
use crate::esi::TokenSource;
use crate::models::{sanitize, CharacterId, CorporationId};

const DIVISIONS: u8 = 7;
const TOP_CONTRIBUTORS: usize = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardParams {
    pub corporation_id: CorporationId,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletSummary {
    pub division: u8,
    pub balance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IncomeSource {
    pub category: IncomeCategory,
    pub amount: f64,
    pub share_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyPnl {
    pub date: NaiveDate,
    pub income: f64,
    pub expense: f64,
    pub net: f64,
    pub cumulative: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Contributor {
    pub character_id: CharacterId,
    pub name: String,
    pub total_isk: f64,
    pub dominant_category: IncomeCategory,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberSummary {
    pub character_id: CharacterId,
    pub name: String,
    pub role: MemberRole,
    pub journal_isk_30d: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub wallets: Vec<WalletSummary>,
    pub total_balance: f64,
    pub revenue_7d: f64,
    pub expense_7d: f64,
    pub revenue_30d: f64,
    pub expense_30d: f64,
    pub income_by_source: Vec<IncomeSource>,
    pub daily_pnl: Vec<DailyPnl>,
    pub top_contributors: Vec<Contributor>,
    pub members: Vec<MemberSummary>,
    pub active_industry_jobs: usize,
    pub mining_units_30d: i64,
    pub open_orders: usize,
}

pub struct DashboardAggregator {
    ctx: Arc<AppContext>,
}

impl DashboardAggregator {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub async fn aggregate(
        &self,
        params: &DashboardParams,
        tokens: &dyn TokenSource,
    ) -> Result<Dashboard> {
        let token = tokens.access_token().await.context("no access token")?;
        let corp = params.corporation_id;
        let esi = &self.ctx.esi;

        let wallets_url = esi.url(&format!("corporations/{}/wallets/", corp));
        let members_url = esi.url(&format!("corporations/{}/membertracking/", corp));
        let industry_url = esi.url(&format!("corporations/{}/industry/jobs/", corp));
        let mining_url = esi.url(&format!("corporations/{}/mining/", corp));
        let orders_url = esi.url(&format!("corporations/{}/orders/", corp));

        // The whole fan-out joins at this one point; nothing outlives it.
        let (wallets, members, industry, mining, orders, journals) = tokio::join!(
            esi.get_auth_json::<Vec<EsiWalletDivision>>(&wallets_url, &token),
            esi.get_paginated_json_auth::<EsiMemberTracking>(&members_url, &token),
            esi.get_paginated_json_auth::<EsiIndustryJob>(&industry_url, &token),
            esi.get_paginated_json_auth::<EsiMiningEntry>(&mining_url, &token),
            esi.get_paginated_json_auth::<serde_json::Value>(&orders_url, &token),
            self.fetch_journals(corp, &token),
        );

        // Wallets are the backbone of the dashboard; their failure is the
        // caller's problem. Everything else degrades to empty.
        let wallets = wallets.context("wallet fetch failed")?;
        let members = members.unwrap_or_else(|e| {
            warn!(error = %e, "member tracking fetch failed");
            Vec::new()
        });
        let industry = industry.unwrap_or_else(|e| {
            warn!(error = %e, "industry jobs fetch failed");
            Vec::new()
        });
        let mining = mining.unwrap_or_else(|e| {
            warn!(error = %e, "mining ledger fetch failed");
            Vec::new()
        });
        let orders = orders.unwrap_or_else(|e| {
            warn!(error = %e, "orders fetch failed");
            Vec::new()
        });

        let journal = merge_journals(journals);
        let now = Utc::now();

        let (revenue_7d, expense_7d) = window_sums(&journal, now, 7);
        let (revenue_30d, expense_30d) = window_sums(&journal, now, 30);

        // Contributor and member names in one resolution pass.
        let mut ids: HashSet<CharacterId> = members.iter().map(|m| m.character_id).collect();
        ids.extend(journal.iter().filter_map(|j| j.first_party_id));
        let id_list: Vec<CharacterId> = ids.into_iter().collect();
        let names = self.ctx.names.character_names(&id_list).await;

        let month_ago = now - Duration::days(30);
        let mining_units_30d = mining
            .iter()
            .filter(|m| m.date >= month_ago.date_naive())
            .map(|m| m.quantity)
            .sum();

        let dashboard = Dashboard {
            total_balance: wallets.iter().map(|w| sanitize(w.balance)).sum(),
            wallets: wallets
                .into_iter()
                .map(|w| WalletSummary {
                    division: w.division,
                    balance: sanitize(w.balance),
                })
                .collect(),
            revenue_7d: sanitize(revenue_7d),
            expense_7d: sanitize(expense_7d),
            revenue_30d: sanitize(revenue_30d),
            expense_30d: sanitize(expense_30d),
            income_by_source: income_by_source(&journal, now),
            daily_pnl: daily_pnl(&journal, now, 30),
            top_contributors: top_contributors(&journal, now, &names),
            members: member_summaries(&members, &journal, now, &names, &self.ctx),
            active_industry_jobs: industry.iter().filter(|j| j.status == "active").count(),
            mining_units_30d,
            open_orders: orders.len(),
        };

        info!(
            corporation_id = corp,
            journal_entries = journal.len(),
            members = dashboard.members.len(),
            "dashboard aggregated"
        );
        Ok(dashboard)
    }

    /// Journals for all seven divisions, concurrently. A failed division
    /// is logged and contributes nothing.
    async fn fetch_journals(
        &self,
        corp: CorporationId,
        token: &str,
    ) -> Vec<Vec<EsiJournalEntry>> {
        let fetches = (1..=DIVISIONS).map(|division| {
            let url = self.ctx.esi.url(&format!(
                "corporations/{}/wallets/{}/journal/",
                corp, division
            ));
            async move {
                match self
                    .ctx
                    .esi
                    .get_paginated_json_auth::<EsiJournalEntry>(&url, token)
                    .await
                {
                    Ok(entries) => entries,
                    Err(e) => {
                        warn!(division, error = %e, "journal fetch failed, omitting division");
                        Vec::new()
                    }
                }
            }
        });
        futures_util::future::join_all(fetches).await
    }
}

/// Merge division streams, deduplicating by entry id. An entry that
/// appears in several divisions is counted once.
pub fn merge_journals(streams: Vec<Vec<EsiJournalEntry>>) -> Vec<EsiJournalEntry> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for stream in streams {
        for entry in stream {
            if seen.insert(entry.id) {
                merged.push(entry);
            }
        }
    }
    merged
}

/// Positive and negative sums over a trailing window: (revenue, expense).
/// Expense is reported as a positive number.
pub fn window_sums(journal: &[EsiJournalEntry], now: DateTime<Utc>, days: i64) -> (f64, f64) {
    let cutoff = now - Duration::days(days);
    let mut revenue = 0.0;
    let mut expense = 0.0;
    for entry in journal.iter().filter(|e| e.date >= cutoff) {
        if entry.amount >= 0.0 {
            revenue += entry.amount;
        } else {
            expense += -entry.amount;
        }
    }
    (revenue, expense)
}

/// Gross income split by category over the last 30 days, with each
/// category's share of the gross.
pub fn income_by_source(journal: &[EsiJournalEntry], now: DateTime<Utc>) -> Vec<IncomeSource> {
    let cutoff = now - Duration::days(30);
    let mut by_category: HashMap<IncomeCategory, f64> = HashMap::new();
    for entry in journal.iter().filter(|e| e.date >= cutoff && e.amount > 0.0) {
        *by_category
            .entry(IncomeCategory::from_ref_type(&entry.ref_type))
            .or_insert(0.0) += entry.amount;
    }
    let gross: f64 = by_category.values().sum();

    let mut sources: Vec<IncomeSource> = IncomeCategory::ALL
        .iter()
        .filter_map(|&category| {
            let amount = by_category.get(&category).copied().unwrap_or(0.0);
            if amount <= 0.0 {
                return None;
            }
            Some(IncomeSource {
                category,
                amount: sanitize(amount),
                share_pct: sanitize(if gross > 0.0 { amount / gross * 100.0 } else { 0.0 }),
            })
        })
        .collect();
    sources.sort_by(|a, b| {
        b.amount
            .partial_cmp(&a.amount)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sources
}

/// Daily net P&L with a rolling cumulative. Every day in the window is
/// present, zero-filled, oldest first.
pub fn daily_pnl(journal: &[EsiJournalEntry], now: DateTime<Utc>, days: i64) -> Vec<DailyPnl> {
    let today = now.date_naive();
    let mut by_day: HashMap<NaiveDate, (f64, f64)> = HashMap::new();
    for offset in 0..days {
        by_day.insert(today - Duration::days(offset), (0.0, 0.0));
    }

    for entry in journal {
        let day = entry.date.date_naive();
        if let Some((income, expense)) = by_day.get_mut(&day) {
            if entry.amount >= 0.0 {
                *income += entry.amount;
            } else {
                *expense += -entry.amount;
            }
        }
    }

    let mut dates: Vec<NaiveDate> = by_day.keys().copied().collect();
    dates.sort();
    let mut cumulative = 0.0;
    dates
        .into_iter()
        .map(|date| {
            let (income, expense) = by_day[&date];
            let net = income - expense;
            cumulative += net;
            DailyPnl {
                date,
                income: sanitize(income),
                expense: sanitize(expense),
                net: sanitize(net),
                cumulative: sanitize(cumulative),
            }
        })
        .collect()
}

/// Top income contributors: positive 30-day sums per first party, with
/// the dominant category from that party's ref-type histogram.
pub fn top_contributors(
    journal: &[EsiJournalEntry],
    now: DateTime<Utc>,
    names: &HashMap<CharacterId, String>,
) -> Vec<Contributor> {
    let cutoff = now - Duration::days(30);
    let mut totals: HashMap<CharacterId, f64> = HashMap::new();
    let mut histograms: HashMap<CharacterId, HashMap<IncomeCategory, f64>> = HashMap::new();
    for entry in journal.iter().filter(|e| e.date >= cutoff && e.amount > 0.0) {
        let Some(party) = entry.first_party_id else {
            continue;
        };
        *totals.entry(party).or_insert(0.0) += entry.amount;
        *histograms
            .entry(party)
            .or_default()
            .entry(IncomeCategory::from_ref_type(&entry.ref_type))
            .or_insert(0.0) += entry.amount;
    }

    let mut contributors: Vec<Contributor> = totals
        .into_iter()
        .map(|(character_id, total)| {
            let dominant_category = histograms
                .get(&character_id)
                .and_then(|h| {
                    h.iter()
                        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                        .map(|(&c, _)| c)
                })
                .unwrap_or(IncomeCategory::Other);
            Contributor {
                character_id,
                name: names
                    .get(&character_id)
                    .cloned()
                    .unwrap_or_else(|| format!("Character #{}", character_id)),
                total_isk: sanitize(total),
                dominant_category,
            }
        })
        .collect();
    contributors.sort_by(|a, b| {
        b.total_isk
            .partial_cmp(&a.total_isk)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    contributors.truncate(TOP_CONTRIBUTORS);
    contributors
}

/// Role per roster member: the journal-ISK bucket decides first, the
/// current ship's name decides when the journal is silent.
fn member_summaries(
    members: &[EsiMemberTracking],
    journal: &[EsiJournalEntry],
    now: DateTime<Utc>,
    names: &HashMap<CharacterId, String>,
    ctx: &AppContext,
) -> Vec<MemberSummary> {
    let cutoff = now - Duration::days(30);
    let mut histograms: HashMap<CharacterId, HashMap<IncomeCategory, f64>> = HashMap::new();
    let mut totals: HashMap<CharacterId, f64> = HashMap::new();
    for entry in journal.iter().filter(|e| e.date >= cutoff && e.amount > 0.0) {
        let Some(party) = entry.first_party_id else {
            continue;
        };
        *totals.entry(party).or_insert(0.0) += entry.amount;
        *histograms
            .entry(party)
            .or_default()
            .entry(IncomeCategory::from_ref_type(&entry.ref_type))
            .or_insert(0.0) += entry.amount;
    }

    members
        .iter()
        .map(|member| {
            let id = member.character_id;
            let journal_role = histograms.get(&id).and_then(|h| {
                h.iter()
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(&category, _)| MemberRole::from_income(category))
            });
            let role = match journal_role {
                Some(role) if role != MemberRole::Unknown => role,
                _ => member
                    .ship_type_id
                    .and_then(|t| ctx.catalog.item_type(t))
                    .map(|t| MemberRole::from_ship_name(&t.name))
                    .unwrap_or(MemberRole::Unknown),
            };
            MemberSummary {
                character_id: id,
                name: names
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| format!("Character #{}", id)),
                role,
                journal_isk_30d: sanitize(totals.get(&id).copied().unwrap_or(0.0)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64, amount: f64, ref_type: &str, days_ago: i64, party: Option<i64>) -> EsiJournalEntry {
        EsiJournalEntry {
            id,
            amount,
            date: Utc::now() - Duration::days(days_ago),
            ref_type: ref_type.to_string(),
            description: None,
            first_party_id: party,
            second_party_id: None,
        }
    }

    #[test]
    fn test_merge_dedup_by_entry_id() {
        let streams = vec![
            vec![entry(1, 100.0, "bounty_prizes", 1, None), entry(2, 50.0, "market_transaction", 1, None)],
            vec![entry(2, 50.0, "market_transaction", 1, None), entry(3, -20.0, "brokers_fee", 1, None)],
            vec![entry(1, 100.0, "bounty_prizes", 1, None)],
        ];
        let merged = merge_journals(streams);
        assert_eq!(merged.len(), 3);
        let ids: HashSet<i64> = merged.iter().map(|e| e.id).collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_window_sums_split_sign() {
        let journal = vec![
            entry(1, 100.0, "bounty_prizes", 1, None),
            entry(2, -40.0, "brokers_fee", 2, None),
            entry(3, 500.0, "bounty_prizes", 20, None),
            entry(4, 999.0, "bounty_prizes", 60, None), // outside 30d
        ];
        let (rev7, exp7) = window_sums(&journal, Utc::now(), 7);
        assert!((rev7 - 100.0).abs() < 1e-9);
        assert!((exp7 - 40.0).abs() < 1e-9);

        let (rev30, exp30) = window_sums(&journal, Utc::now(), 30);
        assert!((rev30 - 600.0).abs() < 1e-9);
        assert!((exp30 - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_income_by_source_shares() {
        let journal = vec![
            entry(1, 300.0, "bounty_prizes", 1, None),
            entry(2, 100.0, "market_transaction", 1, None),
            entry(3, -500.0, "brokers_fee", 1, None), // expense, not income
        ];
        let sources = income_by_source(&journal, Utc::now());
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].category, IncomeCategory::Bounties);
        assert!((sources[0].share_pct - 75.0).abs() < 1e-9);
        assert!((sources[1].share_pct - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_daily_pnl_prefills_window_and_accumulates() {
        let journal = vec![
            entry(1, 100.0, "bounty_prizes", 0, None),
            entry(2, -30.0, "brokers_fee", 1, None),
        ];
        let series = daily_pnl(&journal, Utc::now(), 30);
        assert_eq!(series.len(), 30);
        // Oldest first, all days present even without entries.
        assert!(series.windows(2).all(|w| w[0].date < w[1].date));
        let last = series.last().unwrap();
        assert!((last.net - 100.0).abs() < 1e-9);
        assert!((last.cumulative - 70.0).abs() < 1e-9);
        let yesterday = &series[series.len() - 2];
        assert!((yesterday.net + 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_top_contributors_dominant_category() {
        let journal = vec![
            entry(1, 500.0, "bounty_prizes", 1, Some(42)),
            entry(2, 100.0, "market_transaction", 1, Some(42)),
            entry(3, 50.0, "market_transaction", 1, Some(7)),
            entry(4, -999.0, "brokers_fee", 1, Some(7)), // negative ignored
        ];
        let mut names = HashMap::new();
        names.insert(42, "Pilot A".to_string());

        let top = top_contributors(&journal, Utc::now(), &names);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].character_id, 42);
        assert_eq!(top[0].name, "Pilot A");
        assert_eq!(top[0].dominant_category, IncomeCategory::Bounties);
        assert!((top[0].total_isk - 600.0).abs() < 1e-9);
        // Unresolved party falls back to a synthesized name.
        assert_eq!(top[1].name, "Character #7");
    }
}
