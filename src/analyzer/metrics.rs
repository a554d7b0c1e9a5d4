//! Order-book and history-derived metrics for a single (station, type).

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::models::{HistoryDay, MarketOrder};

/// Volume-weighted average price over the history window.
pub fn vwap(days: &[HistoryDay]) -> f64 {
    let total_volume: f64 = days.iter().map(|d| d.volume as f64).sum();
    if total_volume <= 0.0 {
        return 0.0;
    }
    let weighted: f64 = days.iter().map(|d| d.average * d.volume as f64).sum();
    weighted / total_volume
}

/// Daily Range Volatility Index: sample standard deviation of the per-day
/// percentage range `(high - low) / avg * 100`.
pub fn drvi(days: &[HistoryDay]) -> f64 {
    let ranges: Vec<f64> = days
        .iter()
        .filter(|d| d.average > 0.0)
        .map(|d| (d.highest - d.lowest) / d.average * 100.0)
        .collect();
    if ranges.len() < 2 {
        return 0.0;
    }
    ranges.iter().std_dev()
}

/// Median of the per-day `(high - low) / low * 100` return a maker could
/// have captured inside one day.
pub fn spread_roi(days: &[HistoryDay]) -> f64 {
    let mut rois: Vec<f64> = days
        .iter()
        .filter(|d| d.lowest > 0.0)
        .map(|d| (d.highest - d.lowest) / d.lowest * 100.0)
        .collect();
    if rois.is_empty() {
        return 0.0;
    }
    rois.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = rois.len() / 2;
    if rois.len() % 2 == 1 {
        rois[mid]
    } else {
        (rois[mid - 1] + rois[mid]) / 2.0
    }
}

/// Mean units traded per day over the trailing `window_days` calendar
/// days, anchored at the most recent history entry.
pub fn mean_daily_volume(days: &[HistoryDay], window_days: i64) -> f64 {
    let Some(anchor) = days.iter().map(|d| d.date).max() else {
        return 0.0;
    };
    let cutoff = anchor - Duration::days(window_days - 1);
    let total: u64 = days
        .iter()
        .filter(|d| d.date >= cutoff)
        .map(|d| d.volume)
        .sum();
    total as f64 / window_days as f64
}

/// Order-Book Depth Score: the smaller of the bid and ask depth within
/// ±5% of best, in ISK, relative to the capital a position would tie up.
pub fn obds(bids: &[&MarketOrder], asks: &[&MarketOrder], capital_isk: f64) -> f64 {
    if capital_isk <= 0.0 {
        return 0.0;
    }
    let best_bid = bids.iter().map(|o| o.price).fold(f64::MIN, f64::max);
    let best_ask = asks.iter().map(|o| o.price).fold(f64::MAX, f64::min);
    if bids.is_empty() || asks.is_empty() {
        return 0.0;
    }

    let bid_depth: f64 = bids
        .iter()
        .filter(|o| o.price >= best_bid * 0.95)
        .map(|o| o.price * o.volume_remain as f64)
        .sum();
    let ask_depth: f64 = asks
        .iter()
        .filter(|o| o.price <= best_ask * 1.05)
        .map(|o| o.price * o.volume_remain as f64)
        .sum();

    bid_depth.min(ask_depth) / capital_isk
}

/// Competition Index: total order count plus twice the number of orders
/// parked within one tick (max of 0.01% of price and 0.01 ISK) of the
/// next price on their side. Dense clusters of near-identical prices mean
/// a fierce 0.01-ISK game.
pub fn competition_index(bids: &[&MarketOrder], asks: &[&MarketOrder]) -> f64 {
    fn near_pairs(mut prices: Vec<f64>) -> usize {
        prices.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        prices
            .windows(2)
            .filter(|w| (w[1] - w[0]).abs() <= (w[0] * 0.0001).max(0.01))
            .count()
    }

    let count = bids.len() + asks.len();
    let near = near_pairs(bids.iter().map(|o| o.price).collect())
        + near_pairs(asks.iter().map(|o| o.price).collect());
    (count + 2 * near) as f64
}

/// Closed set of scam indicators feeding the Scam Detection Score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScamFlag {
    BidFarBelowVwap,
    AskFarAboveVwap,
    BookDwarfsDailyVolume,
    BidDominatedBySingleOrder,
    AskDominatedBySingleOrder,
    NoRecentTrades,
}

impl ScamFlag {
    fn weight(self) -> u32 {
        match self {
            ScamFlag::BidFarBelowVwap => 30,
            ScamFlag::AskFarAboveVwap => 15,
            ScamFlag::BookDwarfsDailyVolume => 25,
            ScamFlag::BidDominatedBySingleOrder => 15,
            ScamFlag::AskDominatedBySingleOrder => 10,
            ScamFlag::NoRecentTrades => 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScamAssessment {
    pub score: f64,
    pub flags: Vec<ScamFlag>,
}

/// Scam Detection Score, 0-100. Weighted flags, capped.
pub fn scam_score(
    bids: &[&MarketOrder],
    asks: &[&MarketOrder],
    days: &[HistoryDay],
    today: NaiveDate,
) -> ScamAssessment {
    let mut flags = Vec::new();
    let vwap = vwap(days);

    let best_bid = bids.iter().map(|o| o.price).fold(f64::MIN, f64::max);
    let best_ask = asks.iter().map(|o| o.price).fold(f64::MAX, f64::min);

    if vwap > 0.0 && !bids.is_empty() && best_bid < 0.5 * vwap {
        flags.push(ScamFlag::BidFarBelowVwap);
    }
    if vwap > 0.0 && !asks.is_empty() && best_ask > 2.0 * vwap {
        flags.push(ScamFlag::AskFarAboveVwap);
    }

    let daily_volume = mean_daily_volume(days, 7);
    let book_volume: i64 = bids
        .iter()
        .chain(asks.iter())
        .map(|o| o.volume_remain)
        .sum();
    if daily_volume > 0.0 && book_volume as f64 > 10.0 * daily_volume {
        flags.push(ScamFlag::BookDwarfsDailyVolume);
    }

    if single_order_dominates(bids) {
        flags.push(ScamFlag::BidDominatedBySingleOrder);
    }
    if single_order_dominates(asks) {
        flags.push(ScamFlag::AskDominatedBySingleOrder);
    }

    let week_ago = today - Duration::days(7);
    let traded_recently = days.iter().any(|d| d.date >= week_ago && d.volume > 0);
    if !traded_recently {
        flags.push(ScamFlag::NoRecentTrades);
    }

    let score = flags.iter().map(|f| f.weight()).sum::<u32>().min(100);
    ScamAssessment {
        score: score as f64,
        flags,
    }
}

fn single_order_dominates(side: &[&MarketOrder]) -> bool {
    let total: i64 = side.iter().map(|o| o.volume_remain).sum();
    if total <= 0 || side.len() < 2 {
        // A one-order side is trivially 100% but says nothing about
        // manipulation; require an actual book to dominate.
        return false;
    }
    let largest = side.iter().map(|o| o.volume_remain).max().unwrap_or(0);
    largest as f64 > 0.9 * total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn day(date: NaiveDate, avg: f64, high: f64, low: f64, volume: u64) -> HistoryDay {
        HistoryDay {
            date,
            average: avg,
            highest: high,
            lowest: low,
            volume,
            order_count: 10,
        }
    }

    fn d(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, n).unwrap()
    }

    fn order(price: f64, volume: i64, is_buy: bool) -> MarketOrder {
        MarketOrder {
            order_id: (price * 100.0) as i64,
            is_buy_order: is_buy,
            type_id: 34,
            location_id: 60000001,
            system_id: 30000142,
            region_id: 10000002,
            price,
            volume_remain: volume,
            volume_total: volume,
            issued: Utc::now(),
            duration: 90,
        }
    }

    #[test]
    fn test_vwap_seed_scenario() {
        // {avg 100 vol 10}, {avg 200 vol 40} -> 180
        let days = vec![day(d(1), 100.0, 110.0, 90.0, 10), day(d(2), 200.0, 210.0, 190.0, 40)];
        assert!((vwap(&days) - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_vwap_empty_or_zero_volume() {
        assert_eq!(vwap(&[]), 0.0);
        let days = vec![day(d(1), 100.0, 110.0, 90.0, 0)];
        assert_eq!(vwap(&days), 0.0);
    }

    #[test]
    fn test_drvi_seed_scenario() {
        // Ranges {20, 40} -> sample stddev 14.142...
        let days = vec![day(d(1), 100.0, 110.0, 90.0, 10), day(d(2), 100.0, 120.0, 80.0, 10)];
        assert!((drvi(&days) - 14.142135623).abs() < 1e-6);
    }

    #[test]
    fn test_drvi_needs_two_days() {
        let days = vec![day(d(1), 100.0, 110.0, 90.0, 10)];
        assert_eq!(drvi(&days), 0.0);
    }

    #[test]
    fn test_spread_roi_is_median() {
        let days = vec![
            day(d(1), 100.0, 110.0, 100.0, 10), // 10%
            day(d(2), 100.0, 120.0, 100.0, 10), // 20%
            day(d(3), 100.0, 200.0, 100.0, 10), // 100%
        ];
        assert!((spread_roi(&days) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_mean_daily_volume_window() {
        let days = vec![
            day(d(1), 100.0, 110.0, 90.0, 700),  // outside the 7-day window
            day(d(10), 100.0, 110.0, 90.0, 70),
            day(d(16), 100.0, 110.0, 90.0, 70),
        ];
        // Anchor is day 16; cutoff day 10; (70 + 70) / 7 = 20.
        assert!((mean_daily_volume(&days, 7) - 20.0).abs() < 1e-9);
        assert_eq!(mean_daily_volume(&[], 7), 0.0);
    }

    #[test]
    fn test_obds_uses_thinner_side() {
        let b1 = order(100.0, 10, true);
        let b2 = order(96.0, 10, true);   // within 5% of best bid
        let b3 = order(80.0, 1000, true); // outside the band
        let a1 = order(110.0, 5, false);
        let bids = vec![&b1, &b2, &b3];
        let asks = vec![&a1];
        // bid depth = 100*10 + 96*10 = 1960; ask depth = 550
        let score = obds(&bids, &asks, 1000.0);
        assert!((score - 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_competition_index_counts_tick_crowding() {
        let b1 = order(100.00, 10, true);
        let b2 = order(100.005, 10, true); // within 0.01 ISK
        let b3 = order(90.0, 10, true);
        let a1 = order(110.0, 10, false);
        let bids = vec![&b1, &b2, &b3];
        let asks = vec![&a1];
        // 4 orders + 2 * 1 near pair = 6
        assert_eq!(competition_index(&bids, &asks), 6.0);
    }

    #[test]
    fn test_scam_dominance_boundaries() {
        let today = d(16);
        let days = vec![day(d(15), 100.0, 110.0, 90.0, 1000)];

        // 95 + 5 split: largest is 95% of bid volume.
        let b1 = order(100.0, 95, true);
        let b2 = order(99.0, 5, true);
        let a1 = order(110.0, 50, false);
        let a2 = order(111.0, 50, false);
        let assessment = scam_score(&[&b1, &b2], &[&a1, &a2], &days, today);
        assert!(assessment.score >= 15.0);
        assert!(assessment.flags.contains(&ScamFlag::BidDominatedBySingleOrder));

        // Ask side dominated as well.
        let a3 = order(110.0, 95, false);
        let a4 = order(111.0, 5, false);
        let assessment = scam_score(&[&b1, &b2], &[&a3, &a4], &days, today);
        assert!(assessment.score >= 25.0);
    }

    #[test]
    fn test_scam_score_capped_at_100() {
        let today = d(20);
        // Stale, thin history with huge walls on both sides and prices far
        // from VWAP trips most flags at once.
        let days = vec![day(d(1), 100.0, 110.0, 90.0, 1)];
        let b1 = order(10.0, 9500, true);
        let b2 = order(9.0, 100, true);
        let a1 = order(900.0, 9500, false);
        let a2 = order(901.0, 100, false);
        let assessment = scam_score(&[&b1, &b2], &[&a1, &a2], &days, today);
        assert_eq!(assessment.score, 100.0);
    }

    #[test]
    fn test_no_recent_trades_flag() {
        let today = d(20);
        let days = vec![day(d(1), 100.0, 110.0, 90.0, 50)];
        let b1 = order(100.0, 10, true);
        let b2 = order(99.0, 10, true);
        let a1 = order(101.0, 10, false);
        let a2 = order(102.0, 10, false);
        let assessment = scam_score(&[&b1, &b2], &[&a1, &a2], &days, today);
        assert!(assessment.flags.contains(&ScamFlag::NoRecentTrades));
    }
}
