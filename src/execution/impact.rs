//! Market-impact model from daily history.
//!
//! Two classic estimators: Kyle's lambda (linear impact, daily price
//! volatility per unit of daily volume) and square-root impact (cost
//! grows with the root of the participation ratio). Both feed a TWAP
//! recommendation for quantities the visible book cannot absorb quietly.

use serde::Serialize;
use statrs::statistics::Statistics;

use crate::models::{sanitize, HistoryDay};

/// Fraction of daily volume a TWAP slice should target.
const TWAP_PARTICIPATION: f64 = 0.05;
const TWAP_MAX_SLICES: u32 = 12;
const TWAP_INTERVAL_MINUTES: u32 = 30;

#[derive(Debug, Clone, Serialize)]
pub struct ImpactEstimate {
    /// ISK of price movement per unit traded.
    pub kyle_lambda: f64,
    /// Linear impact of the requested quantity, ISK.
    pub linear_impact_isk: f64,
    /// Square-root impact of the requested quantity, percent of price.
    pub sqrt_impact_pct: f64,
    pub twap_slices: u32,
    pub twap_interval_minutes: u32,
}

/// Estimate impact for trading `quantity` against a market described by
/// its daily history.
pub fn estimate(days: &[HistoryDay], quantity: i64) -> ImpactEstimate {
    let quantity = quantity.max(0) as f64;

    let daily_volume = {
        let volumes: Vec<f64> = days.iter().map(|d| d.volume as f64).collect();
        if volumes.is_empty() {
            0.0
        } else {
            volumes.iter().mean()
        }
    };

    // Daily sigma in ISK from close-to-close moves of the daily average,
    // and in percent for the square-root model.
    let moves: Vec<f64> = days
        .windows(2)
        .map(|w| w[1].average - w[0].average)
        .collect();
    let returns: Vec<f64> = days
        .windows(2)
        .filter(|w| w[0].average > 0.0)
        .map(|w| (w[1].average - w[0].average) / w[0].average * 100.0)
        .collect();
    let sigma_isk = if moves.len() >= 2 { moves.iter().std_dev() } else { 0.0 };
    let sigma_pct = if returns.len() >= 2 {
        returns.iter().std_dev()
    } else {
        0.0
    };

    let kyle_lambda = if daily_volume > 0.0 {
        sigma_isk / daily_volume
    } else {
        0.0
    };
    let linear_impact_isk = kyle_lambda * quantity;
    let sqrt_impact_pct = if daily_volume > 0.0 {
        sigma_pct * (quantity / daily_volume).sqrt()
    } else {
        0.0
    };

    let (twap_slices, twap_interval_minutes) = twap(quantity, daily_volume);

    ImpactEstimate {
        kyle_lambda: sanitize(kyle_lambda),
        linear_impact_isk: sanitize(linear_impact_isk),
        sqrt_impact_pct: sanitize(sqrt_impact_pct),
        twap_slices,
        twap_interval_minutes,
    }
}

fn twap(quantity: f64, daily_volume: f64) -> (u32, u32) {
    if quantity <= 0.0 {
        return (1, 0);
    }
    let slice_size = (TWAP_PARTICIPATION * daily_volume).max(1.0);
    let slices = ((quantity / slice_size).ceil() as u32).clamp(1, TWAP_MAX_SLICES);
    let interval = if slices <= 1 { 0 } else { TWAP_INTERVAL_MINUTES };
    (slices, interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(n: u32, avg: f64, volume: u64) -> HistoryDay {
        HistoryDay {
            date: NaiveDate::from_ymd_opt(2024, 3, n).unwrap(),
            average: avg,
            highest: avg * 1.05,
            lowest: avg * 0.95,
            volume,
            order_count: 10,
        }
    }

    #[test]
    fn test_lambda_scales_with_volatility_over_volume() {
        // Moves of +10/-10 around 100 on 1000 units/day.
        let days = vec![
            day(1, 100.0, 1000),
            day(2, 110.0, 1000),
            day(3, 100.0, 1000),
            day(4, 110.0, 1000),
        ];
        let est = estimate(&days, 500);
        assert!(est.kyle_lambda > 0.0);
        assert!((est.linear_impact_isk - est.kyle_lambda * 500.0).abs() < 1e-9);

        // A quieter market with the same volume has a smaller lambda.
        let calm = vec![
            day(1, 100.0, 1000),
            day(2, 101.0, 1000),
            day(3, 100.0, 1000),
            day(4, 101.0, 1000),
        ];
        let calm_est = estimate(&calm, 500);
        assert!(calm_est.kyle_lambda < est.kyle_lambda);
    }

    #[test]
    fn test_sqrt_impact_grows_sublinearly() {
        let days: Vec<HistoryDay> = (1..=20)
            .map(|n| day(n, 100.0 + (n % 3) as f64, 1000))
            .collect();
        let small = estimate(&days, 100);
        let large = estimate(&days, 400);
        assert!(large.sqrt_impact_pct > small.sqrt_impact_pct);
        // Quadrupling the quantity only doubles the sqrt impact.
        assert!((large.sqrt_impact_pct / small.sqrt_impact_pct - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_twap_participation() {
        // 5% of 1000/day = 50 per slice.
        assert_eq!(twap(100.0, 1000.0), (2, 30));
        assert_eq!(twap(25.0, 1000.0), (1, 0));
        // Clamped at the slice ceiling.
        assert_eq!(twap(1e9, 1000.0), (12, 30));
    }

    #[test]
    fn test_empty_history_yields_zero_impact() {
        let est = estimate(&[], 100);
        assert_eq!(est.kyle_lambda, 0.0);
        assert_eq!(est.sqrt_impact_pct, 0.0);
    }
}
