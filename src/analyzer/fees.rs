//! Fee model for maker trading.
//!
//! Two shapes: the legacy model charges broker fees on the buy side only
//! and broker + sales tax on the sell side; the split model takes
//! independent buy/sell broker rates plus tax. All percentage inputs are
//! clamped to [0, 100] and the resulting multipliers are normalized so
//! `buy_cost_mult >= 1` and `sell_revenue_mult` stays within [0, 1].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeMode {
    Legacy,
    Split,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeInputs {
    pub mode: FeeMode,
    /// Broker fee on the buy order, percent.
    pub buy_broker_pct: f64,
    /// Broker fee on the sell order, percent. Ignored in legacy mode
    /// where the single broker rate applies to both sides.
    pub sell_broker_pct: f64,
    /// Sales tax on the sell side, percent.
    pub sales_tax_pct: f64,
}

impl Default for FeeInputs {
    fn default() -> Self {
        Self {
            mode: FeeMode::Legacy,
            buy_broker_pct: 3.0,
            sell_broker_pct: 3.0,
            sales_tax_pct: 4.5,
        }
    }
}

/// Multipliers applied to raw prices: buy fill cost is
/// `price * buy_cost_mult`, sell proceeds are `price * sell_revenue_mult`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeeMultipliers {
    pub buy_cost_mult: f64,
    pub sell_revenue_mult: f64,
}

impl FeeInputs {
    pub fn multipliers(&self) -> FeeMultipliers {
        let clamp = |pct: f64| -> f64 {
            if pct.is_finite() {
                pct.clamp(0.0, 100.0)
            } else {
                0.0
            }
        };

        let buy_broker = clamp(self.buy_broker_pct) / 100.0;
        let tax = clamp(self.sales_tax_pct) / 100.0;
        let sell_broker = match self.mode {
            FeeMode::Legacy => buy_broker,
            FeeMode::Split => clamp(self.sell_broker_pct) / 100.0,
        };

        let buy_cost_mult = 1.0 + buy_broker;
        let sell_revenue_mult = (1.0 - sell_broker - tax).clamp(0.0, 1.0);

        FeeMultipliers {
            buy_cost_mult: buy_cost_mult.max(1.0),
            sell_revenue_mult,
        }
    }

    /// Percent return for buying at `bid` and selling at `ask` right now.
    pub fn now_roi_pct(&self, best_bid: f64, best_ask: f64) -> f64 {
        if best_bid <= 0.0 {
            return 0.0;
        }
        let m = self.multipliers();
        (best_ask * m.sell_revenue_mult - best_bid * m.buy_cost_mult) / best_bid * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_multipliers() {
        let fees = FeeInputs {
            mode: FeeMode::Legacy,
            buy_broker_pct: 3.0,
            sell_broker_pct: 99.0, // ignored in legacy mode
            sales_tax_pct: 4.5,
        };
        let m = fees.multipliers();
        assert!((m.buy_cost_mult - 1.03).abs() < 1e-12);
        assert!((m.sell_revenue_mult - 0.925).abs() < 1e-12);
    }

    #[test]
    fn test_split_multipliers() {
        let fees = FeeInputs {
            mode: FeeMode::Split,
            buy_broker_pct: 1.0,
            sell_broker_pct: 2.0,
            sales_tax_pct: 3.0,
        };
        let m = fees.multipliers();
        assert!((m.buy_cost_mult - 1.01).abs() < 1e-12);
        assert!((m.sell_revenue_mult - 0.95).abs() < 1e-12);
    }

    #[test]
    fn test_multiplier_bounds_under_hostile_inputs() {
        for (buy, sell, tax) in [
            (-50.0, -50.0, -50.0),
            (500.0, 500.0, 500.0),
            (f64::NAN, 60.0, 60.0),
            (0.0, 100.0, 100.0),
        ] {
            for mode in [FeeMode::Legacy, FeeMode::Split] {
                let m = FeeInputs {
                    mode,
                    buy_broker_pct: buy,
                    sell_broker_pct: sell,
                    sales_tax_pct: tax,
                }
                .multipliers();
                assert!(m.buy_cost_mult >= 1.0, "buy mult {} below 1", m.buy_cost_mult);
                assert!(
                    (0.0..=1.0).contains(&m.sell_revenue_mult),
                    "sell mult {} out of range",
                    m.sell_revenue_mult
                );
            }
        }
    }

    #[test]
    fn test_now_roi() {
        let fees = FeeInputs {
            mode: FeeMode::Split,
            buy_broker_pct: 0.0,
            sell_broker_pct: 0.0,
            sales_tax_pct: 0.0,
        };
        // No fees: buy 100, sell 120 -> 20%.
        assert!((fees.now_roi_pct(100.0, 120.0) - 20.0).abs() < 1e-9);
        assert_eq!(fees.now_roi_pct(0.0, 120.0), 0.0);
    }
}
