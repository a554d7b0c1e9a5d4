//! Composite Trading Score and the maker-realization model.

use serde::{Deserialize, Serialize};

/// Raw metric values feeding the composite score.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub spread_roi_pct: f64,
    pub obds: f64,
    pub drvi_pct: f64,
    pub competition: f64,
    pub sds: f64,
    pub daily_volume: f64,
}

/// Weight profiles over the six score components. Weights are normalized
/// to sum to 1 before blending, so profiles stay comparable even if a
/// profile's raw weights drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CtsProfile {
    #[default]
    Default,
    Aggressive,
    Defensive,
}

impl CtsProfile {
    /// Order: spread, depth, volatility, competition, safety, volume.
    fn weights(self) -> [f64; 6] {
        match self {
            CtsProfile::Default => [0.25, 0.20, 0.15, 0.10, 0.15, 0.15],
            CtsProfile::Aggressive => [0.35, 0.10, 0.05, 0.10, 0.10, 0.30],
            CtsProfile::Defensive => [0.15, 0.25, 0.20, 0.10, 0.20, 0.10],
        }
    }
}

/// Normalization caps. SpreadROI saturates at 300%, OBDS at 2.0, DRVI at
/// 50% (inverted), CI at 100 (inverted), SDS at 100 (inverted); volume is
/// log-scaled against 10,000 units/day.
fn normalized(c: &ScoreComponents) -> [f64; 6] {
    let unit = |v: f64| v.clamp(0.0, 1.0);
    [
        unit(c.spread_roi_pct / 300.0),
        unit(c.obds / 2.0),
        1.0 - unit(c.drvi_pct / 50.0),
        1.0 - unit(c.competition / 100.0),
        1.0 - unit(c.sds / 100.0),
        unit((1.0 + c.daily_volume.max(0.0)).log10() / 4.0),
    ]
}

/// Composite Trading Score, 0-100.
pub fn composite_score(c: &ScoreComponents, profile: CtsProfile) -> f64 {
    let weights = profile.weights();
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let parts = normalized(c);
    let blended: f64 = weights.iter().zip(parts.iter()).map(|(w, p)| w * p).sum();
    (blended / total * 100.0).clamp(0.0, 100.0)
}

/// Opportunity confidence, 0-100: liquidity, depth, and how much history
/// backs the estimate.
pub fn confidence(c: &ScoreComponents, history_days: usize) -> f64 {
    let unit = |v: f64| v.clamp(0.0, 1.0);
    let volume = unit((1.0 + c.daily_volume.max(0.0)).log10() / 4.0);
    let depth = unit(c.obds / 2.0);
    let coverage = unit(history_days as f64 / 90.0);
    (0.4 * volume + 0.3 * depth + 0.3 * coverage) * 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBucket {
    Low,
    Medium,
    High,
}

impl ConfidenceBucket {
    pub fn from_score(confidence: f64) -> Self {
        if confidence < 40.0 {
            ConfidenceBucket::Low
        } else if confidence < 75.0 {
            ConfidenceBucket::Medium
        } else {
            ConfidenceBucket::High
        }
    }
}

/// Estimated fraction of posted size that actually transacts within a
/// maker cycle. Bounded to [0.2, 0.9]: never assume a full fill, never
/// assume a total bust.
pub fn maker_realization_factor(confidence: f64, competition: f64) -> f64 {
    let base = match ConfidenceBucket::from_score(confidence) {
        ConfidenceBucket::Low => 0.35,
        ConfidenceBucket::Medium => 0.60,
        ConfidenceBucket::High => 0.85,
    };
    let penalty = (competition.clamp(0.0, 100.0) / 100.0) * 0.15;
    (base - penalty).clamp(0.2, 0.9)
}
