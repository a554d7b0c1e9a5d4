//! Station-trading analyzer: per-item maker economics derived from the
//! station order book and up to 90 days of regional history.

pub mod fees;
pub mod metrics;
pub mod scoring;
pub mod station;

pub use fees::{FeeInputs, FeeMode, FeeMultipliers};
pub use scoring::{CtsProfile, ScoreComponents};
pub use station::{StationAnalyzer, StationOpportunity, StationScanParams};
