//! Corporation dashboard: parallel fan-out across wallet, member,
//! industry, mining, and market endpoints, plus the journal-derived
//! taxonomies and time series.

pub mod aggregator;
pub mod taxonomy;

pub use aggregator::{Dashboard, DashboardAggregator, DashboardParams};
pub use taxonomy::{IncomeCategory, MemberRole};
