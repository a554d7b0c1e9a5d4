//! Scanning engines: radius flips, public contracts, and multi-hop
//! trade routes. Each scan borrows the shared context, streams progress
//! through a sink, and honors its cancellation token.

pub mod contracts;
pub mod flip;
pub mod route_finder;

pub use contracts::{ContractOpportunity, ContractScanParams, ContractScanner};
pub use flip::{FlipOpportunity, FlipScanParams, FlipScanner};
pub use route_finder::{RouteFinder, RouteLeg, RouteScanParams, TradeRoute};
