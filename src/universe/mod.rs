//! Static universe catalog and the stargate graph every scanner routes over.

pub mod catalog;
pub mod graph;
pub mod path_cache;

pub use catalog::{ItemType, Region, SolarSystem, Station, UniverseCatalog};
pub use graph::UniverseGraph;
pub use path_cache::{security_tier, PathCache};
