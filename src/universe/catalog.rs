//! Static universe catalog
//! Loaded once at startup from the packaged dataset; immutable afterwards.
//! Everything is keyed by integer id so orders and scan rows can stay thin.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::{ConstellationId, LocationId, RegionId, SystemId, TypeId};

/// A tradeable item type. Volume is the per-unit packaged volume in m³.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemType {
    pub type_id: TypeId,
    pub name: String,
    pub volume: f64,
}

/// An NPC station, pinned to its hosting system and region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub station_id: LocationId,
    pub system_id: SystemId,
    pub region_id: RegionId,
}

/// A solar system with its security rating in [-1.0, 1.0].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolarSystem {
    pub system_id: SystemId,
    pub name: String,
    pub constellation_id: ConstellationId,
    pub region_id: RegionId,
    pub security: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub region_id: RegionId,
    pub name: String,
    #[serde(skip)]
    pub systems: HashSet<SystemId>,
}

/// On-disk layout of the packaged dataset. Stargates are undirected
/// system pairs; the file may carry each edge once or twice.
#[derive(Debug, Deserialize)]
struct StaticData {
    types: Vec<ItemType>,
    stations: Vec<Station>,
    systems: Vec<SolarSystem>,
    regions: Vec<RegionFile>,
    stargates: Vec<(SystemId, SystemId)>,
}

#[derive(Debug, Deserialize)]
struct RegionFile {
    region_id: RegionId,
    name: String,
}

/// Process-wide catalog of types, stations, systems and regions.
pub struct UniverseCatalog {
    types: HashMap<TypeId, ItemType>,
    stations: HashMap<LocationId, Station>,
    systems: HashMap<SystemId, SolarSystem>,
    regions: HashMap<RegionId, Region>,
    stargates: Vec<(SystemId, SystemId)>,
}

impl UniverseCatalog {
    /// Load the packaged dataset. Any failure here aborts startup.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read static dataset {}", path.display()))?;
        let data: StaticData = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse static dataset {}", path.display()))?;
        Self::from_parts(data.types, data.stations, data.systems, data.regions, data.stargates)
    }

    fn from_parts(
        types: Vec<ItemType>,
        stations: Vec<Station>,
        systems: Vec<SolarSystem>,
        regions: Vec<RegionFile>,
        stargates: Vec<(SystemId, SystemId)>,
    ) -> Result<Self> {
        if systems.is_empty() {
            bail!("static dataset contains no solar systems");
        }

        let mut type_map = HashMap::with_capacity(types.len());
        let mut skipped = 0usize;
        for t in types {
            // Items with a non-positive volume cannot be sized into a cargo
            // hold; keep them out of the catalog entirely.
            if !t.volume.is_finite() || t.volume < 0.0 {
                skipped += 1;
                continue;
            }
            type_map.insert(t.type_id, t);
        }
        if skipped > 0 {
            warn!(skipped, "dropped item types with invalid volume");
        }

        let mut region_map: HashMap<RegionId, Region> = regions
            .into_iter()
            .map(|r| {
                (
                    r.region_id,
                    Region {
                        region_id: r.region_id,
                        name: r.name,
                        systems: HashSet::new(),
                    },
                )
            })
            .collect();

        let mut system_map = HashMap::with_capacity(systems.len());
        for s in systems {
            if let Some(region) = region_map.get_mut(&s.region_id) {
                region.systems.insert(s.system_id);
            }
            system_map.insert(s.system_id, s);
        }

        let station_map: HashMap<LocationId, Station> = stations
            .into_iter()
            .map(|st| (st.station_id, st))
            .collect();

        info!(
            types = type_map.len(),
            stations = station_map.len(),
            systems = system_map.len(),
            regions = region_map.len(),
            gates = stargates.len(),
            "universe catalog loaded"
        );

        Ok(Self {
            types: type_map,
            stations: station_map,
            systems: system_map,
            regions: region_map,
            stargates,
        })
    }

    /// Build a catalog directly from entity lists. Used by tests and the
    /// graph builder; production code goes through `load`.
    pub fn from_entities(
        types: Vec<ItemType>,
        stations: Vec<Station>,
        systems: Vec<SolarSystem>,
        regions: Vec<(RegionId, String)>,
        stargates: Vec<(SystemId, SystemId)>,
    ) -> Result<Self> {
        let regions = regions
            .into_iter()
            .map(|(region_id, name)| RegionFile { region_id, name })
            .collect();
        Self::from_parts(types, stations, systems, regions, stargates)
    }

    pub fn item_type(&self, type_id: TypeId) -> Option<&ItemType> {
        self.types.get(&type_id)
    }

    pub fn station(&self, station_id: LocationId) -> Option<&Station> {
        self.stations.get(&station_id)
    }

    pub fn system(&self, system_id: SystemId) -> Option<&SolarSystem> {
        self.systems.get(&system_id)
    }

    pub fn region(&self, region_id: RegionId) -> Option<&Region> {
        self.regions.get(&region_id)
    }

    pub fn system_name(&self, system_id: SystemId) -> String {
        self.systems
            .get(&system_id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| format!("System #{}", system_id))
    }

    pub fn region_name(&self, region_id: RegionId) -> String {
        self.regions
            .get(&region_id)
            .map(|r| r.name.clone())
            .unwrap_or_else(|| format!("Region #{}", region_id))
    }

    /// System hosting a location, if the location is a cataloged station.
    pub fn system_of_location(&self, location_id: LocationId) -> Option<SystemId> {
        self.stations.get(&location_id).map(|st| st.system_id)
    }

    pub fn systems(&self) -> impl Iterator<Item = &SolarSystem> {
        self.systems.values()
    }

    pub fn types(&self) -> impl Iterator<Item = &ItemType> {
        self.types.values()
    }

    pub fn stargates(&self) -> &[(SystemId, SystemId)] {
        &self.stargates
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Five systems in two regions, strung in a line with one branch:
    ///
    ///   1 - 2 - 3 - 4     (region 10: 1,2; region 20: 3,4,5)
    ///           |
    ///           5
    ///
    /// Securities: 1=0.9, 2=0.5, 3=0.4, 4=0.9, 5=-0.1
    pub fn small_catalog() -> UniverseCatalog {
        let sys = |id, name: &str, region, sec| SolarSystem {
            system_id: id,
            name: name.to_string(),
            constellation_id: region,
            region_id: region,
            security: sec,
        };
        UniverseCatalog::from_entities(
            vec![
                ItemType {
                    type_id: 34,
                    name: "Tritanium".to_string(),
                    volume: 0.01,
                },
                ItemType {
                    type_id: 603,
                    name: "Merlin".to_string(),
                    volume: 10.0,
                },
            ],
            vec![
                Station {
                    station_id: 60_000_001,
                    system_id: 1,
                    region_id: 10,
                },
                Station {
                    station_id: 60_000_004,
                    system_id: 4,
                    region_id: 20,
                },
            ],
            vec![
                sys(1, "Alpha", 10, 0.9),
                sys(2, "Beta", 10, 0.5),
                sys(3, "Gamma", 20, 0.4),
                sys(4, "Delta", 20, 0.9),
                sys(5, "Epsilon", 20, -0.1),
            ],
            vec![(10, "Heimatar".to_string()), (20, "Metropolis".to_string())],
            vec![(1, 2), (2, 3), (3, 4), (3, 5)],
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_indexes_entities() {
        let cat = testutil::small_catalog();
        assert_eq!(cat.item_type(34).unwrap().name, "Tritanium");
        assert_eq!(cat.station(60_000_001).unwrap().system_id, 1);
        assert_eq!(cat.system(3).unwrap().region_id, 20);
        assert_eq!(cat.region(10).unwrap().systems.len(), 2);
        assert_eq!(cat.system_of_location(60_000_004), Some(4));
        assert_eq!(cat.system_of_location(99), None);
    }

    #[test]
    fn test_invalid_volume_types_are_dropped() {
        let cat = UniverseCatalog::from_entities(
            vec![
                ItemType {
                    type_id: 1,
                    name: "Good".to_string(),
                    volume: 1.0,
                },
                ItemType {
                    type_id: 2,
                    name: "Bad".to_string(),
                    volume: -5.0,
                },
            ],
            vec![],
            vec![SolarSystem {
                system_id: 1,
                name: "Solo".to_string(),
                constellation_id: 1,
                region_id: 1,
                security: 1.0,
            }],
            vec![(1, "Lone".to_string())],
            vec![],
        )
        .unwrap();
        assert!(cat.item_type(1).is_some());
        assert!(cat.item_type(2).is_none());
    }

    #[test]
    fn test_empty_dataset_is_fatal() {
        let err = UniverseCatalog::from_entities(vec![], vec![], vec![], vec![], vec![]);
        assert!(err.is_err());
    }
}
