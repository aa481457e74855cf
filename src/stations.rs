/// Station registry for the SPI ingest service.
///
/// Each configured station ties together the three identities it has across
/// the pipeline: the label shown in the portal's station tree (and the region
/// group it sits under), the numeric id in the downloaded report, and the
/// destination table its rows are appended to. This is the single source of
/// truth for all three; other modules receive the derived views below.

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};

use crate::config::SelectionConfig;
use crate::model::PipelineError;

// ---------------------------------------------------------------------------
// Station metadata
// ---------------------------------------------------------------------------

/// One `[[stations]]` entry of `spi_portal.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Station {
    /// Numeric station id as it appears in the report's `지점` column.
    pub id: i32,
    /// Station display name.
    pub name: String,
    /// Checkbox label in the portal tree, e.g. "춘천 (101)".
    pub label: String,
    /// Region group the label is nested under in the tree.
    pub region: String,
    /// Destination table for this station's rows.
    pub table: String,
}

// ---------------------------------------------------------------------------
// Derived views
// ---------------------------------------------------------------------------

/// A station checkbox to tick, with the region group that must be expanded first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationSelection {
    pub label: String,
    pub region: String,
}

/// Everything the retrieval procedure clicks, in click order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionSet {
    pub regions: Vec<String>,
    pub stations: Vec<StationSelection>,
    pub indicator_group: String,
    pub indicators: Vec<String>,
}

/// Builds the selection set from the `[selection]` table and the registry.
/// Station order follows the registry.
pub fn selection_set(selection: &SelectionConfig, stations: &[Station]) -> SelectionSet {
    SelectionSet {
        regions: selection.regions.clone(),
        stations: stations
            .iter()
            .map(|s| StationSelection {
                label: s.label.clone(),
                region: s.region.clone(),
            })
            .collect(),
        indicator_group: selection.indicator_group.clone(),
        indicators: selection.indicators.clone(),
    }
}

/// Station id → destination table.
pub fn station_table_map(stations: &[Station]) -> BTreeMap<i32, String> {
    stations.iter().map(|s| (s.id, s.table.clone())).collect()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Table names are interpolated into SQL, so only plain identifiers
/// (optionally schema-qualified) are accepted.
pub fn is_valid_table_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(c) if c.is_ascii_lowercase() || c == '_' => chars
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'),
                _ => false,
            }
        })
        && name.len() <= 127
}

/// Rejects duplicate ids, duplicate tables and unsafe table names.
pub fn validate_registry(stations: &[Station]) -> Result<(), PipelineError> {
    let mut ids = HashSet::new();
    let mut tables = HashSet::new();
    for station in stations {
        if !ids.insert(station.id) {
            return Err(PipelineError::Config(format!(
                "duplicate station id {} in registry",
                station.id
            )));
        }
        if !tables.insert(station.table.as_str()) {
            return Err(PipelineError::Config(format!(
                "table '{}' is mapped to more than one station",
                station.table
            )));
        }
        if !is_valid_table_name(&station.table) {
            return Err(PipelineError::Config(format!(
                "invalid table name '{}' for station {}",
                station.table, station.id
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_config, DEFAULT_CONFIG_PATH};
    use std::path::Path;

    fn registry() -> Vec<Station> {
        load_config(Path::new(DEFAULT_CONFIG_PATH))
            .expect("spi_portal.toml should load")
            .stations
    }

    fn station(id: i32, table: &str) -> Station {
        Station {
            id,
            name: format!("s{}", id),
            label: format!("s{} ({})", id, id),
            region: "r".to_string(),
            table: table.to_string(),
        }
    }

    #[test]
    fn test_registry_contains_all_expected_stations() {
        let expected = [
            (101, "drought_impact_chuncheon_spi_index"),
            (127, "drought_impact_chungju_spi_index"),
            (133, "drought_impact_daejeon_spi_index"),
            (285, "drought_impact_hapcheon_spi_index"),
        ];
        let map = station_table_map(&registry());
        for (id, table) in expected {
            assert_eq!(map.get(&id).map(String::as_str), Some(table), "station {}", id);
        }
    }

    #[test]
    fn test_labels_carry_the_station_id() {
        // The portal tree labels read "name (id)". A mismatch here means we
        // tick one station and route another station's table.
        for station in registry() {
            assert!(
                station.label.ends_with(&format!("({})", station.id)),
                "label '{}' does not end with its id {}",
                station.label,
                station.id
            );
        }
    }

    #[test]
    fn test_every_station_region_is_expanded() {
        let config = load_config(Path::new(DEFAULT_CONFIG_PATH)).unwrap();
        for station in &config.stations {
            assert!(
                config.selection.regions.contains(&station.region),
                "region '{}' of station {} is not in the expansion list",
                station.region,
                station.id
            );
        }
    }

    #[test]
    fn test_selection_set_preserves_registry_order() {
        let config = load_config(Path::new(DEFAULT_CONFIG_PATH)).unwrap();
        let set = selection_set(&config.selection, &config.stations);
        let labels: Vec<_> = set.stations.iter().map(|s| s.label.as_str()).collect();
        let expected: Vec<_> = config.stations.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, expected);
        assert_eq!(set.indicators, config.selection.indicators);
    }

    #[test]
    fn test_table_name_validation() {
        assert!(is_valid_table_name("drought_impact_chuncheon_spi_index"));
        assert!(is_valid_table_name("spi.chuncheon"));
        assert!(!is_valid_table_name("Chuncheon"));
        assert!(!is_valid_table_name("spi; DROP TABLE x"));
        assert!(!is_valid_table_name("a.b.c"));
        assert!(!is_valid_table_name(""));
        assert!(!is_valid_table_name("1table"));
    }

    #[test]
    fn test_duplicate_ids_and_tables_rejected() {
        assert!(validate_registry(&[station(1, "a"), station(2, "b")]).is_ok());
        assert!(validate_registry(&[station(1, "a"), station(1, "b")]).is_err());
        assert!(validate_registry(&[station(1, "a"), station(2, "a")]).is_err());
        assert!(validate_registry(&[station(1, "Bad-Name")]).is_err());
    }
}
