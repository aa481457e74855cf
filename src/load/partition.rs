/// Split canonical rows by station into per-table partitions.

use std::collections::BTreeMap;

use crate::logging::{self, Stage};
use crate::model::CanonicalRow;

/// Rows for one mapped station, bound for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub station_id: i32,
    pub table: String,
    pub rows: Vec<CanonicalRow>,
}

/// One partition per map entry, in map order, possibly empty. Rows whose
/// station has no table are dropped; that is expected, not an error.
pub fn partition_rows(rows: &[CanonicalRow], table_map: &BTreeMap<i32, String>) -> Vec<Partition> {
    let partitions: Vec<Partition> = table_map
        .iter()
        .map(|(&station_id, table)| Partition {
            station_id,
            table: table.clone(),
            rows: rows
                .iter()
                .filter(|r| r.station_id == station_id)
                .cloned()
                .collect(),
        })
        .collect();

    let unmapped = rows
        .iter()
        .filter(|r| !table_map.contains_key(&r.station_id))
        .count();
    if unmapped > 0 {
        logging::debug(
            Stage::Database,
            None,
            &format!("{} row(s) for unmapped stations dropped", unmapped),
        );
    }

    partitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::INDICATOR_COUNT;
    use chrono::NaiveDate;

    fn row(station_id: i32) -> CanonicalRow {
        CanonicalRow {
            station_id,
            station_name: format!("s{}", station_id),
            observed_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            indicators: [Some(0.1); INDICATOR_COUNT],
        }
    }

    fn map(ids: &[i32]) -> BTreeMap<i32, String> {
        ids.iter().map(|id| (*id, format!("t_{}", id))).collect()
    }

    #[test]
    fn test_partitions_follow_map_and_drop_unmapped() {
        let rows = vec![row(285), row(999), row(101), row(101)];
        let parts = partition_rows(&rows, &map(&[101, 127, 285]));

        let summary: Vec<_> = parts.iter().map(|p| (p.station_id, p.rows.len())).collect();
        assert_eq!(summary, vec![(101, 2), (127, 0), (285, 1)]);

        let total: usize = parts.iter().map(|p| p.rows.len()).sum();
        assert_eq!(total, 3, "only the unmapped row should be missing");
        assert!(parts.iter().all(|p| p.rows.iter().all(|r| r.station_id == p.station_id)));
    }

    #[test]
    fn test_partition_keeps_input_order_within_station() {
        let mut first = row(101);
        first.station_name = "first".into();
        let mut second = row(101);
        second.station_name = "second".into();
        let parts = partition_rows(&[first, row(133), second], &map(&[101]));
        let names: Vec<_> = parts[0].rows.iter().map(|r| r.station_name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_empty_input_yields_empty_partitions() {
        let parts = partition_rows(&[], &map(&[101, 133]));
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| p.rows.is_empty()));
    }
}
