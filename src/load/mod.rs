/// Partition & load stage.
///
/// Each mapped station's rows are appended to that station's table on their
/// own: a failure is logged with the table and row count and the next
/// partition is attempted anyway. There is no transaction spanning stations
/// and no retry.
///
/// Submodules:
/// - `partition` — pure split of canonical rows by station.
/// - `postgres`  — the real destination.
/// - `tunnel`    — SSH port forward used to reach the database.

pub mod partition;
pub mod postgres;
pub mod tunnel;

pub use partition::{partition_rows, Partition};

use std::fmt;

use crate::logging::{self, Stage};
use crate::model::CanonicalRow;

// ---------------------------------------------------------------------------
// Destination seam
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum LoadError {
    /// The SSH tunnel could not be established.
    Tunnel(String),
    /// The database refused or never answered the connection.
    Connect(String),
    /// The database rejected the insert or commit.
    Write(String),
    InvalidTable(String),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Tunnel(msg) => write!(f, "Tunnel error: {}", msg),
            LoadError::Connect(msg) => write!(f, "Could not connect to database: {}", msg),
            LoadError::Write(msg) => write!(f, "Write rejected: {}", msg),
            LoadError::InvalidTable(name) => write!(f, "Invalid table name: {}", name),
        }
    }
}

impl std::error::Error for LoadError {}

/// Somewhere rows can be appended, one table at a time.
///
/// Implementations own any connection for the duration of a single call.
pub trait Destination {
    /// Appends `rows` to `table` and returns the number of rows written.
    fn append(&mut self, table: &str, rows: &[CanonicalRow]) -> Result<u64, LoadError>;
}

// ---------------------------------------------------------------------------
// Load pass
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadSummary {
    /// (table, rows written)
    pub loaded: Vec<(String, u64)>,
    /// Stations with no rows in this report.
    pub skipped: Vec<i32>,
    /// (table, cause)
    pub failed: Vec<(String, String)>,
}

impl LoadSummary {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn rows_written(&self) -> u64 {
        self.loaded.iter().map(|(_, n)| n).sum()
    }
}

/// Appends every non-empty partition to its table.
pub fn load_partitions(partitions: &[Partition], destination: &mut dyn Destination) -> LoadSummary {
    let mut summary = LoadSummary::default();

    for partition in partitions {
        if partition.rows.is_empty() {
            logging::info(
                Stage::Database,
                Some(&partition.table),
                &format!("no rows for station {} in this report, skipped", partition.station_id),
            );
            summary.skipped.push(partition.station_id);
            continue;
        }

        match destination.append(&partition.table, &partition.rows) {
            Ok(written) => {
                logging::info(
                    Stage::Database,
                    Some(&partition.table),
                    &format!("✓ {} row(s) appended", written),
                );
                summary.loaded.push((partition.table.clone(), written));
            }
            Err(e) => {
                logging::log_load_failure(&partition.table, partition.rows.len(), &e);
                summary.failed.push((partition.table.clone(), e.to_string()));
            }
        }
    }

    logging::log_load_summary(
        summary.loaded.len(),
        summary.rows_written(),
        summary.skipped.len(),
        summary.failed.len(),
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::INDICATOR_COUNT;
    use chrono::NaiveDate;

    /// Records appends; fails for the tables it is told to.
    #[derive(Default)]
    struct Recorder {
        appended: Vec<(String, usize)>,
        failing: Vec<String>,
    }

    impl Destination for Recorder {
        fn append(&mut self, table: &str, rows: &[CanonicalRow]) -> Result<u64, LoadError> {
            if self.failing.iter().any(|t| t == table) {
                return Err(LoadError::Connect("connection refused".into()));
            }
            self.appended.push((table.to_string(), rows.len()));
            Ok(rows.len() as u64)
        }
    }

    fn partition(station_id: i32, n: usize) -> Partition {
        let row = CanonicalRow {
            station_id,
            station_name: "x".into(),
            observed_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            indicators: [None; INDICATOR_COUNT],
        };
        Partition {
            station_id,
            table: format!("t_{}", station_id),
            rows: vec![row; n],
        }
    }

    #[test]
    fn test_failure_is_isolated_to_its_partition() {
        let mut dest = Recorder {
            failing: vec!["t_127".into()],
            ..Default::default()
        };
        let parts = [partition(101, 1), partition(127, 2), partition(133, 1)];
        let summary = load_partitions(&parts, &mut dest);

        assert_eq!(dest.appended, vec![("t_101".to_string(), 1), ("t_133".to_string(), 1)]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "t_127");
        assert!(summary.failed[0].1.contains("connection refused"));
        assert_eq!(summary.rows_written(), 2);
    }

    #[test]
    fn test_empty_partition_is_skipped_without_append() {
        let mut dest = Recorder::default();
        let summary = load_partitions(&[partition(101, 0), partition(133, 3)], &mut dest);
        assert_eq!(dest.appended, vec![("t_133".to_string(), 3)]);
        assert_eq!(summary.skipped, vec![101]);
        assert!(!summary.has_failures());
    }
}
