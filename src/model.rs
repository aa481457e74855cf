/// TargetWindow, CanonicalRow, PipelineError
/// core data structures and error handling
///
/// Core data types for the SPI portal ingest service.
///
/// This module defines the shared domain model imported by all other modules.
/// It contains no I/O, only types and the handful of invariants that belong
/// to them (the single-day window, the fixed indicator family).

use chrono::{Duration, NaiveDate};

// ---------------------------------------------------------------------------
// Indicator family
// ---------------------------------------------------------------------------

/// SPI variants emitted by the portal, in canonical column order. Each code is
/// the index computed over a trailing window of that many months.
pub const INDICATOR_COLUMNS: [&str; 10] = [
    "SPI1", "SPI2", "SPI3", "SPI4", "SPI5", "SPI6", "SPI9", "SPI12", "SPI18", "SPI24",
];

pub const INDICATOR_COUNT: usize = INDICATOR_COLUMNS.len();

pub const COL_STATION_ID: &str = "station_id";
pub const COL_STATION_NAME: &str = "station_name";
pub const COL_OBSERVED_DATE: &str = "observed_date";

/// Full canonical column order as written to the destination tables.
pub fn canonical_columns() -> Vec<&'static str> {
    let mut cols = vec![COL_STATION_ID, COL_STATION_NAME, COL_OBSERVED_DATE];
    cols.extend(INDICATOR_COLUMNS);
    cols
}

/// Days between the run date and the report date. The portal publishes SPI
/// with a two-day delay.
pub const DEFAULT_LAG_DAYS: i64 = 2;

/// Longest lag accepted, about ten years.
pub const MAX_LAG_DAYS: i64 = 3650;

// ---------------------------------------------------------------------------
// Target window
// ---------------------------------------------------------------------------

/// The single calendar day requested from the portal.
///
/// Constructed only through `for_run_date`, so `start == end` always holds and
/// the day is strictly before the run date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl TargetWindow {
    /// Window for `run_date - lag_days`. A lag below one day is raised to one
    /// so the window never covers today or the future; lags are capped at
    /// `MAX_LAG_DAYS`.
    pub fn for_run_date(run_date: NaiveDate, lag_days: i64) -> Self {
        let lag = Duration::days(lag_days.clamp(1, MAX_LAG_DAYS));
        let day = run_date.checked_sub_signed(lag).unwrap_or(NaiveDate::MIN);
        Self { start: day, end: day }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Value typed into the portal's start date input.
    pub fn start_value(&self) -> String {
        self.start.format("%Y%m%d").to_string()
    }

    /// Value typed into the portal's end date input.
    pub fn end_value(&self) -> String {
        self.end.format("%Y%m%d").to_string()
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// One transformed report row, ready to be appended to a station table.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRow {
    pub station_id: i32,
    pub station_name: String,
    pub observed_date: NaiveDate,
    /// Indexed like `INDICATOR_COLUMNS`. `None` where the portal value could
    /// not be read as a finite number.
    pub indicators: [Option<f64>; INDICATOR_COUNT],
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that stop a run. Partition load failures are not here: they are
/// isolated per table and reported through `load::LoadSummary`.
#[derive(Debug, PartialEq)]
pub enum PipelineError {
    /// A UI control never became interactable. Absorbed inside retrieval.
    ControlNotFound(String),
    /// The download directory holds no report file.
    ArtifactMissing { dir: String },
    /// A canonical column is absent from the report header.
    SchemaMismatch { missing: Vec<String> },
    /// A station id or date cell could not be coerced.
    ParseError { line: u64, message: String },
    Io(String),
    Config(String),
}

impl PipelineError {
    /// Process exit status for a run aborted by this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::ArtifactMissing { .. } => 2,
            PipelineError::SchemaMismatch { .. } | PipelineError::ParseError { .. } => 3,
            PipelineError::ControlNotFound(_)
            | PipelineError::Io(_)
            | PipelineError::Config(_) => 1,
        }
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::ControlNotFound(name) => write!(f, "Control not found: {}", name),
            PipelineError::ArtifactMissing { dir } => {
                write!(f, "No downloaded report found in '{}'", dir)
            }
            PipelineError::SchemaMismatch { missing } => {
                write!(f, "Schema mismatch: missing column(s) {}", missing.join(", "))
            }
            PipelineError::ParseError { line, message } => {
                write!(f, "Parse error on line {}: {}", line, message)
            }
            PipelineError::Io(msg) => write!(f, "I/O error: {}", msg),
            PipelineError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err.to_string())
    }
}
