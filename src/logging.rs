/// Structured logging for the SPI ingest service
///
/// Provides context-rich logging with stage tags and item identifiers
/// (region, station label, table name), timestamps, and severity levels.
/// Supports both console output and file-based logging for scheduled runs.

use chrono::Utc;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Web,
    Download,
    Transform,
    Database,
    System,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Web => write!(f, "WEB"),
            Stage::Download => write!(f, "DL"),
            Stage::Transform => write!(f, "XFORM"),
            Stage::Database => write!(f, "DB"),
            Stage::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - e.g. the row already exists in the table
    Expected,
    /// Unexpected failure - destination unreachable or misconfigured
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Global logger instance
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Minimum log level to display
    min_level: LogLevel,
    /// Optional file path for logging
    log_file: Option<String>,
    /// Whether to include timestamps in console output
    console_timestamps: bool,
}

impl Logger {
    /// Initialize the global logger
    pub fn init(min_level: LogLevel, log_file: Option<String>, console_timestamps: bool) {
        let logger = Logger {
            min_level,
            log_file,
            console_timestamps,
        };

        if let Ok(mut slot) = LOGGER.lock() {
            *slot = Some(logger);
        }
    }

    fn log(&self, level: LogLevel, stage: Stage, item: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let item_part = item.map(|s| format!(" [{}]", s)).unwrap_or_default();
        let log_entry = format!("{} {} {}{}: {}", timestamp, level, stage, item_part, message);

        // Console output
        if self.console_timestamps {
            match level {
                LogLevel::Error | LogLevel::Warning => eprintln!("{}", log_entry),
                LogLevel::Info | LogLevel::Debug => println!("{}", log_entry),
            }
        } else {
            match level {
                LogLevel::Error => eprintln!("   ✗ {}{}: {}", stage, item_part, message),
                LogLevel::Warning => eprintln!("   ⚠ {}{}: {}", stage, item_part, message),
                LogLevel::Info => println!("   {}", message),
                LogLevel::Debug => println!("   [DEBUG] {}", message),
            }
        }

        // File output
        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &log_entry) {
                eprintln!("Failed to write to log file {}: {}", path, e);
            }
        }
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Initialize the global logger
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    Logger::init(min_level, log_file.map(String::from), console_timestamps);
}

fn emit(level: LogLevel, stage: Stage, item: Option<&str>, message: &str) {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            logger.log(level, stage, item, message);
        }
    }
}

/// Log a general informational message
pub fn info(stage: Stage, item: Option<&str>, message: &str) {
    emit(LogLevel::Info, stage, item, message);
}

/// Log a warning message
pub fn warn(stage: Stage, item: Option<&str>, message: &str) {
    emit(LogLevel::Warning, stage, item, message);
}

/// Log an error message
pub fn error(stage: Stage, item: Option<&str>, message: &str) {
    emit(LogLevel::Error, stage, item, message);
}

/// Log a debug message
pub fn debug(stage: Stage, item: Option<&str>, message: &str) {
    emit(LogLevel::Debug, stage, item, message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify a partition load failure from its error text
pub fn classify_load_failure(_table: &str, error_message: &str) -> FailureType {
    // Duplicate rows from a rerun of the same day are harmless
    if error_message.contains("duplicate key") {
        FailureType::Expected
    }
    // Tunnel or connection problems mean the destination is down
    else if error_message.contains("connect")
        || error_message.contains("Tunnel")
        || error_message.contains("timeout")
    {
        FailureType::Unexpected
    }
    // Schema drift on the table side
    else if error_message.contains("does not exist") || error_message.contains("Invalid table") {
        FailureType::Unexpected
    } else {
        FailureType::Unknown
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a partition load failure with automatic classification
pub fn log_load_failure(table: &str, rows_attempted: usize, err: &dyn std::error::Error) {
    let error_msg = err.to_string();
    let failure_type = classify_load_failure(table, &error_msg);

    let message = format!(
        "append of {} row(s) failed [{}]: {}",
        rows_attempted, failure_type, error_msg
    );

    match failure_type {
        FailureType::Expected => warn(Stage::Database, Some(table), &message),
        FailureType::Unexpected => error(Stage::Database, Some(table), &message),
        FailureType::Unknown => error(Stage::Database, Some(table), &message),
    }
}

// ---------------------------------------------------------------------------
// Load Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of the partition load pass
pub fn log_load_summary(loaded: usize, rows: u64, skipped: usize, failed: usize) {
    let message = format!(
        "Load complete: {} row(s) into {} table(s), {} skipped (no rows), {} failed",
        rows, loaded, skipped, failed
    );

    if failed == 0 {
        info(Stage::Database, None, &message);
    } else if loaded == 0 {
        error(Stage::Database, None, &message);
    } else {
        warn(Stage::Database, None, &message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
    }

    #[test]
    fn test_load_failure_classification() {
        let dup = "db error: ERROR: duplicate key value violates unique constraint";
        assert_eq!(classify_load_failure("t", dup), FailureType::Expected);

        let down = "error connecting to server: Connection refused";
        assert_eq!(classify_load_failure("t", down), FailureType::Unexpected);

        let missing = "db error: ERROR: relation \"t\" does not exist";
        assert_eq!(classify_load_failure("t", missing), FailureType::Unexpected);

        assert_eq!(classify_load_failure("t", "something odd"), FailureType::Unknown);
    }

    #[test]
    fn test_stage_tags() {
        assert_eq!(Stage::Web.to_string(), "WEB");
        assert_eq!(Stage::Database.to_string(), "DB");
    }
}
