/// One end-to-end run: retrieve → materialize → transform → partition → load.
///
/// Retrieval never aborts the run. Everything after it does: a missing file
/// or a report that doesn't match the canonical schema stops the run before
/// any table is touched. Load failures are per table and only show up in the
/// exit status.

use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::browser::BrowserLauncher;
use crate::config::{AppConfig, RunEnvironment};
use crate::ingest::download::{await_download, find_latest_file};
use crate::ingest::procedure::{RetrievalProcedure, RetrievalReport};
use crate::ingest::transform::load_report;
use crate::load::{load_partitions, partition_rows, Destination, LoadSummary};
use crate::logging::{self, Stage};
use crate::model::{PipelineError, TargetWindow};
use crate::stations::{selection_set, station_table_map};

/// Exit status when at least one partition failed to load.
pub const EXIT_LOAD_FAILED: u8 = 4;

/// Where the report comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportSource {
    /// Drive the portal and wait for the export.
    Portal,
    /// Newest report already in the download directory.
    LatestDownload,
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub run_date: NaiveDate,
    pub lag_days: i64,
    pub environment: RunEnvironment,
    pub source: ReportSource,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub window: TargetWindow,
    /// `None` when the portal was not visited or the browser never started.
    pub retrieval: Option<RetrievalReport>,
    pub report_file: PathBuf,
    pub rows: usize,
    /// (table, rows) for every mapped station, in registry id order.
    pub partitions: Vec<(String, usize)>,
    /// `None` on a dry run.
    pub load: Option<LoadSummary>,
}

impl RunSummary {
    pub fn exit_code(&self) -> u8 {
        match &self.load {
            Some(load) if load.has_failures() => EXIT_LOAD_FAILED,
            _ => 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Retrieval
// ---------------------------------------------------------------------------

/// Runs the retrieval procedure in a fresh browser session.
///
/// The session is dropped (and so terminated) before returning, whatever the
/// procedure managed. A browser that fails to launch is logged and yields
/// `None`; the run then falls back to whatever is in the download directory.
pub fn retrieve(
    launcher: &dyn BrowserLauncher,
    config: &AppConfig,
    environment: RunEnvironment,
    window: &TargetWindow,
) -> Option<RetrievalReport> {
    logging::info(
        Stage::Web,
        None,
        &format!("Opening portal for {} ({:?})", window.start(), environment),
    );

    let mut page = match launcher.launch(&config.portal.download_dir, environment) {
        Ok(page) => page,
        Err(e) => {
            logging::error(Stage::Web, None, &format!("browser unavailable: {}", e));
            return None;
        }
    };

    let procedure = RetrievalProcedure::new(config.page.clone(), config.waits.clone());
    let selection = selection_set(&config.selection, &config.stations);
    let report = procedure.run(page.as_mut(), &config.portal.url, window, &selection);

    drop(page);
    Some(report)
}

fn materialize(
    config: &AppConfig,
    since: SystemTime,
    export_requested: bool,
) -> Result<PathBuf, PipelineError> {
    let dir: &Path = &config.portal.download_dir;
    let ext = &config.portal.file_extension;
    if export_requested {
        await_download(
            dir,
            ext,
            config.waits.download_settle(),
            since,
            config.waits.poll_interval(),
        )
    } else {
        find_latest_file(dir, ext)
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Runs the whole pipeline. `destination: None` is a dry run: everything up
/// to partitioning happens, nothing is written.
pub fn run(
    config: &AppConfig,
    options: &RunOptions,
    launcher: &dyn BrowserLauncher,
    destination: Option<&mut dyn Destination>,
) -> Result<RunSummary, PipelineError> {
    let window = TargetWindow::for_run_date(options.run_date, options.lag_days);
    logging::info(
        Stage::System,
        None,
        &format!("Run date {}, target window {} ~ {}", options.run_date, window.start(), window.end()),
    );

    let (retrieval, report_file) = match &options.source {
        ReportSource::Portal => {
            let since = SystemTime::now();
            let retrieval = retrieve(launcher, config, options.environment, &window);
            let requested = retrieval.as_ref().is_some_and(|r| r.export_requested);
            (retrieval, materialize(config, since, requested)?)
        }
        ReportSource::LatestDownload => (None, materialize(config, SystemTime::now(), false)?),
        ReportSource::File(path) => (None, path.clone()),
    };
    logging::info(Stage::Download, None, &format!("Using report {}", report_file.display()));

    let rows = load_report(&report_file, &config.portal.encoding)?;
    logging::info(Stage::Transform, None, &format!("{} canonical row(s)", rows.len()));

    let partitions = partition_rows(&rows, &station_table_map(&config.stations));
    let sizes: Vec<(String, usize)> = partitions
        .iter()
        .map(|p| (p.table.clone(), p.rows.len()))
        .collect();

    let load = match destination {
        Some(destination) => {
            let summary = load_partitions(&partitions, destination);
            logging::info(Stage::System, None, "All database work completed");
            Some(summary)
        }
        None => {
            for (table, n) in &sizes {
                logging::info(Stage::Database, Some(table), &format!("dry run: {} row(s) not loaded", n));
            }
            None
        }
    };

    Ok(RunSummary {
        window,
        retrieval,
        report_file,
        rows: rows.len(),
        partitions: sizes,
        load,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(load: Option<LoadSummary>) -> RunSummary {
        RunSummary {
            window: TargetWindow::for_run_date(NaiveDate::from_ymd_opt(2024, 5, 3).unwrap(), 2),
            retrieval: None,
            report_file: PathBuf::from("r.csv"),
            rows: 0,
            partitions: Vec::new(),
            load,
        }
    }

    #[test]
    fn test_exit_code_reflects_failed_partitions() {
        assert_eq!(summary(None).exit_code(), 0);
        assert_eq!(summary(Some(LoadSummary::default())).exit_code(), 0);

        let failed = LoadSummary {
            failed: vec![("t".into(), "boom".into())],
            ..Default::default()
        };
        assert_eq!(summary(Some(failed)).exit_code(), EXIT_LOAD_FAILED);
    }
}
