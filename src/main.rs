use chrono::{Local, NaiveDate};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use spi_ingest::browser::webdriver::WebDriverLauncher;
use spi_ingest::config::{self, DbSettings, RunEnvironment, TunnelSettings};
use spi_ingest::load::postgres::PostgresDestination;
use spi_ingest::load::Destination;
use spi_ingest::logging::{self, LogLevel, Stage};
use spi_ingest::model::{PipelineError, DEFAULT_LAG_DAYS, MAX_LAG_DAYS};
use spi_ingest::pipeline::{self, ReportSource, RunOptions};

/// Fetch the daily SPI report from the drought portal and load it per station.
#[derive(Debug, Parser)]
#[command(name = "spi_ingest", version)]
struct Cli {
    /// Portal, selection and station registry configuration.
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Run date (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Days between the run date and the requested report day.
    #[arg(long, default_value_t = DEFAULT_LAG_DAYS,
          value_parser = clap::value_parser!(i64).range(1..=MAX_LAG_DAYS))]
    lag_days: i64,

    /// Headless browser, regardless of SPI_ENV.
    #[arg(long)]
    server: bool,

    /// Don't open the portal; use the newest report in the download directory.
    #[arg(long, conflicts_with = "file")]
    skip_download: bool,

    /// Transform and load this report instead of downloading one.
    #[arg(long)]
    file: Option<PathBuf>,

    /// Partition and log sizes but write nothing.
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    log_file: Option<String>,

    #[arg(short, long)]
    verbose: bool,
}

fn execute(cli: Cli) -> Result<u8, PipelineError> {
    let mut app_config = config::load_config(&cli.config)?;
    if let Ok(url) = std::env::var("WEBDRIVER_URL") {
        app_config.portal.webdriver_url = url;
    }

    let environment = if cli.server {
        RunEnvironment::Server
    } else {
        RunEnvironment::from_env()
    };
    let source = match (cli.file, cli.skip_download) {
        (Some(path), _) => ReportSource::File(path),
        (None, true) => ReportSource::LatestDownload,
        (None, false) => ReportSource::Portal,
    };
    let options = RunOptions {
        run_date: cli.date.unwrap_or_else(|| Local::now().date_naive()),
        lag_days: cli.lag_days,
        environment,
        source,
    };

    let launcher = WebDriverLauncher::new(&app_config.portal.webdriver_url)
        .map_err(|e| PipelineError::Config(e.to_string()))?;

    let mut destination = if cli.dry_run {
        None
    } else {
        Some(PostgresDestination::new(
            DbSettings::from_env()?,
            TunnelSettings::from_env()?,
        ))
    };

    let summary = pipeline::run(
        &app_config,
        &options,
        &launcher,
        destination.as_mut().map(|d| d as &mut dyn Destination),
    )?;

    logging::info(
        Stage::System,
        None,
        &format!(
            "Finished: {} row(s) from {}",
            summary.rows,
            summary.report_file.display()
        ),
    );
    Ok(summary.exit_code())
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose { LogLevel::Debug } else { LogLevel::Info };
    logging::init_logger(level, cli.log_file.as_deref(), true);

    match execute(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            logging::error(Stage::System, None, &err.to_string());
            ExitCode::from(err.exit_code())
        }
    }
}
