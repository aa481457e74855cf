/// Run configuration.
///
/// Two sources, both read once at startup and then passed down explicitly:
///   - `spi_portal.toml` for everything that isn't a secret: portal URL,
///     page selectors, selection lists, settle waits, the station registry.
///   - Environment variables (typically from `.env` via `dotenv`) for the
///     database and SSH tunnel credentials and the run environment flag.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::PipelineError;
use crate::stations::Station;

pub const DEFAULT_CONFIG_PATH: &str = "./spi_portal.toml";

/// Longest any single wait may be configured to.
pub const MAX_WAIT: Duration = Duration::from_secs(3600);

// ---------------------------------------------------------------------------
// File configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub portal: PortalConfig,
    #[serde(default)]
    pub page: PageConfig,
    pub selection: SelectionConfig,
    #[serde(default)]
    pub waits: WaitConfig,
    pub stations: Vec<Station>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalConfig {
    pub url: String,
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Extension of the exported report, without the dot.
    #[serde(default = "default_extension")]
    pub file_extension: String,
    /// Text encoding of the exported report.
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_extension() -> String {
    "csv".to_string()
}

fn default_encoding() -> String {
    "cp949".to_string()
}

/// Element ids and visible texts the field locator resolves against.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    pub start_date_id: String,
    pub end_date_id: String,
    pub submit_text: String,
    pub export_class: String,
    pub export_text: String,
    pub confirm_dialog_id: String,
    pub confirm_class: String,
    pub confirm_text: String,
    /// Substring of a tree toggle's `class` attribute while its group is collapsed.
    pub collapsed_marker: String,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            start_date_id: "startDt_d".to_string(),
            end_date_id: "endDt_d".to_string(),
            submit_text: "조 회".to_string(),
            export_class: "btn_file".to_string(),
            export_text: "CSV".to_string(),
            confirm_dialog_id: "loginPop".to_string(),
            confirm_class: "btn_gray".to_string(),
            confirm_text: "확인".to_string(),
            collapsed_marker: "close".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectionConfig {
    /// Region groups to expand, in order.
    pub regions: Vec<String>,
    #[serde(default = "default_indicator_group")]
    pub indicator_group: String,
    pub indicators: Vec<String>,
}

fn default_indicator_group() -> String {
    "표준강수지수".to_string()
}

/// Settle waits observed on the live portal. None of these steps has a
/// completion signal on the page.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    pub locate_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub date_settle_ms: u64,
    pub expand_settle_ms: u64,
    pub select_settle_ms: u64,
    pub results_settle_secs: u64,
    pub download_settle_secs: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            locate_timeout_secs: 20,
            poll_interval_ms: 250,
            date_settle_ms: 1000,
            expand_settle_ms: 500,
            select_settle_ms: 100,
            results_settle_secs: 5,
            download_settle_secs: 20,
        }
    }
}

impl WaitConfig {
    /// All waits zero except a short locate timeout. Used by tests.
    pub fn immediate() -> Self {
        Self {
            locate_timeout_secs: 0,
            poll_interval_ms: 1,
            date_settle_ms: 0,
            expand_settle_ms: 0,
            select_settle_ms: 0,
            results_settle_secs: 0,
            download_settle_secs: 0,
        }
    }

    pub fn locate_timeout(&self) -> Duration {
        Duration::from_secs(self.locate_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn date_settle(&self) -> Duration {
        Duration::from_millis(self.date_settle_ms)
    }

    pub fn expand_settle(&self) -> Duration {
        Duration::from_millis(self.expand_settle_ms)
    }

    pub fn select_settle(&self) -> Duration {
        Duration::from_millis(self.select_settle_ms)
    }

    pub fn results_settle(&self) -> Duration {
        Duration::from_secs(self.results_settle_secs)
    }

    pub fn download_settle(&self) -> Duration {
        Duration::from_secs(self.download_settle_secs)
    }

    fn validate(&self) -> Result<(), PipelineError> {
        let waits = [
            ("locate_timeout_secs", self.locate_timeout()),
            ("poll_interval_ms", self.poll_interval()),
            ("date_settle_ms", self.date_settle()),
            ("expand_settle_ms", self.expand_settle()),
            ("select_settle_ms", self.select_settle()),
            ("results_settle_secs", self.results_settle()),
            ("download_settle_secs", self.download_settle()),
        ];
        match waits.iter().find(|(_, d)| *d > MAX_WAIT) {
            Some((name, _)) => Err(PipelineError::Config(format!(
                "[waits] {} exceeds {}s",
                name,
                MAX_WAIT.as_secs()
            ))),
            None => Ok(()),
        }
    }
}

impl AppConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, PipelineError> {
        let config: AppConfig =
            toml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.stations.is_empty() {
            return Err(PipelineError::Config("no [[stations]] configured".to_string()));
        }
        self.waits.validate()?;
        crate::stations::validate_registry(&self.stations)
    }
}

/// Loads the configuration file at `path`.
pub fn load_config(path: &Path) -> Result<AppConfig, PipelineError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::Config(format!("cannot read '{}': {}", path.display(), e))
    })?;
    AppConfig::from_toml_str(&text)
}

// ---------------------------------------------------------------------------
// Environment configuration
// ---------------------------------------------------------------------------

/// Where the browser runs. `Server` means no display: headless Chrome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnvironment {
    Local,
    Server,
}

impl RunEnvironment {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        match lookup("SPI_ENV").as_deref() {
            Some("server") | Some("SERVER") | Some("production") => RunEnvironment::Server,
            _ => RunEnvironment::Local,
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }
}

/// Database coordinates as seen from the SSH host (or directly, without a tunnel).
#[derive(Debug, Clone, PartialEq)]
pub struct DbSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

/// SSH bastion used to reach the database.
#[derive(Debug, Clone, PartialEq)]
pub struct TunnelSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub private_key: PathBuf,
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String, PipelineError> {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| PipelineError::Config(format!("{} must be set", key)))
}

fn port(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<u16, PipelineError> {
    required(lookup, key)?
        .trim()
        .parse()
        .map_err(|_| PipelineError::Config(format!("{} is not a valid port", key)))
}

impl DbSettings {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PipelineError> {
        Ok(Self {
            host: required(&lookup, "DB_HOST")?,
            port: port(&lookup, "DB_PORT")?,
            user: required(&lookup, "DB_USER")?,
            password: lookup("DB_PASSWORD").unwrap_or_default(),
            dbname: required(&lookup, "DB_NAME")?,
        })
    }

    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }
}

impl TunnelSettings {
    /// `Ok(None)` when `SSH_HOST` is unset: connect to the database directly.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<Self>, PipelineError> {
        if lookup("SSH_HOST").filter(|v| !v.trim().is_empty()).is_none() {
            return Ok(None);
        }
        Ok(Some(Self {
            host: required(&lookup, "SSH_HOST")?,
            port: match lookup("SSH_PORT") {
                Some(_) => port(&lookup, "SSH_PORT")?,
                None => 22,
            },
            user: required(&lookup, "SSH_USER")?,
            private_key: PathBuf::from(required(&lookup, "SSH_PKEY")?),
        }))
    }

    pub fn from_env() -> Result<Option<Self>, PipelineError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    const MINIMAL: &str = r#"
        [portal]
        url = "https://example.test/spi"

        [selection]
        regions = ["경상남도"]
        indicators = ["SPI1"]

        [[stations]]
        id = 285
        name = "합천"
        label = "합천 (285)"
        region = "경상남도"
        table = "drought_impact_hapcheon_spi_index"
    "#;

    #[test]
    fn test_minimal_config_fills_defaults() {
        let config = AppConfig::from_toml_str(MINIMAL).expect("minimal config should parse");
        assert_eq!(config.portal.webdriver_url, "http://localhost:9515");
        assert_eq!(config.portal.file_extension, "csv");
        assert_eq!(config.page.start_date_id, "startDt_d");
        assert_eq!(config.selection.indicator_group, "표준강수지수");
        assert_eq!(config.waits.locate_timeout(), Duration::from_secs(20));
        assert_eq!(config.waits.download_settle(), Duration::from_secs(20));
        assert_eq!(config.stations.len(), 1);
    }

    #[test]
    fn test_repository_config_parses() {
        let config = load_config(Path::new(DEFAULT_CONFIG_PATH))
            .expect("shipped spi_portal.toml should be valid");
        assert_eq!(config.stations.len(), 4);
        assert_eq!(config.selection.indicators.len(), 10);
    }

    #[test]
    fn test_config_without_stations_is_rejected() {
        let text = r#"
            stations = []
            [portal]
            url = "https://example.test"
            [selection]
            regions = []
            indicators = []
        "#;
        assert!(matches!(
            AppConfig::from_toml_str(text),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_oversized_wait_is_rejected() {
        let text = format!("{}\n[waits]\ndownload_settle_secs = {}\n", MINIMAL, i64::MAX);
        match AppConfig::from_toml_str(&text) {
            Err(PipelineError::Config(msg)) => assert!(msg.contains("download_settle_secs")),
            other => panic!("expected config error, got {:?}", other),
        }

        let at_limit = format!("{}\n[waits]\nlocate_timeout_secs = 3600\n", MINIMAL);
        assert!(AppConfig::from_toml_str(&at_limit).is_ok());
    }

    #[test]
    fn test_db_settings_from_lookup() {
        let env = lookup(&[
            ("DB_HOST", "10.0.0.5"),
            ("DB_PORT", "5432"),
            ("DB_USER", "spi"),
            ("DB_PASSWORD", "secret"),
            ("DB_NAME", "drought"),
        ]);
        let db = DbSettings::from_lookup(env).expect("complete settings");
        assert_eq!(db.port, 5432);
        assert_eq!(db.dbname, "drought");
    }

    #[test]
    fn test_db_settings_reports_missing_key() {
        let env = lookup(&[("DB_HOST", "h"), ("DB_PORT", "not-a-port")]);
        let err = DbSettings::from_lookup(env).unwrap_err();
        assert!(err.to_string().contains("DB_PORT"));
    }

    #[test]
    fn test_tunnel_is_optional() {
        assert_eq!(TunnelSettings::from_lookup(lookup(&[])).unwrap(), None);

        let env = lookup(&[
            ("SSH_HOST", "bastion"),
            ("SSH_USER", "deploy"),
            ("SSH_PKEY", "/keys/id_ed25519"),
        ]);
        let tunnel = TunnelSettings::from_lookup(env).unwrap().expect("tunnel configured");
        assert_eq!(tunnel.port, 22);
    }

    #[test]
    fn test_run_environment_flag() {
        assert_eq!(RunEnvironment::from_lookup(lookup(&[])), RunEnvironment::Local);
        assert_eq!(
            RunEnvironment::from_lookup(lookup(&[("SPI_ENV", "server")])),
            RunEnvironment::Server
        );
    }
}
