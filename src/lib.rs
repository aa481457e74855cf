/// Daily SPI (Standardized Precipitation Index) ingest.
///
/// Drives the KMA drought portal through its query form, picks up the CSV
/// export, normalizes it to canonical rows and appends each station's rows to
/// that station's table.
///
/// Layout, leaves first:
/// - `model`, `logging`, `config`, `stations` — shared types and setup.
/// - `browser` — the page seam, field locator and WebDriver client.
/// - `ingest`  — retrieval procedure, download pickup, transform.
/// - `load`    — partitioning and the per-table database writes.
/// - `pipeline` — one end-to-end run.

pub mod browser;
pub mod config;
pub mod ingest;
pub mod load;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod stations;
