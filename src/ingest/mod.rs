/// Report acquisition for the SPI ingest service.
///
/// Submodules:
/// - `procedure` — drives the portal form through to the CSV export.
/// - `download`  — waits for and picks the exported file.
/// - `transform` — decodes the file into canonical rows.

pub mod download;
pub mod procedure;
pub mod transform;
