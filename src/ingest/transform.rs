/// Transform stage: downloaded report → canonical rows.
///
/// The portal's CSV uses Korean headers and CP949 text. This module decodes
/// it, maps the headers onto canonical names, coerces each cell, and projects
/// onto the fixed canonical column order. Extra columns are dropped.
///
/// Coercion policy:
///   - station id and observation date are strict: a bad cell fails the run
///   - indicators are lenient: anything that isn't a finite number becomes `None`
///
/// A canonical column missing from the header is a broken data contract and
/// fails the run before any row is produced.

use chrono::{NaiveDate, NaiveDateTime};
use csv::StringRecord;
use encoding_rs::Encoding;
use std::path::Path;

use crate::logging::{self, Stage};
use crate::model::{
    canonical_columns, CanonicalRow, PipelineError, COL_OBSERVED_DATE, COL_STATION_ID,
    COL_STATION_NAME, INDICATOR_COUNT,
};

/// Portal header → canonical column name.
const HEADER_ALIASES: &[(&str, &str)] = &[
    ("지점", COL_STATION_ID),
    ("지점명", COL_STATION_NAME),
    ("일시", COL_OBSERVED_DATE),
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d", "%Y.%m.%d"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"];

// ============================================================================
// Decoding
// ============================================================================

/// Resolves an encoding label. `cp949` is accepted as an alias for the
/// WHATWG `euc-kr` encoding, which is the same code page.
pub fn resolve_encoding(label: &str) -> Result<&'static Encoding, PipelineError> {
    let label = label.trim();
    if label.eq_ignore_ascii_case("cp949") || label.eq_ignore_ascii_case("ms949") {
        return Ok(encoding_rs::EUC_KR);
    }
    Encoding::for_label(label.as_bytes())
        .ok_or_else(|| PipelineError::Config(format!("unknown encoding '{}'", label)))
}

/// Decodes report bytes. A byte-order mark overrides `label`.
pub fn decode_report(bytes: &[u8], label: &str) -> Result<String, PipelineError> {
    let encoding = resolve_encoding(label)?;
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        logging::warn(
            Stage::Transform,
            None,
            &format!("report is not valid {}; undecodable bytes replaced", used.name()),
        );
    }
    Ok(text.into_owned())
}

// ============================================================================
// Cell coercion
// ============================================================================

/// Station ids sometimes come through as "101.0"; whole floats are accepted.
pub fn parse_station_id(cell: &str) -> Result<i32, String> {
    let cell = cell.trim();
    if let Ok(id) = cell.parse::<i32>() {
        return Ok(id);
    }
    match cell.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() <= i32::MAX as f64 => Ok(v as i32),
        _ => Err(format!("station id '{}' is not an integer", cell)),
    }
}

pub fn parse_observed_date(cell: &str) -> Result<NaiveDate, String> {
    let cell = cell.trim();
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(cell, f).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(cell, f).ok())
                .map(|dt| dt.date())
        })
        .ok_or_else(|| format!("date '{}' is not a recognised date", cell))
}

/// Lenient numeric coercion: blanks, placeholders and non-finite values are `None`.
pub fn parse_indicator(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

// ============================================================================
// Header mapping
// ============================================================================

fn canonical_name(header: &str) -> &str {
    let header = header.trim().trim_start_matches('\u{feff}');
    HEADER_ALIASES
        .iter()
        .find(|(native, _)| *native == header)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(header)
}

/// Source column index for each canonical column, in canonical order.
fn resolve_columns(headers: &StringRecord) -> Result<Vec<usize>, PipelineError> {
    let names: Vec<&str> = headers.iter().map(canonical_name).collect();
    let mut indices = Vec::new();
    let mut missing = Vec::new();
    for column in canonical_columns() {
        match names.iter().position(|n| *n == column) {
            Some(i) => indices.push(i),
            None => missing.push(column.to_string()),
        }
    }
    if missing.is_empty() {
        Ok(indices)
    } else {
        Err(PipelineError::SchemaMismatch { missing })
    }
}

// ============================================================================
// Transform
// ============================================================================

/// Transforms decoded report text into canonical rows, preserving row order.
pub fn transform_report(text: &str) -> Result<Vec<CanonicalRow>, PipelineError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| PipelineError::ParseError { line: 1, message: e.to_string() })?
        .clone();
    let columns = resolve_columns(&headers)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| PipelineError::ParseError {
            line: e.position().map(|p| p.line()).unwrap_or(0),
            message: e.to_string(),
        })?;
        if record.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let cell = |canonical_index: usize| record.get(columns[canonical_index]).unwrap_or("");
        let parse_err = |message: String| PipelineError::ParseError { line, message };

        let station_id = parse_station_id(cell(0)).map_err(parse_err)?;
        let station_name = cell(1).to_string();
        let observed_date = parse_observed_date(cell(2)).map_err(parse_err)?;

        let mut indicators = [None; INDICATOR_COUNT];
        for (i, slot) in indicators.iter_mut().enumerate() {
            *slot = parse_indicator(cell(3 + i));
        }

        rows.push(CanonicalRow {
            station_id,
            station_name,
            observed_date,
            indicators,
        });
    }

    Ok(rows)
}

/// Reads, decodes and transforms the report at `path`.
pub fn load_report(path: &Path, encoding: &str) -> Result<Vec<CanonicalRow>, PipelineError> {
    logging::info(
        Stage::Transform,
        None,
        &format!("Transforming {}", path.display()),
    );
    let bytes = std::fs::read(path)
        .map_err(|e| PipelineError::Io(format!("{}: {}", path.display(), e)))?;
    let text = decode_report(&bytes, encoding)?;
    let rows = transform_report(&text)?;

    let nulls: usize = rows
        .iter()
        .map(|r| r.indicators.iter().filter(|v| v.is_none()).count())
        .sum();
    logging::info(
        Stage::Transform,
        None,
        &format!("{} row(s) transformed, {} indicator cell(s) null", rows.len(), nulls),
    );
    Ok(rows)
}

// ============================================================================
// Tests
// ============================================================================
