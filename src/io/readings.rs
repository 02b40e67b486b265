//! CSV ingestion of half-hourly readings and solar yields.
//!
//! Readings files have one row per meter per day:
//!
//! ```text
//! meter_id,date,type,substitute_date,captured_at,kwh_1,...,kwh_48
//! ```
//!
//! `type` is a four-letter provenance code (`ORIG`, `CMP1`, ...). Blank
//! `substitute_date` means none; blank `captured_at` means midnight on `date`.
//! Yield files have `date,yield_1,...,yield_48` in kW per kWp.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use csv::StringRecord;
use thiserror::Error;
use tracing::{debug, info};

use crate::amr::generation::YieldTableModel;
use crate::amr::reading::{HalfHourlyReading, Provenance};
use crate::amr::types::{SLOTS_PER_DAY, X48, ZERO_X48};
use crate::error::AmrError;

const DATE_FORMAT: &str = "%Y-%m-%d";
const CAPTURED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Leading columns of a readings file, before the 48 slot values.
const READING_COLUMNS: [&str; 5] = ["meter_id", "date", "type", "substitute_date", "captured_at"];

/// Failures while loading CSV input.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("cannot open \"{path}\": {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("line {line}: {message}")]
    Malformed { line: u64, message: String },

    #[error("line {line}: {source}")]
    Reading {
        line: u64,
        #[source]
        source: AmrError,
    },
}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map_or(0, csv::Position::line)
}

fn malformed(record: &StringRecord, message: impl Into<String>) -> IngestError {
    IngestError::Malformed {
        line: line_of(record),
        message: message.into(),
    }
}

fn parse_date(record: &StringRecord, column: &str, value: &str) -> Result<NaiveDate, IngestError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|e| malformed(record, format!("invalid {column} \"{value}\": {e}")))
}

/// Parses `SLOTS_PER_DAY` numbers starting at column `first`.
fn parse_x48(record: &StringRecord, first: usize) -> Result<X48, IngestError> {
    let mut values = ZERO_X48;
    for (slot, value) in values.iter_mut().enumerate() {
        let raw = record.get(first + slot).unwrap_or("").trim();
        *value = raw.parse().map_err(|_| {
            malformed(record, format!("slot {} value \"{raw}\" is not a number", slot + 1))
        })?;
    }
    Ok(values)
}

fn check_width(headers: &StringRecord, leading: usize) -> Result<(), IngestError> {
    let expected = leading + SLOTS_PER_DAY;
    if headers.len() == expected {
        Ok(())
    } else {
        Err(IngestError::Malformed {
            line: 1,
            message: format!("expected {expected} columns, header has {}", headers.len()),
        })
    }
}

/// Reads half-hourly readings from CSV.
///
/// # Errors
///
/// Returns an `IngestError` for a wrong header, an unparseable row, an
/// unknown provenance code, or a non-finite slot value.
pub fn read_readings_csv(reader: impl Read) -> Result<Vec<HalfHourlyReading>, IngestError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = rdr.headers()?.clone();
    check_width(&headers, READING_COLUMNS.len())?;
    for (i, name) in READING_COLUMNS.iter().enumerate() {
        if headers.get(i) != Some(*name) {
            return Err(IngestError::Malformed {
                line: 1,
                message: format!("column {} must be \"{name}\"", i + 1),
            });
        }
    }

    let mut readings = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let meter_id = record.get(0).unwrap_or("");
        if meter_id.is_empty() {
            return Err(malformed(&record, "empty meter_id"));
        }
        let date = parse_date(&record, "date", record.get(1).unwrap_or(""))?;
        let code = record.get(2).unwrap_or("");
        let provenance = Provenance::from_code(code)
            .ok_or_else(|| malformed(&record, format!("unknown reading type \"{code}\"")))?;
        let substitute_date = match record.get(3).unwrap_or("") {
            "" => None,
            raw => Some(parse_date(&record, "substitute_date", raw)?),
        };
        let captured_at = match record.get(4).unwrap_or("") {
            "" => date.and_time(NaiveTime::MIN),
            raw => NaiveDateTime::parse_from_str(raw, CAPTURED_AT_FORMAT)
                .map_err(|e| malformed(&record, format!("invalid captured_at \"{raw}\": {e}")))?,
        };
        let kwh_x48 = parse_x48(&record, READING_COLUMNS.len())?;
        let reading = HalfHourlyReading::new(
            meter_id,
            date,
            provenance,
            substitute_date,
            captured_at,
            kwh_x48,
        )
        .map_err(|source| IngestError::Reading {
            line: line_of(&record),
            source,
        })?;
        readings.push(reading);
    }
    debug!(rows = readings.len(), "parsed readings");
    Ok(readings)
}

/// Loads readings from a CSV file.
///
/// # Errors
///
/// Returns an `IngestError` if the file cannot be opened or parsed.
pub fn load_readings(path: &Path) -> Result<Vec<HalfHourlyReading>, IngestError> {
    let file = File::open(path).map_err(|source| IngestError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let readings = read_readings_csv(io::BufReader::new(file))?;
    info!(path = %path.display(), rows = readings.len(), "loaded readings");
    Ok(readings)
}

/// Reads per-date solar yields (kW per kWp) from CSV.
///
/// # Errors
///
/// Returns an `IngestError` for a wrong header width or an unparseable row.
pub fn read_yield_csv(reader: impl Read) -> Result<YieldTableModel, IngestError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = rdr.headers()?.clone();
    check_width(&headers, 1)?;

    let mut yields = BTreeMap::new();
    for record in rdr.records() {
        let record = record?;
        let date = parse_date(&record, "date", record.get(0).unwrap_or(""))?;
        let values = parse_x48(&record, 1)?;
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(malformed(&record, "yields must be finite and non-negative"));
        }
        yields.insert(date, values);
    }
    Ok(YieldTableModel::new(yields))
}

/// Loads solar yields from a CSV file.
///
/// # Errors
///
/// Returns an `IngestError` if the file cannot be opened or parsed.
pub fn load_yields(path: &Path) -> Result<YieldTableModel, IngestError> {
    let file = File::open(path).map_err(|source| IngestError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let model = read_yield_csv(io::BufReader::new(file))?;
    info!(path = %path.display(), days = model.len(), "loaded solar yields");
    Ok(model)
}
