//! CSV export of per-day metric rows.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use chrono::NaiveDate;

use crate::amr::meter::{Meter, Metric};
use crate::amr::store::dates_in;
use crate::amr::types::sum_x48;
use crate::error::AmrError;
use crate::tariffs::cost::CostKind;

/// Column header for daily export.
const HEADER: &str = "date,provenance,kwh,economic_cost,accounting_cost,co2_kg,status";

/// Why a row has blank columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Ok,
    /// No reading and not confirmed zero: every metric is blank.
    Gap,
    /// Consumption is known but no tariff covers the date: cost columns are blank.
    UnresolvedTariff,
}

impl RowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Gap => "gap",
            Self::UnresolvedTariff => "unresolved_tariff",
        }
    }
}

/// One meter-day of derived metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyRow {
    pub date: NaiveDate,
    /// Reading type code, `ZERO` for confirmed-zero dates, empty for gaps.
    pub provenance: String,
    pub kwh: Option<f64>,
    pub economic_cost: Option<f64>,
    pub accounting_cost: Option<f64>,
    pub co2_kg: Option<f64>,
    pub status: RowStatus,
}

fn day_cost_total(meter: &Meter, date: NaiveDate, kind: CostKind) -> Result<Option<f64>, AmrError> {
    match meter.day_cost(date, kind) {
        Ok(cost) => Ok(Some(cost.total())),
        Err(AmrError::UnresolvedTariff { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Builds one row per date in `[start, end]`.
///
/// Gaps and unpriced dates become rows with blank columns rather than errors.
///
/// # Errors
///
/// Returns an `AmrError` only for failures that are not "not enough data".
pub fn daily_rows(
    meter: &Meter,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<DailyRow>, AmrError> {
    let store = meter.store();
    let mut rows = Vec::new();
    for date in dates_in(start, end) {
        if !store.covers(date) {
            rows.push(DailyRow {
                date,
                provenance: String::new(),
                kwh: None,
                economic_cost: None,
                accounting_cost: None,
                co2_kg: None,
                status: RowStatus::Gap,
            });
            continue;
        }
        let provenance = match store.reading(date) {
            Ok(reading) => reading.provenance().code().to_string(),
            Err(_) => "ZERO".to_string(),
        };
        let economic_cost = day_cost_total(meter, date, CostKind::Economic)?;
        let accounting_cost = day_cost_total(meter, date, CostKind::Accounting)?;
        let status = if economic_cost.is_some() && accounting_cost.is_some() {
            RowStatus::Ok
        } else {
            RowStatus::UnresolvedTariff
        };
        rows.push(DailyRow {
            date,
            provenance,
            kwh: Some(store.one_day_kwh(date)?),
            economic_cost,
            accounting_cost,
            co2_kg: Some(sum_x48(&meter.day_vector(date, Metric::Co2)?)),
            status,
        });
    }
    Ok(rows)
}

/// Exports daily rows to a CSV file at the given path.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(rows: &[DailyRow], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_daily_csv(rows, buf)
}

fn optional(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(String::new, |v| format!("{v:.precision$}"))
}

/// Writes daily rows as CSV to any writer.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_daily_csv(rows: &[DailyRow], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    wtr.write_record(HEADER.split(','))?;

    for r in rows {
        wtr.write_record(&[
            r.date.format("%Y-%m-%d").to_string(),
            r.provenance.clone(),
            optional(r.kwh, 3),
            optional(r.economic_cost, 4),
            optional(r.accounting_cost, 4),
            optional(r.co2_kg, 3),
            r.status.as_str().to_string(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
