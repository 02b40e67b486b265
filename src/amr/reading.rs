//! One meter's half-hourly readings for one day, tagged with where they came from.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};

use super::types::{SLOTS_PER_DAY, X48, sum_x48};
use crate::error::AmrError;

/// Kinds of correction applied to raw meter data before it reaches the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Correction {
    /// Missing slots filled by interpolating neighbouring values.
    Interpolated,
    /// Whole day replaced by a similar day's readings.
    SubstitutedDay,
    /// Day set to zero (weekend, holiday, meter known off).
    ZeroFilled,
    /// Values rescaled after a units error.
    Rescaled,
    /// Placeholder values for an otherwise unusable day.
    Placeholder,
}

/// Kinds of reading produced by aggregation or disaggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Synthesis {
    Aggregated,
    StorageHeater,
    MainsExStorageHeater,
    SolarGeneration,
    SolarExport,
    SolarSelfConsumption,
}

/// Origin of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    /// Supplied by the meter as-is.
    Original,
    Corrected(Correction),
    Synthetic(Synthesis),
}

impl Provenance {
    /// Maps an ingestion code (e.g. `"ORIG"`, `"CMP1"`, `"ESS1"`) onto a provenance.
    ///
    /// Returns `None` for codes that do not describe usable data.
    pub fn from_code(code: &str) -> Option<Self> {
        use Correction::*;
        let p = match code {
            "ORIG" => Self::Original,
            "CMP1" => Self::Corrected(Interpolated),
            "CMP2" | "ESS1" | "ESW1" | "ESh1" | "ESH1" | "ESBH" | "GSS1" | "GSW1" | "GSh1"
            | "GSH1" | "GSBH" => Self::Corrected(SubstitutedDay),
            "MWKE" | "MHOL" | "MDTZ" | "G0H1" | "E0H1" | "SUMZ" | "ALLZ" | "ZMDR" | "ZDTR" => {
                Self::Corrected(ZeroFilled)
            }
            "S31M" => Self::Corrected(Rescaled),
            "PROB" => Self::Corrected(Placeholder),
            "AGGR" => Self::Synthetic(Synthesis::Aggregated),
            "STOR" => Self::Synthetic(Synthesis::StorageHeater),
            "STEX" => Self::Synthetic(Synthesis::MainsExStorageHeater),
            "SOLR" => Self::Synthetic(Synthesis::SolarGeneration),
            "SOLE" => Self::Synthetic(Synthesis::SolarExport),
            "SOLS" => Self::Synthetic(Synthesis::SolarSelfConsumption),
            _ => return None,
        };
        Some(p)
    }

    /// Canonical four-letter code, used on export.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Original => "ORIG",
            Self::Corrected(Correction::Interpolated) => "CMP1",
            Self::Corrected(Correction::SubstitutedDay) => "CMP2",
            Self::Corrected(Correction::ZeroFilled) => "ALLZ",
            Self::Corrected(Correction::Rescaled) => "S31M",
            Self::Corrected(Correction::Placeholder) => "PROB",
            Self::Synthetic(Synthesis::Aggregated) => "AGGR",
            Self::Synthetic(Synthesis::StorageHeater) => "STOR",
            Self::Synthetic(Synthesis::MainsExStorageHeater) => "STEX",
            Self::Synthetic(Synthesis::SolarGeneration) => "SOLR",
            Self::Synthetic(Synthesis::SolarExport) => "SOLE",
            Self::Synthetic(Synthesis::SolarSelfConsumption) => "SOLS",
        }
    }

    pub fn is_original(&self) -> bool {
        matches!(self, Self::Original)
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One day's 48 half-hourly kWh values for one meter.
///
/// Readings are immutable. A correction is a new reading for the same date
/// that replaces this one in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct HalfHourlyReading {
    meter_id: String,
    date: NaiveDate,
    provenance: Provenance,
    substitute_date: Option<NaiveDate>,
    captured_at: NaiveDateTime,
    kwh_x48: X48,
    one_day_kwh: f64,
}

impl HalfHourlyReading {
    /// Creates a reading, rejecting non-finite values.
    ///
    /// # Errors
    ///
    /// Returns `AmrError::InsufficientData` if any slot is NaN or infinite.
    pub fn new(
        meter_id: impl Into<String>,
        date: NaiveDate,
        provenance: Provenance,
        substitute_date: Option<NaiveDate>,
        captured_at: NaiveDateTime,
        kwh_x48: X48,
    ) -> Result<Self, AmrError> {
        let meter_id = meter_id.into();
        if let Some(slot) = kwh_x48.iter().position(|v| !v.is_finite()) {
            return Err(AmrError::InsufficientData {
                meter_id,
                reason: format!("non-numeric value in slot {slot} on {date}"),
            });
        }
        Ok(Self {
            meter_id,
            date,
            provenance,
            substitute_date,
            captured_at,
            one_day_kwh: sum_x48(&kwh_x48),
            kwh_x48,
        })
    }

    /// Creates a derived reading (aggregate or sub-meter) from already-validated values.
    pub(crate) fn synthetic(
        meter_id: &str,
        date: NaiveDate,
        synthesis: Synthesis,
        captured_at: NaiveDateTime,
        kwh_x48: X48,
    ) -> Self {
        Self {
            meter_id: meter_id.to_string(),
            date,
            provenance: Provenance::Synthetic(synthesis),
            substitute_date: None,
            captured_at,
            one_day_kwh: sum_x48(&kwh_x48),
            kwh_x48,
        }
    }

    pub fn meter_id(&self) -> &str {
        &self.meter_id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    /// Date whose readings were copied in, for substituted days.
    pub fn substitute_date(&self) -> Option<NaiveDate> {
        self.substitute_date
    }

    pub fn captured_at(&self) -> NaiveDateTime {
        self.captured_at
    }

    pub fn kwh_x48(&self) -> &X48 {
        &self.kwh_x48
    }

    /// kWh for a single slot; slots outside 0..48 read as zero.
    pub fn kwh_at(&self, slot: usize) -> f64 {
        if slot < SLOTS_PER_DAY {
            self.kwh_x48[slot]
        } else {
            0.0
        }
    }

    /// Total kWh for the day.
    pub fn one_day_kwh(&self) -> f64 {
        self.one_day_kwh
    }
}
