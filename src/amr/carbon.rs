//! Carbon intensity used to convert kWh into kg CO2.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::types::{X48, multiply_x48, scale_x48};

/// UK mains gas emission factor (kg CO2 per kWh).
pub const GAS_KG_CO2_PER_KWH: f64 = 0.210;

/// Default grid electricity emission factor when no half-hourly profile is loaded.
pub const ELECTRICITY_KG_CO2_PER_KWH: f64 = 0.207;

/// Source of kg CO2 per kWh for a meter.
#[derive(Debug, Clone, PartialEq)]
pub enum CarbonIntensity {
    /// One factor for every slot (gas, or electricity without grid data).
    Constant(f64),
    /// Per-date half-hourly grid intensity, with a constant for dates not covered.
    HalfHourly {
        profile: BTreeMap<NaiveDate, X48>,
        fallback_kg_per_kwh: f64,
    },
}

impl CarbonIntensity {
    /// Half-hourly kg CO2 for a day of kWh.
    pub fn co2_x48(&self, date: NaiveDate, kwh_x48: &X48) -> X48 {
        match self {
            Self::Constant(factor) => scale_x48(kwh_x48, *factor),
            Self::HalfHourly {
                profile,
                fallback_kg_per_kwh,
            } => match profile.get(&date) {
                Some(intensity) => multiply_x48(kwh_x48, intensity),
                None => scale_x48(kwh_x48, *fallback_kg_per_kwh),
            },
        }
    }
}
