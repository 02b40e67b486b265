//! Shared test fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};

use amr_analytics::amr::meter::{FuelType, Meter};
use amr_analytics::amr::reading::{HalfHourlyReading, Provenance};
use amr_analytics::amr::store::TimeSeriesStore;
use amr_analytics::amr::types::X48;
use amr_analytics::tariffs::binding::{HolderScope, TariffBinding};
use amr_analytics::tariffs::cost::CostEngine;
use amr_analytics::tariffs::rates::ConfiguredRates;
use amr_analytics::tariffs::resolver::TariffResolver;

/// Date in 2024.
pub fn date(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, month, day).expect("valid date")
}

/// Timestamp at noon on a 2024 date.
pub fn at_noon(month: u32, day: u32) -> NaiveDateTime {
    date(month, day).and_hms_opt(12, 0, 0).expect("valid time")
}

/// An original reading captured the morning after `date`.
pub fn reading(meter_id: &str, date: NaiveDate, kwh_x48: X48) -> HalfHourlyReading {
    let captured = date.succ_opt().unwrap_or(date).and_hms_opt(3, 0, 0).expect("valid time");
    HalfHourlyReading::new(meter_id, date, Provenance::Original, None, captured, kwh_x48)
        .expect("finite values")
}

/// Store holding `kwh_x48` on every date in `dates`.
pub fn store_with(meter_id: &str, dates: &[NaiveDate], kwh_x48: X48) -> TimeSeriesStore {
    let mut store = TimeSeriesStore::new(meter_id);
    for d in dates {
        store.add(reading(meter_id, *d, kwh_x48));
    }
    store
}

/// Consecutive dates starting at `start`.
pub fn days_from(start: NaiveDate, count: usize) -> Vec<NaiveDate> {
    start.iter_days().take(count).collect()
}

/// Open-ended flat-rate binding.
pub fn flat_binding(id: &str, scope: HolderScope, rate: f64) -> TariffBinding {
    TariffBinding::new(id, scope, Arc::new(ConfiguredRates::flat(rate)))
}

/// Cost engine for a single binding list.
pub fn engine(meter_id: &str, bindings: Vec<TariffBinding>) -> Arc<CostEngine> {
    Arc::new(CostEngine::new(TariffResolver::new(meter_id, bindings)))
}

/// Electricity meter with a flat meter-scoped tariff.
pub fn flat_meter(meter_id: &str, dates: &[NaiveDate], kwh_x48: X48, rate: f64) -> Meter {
    Meter::new(meter_id, FuelType::Electricity, store_with(meter_id, dates, kwh_x48))
        .with_costs(engine(meter_id, vec![flat_binding("flat", HolderScope::Meter, rate)]))
}

/// A varied but deterministic day profile.
pub fn school_day_profile(scale: f64) -> X48 {
    std::array::from_fn(|slot| {
        let occupied = (16..36).contains(&slot);
        scale * if occupied { 2.5 + (slot % 3) as f64 * 0.1 } else { 0.6 }
    })
}

/// A two-meter electricity school with a gas meter and tariffs at several scopes.
pub const SCHOOL_TOML: &str = r#"
[school]
name = "Riverside Primary"
urn = 100001

[[meters]]
id = "elec-main"
name = "Main electricity"
fuel = "electricity"

[meters.storage_heaters]
charge_windows = [{ from = "02:00", to = "06:00" }]

[[meters]]
id = "elec-annex"
name = "Annex electricity"
fuel = "electricity"

[meters.aggregation]
ignore_start_date = true

[[meters]]
id = "gas-main"
fuel = "gas"
confirmed_zero = [{ start = "2024-03-09", end = "2024-03-10" }]

[[tariffs]]
id = "main-dcc"
holder = "meter"
meter_id = "elec-main"
start_date = "2024-03-11"
created_at = "2024-03-12T10:00:00"
source = "dcc"
unit_rates = [
    { name = "nighttime_rate", from = "00:00", to = "07:00", rate = 0.15 },
    { name = "daytime_rate", from = "07:00", to = "00:00", rate = 0.30 },
]
charges = [{ name = "standing_charge", rate = 1.20, per = "day" }]
vat_percent = 5.0

[[tariffs]]
id = "school-electricity"
holder = "school"
fuel = "electricity"
start_date = "2024-03-06"
unit_rates = [{ name = "flat_rate", rate = 0.25 }]

[[tariffs]]
id = "system-gas"
holder = "system"
fuel = "gas"
start_date = "2024-03-04"
unit_rates = [{ name = "flat_rate", rate = 0.07 }]
"#;

/// Readings for [`SCHOOL_TOML`]: main from 1 March, annex from 5 March,
/// gas from 1 March, each to 14 March, with the gas confirmed-zero weekend missing.
pub fn school_readings() -> Vec<HalfHourlyReading> {
    let mut readings = Vec::new();
    for d in days_from(date(3, 1), 14) {
        readings.push(reading("elec-main", d, school_day_profile(1.0)));
        if d >= date(3, 5) {
            readings.push(reading("elec-annex", d, school_day_profile(0.5)));
        }
        if d != date(3, 9) && d != date(3, 10) {
            readings.push(reading("gas-main", d, [2.0; 48]));
        }
    }
    readings
}
