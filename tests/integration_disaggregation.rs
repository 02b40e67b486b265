//! Integration tests for splitting meters into storage-heater and solar sub-meters.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use approx::assert_relative_eq;
use chrono::NaiveDate;

use amr_analytics::amr::disaggregate::{
    MeterDisaggregator, SolarInstallation, StorageHeaterSettings, SubMeterKind,
};
use amr_analytics::amr::generation::{DaylightProfileModel, YieldTableModel};
use amr_analytics::amr::meter::{FuelType, Meter, Metric};
use amr_analytics::amr::types::{SlotWindow, X48, sum_x48};
use amr_analytics::tariffs::binding::{HolderScope, TariffBinding};
use amr_analytics::tariffs::cost::CostKind;
use amr_analytics::tariffs::rates::{Charge, ChargeBasis, ConfiguredRates, UnitRate};

use common::{date, days_from, engine, school_day_profile, store_with};

fn overnight_heaters() -> StorageHeaterSettings {
    StorageHeaterSettings::new(
        vec![SlotWindow::parse("charge", "02:00", "06:00").expect("valid window")],
        None,
        None,
    )
    .expect("valid settings")
}

fn daylight_solar(capacity_kwp: f64, noise_std: f64) -> SolarInstallation {
    SolarInstallation {
        capacity_kwp,
        start_date: None,
        end_date: None,
        model: Arc::new(DaylightProfileModel::new(12, 40, 0.8, noise_std, 7).expect("valid model")),
    }
}

fn consumption_sub_meters_sum_to_parent(parent: &Meter, dates: &[NaiveDate]) {
    for d in dates {
        let original = parent.day_vector(*d, Metric::Kwh).expect("parent reading");
        let mut total: X48 = [0.0; 48];
        for (kind, sub) in parent.sub_meters() {
            if kind.is_consumption() {
                let x48 = sub.day_vector(*d, Metric::Kwh).expect("sub-meter reading");
                for slot in 0..48 {
                    total[slot] += x48[slot];
                }
            }
        }
        for slot in 0..48 {
            assert_relative_eq!(total[slot], original[slot], epsilon = 1e-9);
        }
    }
}

#[test]
fn storage_heater_scenario_attributes_32_kwh() {
    let mut day = [1.0; 48];
    for slot in 4..=13 {
        day[slot] = 4.0;
    }
    let split = MeterDisaggregator::new()
        .with_storage_heaters(overnight_heaters())
        .split_day("m1", date(1, 10), &day, &[0.0; 48])
        .expect("reconciles");
    let heaters = &split[&SubMeterKind::StorageHeaters];
    let mains = &split[&SubMeterKind::MainsConsume];
    assert_relative_eq!(sum_x48(heaters), 32.0);
    for slot in 4..12 {
        assert_relative_eq!(heaters[slot], 4.0);
    }
    assert_relative_eq!(mains[12], 4.0);
    assert_relative_eq!(mains[13], 4.0);
}

#[test]
fn every_slot_reconciles_with_heaters_and_noisy_solar() {
    let dates = days_from(date(6, 1), 10);
    let mut store = store_with("m1", &dates, school_day_profile(1.0));
    store.add(common::reading("m1", date(6, 4), school_day_profile(0.37)));
    let mut parent = Meter::new("m1", FuelType::Electricity, store);
    let sub_meters = MeterDisaggregator::new()
        .with_storage_heaters(overnight_heaters())
        .with_solar(daylight_solar(30.0, 0.2))
        .disaggregate(&parent)
        .expect("reconciles");
    assert_eq!(
        sub_meters.keys().copied().collect::<Vec<_>>(),
        vec![
            SubMeterKind::MainsConsume,
            SubMeterKind::StorageHeaters,
            SubMeterKind::SelfConsume,
            SubMeterKind::Export,
            SubMeterKind::Generation,
        ]
    );
    parent.attach_sub_meters(sub_meters);
    consumption_sub_meters_sum_to_parent(&parent, &dates);

    // Generation = self consumption + export
    let generation = parent.sub_meter(SubMeterKind::Generation).expect("generation");
    let self_consume = parent.sub_meter(SubMeterKind::SelfConsume).expect("self consume");
    let export = parent.sub_meter(SubMeterKind::Export).expect("export");
    for d in &dates {
        let total = generation.kwh_range(*d, *d).expect("present");
        let split = self_consume.kwh_range(*d, *d).expect("present")
            + export.kwh_range(*d, *d).expect("present");
        assert_relative_eq!(total, split, epsilon = 1e-9);
    }
    // A 30 kWp array exports on a low-consumption day
    assert!(export.kwh_range(date(6, 4), date(6, 4)).expect("present") > 0.0);
}

#[test]
fn missing_yield_is_zero_generation() {
    let dates = days_from(date(6, 20), 2);
    let parent = Meter::new("m1", FuelType::Electricity, store_with("m1", &dates, [1.0; 48]));
    let mut yields = BTreeMap::new();
    yields.insert(date(6, 20), [0.5; 48]);
    let solar = SolarInstallation {
        capacity_kwp: 2.0,
        start_date: None,
        end_date: None,
        model: Arc::new(YieldTableModel::new(yields)),
    };
    let sub_meters = MeterDisaggregator::new()
        .with_solar(solar)
        .disaggregate(&parent)
        .expect("reconciles");
    let generation = &sub_meters[&SubMeterKind::Generation];
    // 0.5 kW/kWp × 2 kWp for half an hour = 0.5 kWh per slot
    assert_relative_eq!(generation.kwh_range(date(6, 20), date(6, 20)).expect("present"), 24.0);
    assert_relative_eq!(generation.kwh_range(date(6, 21), date(6, 21)).expect("present"), 0.0);
    let mains = &sub_meters[&SubMeterKind::MainsConsume];
    assert_relative_eq!(mains.kwh_range(date(6, 20), date(6, 20)).expect("present"), 24.0);
}

#[test]
fn sub_meters_share_parent_standing_charges() {
    let dates = days_from(date(1, 8), 3);
    let rates = ConfiguredRates::new(
        vec![UnitRate {
            name: "flat_rate".to_string(),
            window: SlotWindow::ALL_DAY,
            rate: 0.2,
        }],
        vec![Charge {
            name: "standing_charge".to_string(),
            rate: 2.0,
            basis: ChargeBasis::Day,
        }],
        0.0,
    )
    .expect("valid rates");
    let binding = TariffBinding::new("t", HolderScope::Meter, Arc::new(rates));
    let store = store_with("m1", &dates, school_day_profile(1.0));
    let mut parent =
        Meter::new("m1", FuelType::Electricity, store).with_costs(engine("m1", vec![binding]));
    let sub_meters = MeterDisaggregator::new()
        .with_storage_heaters(overnight_heaters())
        .disaggregate(&parent)
        .expect("reconciles");
    parent.attach_sub_meters(sub_meters);

    for d in &dates {
        let whole = parent.day_cost(*d, CostKind::Accounting).expect("priced").total();
        let parts: f64 = parent
            .sub_meters()
            .values()
            .map(|sub| sub.day_cost(*d, CostKind::Accounting).expect("priced").total())
            .sum();
        assert_relative_eq!(whole, parts, epsilon = 1e-9);
    }
}

#[test]
fn vat_on_standing_charges_is_shared_with_sub_meters() {
    let dates = days_from(date(1, 8), 2);
    let rates = ConfiguredRates::new(
        vec![UnitRate {
            name: "flat_rate".to_string(),
            window: SlotWindow::ALL_DAY,
            rate: 0.2,
        }],
        vec![Charge {
            name: "standing_charge".to_string(),
            rate: 2.0,
            basis: ChargeBasis::Day,
        }],
        20.0,
    )
    .expect("valid rates");
    let binding = TariffBinding::new("t", HolderScope::Meter, Arc::new(rates));
    let store = store_with("m1", &dates, [1.0; 48]);
    let mut parent =
        Meter::new("m1", FuelType::Electricity, store).with_costs(engine("m1", vec![binding]));
    let sub_meters = MeterDisaggregator::new()
        .with_storage_heaters(overnight_heaters())
        .disaggregate(&parent)
        .expect("reconciles");
    parent.attach_sub_meters(sub_meters);

    for d in &dates {
        let whole = parent.day_cost(*d, CostKind::Accounting).expect("priced").total();
        // (9.6 + 2.0) plus 20% VAT
        assert_relative_eq!(whole, 13.92, epsilon = 1e-9);
        let parts: f64 = parent
            .sub_meters()
            .values()
            .map(|sub| sub.day_cost(*d, CostKind::Accounting).expect("priced").total())
            .sum();
        assert_relative_eq!(whole, parts, epsilon = 1e-9);
    }
}

#[test]
fn confirmed_zero_dates_carry_into_sub_meters() {
    let mut store = store_with("m1", &[date(1, 1), date(1, 3)], [1.0; 48]);
    store.confirm_zero(date(1, 2), date(1, 2));
    let parent = Meter::new("m1", FuelType::Electricity, store);
    let sub_meters = MeterDisaggregator::new()
        .with_storage_heaters(overnight_heaters())
        .disaggregate(&parent)
        .expect("reconciles");
    for sub in sub_meters.values() {
        assert!(sub.store().is_confirmed_zero(date(1, 2)));
    }
    let heaters = &sub_meters[&SubMeterKind::StorageHeaters];
    let mains = &sub_meters[&SubMeterKind::MainsConsume];
    // 8 charge-window slots per day on the two read days
    assert_relative_eq!(heaters.kwh_range(date(1, 1), date(1, 3)).expect("covered"), 16.0);
    assert_relative_eq!(mains.kwh_range(date(1, 1), date(1, 3)).expect("covered"), 80.0);
}
