//! Splitting one physical meter into logical sub-meters.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use indexmap::IndexMap;
use tracing::{info, warn};

use super::generation::GenerationModel;
use super::meter::{FuelType, Meter, MeterKind};
use super::reading::{HalfHourlyReading, Synthesis};
use super::store::TimeSeriesStore;
use super::types::{SLOTS_PER_DAY, SlotWindow, X48, ZERO_X48, sum_x48};
use crate::error::{AmrError, ConfigError};

/// Largest per-slot difference tolerated between a parent and its sub-meters (kWh).
pub const RECONCILIATION_EPSILON: f64 = 1e-9;

/// Logical sub-meters a physical meter can be split into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubMeterKind {
    /// Consumption drawn from the grid for everything else; absorbs rounding.
    MainsConsume,
    StorageHeaters,
    /// Solar generation used on site.
    SelfConsume,
    /// Solar generation exported to the grid.
    Export,
    /// Total solar generation.
    Generation,
}

impl SubMeterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MainsConsume => "mains_consume",
            Self::StorageHeaters => "storage_heaters",
            Self::SelfConsume => "self_consume",
            Self::Export => "export",
            Self::Generation => "generation",
        }
    }

    /// Sub-meters whose values add up to the parent's consumption.
    pub fn is_consumption(&self) -> bool {
        matches!(self, Self::MainsConsume | Self::StorageHeaters | Self::SelfConsume)
    }

    fn synthesis(&self) -> Synthesis {
        match self {
            Self::MainsConsume => Synthesis::MainsExStorageHeater,
            Self::StorageHeaters => Synthesis::StorageHeater,
            Self::SelfConsume => Synthesis::SolarSelfConsumption,
            Self::Export => Synthesis::SolarExport,
            Self::Generation => Synthesis::SolarGeneration,
        }
    }

    fn fuel_type(&self, parent: FuelType) -> FuelType {
        match self {
            Self::MainsConsume => parent,
            Self::StorageHeaters => FuelType::StorageHeater,
            Self::SelfConsume | Self::Generation => FuelType::SolarPv,
            Self::Export => FuelType::ExportedSolarPv,
        }
    }
}

impl fmt::Display for SubMeterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checks that the consumption sub-meters of a split sum to `consumption` in
/// every slot.
///
/// # Errors
///
/// Returns `AmrError::ReconciliationMismatch` for the first slot that differs
/// by more than [`RECONCILIATION_EPSILON`].
pub fn check_reconciliation(
    meter_id: &str,
    date: NaiveDate,
    consumption: &X48,
    split: &DaySplit,
) -> Result<(), AmrError> {
    for (slot, &expected) in consumption.iter().enumerate() {
        let actual: f64 = split
            .iter()
            .filter(|(kind, _)| kind.is_consumption())
            .map(|(_, x48)| x48[slot])
            .sum();
        if (actual - expected).abs() > RECONCILIATION_EPSILON {
            return Err(AmrError::ReconciliationMismatch {
                meter_id: meter_id.to_string(),
                date,
                slot,
                expected,
                actual,
            });
        }
    }
    Ok(())
}

fn active(start: Option<NaiveDate>, end: Option<NaiveDate>, date: NaiveDate) -> bool {
    start.is_none_or(|s| date >= s) && end.is_none_or(|e| date <= e)
}

/// Storage heaters charging overnight in fixed windows.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageHeaterSettings {
    charge_windows: Vec<SlotWindow>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
}

impl StorageHeaterSettings {
    /// # Errors
    ///
    /// Returns a `ConfigError` if there are no windows or two windows overlap.
    pub fn new(
        charge_windows: Vec<SlotWindow>,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Self, ConfigError> {
        if charge_windows.is_empty() {
            return Err(ConfigError::new(
                "storage_heaters.charge_windows",
                "at least one charge window is required",
            ));
        }
        for (i, a) in charge_windows.iter().enumerate() {
            if charge_windows[i + 1..].iter().any(|b| a.overlaps(b)) {
                return Err(ConfigError::new(
                    "storage_heaters.charge_windows",
                    format!("charge window {i} overlaps a later window"),
                ));
            }
        }
        Ok(Self {
            charge_windows,
            start_date,
            end_date,
        })
    }

    pub fn in_charge_window(&self, slot: usize) -> bool {
        self.charge_windows.iter().any(|w| w.contains(slot))
    }
}

/// A PV installation and the model that estimates its output.
#[derive(Debug, Clone)]
pub struct SolarInstallation {
    pub capacity_kwp: f64,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub model: Arc<dyn GenerationModel>,
}

/// Per-slot values of every sub-meter for one day.
pub type DaySplit = IndexMap<SubMeterKind, X48>;

/// Splits a meter into storage-heater and solar sub-meters.
#[derive(Debug, Clone, Default)]
pub struct MeterDisaggregator {
    storage_heaters: Option<StorageHeaterSettings>,
    solar: Option<SolarInstallation>,
}

impl MeterDisaggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_storage_heaters(mut self, settings: StorageHeaterSettings) -> Self {
        self.storage_heaters = Some(settings);
        self
    }

    pub fn with_solar(mut self, installation: SolarInstallation) -> Self {
        self.solar = Some(installation);
        self
    }

    /// Returns `true` if nothing is configured to split out.
    pub fn is_empty(&self) -> bool {
        self.storage_heaters.is_none() && self.solar.is_none()
    }

    /// Sub-meter kinds produced, mains consumption first.
    pub fn kinds(&self) -> Vec<SubMeterKind> {
        let mut kinds = vec![SubMeterKind::MainsConsume];
        if self.storage_heaters.is_some() {
            kinds.push(SubMeterKind::StorageHeaters);
        }
        if self.solar.is_some() {
            kinds.extend([
                SubMeterKind::SelfConsume,
                SubMeterKind::Export,
                SubMeterKind::Generation,
            ]);
        }
        kinds
    }

    /// Splits one day of consumption.
    ///
    /// Solar self-consumption is generation clamped to `[0, consumption]` and
    /// the excess is export. Storage heaters then take all remaining consumption
    /// in charge-window slots. Mains consumption is whatever is left, so it
    /// absorbs any floating-point residue.
    ///
    /// `generation` is the day's PV output, ignored when no solar is configured.
    ///
    /// # Errors
    ///
    /// Returns `AmrError::ReconciliationMismatch` if consumption sub-meters do
    /// not sum to the parent within [`RECONCILIATION_EPSILON`].
    pub fn split_day(
        &self,
        meter_id: &str,
        date: NaiveDate,
        consumption: &X48,
        generation: &X48,
    ) -> Result<DaySplit, AmrError> {
        let storage = self
            .storage_heaters
            .as_ref()
            .filter(|s| active(s.start_date, s.end_date, date));
        let solar_active = self
            .solar
            .as_ref()
            .is_some_and(|s| active(s.start_date, s.end_date, date));

        let mut mains = ZERO_X48;
        let mut heaters = ZERO_X48;
        let mut self_consume = ZERO_X48;
        let mut export = ZERO_X48;
        let mut generated = ZERO_X48;

        for slot in 0..SLOTS_PER_DAY {
            let c = consumption[slot];
            if solar_active {
                let g = generation[slot].max(0.0);
                generated[slot] = g;
                self_consume[slot] = g.clamp(0.0, c.max(0.0));
                export[slot] = g - self_consume[slot];
            }
            if storage.is_some_and(|s| s.in_charge_window(slot)) {
                heaters[slot] = c - self_consume[slot];
            }
            mains[slot] = c - self_consume[slot] - heaters[slot];
        }

        let mut split = IndexMap::new();
        split.insert(SubMeterKind::MainsConsume, mains);
        if self.storage_heaters.is_some() {
            split.insert(SubMeterKind::StorageHeaters, heaters);
        }
        if self.solar.is_some() {
            split.insert(SubMeterKind::SelfConsume, self_consume);
            split.insert(SubMeterKind::Export, export);
            split.insert(SubMeterKind::Generation, generated);
        }
        check_reconciliation(meter_id, date, consumption, &split)?;
        Ok(split)
    }

    /// Builds every configured sub-meter of `parent`.
    ///
    /// Sub-meters share the parent's tariffs, carbon source and flags. Dates
    /// the parent lacks stay gaps in every sub-meter; confirmed-zero dates are
    /// confirmed zero in every sub-meter.
    ///
    /// # Errors
    ///
    /// Returns `AmrError::ReconciliationMismatch` if any day fails to reconcile.
    pub fn disaggregate(&self, parent: &Meter) -> Result<IndexMap<SubMeterKind, Meter>, AmrError> {
        let kinds = self.kinds();
        let mut stores: IndexMap<SubMeterKind, TimeSeriesStore> = kinds
            .iter()
            .map(|k| (*k, TimeSeriesStore::new(format!("{}-{}", parent.id(), k.as_str()))))
            .collect();
        let mut shares: IndexMap<SubMeterKind, BTreeMap<NaiveDate, f64>> =
            kinds.iter().map(|k| (*k, BTreeMap::new())).collect();
        let mut days_without_generation = 0usize;

        for reading in parent.store().readings() {
            let date = reading.date();
            let generation = match &self.solar {
                Some(solar) => match solar.model.generation_kwh_x48(date, solar.capacity_kwp) {
                    Some(x48) => x48,
                    None => {
                        days_without_generation += 1;
                        ZERO_X48
                    }
                },
                None => ZERO_X48,
            };
            let split = self.split_day(parent.id(), date, reading.kwh_x48(), &generation)?;

            let parent_kwh = reading.one_day_kwh();
            for (kind, x48) in split {
                if kind.is_consumption() {
                    let share = if parent_kwh > 0.0 {
                        sum_x48(&x48) / parent_kwh
                    } else if kind == SubMeterKind::MainsConsume {
                        1.0
                    } else {
                        0.0
                    };
                    if let Some(s) = shares.get_mut(&kind) {
                        s.insert(date, share);
                    }
                }
                if let Some(store) = stores.get_mut(&kind) {
                    let id = store.meter_id().to_string();
                    store.add(HalfHourlyReading::synthetic(
                        &id,
                        date,
                        kind.synthesis(),
                        reading.captured_at(),
                        x48,
                    ));
                }
            }
        }

        for date in parent.store().confirmed_zero_dates() {
            for store in stores.values_mut() {
                store.confirm_zero(date, date);
            }
            if let Some(mains) = shares.get_mut(&SubMeterKind::MainsConsume) {
                mains.insert(date, 1.0);
            }
        }

        if days_without_generation > 0 {
            warn!(
                meter = %parent.id(),
                days = days_without_generation,
                "no solar generation data, assumed zero"
            );
        }
        info!(
            meter = %parent.id(),
            sub_meters = ?kinds.iter().map(SubMeterKind::as_str).collect::<Vec<_>>(),
            days = parent.store().len(),
            "disaggregated meter"
        );

        let mut sub_meters = IndexMap::new();
        for (kind, store) in stores {
            let id = store.meter_id().to_string();
            let mut meter = Meter::new(id, kind.fuel_type(parent.fuel_type()), store)
                .with_name(format!("{} {}", parent.name(), kind.as_str().replace('_', " ")))
                .with_flags(parent.flags())
                .with_carbon(parent.carbon().clone())
                .with_baseload_settings(*parent.baseload_settings())
                .with_kind(MeterKind::SubMeter {
                    parent_id: parent.id().to_string(),
                    kind,
                    standing_charge_shares: shares.swap_remove(&kind).unwrap_or_default(),
                });
            if let Some(costs) = parent.cost_engine() {
                meter = meter.with_costs(Arc::clone(costs));
            }
            sub_meters.insert(kind, meter);
        }
        Ok(sub_meters)
    }
}
