//! Load-time assembly of a school's meters, tariffs and aggregates.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::amr::aggregate::{AggregationRule, Constituent, MeterAggregator};
use crate::amr::carbon::CarbonIntensity;
use crate::amr::disaggregate::{MeterDisaggregator, SubMeterKind};
use crate::amr::generation::GenerationModel;
use crate::amr::meter::{FuelClass, FuelType, Meter, MeterFlags, Metric};
use crate::amr::reading::HalfHourlyReading;
use crate::amr::store::{TimeSeriesStore, dates_in};
use crate::amr::types::sum_x48;
use crate::config::{MeterConfig, SchoolConfig};
use crate::error::{AmrError, ConfigError};
use crate::tariffs::cost::{CostEngine, CostKind, RangeTotal};
use crate::tariffs::resolver::{TariffCoverage, TariffResolver};

/// Failures while assembling a school.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid school configuration: {}", join_errors(.0))]
    Invalid(Vec<ConfigError>),

    #[error(transparent)]
    Amr(#[from] AmrError),
}

impl From<ConfigError> for BuildError {
    fn from(e: ConfigError) -> Self {
        Self::Invalid(vec![e])
    }
}

fn join_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A school's meters: physical meters with their sub-meters and one
/// aggregate per fuel class.
#[derive(Debug)]
pub struct SchoolModel {
    pub name: String,
    meters: IndexMap<String, Arc<Meter>>,
    aggregates: IndexMap<FuelClass, Arc<Meter>>,
    aggregation_gaps: IndexMap<FuelClass, Vec<NaiveDate>>,
}

impl SchoolModel {
    /// Builds every meter in `config` from `readings`.
    ///
    /// Readings for meters not in the configuration are skipped with a
    /// warning. `yields` feeds solar installations configured with the
    /// yield-table model.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::Invalid` with every configuration problem, or
    /// `BuildError::Amr` if disaggregation fails to reconcile or aggregation
    /// is rejected.
    pub fn build(
        config: &SchoolConfig,
        readings: impl IntoIterator<Item = HalfHourlyReading>,
        yields: Option<Arc<dyn GenerationModel>>,
    ) -> Result<Self, BuildError> {
        let errors = config.validate();
        if !errors.is_empty() {
            for e in &errors {
                warn!(field = %e.field, "{}", e.message);
            }
            return Err(BuildError::Invalid(errors));
        }

        let mut stores: IndexMap<String, TimeSeriesStore> = config
            .meters
            .iter()
            .map(|m| (m.id.clone(), TimeSeriesStore::new(m.id.clone())))
            .collect();
        let mut skipped: IndexMap<String, usize> = IndexMap::new();
        for reading in readings {
            match stores.get_mut(reading.meter_id()) {
                Some(store) => {
                    if let Some(previous) = store.add(reading) {
                        debug!(
                            meter = %previous.meter_id(),
                            date = %previous.date(),
                            "reading superseded"
                        );
                    }
                }
                None => *skipped.entry(reading.meter_id().to_string()).or_default() += 1,
            }
        }
        for (meter_id, rows) in &skipped {
            warn!(meter = %meter_id, rows, "readings for unconfigured meter skipped");
        }

        let mut meters = IndexMap::new();
        let mut rules: IndexMap<String, AggregationRule> = IndexMap::new();
        for (i, m) in config.meters.iter().enumerate() {
            let store = stores
                .swap_remove(&m.id)
                .unwrap_or_else(|| TimeSeriesStore::new(m.id.clone()));
            let meter = build_meter(config, i, m, store, yields.as_ref())?;
            rules.insert(m.id.clone(), m.aggregation);
            meters.insert(m.id.clone(), Arc::new(meter));
        }

        let mut aggregates = IndexMap::new();
        let mut aggregation_gaps = IndexMap::new();
        for class in FuelClass::ALL {
            let constituents: Vec<Constituent> = meters
                .values()
                .filter(|meter| {
                    meter.fuel_type().fuel_class() == class && !meter.store().is_empty()
                })
                .map(|meter| {
                    let rule = rules.get(meter.id()).copied().unwrap_or_default();
                    Constituent::new(Arc::clone(meter)).with_rule(rule)
                })
                .collect();
            if constituents.is_empty() {
                continue;
            }
            let outcome = MeterAggregator::new(format!("aggregate-{}", class.as_str()))
                .with_name(format!("{} {}", config.school.name, class.as_str()))
                .aggregate(constituents)?;
            if !outcome.gap_dates.is_empty() {
                warn!(
                    fuel = class.as_str(),
                    gaps = outcome.gap_dates.len(),
                    "aggregate has gaps"
                );
            }
            aggregation_gaps.insert(class, outcome.gap_dates);
            aggregates.insert(class, Arc::new(outcome.meter));
        }

        info!(
            school = %config.school.name,
            meters = meters.len(),
            aggregates = aggregates.len(),
            "school built"
        );
        Ok(Self {
            name: config.school.name.clone(),
            meters,
            aggregates,
            aggregation_gaps,
        })
    }

    /// Physical meters in configuration order.
    pub fn meters(&self) -> impl Iterator<Item = &Arc<Meter>> {
        self.meters.values()
    }

    pub fn meter(&self, id: &str) -> Option<&Arc<Meter>> {
        self.meters.get(id)
    }

    pub fn aggregate(&self, class: FuelClass) -> Option<&Arc<Meter>> {
        self.aggregates.get(&class)
    }

    pub fn aggregates(&self) -> impl Iterator<Item = &Arc<Meter>> {
        self.aggregates.values()
    }

    /// Dates an aggregate could not fill because a constituent had a gap.
    pub fn aggregation_gaps(&self, class: FuelClass) -> &[NaiveDate] {
        self.aggregation_gaps
            .get(&class)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Finds a physical meter, aggregate or sub-meter by id.
    pub fn find(&self, id: &str) -> Option<&Arc<Meter>> {
        self.meters
            .values()
            .chain(self.aggregates.values())
            .find_map(|meter| {
                if meter.id() == id {
                    return Some(meter);
                }
                meter.sub_meters().values().find(|sub| sub.id() == id)
            })
    }
}

fn build_meter(
    config: &SchoolConfig,
    index: usize,
    m: &MeterConfig,
    mut store: TimeSeriesStore,
    yields: Option<&Arc<dyn GenerationModel>>,
) -> Result<Meter, BuildError> {
    let field = format!("meters[{index}]");
    for range in &m.confirmed_zero {
        store.confirm_zero(range.start, range.end);
    }

    let bindings = config
        .tariffs_for(m)
        .map(|(j, t)| t.to_binding(&format!("tariffs[{j}]")))
        .collect::<Result<Vec<_>, _>>()?;
    let tariff_count = bindings.len();
    let mut resolver = TariffResolver::new(m.id.clone(), bindings);
    if let Some(first) = store.start_date() {
        resolver.backdate_dcc_tariffs(first, m.backdate_tariff_days);
    }

    let carbon = match m.fuel.fuel_class() {
        FuelClass::Electricity => config.carbon.electricity_kg_per_kwh,
        FuelClass::Gas => config.carbon.gas_kg_per_kwh,
    };
    let flags = MeterFlags {
        has_storage_heaters: m.storage_heaters.is_some(),
        has_simulated_solar: m.solar_pv.is_some(),
    };

    let mut disaggregator = MeterDisaggregator::new();
    if let Some(sh) = &m.storage_heaters {
        let settings = sh.settings(&format!("{field}.storage_heaters"))?;
        disaggregator = disaggregator.with_storage_heaters(settings);
    }
    if let Some(pv) = &m.solar_pv {
        let installation = pv.installation(&format!("{field}.solar_pv"), yields)?;
        disaggregator = disaggregator.with_solar(installation);
    }

    let days = store.len();
    let gaps = store.internal_gaps().len();
    let mut meter = Meter::new(m.id.clone(), m.fuel, store)
        .with_name(m.name.clone().unwrap_or_else(|| m.id.clone()))
        .with_costs(Arc::new(CostEngine::new(resolver)))
        .with_carbon(CarbonIntensity::Constant(carbon))
        .with_flags(flags)
        .with_baseload_settings(config.baseload);
    if !disaggregator.is_empty() {
        let sub_meters = disaggregator.disaggregate(&meter)?;
        meter.attach_sub_meters(sub_meters);
    }

    info!(
        meter = %m.id,
        fuel = %m.fuel,
        days,
        gaps,
        tariffs = tariff_count,
        sub_meters = meter.sub_meters().len(),
        "built meter"
    );
    Ok(meter)
}

/// Headline figures for one meter over a date range.
///
/// Gap dates are skipped rather than failing the summary; costs on dates
/// with no tariff are listed in the cost totals' unresolved dates.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterSummary {
    pub meter_id: String,
    pub name: String,
    pub fuel_type: FuelType,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub gap_dates: Vec<NaiveDate>,
    pub kwh: f64,
    pub economic_cost: RangeTotal,
    pub accounting_cost: RangeTotal,
    pub co2_kg: f64,
    pub average_baseload_kw: Option<f64>,
    /// Economic £ per kWh; `None` if costs are partial or there is no consumption.
    pub blended_rate: Option<f64>,
    pub coverage: Option<TariffCoverage>,
    /// kWh per sub-meter over the same dates.
    pub sub_meter_kwh: Vec<(SubMeterKind, f64)>,
}

impl MeterSummary {
    /// Summarizes `meter` over `[start, end]`.
    ///
    /// # Errors
    ///
    /// Returns an `AmrError` only for failures that are not "not enough data".
    pub fn for_meter(meter: &Meter, start: NaiveDate, end: NaiveDate) -> Result<Self, AmrError> {
        let store = meter.store();
        let mut gap_dates = Vec::new();
        let mut kwh = 0.0;
        let mut co2_kg = 0.0;
        let mut baseload_total = 0.0;
        let mut economic_cost = RangeTotal::default();
        let mut accounting_cost = RangeTotal::default();
        let mut covered = 0usize;
        for date in dates_in(start, end) {
            if !store.covers(date) {
                gap_dates.push(date);
                continue;
            }
            covered += 1;
            kwh += store.one_day_kwh(date)?;
            co2_kg += sum_x48(&meter.day_vector(date, Metric::Co2)?);
            baseload_total += meter.baseload_kw(date)?;
            economic_cost.record(date, meter.day_cost(date, CostKind::Economic))?;
            accounting_cost.record(date, meter.day_cost(date, CostKind::Accounting))?;
        }

        let average_baseload_kw = (covered > 0).then(|| baseload_total / covered as f64);
        let blended_rate =
            (!economic_cost.is_partial() && kwh > 0.0).then(|| economic_cost.total / kwh);
        let coverage = meter.cost_engine().map(|e| e.resolver().coverage(start, end));
        let sub_meter_kwh = meter
            .sub_meters()
            .iter()
            .map(|(kind, sub)| {
                let total: f64 = dates_in(start, end)
                    .filter_map(|date| sub.store().one_day_kwh(date).ok())
                    .sum();
                (*kind, total)
            })
            .collect();

        Ok(Self {
            meter_id: meter.id().to_string(),
            name: meter.name().to_string(),
            fuel_type: meter.fuel_type(),
            start,
            end,
            gap_dates,
            kwh,
            economic_cost,
            accounting_cost,
            co2_kg,
            average_baseload_kw,
            blended_rate,
            coverage,
            sub_meter_kwh,
        })
    }
}

impl fmt::Display for MeterSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- {} ({}, {}) ---", self.name, self.meter_id, self.fuel_type)?;
        writeln!(f, "Period:            {} to {}", self.start, self.end)?;
        writeln!(f, "Gap days:          {}", self.gap_dates.len())?;
        writeln!(f, "Consumption:       {:.1} kWh", self.kwh)?;
        writeln!(f, "Economic cost:     £{}", self.economic_cost)?;
        writeln!(f, "Accounting cost:   £{}", self.accounting_cost)?;
        writeln!(f, "CO2:               {:.1} kg", self.co2_kg)?;
        match self.average_baseload_kw {
            Some(kw) => writeln!(f, "Average baseload:  {kw:.2} kW")?,
            None => writeln!(f, "Average baseload:  n/a")?,
        }
        match self.blended_rate {
            Some(rate) => writeln!(f, "Blended rate:      £{rate:.4}/kWh")?,
            None => writeln!(f, "Blended rate:      n/a")?,
        }
        if let Some(c) = &self.coverage {
            writeln!(
                f,
                "Tariff coverage:   {}/{} days ({} meter or school specific)",
                c.days_with_tariff, c.days, c.days_with_specific_tariff
            )?;
        }
        for (kind, kwh) in &self.sub_meter_kwh {
            writeln!(f, "  {:<16} {kwh:.1} kWh", kind.as_str())?;
        }
        Ok(())
    }
}
