//! Physical, aggregate and sub-meters with metric-aware queries.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Deserialize;

use super::aggregate::Constituent;
use super::baseload::{BaseloadSettings, baseload_kw};
use super::carbon::{CarbonIntensity, ELECTRICITY_KG_CO2_PER_KWH, GAS_KG_CO2_PER_KWH};
use super::disaggregate::SubMeterKind;
use super::store::{TimeSeriesStore, dates_in};
use super::types::{X48, sum_x48};
use crate::error::AmrError;
use crate::tariffs::cost::{CostEngine, CostKind, DayCost, RangeTotal};
use crate::tariffs::monthly::{MonthlyBill, monthly_breakdown};

/// What a meter measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuelType {
    Electricity,
    Gas,
    StorageHeater,
    SolarPv,
    ExportedSolarPv,
}

/// Fuel classes that may be aggregated together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FuelClass {
    Electricity,
    Gas,
}

impl FuelClass {
    pub const ALL: [FuelClass; 2] = [FuelClass::Electricity, FuelClass::Gas];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Electricity => "electricity",
            Self::Gas => "gas",
        }
    }
}

impl FuelType {
    pub fn fuel_class(&self) -> FuelClass {
        match self {
            Self::Gas => FuelClass::Gas,
            _ => FuelClass::Electricity,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Electricity => "electricity",
            Self::Gas => "gas",
            Self::StorageHeater => "storage_heater",
            Self::SolarPv => "solar_pv",
            Self::ExportedSolarPv => "exported_solar_pv",
        }
    }
}

impl fmt::Display for FuelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability flags consumers use to pick model variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeterFlags {
    pub has_storage_heaters: bool,
    pub has_simulated_solar: bool,
}

impl MeterFlags {
    /// OR-combines two sets of flags.
    pub fn union(self, other: MeterFlags) -> MeterFlags {
        MeterFlags {
            has_storage_heaters: self.has_storage_heaters || other.has_storage_heaters,
            has_simulated_solar: self.has_simulated_solar || other.has_simulated_solar,
        }
    }
}

/// Unit a range or day vector is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Kwh,
    /// £ at unit rates.
    EconomicCost,
    /// £ as billed.
    AccountingCost,
    /// kg CO2.
    Co2,
    /// £ at the unit rates in force at the latest reading.
    CurrentEconomicCost,
}

impl Metric {
    pub fn cost_kind(&self) -> Option<CostKind> {
        match self {
            Self::Kwh | Self::Co2 => None,
            Self::EconomicCost => Some(CostKind::Economic),
            Self::AccountingCost => Some(CostKind::Accounting),
            Self::CurrentEconomicCost => Some(CostKind::CurrentEconomic),
        }
    }
}

/// How a meter's store came about.
#[derive(Debug)]
pub enum MeterKind {
    Physical,
    /// Element-wise sum of constituent meters.
    Aggregate { constituents: Vec<Constituent> },
    /// Logical split of a parent meter.
    SubMeter {
        parent_id: String,
        kind: SubMeterKind,
        /// Fraction of the parent's fixed charges billed to this sub-meter, per date.
        standing_charge_shares: BTreeMap<NaiveDate, f64>,
    },
}

/// A meter: its readings, how to price them, and derived sub-meters.
#[derive(Debug)]
pub struct Meter {
    id: String,
    name: String,
    fuel_type: FuelType,
    store: TimeSeriesStore,
    kind: MeterKind,
    flags: MeterFlags,
    costs: Option<Arc<CostEngine>>,
    carbon: CarbonIntensity,
    baseload_settings: BaseloadSettings,
    sub_meters: IndexMap<SubMeterKind, Arc<Meter>>,
    baseload_cache: RwLock<HashMap<NaiveDate, f64>>,
    blended_rate_cache: RwLock<HashMap<(Metric, Metric), f64>>,
}

impl Meter {
    /// Creates a physical meter with no tariffs and the fuel's default carbon factor.
    pub fn new(id: impl Into<String>, fuel_type: FuelType, store: TimeSeriesStore) -> Self {
        let id = id.into();
        let carbon = match fuel_type.fuel_class() {
            FuelClass::Gas => CarbonIntensity::Constant(GAS_KG_CO2_PER_KWH),
            FuelClass::Electricity => CarbonIntensity::Constant(ELECTRICITY_KG_CO2_PER_KWH),
        };
        Self {
            name: id.clone(),
            id,
            fuel_type,
            store,
            kind: MeterKind::Physical,
            flags: MeterFlags::default(),
            costs: None,
            carbon,
            baseload_settings: BaseloadSettings::default(),
            sub_meters: IndexMap::new(),
            baseload_cache: RwLock::new(HashMap::new()),
            blended_rate_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_costs(mut self, costs: Arc<CostEngine>) -> Self {
        self.costs = Some(costs);
        self
    }

    pub fn with_carbon(mut self, carbon: CarbonIntensity) -> Self {
        self.carbon = carbon;
        self
    }

    pub fn with_flags(mut self, flags: MeterFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_baseload_settings(mut self, settings: BaseloadSettings) -> Self {
        self.baseload_settings = settings;
        self
    }

    pub(crate) fn with_kind(mut self, kind: MeterKind) -> Self {
        self.kind = kind;
        self
    }

    /// Attaches derived sub-meters, replacing any of the same kind.
    pub fn attach_sub_meters(&mut self, sub_meters: IndexMap<SubMeterKind, Meter>) {
        for (kind, meter) in sub_meters {
            self.sub_meters.insert(kind, Arc::new(meter));
        }
    }

    pub(crate) fn attach_shared_sub_meter(&mut self, kind: SubMeterKind, meter: Arc<Meter>) {
        self.sub_meters.insert(kind, meter);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fuel_type(&self) -> FuelType {
        self.fuel_type
    }

    pub fn store(&self) -> &TimeSeriesStore {
        &self.store
    }

    pub fn kind(&self) -> &MeterKind {
        &self.kind
    }

    pub fn flags(&self) -> MeterFlags {
        self.flags
    }

    pub fn cost_engine(&self) -> Option<&Arc<CostEngine>> {
        self.costs.as_ref()
    }

    pub fn carbon(&self) -> &CarbonIntensity {
        &self.carbon
    }

    pub fn baseload_settings(&self) -> &BaseloadSettings {
        &self.baseload_settings
    }

    pub fn sub_meters(&self) -> &IndexMap<SubMeterKind, Arc<Meter>> {
        &self.sub_meters
    }

    pub fn sub_meter(&self, kind: SubMeterKind) -> Option<&Arc<Meter>> {
        self.sub_meters.get(&kind)
    }

    /// Constituent meters, empty unless this is an aggregate.
    pub fn constituents(&self) -> &[Constituent] {
        match &self.kind {
            MeterKind::Aggregate { constituents } => constituents,
            _ => &[],
        }
    }

    pub fn start_date(&self) -> Option<NaiveDate> {
        self.store.start_date()
    }

    pub fn end_date(&self) -> Option<NaiveDate> {
        self.store.end_date()
    }

    /// One day's cost with its bill components.
    ///
    /// Aggregates sum their constituents' costs; sub-meters are priced on their
    /// parent's tariffs with fixed charges scaled to their share of the day.
    ///
    /// # Errors
    ///
    /// Returns `AmrError::MissingReadingGap` if the date has no reading and
    /// `AmrError::UnresolvedTariff` if any contributing meter has no tariff.
    pub fn day_cost(&self, date: NaiveDate, kind: CostKind) -> Result<DayCost, AmrError> {
        let kwh = self.store.day_kwh_x48(date)?;
        if let MeterKind::Aggregate { constituents } = &self.kind {
            let costs = constituents
                .iter()
                .filter(|c| c.meter.store().covers(date))
                .map(|c| c.meter.day_cost(date, kind))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(DayCost::combine(date, costs));
        }

        let engine = self
            .costs
            .as_ref()
            .ok_or_else(|| AmrError::unresolved(&self.id, date))?;
        let latest = self.store.end_date().unwrap_or(date);
        let mut cost = engine.day_cost(kind, date, &kwh, latest)?;
        if let MeterKind::SubMeter {
            standing_charge_shares,
            ..
        } = &self.kind
        {
            cost.scale_standing_charges(standing_charge_shares.get(&date).copied().unwrap_or(0.0));
        }
        Ok(cost)
    }

    /// Half-hourly values of `metric` for one day.
    ///
    /// # Errors
    ///
    /// Returns `AmrError::MissingReadingGap` for a date without a reading, or
    /// `AmrError::UnresolvedTariff` for a cost metric with no tariff.
    pub fn day_vector(&self, date: NaiveDate, metric: Metric) -> Result<X48, AmrError> {
        match metric.cost_kind() {
            Some(kind) => Ok(self.day_cost(date, kind)?.cost_x48()),
            None if metric == Metric::Co2 => {
                let kwh = self.store.day_kwh_x48(date)?;
                Ok(self.carbon.co2_x48(date, &kwh))
            }
            None => self.store.day_kwh_x48(date),
        }
    }

    /// Sum of `metric` over `[start, end]`.
    ///
    /// Cost metrics list days without a tariff in `unresolved_dates` instead
    /// of failing.
    ///
    /// # Errors
    ///
    /// Returns `AmrError::MissingReadingGap` for the first date without a reading.
    pub fn range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        metric: Metric,
    ) -> Result<RangeTotal, AmrError> {
        let mut range = RangeTotal::default();
        match metric.cost_kind() {
            Some(kind) => {
                for date in dates_in(start, end) {
                    range.record(date, self.day_cost(date, kind))?;
                }
            }
            None if metric == Metric::Kwh => {
                for date in dates_in(start, end) {
                    range.add(self.store.one_day_kwh(date)?);
                }
            }
            None => {
                for date in dates_in(start, end) {
                    range.add(sum_x48(&self.day_vector(date, metric)?));
                }
            }
        }
        Ok(range)
    }

    /// Total kWh over `[start, end]`.
    ///
    /// # Errors
    ///
    /// Returns `AmrError::MissingReadingGap` for the first date without a reading.
    pub fn kwh_range(&self, start: NaiveDate, end: NaiveDate) -> Result<f64, AmrError> {
        self.store.kwh_range(start, end)
    }

    fn span(&self) -> Result<(NaiveDate, NaiveDate), AmrError> {
        match (self.store.start_date(), self.store.end_date()) {
            (Some(start), Some(end)) => Ok((start, end)),
            _ => Err(AmrError::InsufficientData {
                meter_id: self.id.clone(),
                reason: "no readings".to_string(),
            }),
        }
    }

    /// Baseload in kW for one day, memoized per date.
    ///
    /// # Errors
    ///
    /// Returns `AmrError::MissingReadingGap` if the date has no reading.
    pub fn baseload_kw(&self, date: NaiveDate) -> Result<f64, AmrError> {
        if let Some(kw) = self.baseload_cache.read().get(&date) {
            return Ok(*kw);
        }
        let kwh = self.store.day_kwh_x48(date)?;
        let kw = baseload_kw(&kwh, &self.baseload_settings, self.flags.has_simulated_solar);
        self.baseload_cache.write().insert(date, kw);
        Ok(kw)
    }

    /// Mean daily baseload over `[start, end]`.
    ///
    /// # Errors
    ///
    /// Returns `AmrError::MissingReadingGap` for a date without a reading or
    /// `AmrError::InsufficientData` for an empty range.
    pub fn average_baseload_kw(&self, start: NaiveDate, end: NaiveDate) -> Result<f64, AmrError> {
        let mut total = 0.0;
        let mut days = 0usize;
        for date in dates_in(start, end) {
            total += self.baseload_kw(date)?;
            days += 1;
        }
        if days == 0 {
            return Err(AmrError::InsufficientData {
                meter_id: self.id.clone(),
                reason: format!("empty range {start} to {end}"),
            });
        }
        Ok(total / days as f64)
    }

    /// `total(numerator) / total(denominator)` over the meter's full span, memoized.
    ///
    /// # Errors
    ///
    /// Returns `AmrError::InsufficientData` if the meter has no readings or the
    /// denominator is zero, `AmrError::UnresolvedTariff` for the first unpriced
    /// day of a cost metric, or a gap error.
    pub fn blended_rate(&self, numerator: Metric, denominator: Metric) -> Result<f64, AmrError> {
        if let Some(rate) = self.blended_rate_cache.read().get(&(numerator, denominator)) {
            return Ok(*rate);
        }
        let (start, end) = self.span()?;
        let rate = self.blended_rate_in_range(numerator, denominator, start, end)?;
        self.blended_rate_cache.write().insert((numerator, denominator), rate);
        Ok(rate)
    }

    /// `total(numerator) / total(denominator)` over `[start, end]`.
    ///
    /// # Errors
    ///
    /// As for [`Self::blended_rate`].
    pub fn blended_rate_in_range(
        &self,
        numerator: Metric,
        denominator: Metric,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<f64, AmrError> {
        let total = |metric: Metric| -> Result<f64, AmrError> {
            let range = self.range(start, end, metric)?;
            match range.unresolved_dates.first() {
                Some(date) => Err(AmrError::unresolved(&self.id, *date)),
                None => Ok(range.total),
            }
        };
        let denominator_total = total(denominator)?;
        if denominator_total == 0.0 {
            return Err(AmrError::InsufficientData {
                meter_id: self.id.clone(),
                reason: format!("zero {denominator:?} between {start} and {end}"),
            });
        }
        Ok(total(numerator)? / denominator_total)
    }

    /// Accounting costs over `[start, end]` grouped by calendar month.
    ///
    /// # Errors
    ///
    /// Returns `AmrError::MissingReadingGap` for the first date without a reading.
    pub fn monthly_bills(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MonthlyBill>, AmrError> {
        monthly_breakdown(
            dates_in(start, end).map(|date| (date, self.day_cost(date, CostKind::Accounting))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amr::reading::{HalfHourlyReading, Provenance};
    use crate::tariffs::binding::{HolderScope, TariffBinding};
    use crate::tariffs::rates::ConfiguredRates;
    use crate::tariffs::resolver::TariffResolver;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, day).expect("valid date")
    }

    fn store_of(days: &[(u32, X48)]) -> TimeSeriesStore {
        let mut store = TimeSeriesStore::new("m1");
        for (day, x48) in days {
            let date = d(*day);
            let captured = date.and_hms_opt(2, 0, 0).expect("valid time");
            store.add(
                HalfHourlyReading::new("m1", date, Provenance::Original, None, captured, *x48)
                    .expect("valid reading"),
            );
        }
        store
    }

    fn flat_engine(rate: f64) -> Arc<CostEngine> {
        let rates = Arc::new(ConfiguredRates::flat(rate));
        let binding = TariffBinding::new("flat", HolderScope::Meter, rates);
        Arc::new(CostEngine::new(TariffResolver::new("m1", vec![binding])))
    }

    fn meter() -> Meter {
        let store = store_of(&[(1, [1.0; 48]), (2, [1.0; 48]), (3, [1.0; 48])]);
        Meter::new("m1", FuelType::Electricity, store).with_costs(flat_engine(0.10))
    }

    #[test]
    fn test_kwh_range_is_sum_of_day_vectors() {
        let mut x48 = [0.5; 48];
        x48[20] = 3.0;
        let m = Meter::new("m1", FuelType::Electricity, store_of(&[(1, [1.0; 48]), (2, x48)]));
        let range = m.range(d(1), d(2), Metric::Kwh).expect("no gaps");
        let by_day: f64 = [d(1), d(2)]
            .iter()
            .map(|date| sum_x48(&m.day_vector(*date, Metric::Kwh).expect("present")))
            .sum();
        assert!((range.total - by_day).abs() < 1e-9);
        assert_eq!(range.days, 2);
    }

    #[test]
    fn test_cost_metrics_through_tariffs() {
        let m = meter();
        let economic = m.range(d(1), d(3), Metric::EconomicCost).expect("no gaps");
        assert!((economic.total - 14.4).abs() < 1e-9);
        let day = m.day_vector(d(2), Metric::AccountingCost).expect("priced");
        assert!((sum_x48(&day) - 4.8).abs() < 1e-9);
    }

    #[test]
    fn test_co2_uses_fuel_default() {
        let m = meter();
        let co2 = m.range(d(1), d(1), Metric::Co2).expect("no gaps");
        assert!((co2.total - 48.0 * ELECTRICITY_KG_CO2_PER_KWH).abs() < 1e-9);
    }

    #[test]
    fn test_meter_without_tariffs_reports_unresolved() {
        let m = Meter::new("m1", FuelType::Gas, store_of(&[(1, [1.0; 48])]));
        let range = m.range(d(1), d(1), Metric::EconomicCost).expect("no gaps");
        assert!(range.is_partial());
        assert_eq!(range.total, 0.0);
        assert_eq!(
            m.blended_rate(Metric::EconomicCost, Metric::Kwh),
            Err(AmrError::unresolved("m1", d(1)))
        );
    }

    #[test]
    fn test_blended_rate_over_full_span() {
        let m = meter();
        let rate = m.blended_rate(Metric::EconomicCost, Metric::Kwh).expect("priced");
        assert!((rate - 0.10).abs() < 1e-12);
        // Second call served from cache
        assert_eq!(m.blended_rate(Metric::EconomicCost, Metric::Kwh), Ok(rate));
    }

    #[test]
    fn test_blended_rate_zero_denominator() {
        let m = Meter::new("m1", FuelType::Electricity, store_of(&[(1, [0.0; 48])]))
            .with_costs(flat_engine(0.10));
        let result = m.blended_rate(Metric::EconomicCost, Metric::Kwh);
        assert!(matches!(result, Err(AmrError::InsufficientData { .. })));
    }

    #[test]
    fn test_baseload_cached_and_gap_reported() {
        let m = meter();
        assert!((m.baseload_kw(d(1)).expect("present") - 2.0).abs() < 1e-9);
        assert!((m.baseload_kw(d(1)).expect("cached") - 2.0).abs() < 1e-9);
        assert_eq!(m.baseload_kw(d(9)), Err(AmrError::gap("m1", d(9))));
        assert!((m.average_baseload_kw(d(1), d(3)).expect("present") - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_simulated_solar_flag_switches_baseload_window() {
        let mut x48 = [1.0; 48];
        for slot in 16..32 {
            x48[slot] = 0.0;
        }
        let store = store_of(&[(1, x48)]);
        let plain = Meter::new("m1", FuelType::Electricity, store.clone());
        let solar = Meter::new("m1", FuelType::Electricity, store).with_flags(MeterFlags {
            has_simulated_solar: true,
            ..MeterFlags::default()
        });
        assert_eq!(plain.baseload_kw(d(1)), Ok(0.0));
        assert_eq!(solar.baseload_kw(d(1)), Ok(2.0));
    }

    #[test]
    fn test_monthly_bills_for_meter() {
        let bills = meter().monthly_bills(d(1), d(3)).expect("no gaps");
        assert_eq!(bills.len(), 1);
        assert!((bills[0].total() - 14.4).abs() < 1e-9);
    }

    #[test]
    fn test_flags_union() {
        let a = MeterFlags {
            has_storage_heaters: true,
            has_simulated_solar: false,
        };
        let b = MeterFlags {
            has_storage_heaters: false,
            has_simulated_solar: true,
        };
        assert_eq!(
            a.union(b),
            MeterFlags {
                has_storage_heaters: true,
                has_simulated_solar: true
            }
        );
    }
}
