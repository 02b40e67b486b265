//! Pricing consumption with resolved tariffs.

use std::fmt;

use chrono::NaiveDate;
use indexmap::IndexMap;

use super::binding::TariffBinding;
use super::resolver::TariffResolver;
use crate::amr::store::{TimeSeriesStore, dates_in};
use crate::amr::types::{SLOTS_PER_DAY, X48, ZERO_X48, add_x48, sum_x48};
use crate::error::AmrError;

/// Which price a cost is computed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CostKind {
    /// Marginal unit-rate cost on the day's own tariff.
    Economic,
    /// Marginal unit-rate cost on the tariff in force at the latest reading.
    CurrentEconomic,
    /// Billed cost including standing charges, levies and VAT.
    Accounting,
}

/// One day's cost broken into bill components.
#[derive(Debug, Clone, PartialEq)]
pub struct DayCost {
    pub date: NaiveDate,
    /// Tariffs that priced the day (several for an aggregate meter).
    pub tariff_ids: Vec<String>,
    pub components_x48: IndexMap<String, X48>,
    pub standing_charges: IndexMap<String, f64>,
}

impl DayCost {
    /// A day with no cost components.
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            tariff_ids: Vec::new(),
            components_x48: IndexMap::new(),
            standing_charges: IndexMap::new(),
        }
    }

    /// Half-hourly cost with standing charges spread evenly across the slots.
    pub fn cost_x48(&self) -> X48 {
        let standing_per_slot = self.standing_charges.values().sum::<f64>() / SLOTS_PER_DAY as f64;
        self.components_x48
            .values()
            .fold([standing_per_slot; SLOTS_PER_DAY], |acc, x48| add_x48(&acc, x48))
    }

    /// Total £ for the day.
    pub fn total(&self) -> f64 {
        self.components_x48.values().map(sum_x48).sum::<f64>()
            + self.standing_charges.values().sum::<f64>()
    }

    /// Day totals per bill component, half-hourly components first.
    pub fn bill_components(&self) -> IndexMap<String, f64> {
        let mut components: IndexMap<String, f64> = self
            .components_x48
            .iter()
            .map(|(name, x48)| (name.clone(), sum_x48(x48)))
            .collect();
        for (name, amount) in &self.standing_charges {
            *components.entry(name.clone()).or_insert(0.0) += amount;
        }
        components
    }

    /// Scales fixed charges, used when a sub-meter carries only part of its parent's bill.
    pub fn scale_standing_charges(&mut self, factor: f64) {
        for amount in self.standing_charges.values_mut() {
            *amount *= factor;
        }
    }

    /// Sums several meters' costs for the same date, merging components by name.
    pub fn combine(date: NaiveDate, costs: impl IntoIterator<Item = DayCost>) -> Self {
        let mut combined = Self::empty(date);
        for cost in costs {
            for id in cost.tariff_ids {
                if !combined.tariff_ids.contains(&id) {
                    combined.tariff_ids.push(id);
                }
            }
            for (name, x48) in cost.components_x48 {
                let entry = combined.components_x48.entry(name).or_insert(ZERO_X48);
                *entry = add_x48(entry, &x48);
            }
            for (name, amount) in cost.standing_charges {
                *combined.standing_charges.entry(name).or_insert(0.0) += amount;
            }
        }
        combined
    }
}

/// Sum of a metric over a date range.
///
/// Cost ranges may be partial: dates with no resolvable tariff are listed in
/// `unresolved_dates` and contribute nothing to `total`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeTotal {
    pub total: f64,
    pub days: usize,
    pub unresolved_dates: Vec<NaiveDate>,
}

impl RangeTotal {
    pub fn is_partial(&self) -> bool {
        !self.unresolved_dates.is_empty()
    }

    /// Adds one day's value.
    pub fn add(&mut self, value: f64) {
        self.total += value;
        self.days += 1;
    }

    /// Records a day's cost outcome.
    ///
    /// # Errors
    ///
    /// Passes through every error except `UnresolvedTariff`, which is recorded.
    pub fn record(
        &mut self,
        date: NaiveDate,
        cost: Result<DayCost, AmrError>,
    ) -> Result<(), AmrError> {
        match cost {
            Ok(cost) => self.add(cost.total()),
            Err(AmrError::UnresolvedTariff { .. }) => {
                self.days += 1;
                self.unresolved_dates.push(date);
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

impl fmt::Display for RangeTotal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.total)?;
        if self.is_partial() {
            write!(f, " (partial: {} days without tariff)", self.unresolved_dates.len())?;
        }
        Ok(())
    }
}

/// Applies a meter's resolved tariffs to its consumption.
#[derive(Debug)]
pub struct CostEngine {
    resolver: TariffResolver,
}

impl CostEngine {
    pub fn new(resolver: TariffResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &TariffResolver {
        &self.resolver
    }

    fn resolve(&self, date: NaiveDate) -> Result<&TariffBinding, AmrError> {
        self.resolver
            .find(date)
            .ok_or_else(|| AmrError::unresolved(self.resolver.meter_id(), date))
    }

    /// Unit-rate cost of a day's consumption on that day's tariff.
    ///
    /// # Errors
    ///
    /// Returns `AmrError::UnresolvedTariff` if no tariff covers `date`.
    pub fn economic_cost(&self, date: NaiveDate, kwh_x48: &X48) -> Result<DayCost, AmrError> {
        self.unit_cost_on(date, date, kwh_x48)
    }

    /// Unit-rate cost of a day's consumption at the prices in force on `tariff_date`.
    ///
    /// # Errors
    ///
    /// Returns `AmrError::UnresolvedTariff` if no tariff covers `tariff_date`.
    pub fn current_economic_cost(
        &self,
        tariff_date: NaiveDate,
        date: NaiveDate,
        kwh_x48: &X48,
    ) -> Result<DayCost, AmrError> {
        self.unit_cost_on(tariff_date, date, kwh_x48)
    }

    fn unit_cost_on(
        &self,
        tariff_date: NaiveDate,
        date: NaiveDate,
        kwh_x48: &X48,
    ) -> Result<DayCost, AmrError> {
        let binding = self.resolve(tariff_date)?;
        Ok(DayCost {
            date,
            tariff_ids: vec![binding.id.clone()],
            components_x48: binding.rate_model.unit_costs(tariff_date, kwh_x48),
            standing_charges: IndexMap::new(),
        })
    }

    /// Billed cost of a day's consumption with its bill-component breakdown.
    ///
    /// # Errors
    ///
    /// Returns `AmrError::UnresolvedTariff` if no tariff covers `date`.
    pub fn accounting_cost(&self, date: NaiveDate, kwh_x48: &X48) -> Result<DayCost, AmrError> {
        let binding = self.resolve(date)?;
        let components = binding.rate_model.accounting_components(date, kwh_x48);
        Ok(DayCost {
            date,
            tariff_ids: vec![binding.id.clone()],
            components_x48: components.x48,
            standing_charges: components.standing,
        })
    }

    /// Cost of a day's consumption at the given kind of price.
    ///
    /// `latest_date` is the meter's last reading date, used for current prices.
    ///
    /// # Errors
    ///
    /// Returns `AmrError::UnresolvedTariff` if no tariff applies.
    pub fn day_cost(
        &self,
        kind: CostKind,
        date: NaiveDate,
        kwh_x48: &X48,
        latest_date: NaiveDate,
    ) -> Result<DayCost, AmrError> {
        match kind {
            CostKind::Economic => self.economic_cost(date, kwh_x48),
            CostKind::CurrentEconomic => self.current_economic_cost(latest_date, date, kwh_x48),
            CostKind::Accounting => self.accounting_cost(date, kwh_x48),
        }
    }

    /// Sum of daily costs of a store's readings over `[start, end]`.
    ///
    /// # Errors
    ///
    /// Returns `AmrError::MissingReadingGap` for the first date without a reading.
    /// Days without a tariff make the result partial rather than failing.
    pub fn range_cost(
        &self,
        store: &TimeSeriesStore,
        start: NaiveDate,
        end: NaiveDate,
        kind: CostKind,
    ) -> Result<RangeTotal, AmrError> {
        let latest = store.end_date().unwrap_or(end);
        let mut range = RangeTotal::default();
        for date in dates_in(start, end) {
            let kwh = store.day_kwh_x48(date)?;
            range.record(date, self.day_cost(kind, date, &kwh, latest))?;
        }
        Ok(range)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::amr::reading::{HalfHourlyReading, Provenance};
    use crate::tariffs::binding::HolderScope;
    use crate::tariffs::rates::{Charge, ChargeBasis, ConfiguredRates};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).expect("valid date")
    }

    fn engine(bindings: Vec<TariffBinding>) -> CostEngine {
        CostEngine::new(TariffResolver::new("m1", bindings))
    }

    fn flat(id: &str, rate: f64) -> TariffBinding {
        TariffBinding::new(id, HolderScope::Meter, Arc::new(ConfiguredRates::flat(rate)))
    }

    fn store(days: std::ops::RangeInclusive<u32>) -> TimeSeriesStore {
        let mut store = TimeSeriesStore::new("m1");
        for day in days {
            let date = d(day);
            let captured = date.and_hms_opt(1, 0, 0).expect("valid time");
            store.add(
                HalfHourlyReading::new("m1", date, Provenance::Original, None, captured, [1.0; 48])
                    .expect("valid reading"),
            );
        }
        store
    }

    #[test]
    fn test_flat_tariff_economic_cost_is_4_8() {
        let engine = engine(vec![flat("flat", 0.10)]);
        let cost = engine.economic_cost(d(1), &[1.0; 48]).expect("tariff resolves");
        assert!((cost.total() - 4.8).abs() < 1e-9);
        assert_eq!(cost.tariff_ids, vec!["flat".to_string()]);
    }

    #[test]
    fn test_no_tariff_is_reported_not_zero() {
        let engine = engine(Vec::new());
        let result = engine.economic_cost(d(1), &[1.0; 48]);
        assert_eq!(result, Err(AmrError::unresolved("m1", d(1))));
    }

    #[test]
    fn test_accounting_cost_includes_standing_charge() {
        let rates = ConfiguredRates::new(
            ConfiguredRates::flat(0.10).unit_rates().to_vec(),
            vec![Charge {
                name: "standing_charge".into(),
                rate: 1.2,
                basis: ChargeBasis::Day,
            }],
            0.0,
        )
        .expect("valid rates");
        let engine = engine(vec![TariffBinding::new("acc", HolderScope::Meter, Arc::new(rates))]);
        let cost = engine.accounting_cost(d(1), &[1.0; 48]).expect("tariff resolves");
        assert!((cost.total() - 6.0).abs() < 1e-9);
        assert!((sum_x48(&cost.cost_x48()) - 6.0).abs() < 1e-9);
        let components = cost.bill_components();
        assert!((components["flat_rate"] - 4.8).abs() < 1e-9);
        assert!((components["standing_charge"] - 1.2).abs() < 1e-9);
        // Economic view ignores the standing charge
        let economic = engine.economic_cost(d(1), &[1.0; 48]).expect("tariff resolves");
        assert!((economic.total() - 4.8).abs() < 1e-9);
    }

    #[test]
    fn test_range_cost_is_sum_of_days() {
        let engine = engine(vec![flat("flat", 0.10)]);
        let range = engine
            .range_cost(&store(1..=3), d(1), d(3), CostKind::Economic)
            .expect("no gaps");
        assert!((range.total - 14.4).abs() < 1e-9);
        assert_eq!(range.days, 3);
        assert!(!range.is_partial());
    }

    #[test]
    fn test_range_cost_marks_unresolved_dates_partial() {
        let engine = engine(vec![flat("flat", 0.10).with_dates(d(2), d(3))]);
        let range = engine
            .range_cost(&store(1..=3), d(1), d(3), CostKind::Economic)
            .expect("no gaps");
        assert!(range.is_partial());
        assert_eq!(range.unresolved_dates, vec![d(1)]);
        assert!((range.total - 9.6).abs() < 1e-9);
        assert!(range.to_string().contains("partial"));
    }

    #[test]
    fn test_range_cost_gap_propagates() {
        let engine = engine(vec![flat("flat", 0.10)]);
        let result = engine.range_cost(&store(1..=2), d(1), d(3), CostKind::Economic);
        assert_eq!(result, Err(AmrError::gap("m1", d(3))));
    }

    #[test]
    fn test_current_economic_uses_latest_tariff() {
        let engine = engine(vec![
            flat("old", 0.10).with_dates(d(1), d(2)),
            flat("new", 0.20).with_dates(d(3), d(31)),
        ]);
        let range = engine
            .range_cost(&store(1..=3), d(1), d(3), CostKind::CurrentEconomic)
            .expect("no gaps");
        assert!((range.total - 3.0 * 9.6).abs() < 1e-9);
    }

    #[test]
    fn test_combine_merges_components() {
        let engine = engine(vec![flat("flat", 0.10)]);
        let a = engine.economic_cost(d(1), &[1.0; 48]).expect("tariff resolves");
        let b = engine.economic_cost(d(1), &[2.0; 48]).expect("tariff resolves");
        let combined = DayCost::combine(d(1), [a, b]);
        assert_eq!(combined.tariff_ids, vec!["flat".to_string()]);
        assert!((combined.total() - 14.4).abs() < 1e-9);
    }
}
