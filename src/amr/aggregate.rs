//! Summing several physical meters into one aggregate meter.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{debug, info};

use super::disaggregate::SubMeterKind;
use super::meter::{FuelClass, FuelType, Meter, MeterFlags, MeterKind};
use super::reading::{HalfHourlyReading, Synthesis};
use super::store::{TimeSeriesStore, dates_in};
use super::types::{X48, ZERO_X48, add_x48};
use crate::error::{AmrError, ConfigError};

/// Per-meter rules for dates outside the meter's own reading span.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AggregationRule {
    /// Before the meter's first reading, contribute zero instead of a gap.
    pub ignore_start_date: bool,
    /// After the meter's last reading, contribute zero instead of a gap.
    pub ignore_end_date: bool,
}

impl AggregationRule {
    /// Returns `true` if `store` is excluded from the aggregate on `date`.
    pub fn excludes(&self, store: &TimeSeriesStore, date: NaiveDate) -> bool {
        let before_start = store.start_date().is_none_or(|start| date < start);
        let after_end = store.end_date().is_none_or(|end| date > end);
        (self.ignore_start_date && before_start) || (self.ignore_end_date && after_end)
    }
}

/// A meter feeding an aggregate.
#[derive(Debug, Clone)]
pub struct Constituent {
    pub meter: Arc<Meter>,
    pub rule: AggregationRule,
}

impl Constituent {
    pub fn new(meter: Arc<Meter>) -> Self {
        Self {
            meter,
            rule: AggregationRule::default(),
        }
    }

    pub fn with_rule(mut self, rule: AggregationRule) -> Self {
        self.rule = rule;
        self
    }
}

/// Result of an aggregation: the new meter and the dates it could not fill.
#[derive(Debug)]
pub struct AggregationOutcome {
    pub meter: Meter,
    /// Dates in the combined span where a constituent had a genuine gap.
    pub gap_dates: Vec<NaiveDate>,
}

/// Builds an aggregate meter from same-fuel-class meters.
#[derive(Debug, Clone)]
pub struct MeterAggregator {
    id: String,
    name: Option<String>,
}

impl MeterAggregator {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sums constituents day by day, vector by vector.
    ///
    /// Every date in the union of the constituents' spans is considered. A
    /// constituent with no reading on a date contributes zero only if the date
    /// is confirmed zero or one of its aggregation rules excludes it; otherwise
    /// the aggregate has a gap on that date. Capability flags are OR-combined
    /// and sub-meters are aggregated kind by kind.
    ///
    /// # Errors
    ///
    /// Returns `AmrError::Configuration` if there are no constituents or they
    /// mix fuel classes.
    pub fn aggregate(
        &self,
        constituents: Vec<Constituent>,
    ) -> Result<AggregationOutcome, AmrError> {
        let Some(first) = constituents.first() else {
            let message = format!("{} has no meters to aggregate", self.id);
            return Err(ConfigError::new("aggregation", message).into());
        };
        let class = first.meter.fuel_type().fuel_class();
        if let Some(odd) = constituents.iter().find(|c| c.meter.fuel_type().fuel_class() != class) {
            return Err(ConfigError::new(
                "aggregation",
                format!(
                    "cannot aggregate {} ({}) with {} ({})",
                    odd.meter.id(),
                    odd.meter.fuel_type(),
                    first.meter.id(),
                    first.meter.fuel_type()
                ),
            )
            .into());
        }

        let same_fuel = constituents
            .iter()
            .all(|c| c.meter.fuel_type() == first.meter.fuel_type());
        let fuel_type = if same_fuel {
            first.meter.fuel_type()
        } else {
            match class {
                FuelClass::Electricity => FuelType::Electricity,
                FuelClass::Gas => FuelType::Gas,
            }
        };

        let start = constituents.iter().filter_map(|c| c.meter.start_date()).min();
        let end = constituents.iter().filter_map(|c| c.meter.end_date()).max();

        let mut store = TimeSeriesStore::new(self.id.clone());
        let mut gap_dates = Vec::new();
        if let (Some(start), Some(end)) = (start, end) {
            for date in dates_in(start, end) {
                match sum_day(&constituents, date) {
                    Some((x48, captured_at)) => {
                        store.add(HalfHourlyReading::synthetic(
                            &self.id,
                            date,
                            Synthesis::Aggregated,
                            captured_at,
                            x48,
                        ));
                    }
                    None => gap_dates.push(date),
                }
            }
        }

        let flags = constituents
            .iter()
            .fold(MeterFlags::default(), |acc, c| acc.union(c.meter.flags()));

        info!(
            meter = %self.id,
            constituents = constituents.len(),
            start = ?start,
            end = ?end,
            days = store.len(),
            gaps = gap_dates.len(),
            "aggregated meters"
        );

        let sub_meters = self.aggregate_sub_meters(&constituents)?;

        let mut meter = Meter::new(self.id.clone(), fuel_type, store)
            .with_name(self.name.clone().unwrap_or_else(|| self.id.clone()))
            .with_flags(flags)
            .with_carbon(first.meter.carbon().clone())
            .with_baseload_settings(*first.meter.baseload_settings());
        for (kind, sub) in sub_meters {
            meter.attach_shared_sub_meter(kind, sub);
        }
        let meter = meter.with_kind(MeterKind::Aggregate { constituents });

        Ok(AggregationOutcome { meter, gap_dates })
    }

    /// Aggregates each sub-meter kind across constituents.
    ///
    /// A constituent without sub-meters counts wholly as mains consumption.
    fn aggregate_sub_meters(
        &self,
        constituents: &[Constituent],
    ) -> Result<IndexMap<SubMeterKind, Arc<Meter>>, AmrError> {
        let mut kinds: Vec<SubMeterKind> = Vec::new();
        for c in constituents {
            for kind in c.meter.sub_meters().keys() {
                if !kinds.contains(kind) {
                    kinds.push(*kind);
                }
            }
        }

        let mut aggregated = IndexMap::new();
        for kind in kinds {
            if let [only] = constituents {
                if let Some(sub) = only.meter.sub_meter(kind) {
                    aggregated.insert(kind, Arc::clone(sub));
                    continue;
                }
            }
            let members: Vec<Constituent> = constituents
                .iter()
                .filter_map(|c| match c.meter.sub_meter(kind) {
                    Some(sub) => Some(Constituent::new(Arc::clone(sub)).with_rule(c.rule)),
                    None if kind == SubMeterKind::MainsConsume => Some(c.clone()),
                    None => None,
                })
                .collect();
            let outcome = MeterAggregator::new(format!("{}-{}", self.id, kind.as_str()))
                .aggregate(members)?;
            debug!(
                meter = %self.id,
                sub_meter = kind.as_str(),
                gaps = outcome.gap_dates.len(),
                "aggregated sub-meter"
            );
            aggregated.insert(kind, Arc::new(outcome.meter));
        }
        Ok(aggregated)
    }
}

/// Sums one date across constituents; `None` if any constituent has a genuine gap.
fn sum_day(
    constituents: &[Constituent],
    date: NaiveDate,
) -> Option<(X48, NaiveDateTime)> {
    let mut total = ZERO_X48;
    let mut contributing = 0usize;
    let mut captured_at = date.and_time(NaiveTime::MIN);
    for c in constituents {
        let store = c.meter.store();
        if store.covers(date) {
            let x48 = store.day_kwh_x48(date).ok()?;
            total = add_x48(&total, &x48);
            if let Ok(reading) = store.reading(date) {
                captured_at = captured_at.max(reading.captured_at());
            }
            contributing += 1;
        } else if !c.rule.excludes(store, date) {
            return None;
        }
    }
    (contributing > 0).then_some((total, captured_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amr::reading::Provenance;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, day).expect("valid date")
    }

    fn meter(id: &str, fuel: FuelType, days: &[(u32, X48)]) -> Arc<Meter> {
        let mut store = TimeSeriesStore::new(id);
        for (day, x48) in days {
            let date = d(*day);
            let captured = date.and_hms_opt(3, 0, 0).expect("valid time");
            store.add(
                HalfHourlyReading::new(id, date, Provenance::Original, None, captured, *x48)
                    .expect("valid reading"),
            );
        }
        Arc::new(Meter::new(id, fuel, store))
    }

    fn ramp(offset: f64) -> X48 {
        let mut x48 = ZERO_X48;
        for (slot, v) in x48.iter_mut().enumerate() {
            *v = offset + slot as f64 * 0.1;
        }
        x48
    }

    #[test]
    fn test_aggregate_is_elementwise_sum() {
        let a = meter("a", FuelType::Electricity, &[(1, ramp(1.0)), (2, ramp(2.0))]);
        let b = meter("b", FuelType::Electricity, &[(1, ramp(0.5)), (2, ramp(0.0))]);
        let outcome = MeterAggregator::new("agg")
            .aggregate(vec![Constituent::new(a.clone()), Constituent::new(b.clone())])
            .expect("same fuel");
        for day in [1, 2] {
            let agg = outcome.meter.store().day_kwh_x48(d(day)).expect("present");
            let expected = add_x48(
                &a.store().day_kwh_x48(d(day)).expect("present"),
                &b.store().day_kwh_x48(d(day)).expect("present"),
            );
            assert_eq!(agg, expected);
        }
        let reading = outcome.meter.store().reading(d(1)).expect("present");
        assert_eq!(reading.provenance(), Provenance::Synthetic(Synthesis::Aggregated));
        assert!(outcome.gap_dates.is_empty());
    }

    #[test]
    fn test_constituent_gap_propagates() {
        let a = meter(
            "a",
            FuelType::Electricity,
            &[(1, [1.0; 48]), (2, [1.0; 48]), (3, [1.0; 48])],
        );
        let b = meter("b", FuelType::Electricity, &[(1, [1.0; 48]), (3, [1.0; 48])]);
        let outcome = MeterAggregator::new("agg")
            .aggregate(vec![Constituent::new(a), Constituent::new(b)])
            .expect("same fuel");
        assert_eq!(outcome.gap_dates, vec![d(2)]);
        assert_eq!(
            outcome.meter.store().day_kwh_x48(d(2)),
            Err(AmrError::gap("agg", d(2)))
        );
    }

    #[test]
    fn test_confirmed_zero_counts_as_zero() {
        let a = meter("a", FuelType::Gas, &[(1, [1.0; 48]), (2, [1.0; 48])]);
        let mut store = TimeSeriesStore::new("b");
        store.add(
            HalfHourlyReading::new(
                "b",
                d(1),
                Provenance::Original,
                None,
                d(1).and_hms_opt(3, 0, 0).expect("valid time"),
                [2.0; 48],
            )
            .expect("valid reading"),
        );
        store.confirm_zero(d(2), d(2));
        let b = Arc::new(Meter::new("b", FuelType::Gas, store));
        let outcome = MeterAggregator::new("agg")
            .aggregate(vec![Constituent::new(a), Constituent::new(b)])
            .expect("same fuel");
        assert!(outcome.gap_dates.is_empty());
        assert_eq!(outcome.meter.store().one_day_kwh(d(2)), Ok(48.0));
        assert_eq!(outcome.meter.fuel_type(), FuelType::Gas);
    }

    #[test]
    fn test_ignore_start_date_rule_fills_before_first_reading() {
        let a = meter("a", FuelType::Electricity, &[(1, [1.0; 48]), (2, [1.0; 48])]);
        let late = meter("late", FuelType::Electricity, &[(2, [1.0; 48])]);
        let strict = MeterAggregator::new("agg")
            .aggregate(vec![Constituent::new(a.clone()), Constituent::new(late.clone())])
            .expect("same fuel");
        assert_eq!(strict.gap_dates, vec![d(1)]);

        let rule = AggregationRule {
            ignore_start_date: true,
            ignore_end_date: false,
        };
        let lenient = MeterAggregator::new("agg")
            .aggregate(vec![Constituent::new(a), Constituent::new(late).with_rule(rule)])
            .expect("same fuel");
        assert!(lenient.gap_dates.is_empty());
        assert_eq!(lenient.meter.store().one_day_kwh(d(1)), Ok(48.0));
        assert_eq!(lenient.meter.store().one_day_kwh(d(2)), Ok(96.0));
    }

    #[test]
    fn test_mixed_fuel_classes_rejected() {
        let e = meter("e", FuelType::Electricity, &[(1, [1.0; 48])]);
        let g = meter("g", FuelType::Gas, &[(1, [1.0; 48])]);
        let result =
            MeterAggregator::new("agg").aggregate(vec![Constituent::new(e), Constituent::new(g)]);
        assert!(matches!(result, Err(AmrError::Configuration(_))));
        assert!(MeterAggregator::new("agg").aggregate(Vec::new()).is_err());
    }

    #[test]
    fn test_storage_heater_meter_aggregates_as_electricity() {
        let e = meter("e", FuelType::Electricity, &[(1, [1.0; 48])]);
        let s = meter("s", FuelType::StorageHeater, &[(1, [1.0; 48])]);
        let outcome = MeterAggregator::new("agg")
            .aggregate(vec![Constituent::new(e), Constituent::new(s)])
            .expect("same class");
        assert_eq!(outcome.meter.fuel_type(), FuelType::Electricity);
    }

    #[test]
    fn test_flags_or_combined() {
        let mut store = TimeSeriesStore::new("s");
        store.add(
            HalfHourlyReading::new(
                "s",
                d(1),
                Provenance::Original,
                None,
                d(1).and_hms_opt(3, 0, 0).expect("valid time"),
                [1.0; 48],
            )
            .expect("valid reading"),
        );
        let solar = Arc::new(Meter::new("s", FuelType::Electricity, store).with_flags(MeterFlags {
            has_simulated_solar: true,
            ..MeterFlags::default()
        }));
        let plain = meter("p", FuelType::Electricity, &[(1, [1.0; 48])]);
        let outcome = MeterAggregator::new("agg")
            .aggregate(vec![Constituent::new(plain), Constituent::new(solar)])
            .expect("same fuel");
        assert!(outcome.meter.flags().has_simulated_solar);
        assert!(!outcome.meter.flags().has_storage_heaters);
        assert_eq!(outcome.meter.constituents().len(), 2);
    }
}
