//! Picking the single applicable tariff for a meter on a date.

use std::collections::HashMap;

use chrono::{Days, NaiveDate};
use parking_lot::RwLock;
use tracing::info;

use super::binding::{HolderScope, TariffBinding};
use crate::amr::store::dates_in;

/// DCC tariffs starting at most this many days after the first reading are backdated.
pub const MAX_DAYS_BACKDATE_TARIFF: i64 = 30;

/// Largest backdate override accepted from configuration.
pub const MAX_BACKDATE_OVERRIDE_DAYS: u32 = 3650;

/// Index of the binding that applies on `date`, if any.
///
/// Pools are consulted in [`HolderScope::PRECEDENCE`] order and the search
/// stops at the first pool with at least one binding covering the date.
/// Within that pool the most recent `created_at` wins, a missing timestamp
/// sorts below every real one, and an exact tie keeps the binding listed first.
pub fn select_index(bindings: &[TariffBinding], date: NaiveDate) -> Option<usize> {
    HolderScope::PRECEDENCE.into_iter().find_map(|scope| {
        bindings
            .iter()
            .enumerate()
            .filter(|(_, b)| b.scope == scope && b.covers(date))
            .reduce(|best, candidate| {
                if candidate.1.created_at > best.1.created_at {
                    candidate
                } else {
                    best
                }
            })
            .map(|(i, _)| i)
    })
}

/// The binding that applies on `date`, if any. See [`select_index`].
pub fn select_binding(bindings: &[TariffBinding], date: NaiveDate) -> Option<&TariffBinding> {
    select_index(bindings, date).map(|i| &bindings[i])
}

/// How much of a period has tariff cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TariffCoverage {
    pub days: usize,
    pub days_with_tariff: usize,
    /// Days resolved to a meter- or school-scoped tariff rather than a group or system default.
    pub days_with_specific_tariff: usize,
}

/// Tariff lookup for one meter.
///
/// Holds every binding visible to the meter (its own plus school, group and
/// system defaults) and memoizes the choice per date.
#[derive(Debug)]
pub struct TariffResolver {
    meter_id: String,
    bindings: Vec<TariffBinding>,
    cache: RwLock<HashMap<NaiveDate, Option<usize>>>,
}

impl TariffResolver {
    pub fn new(meter_id: impl Into<String>, bindings: Vec<TariffBinding>) -> Self {
        Self {
            meter_id: meter_id.into(),
            bindings,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn meter_id(&self) -> &str {
        &self.meter_id
    }

    pub fn bindings(&self) -> &[TariffBinding] {
        &self.bindings
    }

    /// The single tariff applying on `date`.
    pub fn find(&self, date: NaiveDate) -> Option<&TariffBinding> {
        let cached = self.cache.read().get(&date).copied();
        let index = match cached {
            Some(index) => index,
            None => {
                let index = select_index(&self.bindings, date);
                self.cache.write().insert(date, index);
                index
            }
        };
        index.map(|i| &self.bindings[i])
    }

    /// Pulls the earliest meter-scoped DCC tariff back to cover early readings.
    ///
    /// Without an override the tariff is moved to `first_reading_date` only if it
    /// starts 1 to [`MAX_DAYS_BACKDATE_TARIFF`] days after it. An override moves
    /// the start back by exactly that many days regardless of the gap.
    ///
    /// # Returns
    ///
    /// The new start date if a tariff was moved. An override reaching past the
    /// earliest representable date leaves the tariffs unchanged.
    pub fn backdate_dcc_tariffs(
        &mut self,
        first_reading_date: NaiveDate,
        override_days: Option<u32>,
    ) -> Option<NaiveDate> {
        let earliest = self
            .bindings
            .iter_mut()
            .filter(|b| b.scope == HolderScope::Meter && b.is_dcc)
            .reduce(|best, b| if b.start_date < best.start_date { b } else { best })?;

        let original_start = earliest.start_date;
        let new_start = match override_days {
            Some(days) => original_start.checked_sub_days(Days::new(u64::from(days)))?,
            None => {
                let gap = (original_start - first_reading_date).num_days();
                if !(1..=MAX_DAYS_BACKDATE_TARIFF).contains(&gap) {
                    return None;
                }
                first_reading_date
            }
        };
        if new_start == original_start {
            return None;
        }

        earliest.start_date = new_start;
        info!(
            meter = %self.meter_id,
            tariff = %earliest.id,
            from = %original_start,
            to = %new_start,
            "backdated dcc tariff"
        );
        self.cache.get_mut().clear();
        Some(new_start)
    }

    /// Tariff coverage statistics over `[start, end]`.
    pub fn coverage(&self, start: NaiveDate, end: NaiveDate) -> TariffCoverage {
        let mut coverage = TariffCoverage {
            days: 0,
            days_with_tariff: 0,
            days_with_specific_tariff: 0,
        };
        for date in dates_in(start, end) {
            coverage.days += 1;
            if let Some(binding) = self.find(date) {
                coverage.days_with_tariff += 1;
                if matches!(binding.scope, HolderScope::Meter | HolderScope::School) {
                    coverage.days_with_specific_tariff += 1;
                }
            }
        }
        coverage
    }
}
