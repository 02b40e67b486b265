//! Date-ordered store of one meter's daily readings.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use super::reading::HalfHourlyReading;
use super::types::{X48, ZERO_X48};
use crate::error::AmrError;

/// Ordered date→reading map for one logical meter.
///
/// Each date holds at most one current reading. Dates without a reading are
/// gaps unless they have been confirmed as zero consumption, in which case
/// they read as 48 zeros.
#[derive(Debug, Clone, Default)]
pub struct TimeSeriesStore {
    meter_id: String,
    readings: BTreeMap<NaiveDate, HalfHourlyReading>,
    confirmed_zero: BTreeSet<NaiveDate>,
}

impl TimeSeriesStore {
    pub fn new(meter_id: impl Into<String>) -> Self {
        Self {
            meter_id: meter_id.into(),
            readings: BTreeMap::new(),
            confirmed_zero: BTreeSet::new(),
        }
    }

    pub fn meter_id(&self) -> &str {
        &self.meter_id
    }

    /// Inserts a reading, replacing and returning any reading already held for its date.
    pub fn add(&mut self, reading: HalfHourlyReading) -> Option<HalfHourlyReading> {
        self.readings.insert(reading.date(), reading)
    }

    /// Marks every date in `[start, end]` as confirmed zero consumption.
    pub fn confirm_zero(&mut self, start: NaiveDate, end: NaiveDate) {
        self.confirmed_zero.extend(start.iter_days().take_while(|d| *d <= end));
    }

    pub fn is_confirmed_zero(&self, date: NaiveDate) -> bool {
        !self.readings.contains_key(&date) && self.confirmed_zero.contains(&date)
    }

    /// Dates confirmed zero that have no reading.
    pub fn confirmed_zero_dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.confirmed_zero
            .iter()
            .copied()
            .filter(|d| !self.readings.contains_key(d))
    }

    /// First date with a reading.
    pub fn start_date(&self) -> Option<NaiveDate> {
        self.readings.keys().next().copied()
    }

    /// Last date with a reading.
    pub fn end_date(&self) -> Option<NaiveDate> {
        self.readings.keys().next_back().copied()
    }

    /// Number of dates holding a reading.
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Returns `true` if the date has a reading.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.readings.contains_key(&date)
    }

    /// Returns `true` if the date has a reading or is confirmed zero.
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.contains(date) || self.confirmed_zero.contains(&date)
    }

    /// Current reading for a date.
    ///
    /// # Errors
    ///
    /// Returns `AmrError::MissingReadingGap` if the date has no reading.
    pub fn reading(&self, date: NaiveDate) -> Result<&HalfHourlyReading, AmrError> {
        self.readings
            .get(&date)
            .ok_or_else(|| AmrError::gap(&self.meter_id, date))
    }

    pub fn readings(&self) -> impl Iterator<Item = &HalfHourlyReading> {
        self.readings.values()
    }

    /// Half-hourly kWh for a date; confirmed-zero dates yield zeros.
    ///
    /// # Errors
    ///
    /// Returns `AmrError::MissingReadingGap` for a date that is neither read nor confirmed zero.
    pub fn day_kwh_x48(&self, date: NaiveDate) -> Result<X48, AmrError> {
        match self.readings.get(&date) {
            Some(r) => Ok(*r.kwh_x48()),
            None if self.confirmed_zero.contains(&date) => Ok(ZERO_X48),
            None => Err(AmrError::gap(&self.meter_id, date)),
        }
    }

    /// Total kWh for a date.
    ///
    /// # Errors
    ///
    /// Returns `AmrError::MissingReadingGap` as for [`Self::day_kwh_x48`].
    pub fn one_day_kwh(&self, date: NaiveDate) -> Result<f64, AmrError> {
        match self.readings.get(&date) {
            Some(r) => Ok(r.one_day_kwh()),
            None if self.confirmed_zero.contains(&date) => Ok(0.0),
            None => Err(AmrError::gap(&self.meter_id, date)),
        }
    }

    /// Total kWh over `[start, end]`.
    ///
    /// # Errors
    ///
    /// Returns `AmrError::MissingReadingGap` for the first uncovered date in the range.
    pub fn kwh_range(&self, start: NaiveDate, end: NaiveDate) -> Result<f64, AmrError> {
        dates_in(start, end).try_fold(0.0, |total, date| Ok(total + self.one_day_kwh(date)?))
    }

    /// Dates in `[start, end]` that are neither read nor confirmed zero.
    pub fn gaps(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        dates_in(start, end).filter(|d| !self.covers(*d)).collect()
    }

    /// Gaps between the first and last reading.
    pub fn internal_gaps(&self) -> Vec<NaiveDate> {
        match (self.start_date(), self.end_date()) {
            (Some(start), Some(end)) => self.gaps(start, end),
            _ => Vec::new(),
        }
    }

    /// Returns `true` if every date in `[start, end]` can be read.
    pub fn has_enough_data(&self, start: NaiveDate, end: NaiveDate) -> bool {
        start <= end && dates_in(start, end).all(|d| self.covers(d))
    }
}

/// Iterates the dates of `[start, end]`; empty when `start > end`.
pub fn dates_in(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |d| *d <= end)
}
