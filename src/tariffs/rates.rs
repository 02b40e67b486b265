//! Rate models: turning a day of kWh into named cost components.

use std::fmt;

use chrono::{Datelike, Months, NaiveDate, TimeDelta};
use indexmap::IndexMap;

use crate::amr::types::{SLOTS_PER_DAY, SlotWindow, X48, ZERO_X48, add_x48, scale_x48, sum_x48};
use crate::error::ConfigError;

/// Cost components of one day: half-hourly vectors plus fixed daily charges.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DayComponents {
    /// Per-slot costs keyed by bill component (unit rates, per-kWh levies, VAT).
    pub x48: IndexMap<String, X48>,
    /// Fixed charges for the day keyed by bill component.
    pub standing: IndexMap<String, f64>,
}

/// Capability that prices a day of consumption.
///
/// The economic view uses unit rates only; the accounting view adds whatever
/// else appears on a bill.
pub trait RateModel: fmt::Debug + Send + Sync {
    /// Unit-rate cost vectors keyed by rate name.
    fn unit_costs(&self, date: NaiveDate, kwh_x48: &X48) -> IndexMap<String, X48>;

    /// Full bill components for the day.
    fn accounting_components(&self, date: NaiveDate, kwh_x48: &X48) -> DayComponents {
        DayComponents {
            x48: self.unit_costs(date, kwh_x48),
            standing: IndexMap::new(),
        }
    }

    /// Whether prices vary by time of day.
    fn is_differential(&self) -> bool {
        false
    }
}

/// A unit rate applying within a daily time window.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitRate {
    pub name: String,
    pub window: SlotWindow,
    /// £ per kWh.
    pub rate: f64,
}

/// How a non-unit-rate charge accrues.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChargeBasis {
    /// £ per kWh consumed.
    Kwh,
    /// £ per day.
    Day,
    /// £ per month, spread over the days of the month.
    Month,
    /// £ per quarter, spread over the days of the quarter.
    Quarter,
    /// £ per kVA of agreed capacity per month.
    KvaPerMonth { kva: f64 },
}

/// A named charge billed alongside unit rates.
#[derive(Debug, Clone, PartialEq)]
pub struct Charge {
    pub name: String,
    pub rate: f64,
    pub basis: ChargeBasis,
}

/// Rate model built from tariff configuration: windowed unit rates, charges and VAT.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfiguredRates {
    unit_rates: Vec<UnitRate>,
    charges: Vec<Charge>,
    vat_percent: f64,
}

impl ConfiguredRates {
    /// Creates a rate model after checking the unit-rate windows.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if windows overlap, leave slots uncovered, or
    /// VAT is negative.
    pub fn new(
        unit_rates: Vec<UnitRate>,
        charges: Vec<Charge>,
        vat_percent: f64,
    ) -> Result<Self, ConfigError> {
        for (i, a) in unit_rates.iter().enumerate() {
            if let Some(b) = unit_rates[i + 1..].iter().find(|b| a.window.overlaps(&b.window)) {
                return Err(ConfigError::new(
                    "unit_rates",
                    format!("\"{}\" overlaps \"{}\"", a.name, b.name),
                ));
            }
        }
        if let Some(slot) =
            (0..SLOTS_PER_DAY).find(|&s| !unit_rates.iter().any(|r| r.window.contains(s)))
        {
            return Err(ConfigError::new(
                "unit_rates",
                format!("no unit rate covers slot {slot}"),
            ));
        }
        if vat_percent < 0.0 {
            return Err(ConfigError::new("vat_percent", "must be >= 0"));
        }
        Ok(Self {
            unit_rates,
            charges,
            vat_percent,
        })
    }

    /// A single all-day unit rate with no other charges.
    pub fn flat(rate: f64) -> Self {
        Self {
            unit_rates: vec![UnitRate {
                name: "flat_rate".to_string(),
                window: SlotWindow::ALL_DAY,
                rate,
            }],
            charges: Vec::new(),
            vat_percent: 0.0,
        }
    }

    pub fn unit_rates(&self) -> &[UnitRate] {
        &self.unit_rates
    }

    pub fn charges(&self) -> &[Charge] {
        &self.charges
    }

    /// £/kWh for every slot.
    pub fn rate_x48(&self) -> X48 {
        let mut rates = ZERO_X48;
        for (slot, r) in rates.iter_mut().enumerate() {
            if let Some(unit) = self.unit_rates.iter().find(|u| u.window.contains(slot)) {
                *r = unit.rate;
            }
        }
        rates
    }

    fn standing_for_day(&self, charge: &Charge, date: NaiveDate) -> Option<f64> {
        match charge.basis {
            ChargeBasis::Kwh => None,
            ChargeBasis::Day => Some(charge.rate),
            ChargeBasis::Month => Some(charge.rate / days_in_period(month_start(date), 1)),
            ChargeBasis::Quarter => Some(charge.rate / days_in_period(quarter_start(date), 3)),
            ChargeBasis::KvaPerMonth { kva } => {
                Some(charge.rate * kva / days_in_period(month_start(date), 1))
            }
        }
    }
}

impl RateModel for ConfiguredRates {
    fn unit_costs(&self, _date: NaiveDate, kwh_x48: &X48) -> IndexMap<String, X48> {
        let mut costs = IndexMap::with_capacity(self.unit_rates.len());
        for unit in &self.unit_rates {
            let mut x48 = ZERO_X48;
            for (slot, cost) in x48.iter_mut().enumerate() {
                if unit.window.contains(slot) {
                    *cost = kwh_x48[slot] * unit.rate;
                }
            }
            let entry = costs.entry(unit.name.clone()).or_insert(ZERO_X48);
            *entry = add_x48(entry, &x48);
        }
        costs
    }

    fn accounting_components(&self, date: NaiveDate, kwh_x48: &X48) -> DayComponents {
        let mut components = DayComponents {
            x48: self.unit_costs(date, kwh_x48),
            standing: IndexMap::new(),
        };
        for charge in &self.charges {
            match self.standing_for_day(charge, date) {
                Some(amount) => {
                    *components.standing.entry(charge.name.clone()).or_insert(0.0) += amount;
                }
                None => {
                    let x48 = scale_x48(kwh_x48, charge.rate);
                    let entry = components.x48.entry(charge.name.clone()).or_insert(ZERO_X48);
                    *entry = add_x48(entry, &x48);
                }
            }
        }
        if self.vat_percent > 0.0 {
            // VAT on fixed charges is itself a fixed charge
            let name = format!("vat@{}%", self.vat_percent);
            let fraction = self.vat_percent / 100.0;
            let standing_vat = components.standing.values().sum::<f64>() * fraction;
            let usage = components
                .x48
                .values()
                .fold(ZERO_X48, |acc, x48| add_x48(&acc, x48));
            components.x48.insert(name.clone(), scale_x48(&usage, fraction));
            if standing_vat > 0.0 {
                components.standing.insert(name, standing_vat);
            }
        }
        components
    }

    fn is_differential(&self) -> bool {
        self.unit_rates.len() > 1
    }
}

/// First day of the date's month.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date - TimeDelta::days(i64::from(date.day0()))
}

fn quarter_start(date: NaiveDate) -> NaiveDate {
    let first_month = date.month0() / 3 * 3 + 1;
    NaiveDate::from_ymd_opt(date.year(), first_month, 1).unwrap_or_else(|| month_start(date))
}

fn days_in_period(start: NaiveDate, months: u32) -> f64 {
    start
        .checked_add_months(Months::new(months))
        .map_or(30.0 * f64::from(months), |next| (next - start).num_days() as f64)
}

/// Total of all cost components for a day, standing charges included.
pub fn components_total(components: &DayComponents) -> f64 {
    components.x48.values().map(sum_x48).sum::<f64>() + components.standing.values().sum::<f64>()
}
