//! Monthly bill-component breakdown for accounting reports.

use std::fmt;

use chrono::NaiveDate;
use indexmap::IndexMap;

use super::cost::DayCost;
use super::rates::month_start;
use crate::error::AmrError;

/// One calendar month of accounting costs.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyBill {
    /// First day of the month.
    pub month: NaiveDate,
    /// First and last dates actually costed.
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: usize,
    pub components: IndexMap<String, f64>,
    pub unresolved_dates: Vec<NaiveDate>,
}

impl MonthlyBill {
    fn new(date: NaiveDate) -> Self {
        Self {
            month: month_start(date),
            start_date: date,
            end_date: date,
            days: 0,
            components: IndexMap::new(),
            unresolved_dates: Vec::new(),
        }
    }

    pub fn total(&self) -> f64 {
        self.components.values().sum()
    }

    /// Returns `true` if some days could not be priced.
    pub fn is_partial(&self) -> bool {
        !self.unresolved_dates.is_empty()
    }
}

impl fmt::Display for MonthlyBill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} to {}, {} days): £{:.2}",
            self.month.format("%b %Y"),
            self.start_date,
            self.end_date,
            self.days,
            self.total()
        )?;
        if self.is_partial() {
            write!(f, " partial, {} days without tariff", self.unresolved_dates.len())?;
        }
        for (name, amount) in &self.components {
            write!(f, "\n  {name:<32} £{amount:>10.2}")?;
        }
        Ok(())
    }
}

/// Groups daily accounting costs into calendar months.
///
/// Days must be supplied in date order. Unresolved-tariff days are listed on
/// their month's bill.
///
/// # Errors
///
/// Passes through any day error other than `UnresolvedTariff`.
pub fn monthly_breakdown(
    days: impl IntoIterator<Item = (NaiveDate, Result<DayCost, AmrError>)>,
) -> Result<Vec<MonthlyBill>, AmrError> {
    let mut bills: Vec<MonthlyBill> = Vec::new();
    for (date, cost) in days {
        let cost = match cost {
            Ok(cost) => Some(cost),
            Err(AmrError::UnresolvedTariff { .. }) => None,
            Err(e) => return Err(e),
        };
        if bills.last().is_none_or(|bill| bill.month != month_start(date)) {
            bills.push(MonthlyBill::new(date));
        }
        let Some(bill) = bills.last_mut() else {
            continue;
        };
        bill.end_date = date;
        bill.days += 1;
        match cost {
            Some(cost) => {
                for (name, amount) in cost.bill_components() {
                    *bill.components.entry(name).or_insert(0.0) += amount;
                }
            }
            None => bill.unresolved_dates.push(date),
        }
    }
    Ok(bills)
}
