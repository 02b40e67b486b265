//! Tariff records attached to a meter, school, school group or the system default.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Weekday};
use serde::Deserialize;

use super::rates::RateModel;
use crate::error::ConfigError;

/// Entity a tariff is attached to, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HolderScope {
    Meter,
    School,
    SchoolGroup,
    System,
}

impl HolderScope {
    /// Order in which pools are consulted.
    pub const PRECEDENCE: [HolderScope; 4] = [
        HolderScope::Meter,
        HolderScope::School,
        HolderScope::SchoolGroup,
        HolderScope::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Meter => "meter",
            Self::School => "school",
            Self::SchoolGroup => "school_group",
            Self::System => "system",
        }
    }
}

impl FromStr for HolderScope {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::PRECEDENCE
            .into_iter()
            .find(|scope| scope.as_str() == s)
            .ok_or_else(|| {
                ConfigError::new(
                    "holder",
                    format!(
                        "unknown holder scope \"{s}\", \
                         expected meter, school, school_group or system"
                    ),
                )
            })
    }
}

impl fmt::Display for HolderScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Days of the week a tariff applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayFilter {
    #[default]
    All,
    Weekdays,
    Weekends,
}

impl DayFilter {
    pub fn matches(&self, date: NaiveDate) -> bool {
        let weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
        match self {
            Self::All => true,
            Self::Weekdays => !weekend,
            Self::Weekends => weekend,
        }
    }
}

/// Start date used for tariffs configured without one.
pub fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2008, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// End date used for tariffs configured without one.
pub fn default_end_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2050, 1, 1).unwrap_or(NaiveDate::MAX)
}

/// A tariff attached to a holder for an inclusive date range.
#[derive(Debug, Clone)]
pub struct TariffBinding {
    pub id: String,
    pub scope: HolderScope,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// When the record was entered; `None` loses every tie.
    pub created_at: Option<NaiveDateTime>,
    /// Provisioned from the smart-meter feed rather than entered by hand.
    pub is_dcc: bool,
    pub days: DayFilter,
    pub rate_model: Arc<dyn RateModel>,
}

impl TariffBinding {
    /// Creates an open-ended, manually entered binding applying on every day.
    pub fn new(id: impl Into<String>, scope: HolderScope, rate_model: Arc<dyn RateModel>) -> Self {
        Self {
            id: id.into(),
            scope,
            start_date: default_start_date(),
            end_date: default_end_date(),
            created_at: None,
            is_dcc: false,
            days: DayFilter::All,
            rate_model,
        }
    }

    pub fn with_dates(mut self, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        self.start_date = start_date;
        self.end_date = end_date;
        self
    }

    pub fn with_created_at(mut self, created_at: NaiveDateTime) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_days(mut self, days: DayFilter) -> Self {
        self.days = days;
        self
    }

    pub fn dcc(mut self) -> Self {
        self.is_dcc = true;
        self
    }

    /// Returns `true` if the binding applies on `date`.
    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date && self.days.matches(date)
    }
}
