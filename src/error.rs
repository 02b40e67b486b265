//! Error types shared by the store, aggregation and tariff layers.

use chrono::NaiveDate;
use thiserror::Error;

/// Configuration error with field path and constraint description.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("config error: {field}: {message}")]
pub struct ConfigError {
    /// Dotted field path (e.g., `"tariffs[2].holder"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Failures raised while querying or deriving meter data.
///
/// Gaps, unresolved tariffs and insufficient data are recoverable: callers
/// treat them as "not enough data". Reconciliation and configuration errors
/// mean the loaded model cannot be trusted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AmrError {
    #[error("meter {meter_id} has no reading for {date}")]
    MissingReadingGap { meter_id: String, date: NaiveDate },

    #[error("no tariff covers meter {meter_id} on {date}")]
    UnresolvedTariff { meter_id: String, date: NaiveDate },

    #[error(
        "sub-meters of {meter_id} do not reconcile on {date} slot {slot}: \
         parent {expected} kWh, sub-meters {actual} kWh"
    )]
    ReconciliationMismatch {
        meter_id: String,
        date: NaiveDate,
        slot: usize,
        expected: f64,
        actual: f64,
    },

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("not enough data for meter {meter_id}: {reason}")]
    InsufficientData { meter_id: String, reason: String },
}

impl AmrError {
    /// Whether a caller can carry on by treating the result as "not enough data".
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MissingReadingGap { .. }
                | Self::UnresolvedTariff { .. }
                | Self::InsufficientData { .. }
        )
    }

    pub(crate) fn gap(meter_id: &str, date: NaiveDate) -> Self {
        Self::MissingReadingGap {
            meter_id: meter_id.to_string(),
            date,
        }
    }

    pub(crate) fn unresolved(meter_id: &str, date: NaiveDate) -> Self {
        Self::UnresolvedTariff {
            meter_id: meter_id.to_string(),
            date,
        }
    }
}
