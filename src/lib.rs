//! Half-hourly meter analytics for schools: consumption stores, meter
//! aggregation and disaggregation, and tariff-based costing.

/// Readings, stores, meters and the aggregation/disaggregation engines.
pub mod amr;
pub mod config;
pub mod error;
pub mod io;
pub mod school;
/// Tariff bindings, resolution and cost calculation.
pub mod tariffs;
pub mod telemetry;

pub use error::{AmrError, ConfigError};
