//! Half-hourly consumption data: readings, stores, meters and how they combine.

pub mod aggregate;
pub mod baseload;
pub mod carbon;
pub mod disaggregate;
pub mod generation;
pub mod meter;
pub mod reading;
pub mod store;
pub mod types;

pub use aggregate::{AggregationOutcome, AggregationRule, Constituent, MeterAggregator};
pub use baseload::BaseloadSettings;
pub use carbon::CarbonIntensity;
pub use disaggregate::{MeterDisaggregator, SolarInstallation, StorageHeaterSettings, SubMeterKind};
pub use generation::{DaylightProfileModel, GenerationModel, YieldTableModel};
pub use meter::{FuelClass, FuelType, Meter, MeterFlags, MeterKind, Metric};
pub use reading::{Correction, HalfHourlyReading, Provenance, Synthesis};
pub use store::TimeSeriesStore;
pub use types::{SLOTS_PER_DAY, SlotWindow, X48};
