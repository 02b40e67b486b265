pub mod binding;
pub mod cost;
pub mod monthly;
pub mod rates;
pub mod resolver;

pub use binding::{DayFilter, HolderScope, TariffBinding};
pub use cost::{CostEngine, CostKind, DayCost, RangeTotal};
pub use monthly::{MonthlyBill, monthly_breakdown};
pub use rates::{Charge, ChargeBasis, ConfiguredRates, RateModel, UnitRate};
pub use resolver::{MAX_DAYS_BACKDATE_TARIFF, TariffCoverage, TariffResolver, select_binding};
