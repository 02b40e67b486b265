//! TOML-based school configuration: meters, tariffs and disaggregation settings.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;

use crate::amr::aggregate::AggregationRule;
use crate::amr::baseload::BaseloadSettings;
use crate::amr::carbon::{ELECTRICITY_KG_CO2_PER_KWH, GAS_KG_CO2_PER_KWH};
use crate::amr::disaggregate::{SolarInstallation, StorageHeaterSettings};
use crate::amr::generation::{DaylightProfileModel, GenerationModel};
use crate::amr::meter::FuelType;
use crate::amr::types::{SLOTS_PER_DAY, SlotWindow};
pub use crate::error::ConfigError;
use crate::tariffs::binding::{
    DayFilter, HolderScope, TariffBinding, default_end_date, default_start_date,
};
use crate::tariffs::rates::{Charge, ChargeBasis, ConfiguredRates, UnitRate};
use crate::tariffs::resolver::MAX_BACKDATE_OVERRIDE_DAYS;

/// Top-level school configuration parsed from TOML.
///
/// Load with [`SchoolConfig::from_toml_file`] and check with
/// [`SchoolConfig::validate`] before building a model.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchoolConfig {
    /// School identity.
    #[serde(default)]
    pub school: SchoolSection,
    /// Baseload estimation parameters.
    #[serde(default)]
    pub baseload: BaseloadSettings,
    /// Emission factors.
    #[serde(default)]
    pub carbon: CarbonConfig,
    /// Physical meters.
    #[serde(default)]
    pub meters: Vec<MeterConfig>,
    /// Tariff records at every holder scope.
    #[serde(default)]
    pub tariffs: Vec<TariffConfig>,
}

/// School identity.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchoolSection {
    pub name: String,
    /// Unique reference number, if known.
    pub urn: Option<u32>,
}

impl Default for SchoolSection {
    fn default() -> Self {
        Self {
            name: "School".to_string(),
            urn: None,
        }
    }
}

/// Emission factors (kg CO2 per kWh).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CarbonConfig {
    pub electricity_kg_per_kwh: f64,
    pub gas_kg_per_kwh: f64,
}

impl Default for CarbonConfig {
    fn default() -> Self {
        Self {
            electricity_kg_per_kwh: ELECTRICITY_KG_CO2_PER_KWH,
            gas_kg_per_kwh: GAS_KG_CO2_PER_KWH,
        }
    }
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DateRangeConfig {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// One physical meter.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeterConfig {
    /// MPAN/MPRN or other unique identifier.
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub fuel: FuelType,
    /// How the meter joins its fuel's aggregate outside its own reading span.
    #[serde(default)]
    pub aggregation: AggregationRule,
    /// Days to pull the earliest DCC tariff back by, replacing the automatic rule.
    #[serde(default)]
    pub backdate_tariff_days: Option<u32>,
    /// Periods with no readings that are known to be zero consumption.
    #[serde(default)]
    pub confirmed_zero: Vec<DateRangeConfig>,
    #[serde(default)]
    pub storage_heaters: Option<StorageHeaterConfig>,
    #[serde(default)]
    pub solar_pv: Option<SolarPvConfig>,
}

/// A daily time-of-day window, `"HH:MM"` on half-hour boundaries.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowConfig {
    pub from: String,
    pub to: String,
}

/// Storage heater charging windows.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageHeaterConfig {
    pub charge_windows: Vec<WindowConfig>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

/// Generation model for a PV installation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationModelKind {
    /// Synthetic half-sine daylight curve.
    #[default]
    Daylight,
    /// Per-date yields supplied alongside the readings.
    YieldTable,
}

/// Solar PV installation parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolarPvConfig {
    /// Installed capacity (kWp, must be > 0).
    pub capacity_kwp: f64,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub model: GenerationModelKind,
    /// First daylight slot for the daylight model (inclusive).
    pub sunrise_slot: usize,
    /// Last daylight slot for the daylight model (exclusive).
    pub sunset_slot: usize,
    /// Noon output per kWp for the daylight model (kW).
    pub peak_kw_per_kwp: f64,
    /// Multiplicative noise standard deviation for the daylight model.
    pub noise_std: f64,
    pub seed: u64,
}

impl Default for SolarPvConfig {
    fn default() -> Self {
        Self {
            capacity_kwp: 0.0,
            start_date: None,
            end_date: None,
            model: GenerationModelKind::Daylight,
            sunrise_slot: 12,
            sunset_slot: 40,
            peak_kw_per_kwp: 0.8,
            noise_std: 0.0,
            seed: 42,
        }
    }
}

/// Whether a tariff came from the smart-meter feed or was entered by hand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TariffSource {
    #[default]
    Manual,
    Dcc,
}

/// A unit rate over a time-of-day window.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitRateConfig {
    pub name: String,
    #[serde(default = "midnight")]
    pub from: String,
    #[serde(default = "midnight")]
    pub to: String,
    /// £ per kWh.
    pub rate: f64,
}

fn midnight() -> String {
    "00:00".to_string()
}

/// A standing, capacity or per-kWh charge.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChargeConfig {
    pub name: String,
    pub rate: f64,
    /// `"kwh"`, `"day"`, `"month"`, `"quarter"` or `"kva_month"`.
    pub per: String,
    /// Agreed capacity, required when `per = "kva_month"`.
    #[serde(default)]
    pub kva: Option<f64>,
}

/// One tariff record.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TariffConfig {
    pub id: String,
    /// `"meter"`, `"school"`, `"school_group"` or `"system"`.
    pub holder: String,
    /// Meter the tariff belongs to; required for meter-scoped tariffs.
    #[serde(default)]
    pub meter_id: Option<String>,
    /// Fuel a school, group or system tariff applies to.
    #[serde(default)]
    pub fuel: Option<FuelType>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub source: TariffSource,
    #[serde(default)]
    pub days: DayFilter,
    #[serde(default)]
    pub vat_percent: f64,
    #[serde(default)]
    pub unit_rates: Vec<UnitRateConfig>,
    #[serde(default)]
    pub charges: Vec<ChargeConfig>,
}

impl StorageHeaterConfig {
    /// Converts to disaggregation settings.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for malformed or overlapping windows.
    pub fn settings(&self, field: &str) -> Result<StorageHeaterSettings, ConfigError> {
        let windows = self
            .charge_windows
            .iter()
            .enumerate()
            .map(|(i, w)| {
                SlotWindow::parse(&format!("{field}.charge_windows[{i}]"), &w.from, &w.to)
            })
            .collect::<Result<Vec<_>, _>>()?;
        StorageHeaterSettings::new(windows, self.start_date, self.end_date)
            .map_err(|e| ConfigError::new(format!("{field}.charge_windows"), e.message))
    }
}

impl SolarPvConfig {
    /// Builds the installation, using `yields` for the yield-table model.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for a non-positive capacity, bad daylight slots,
    /// or a yield-table model with no yields supplied.
    pub fn installation(
        &self,
        field: &str,
        yields: Option<&Arc<dyn GenerationModel>>,
    ) -> Result<SolarInstallation, ConfigError> {
        if self.capacity_kwp <= 0.0 {
            return Err(ConfigError::new(format!("{field}.capacity_kwp"), "must be > 0"));
        }
        let model: Arc<dyn GenerationModel> = match self.model {
            GenerationModelKind::Daylight => Arc::new(
                DaylightProfileModel::new(
                    self.sunrise_slot,
                    self.sunset_slot,
                    self.peak_kw_per_kwp,
                    self.noise_std,
                    self.seed,
                )
                .map_err(|e| ConfigError::new(format!("{field}.sunrise_slot"), e.message))?,
            ),
            GenerationModelKind::YieldTable => match yields {
                Some(model) => Arc::clone(model),
                None => {
                    return Err(ConfigError::new(
                        format!("{field}.model"),
                        "yield_table model needs solar yields to be supplied",
                    ));
                }
            },
        };
        Ok(SolarInstallation {
            capacity_kwp: self.capacity_kwp,
            start_date: self.start_date,
            end_date: self.end_date,
            model,
        })
    }
}

impl ChargeConfig {
    fn charge(&self, field: &str) -> Result<Charge, ConfigError> {
        let basis = match (self.per.as_str(), self.kva) {
            ("kwh", _) => ChargeBasis::Kwh,
            ("day", _) => ChargeBasis::Day,
            ("month", _) => ChargeBasis::Month,
            ("quarter", _) => ChargeBasis::Quarter,
            ("kva_month", Some(kva)) if kva > 0.0 => ChargeBasis::KvaPerMonth { kva },
            ("kva_month", _) => {
                return Err(ConfigError::new(
                    format!("{field}.kva"),
                    "kva_month charges need a positive kva",
                ));
            }
            (other, _) => {
                return Err(ConfigError::new(
                    format!("{field}.per"),
                    format!(
                        "unknown charge basis \"{other}\", \
                         expected kwh, day, month, quarter or kva_month"
                    ),
                ));
            }
        };
        Ok(Charge {
            name: self.name.clone(),
            rate: self.rate,
            basis,
        })
    }
}

impl TariffConfig {
    /// Parsed holder scope.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for an unknown scope.
    pub fn scope(&self, field: &str) -> Result<HolderScope, ConfigError> {
        self.holder
            .parse()
            .map_err(|e: ConfigError| ConfigError::new(format!("{field}.holder"), e.message))
    }

    /// Returns `true` if this tariff is visible to the given meter.
    pub fn applies_to(&self, meter_id: &str, fuel: FuelType) -> bool {
        match (&self.meter_id, self.fuel) {
            (Some(id), _) => id == meter_id,
            (None, Some(f)) => f.fuel_class() == fuel.fuel_class(),
            (None, None) => false,
        }
    }

    /// Converts to a binding with its rate model.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for an unknown scope, bad dates, windows or charges.
    pub fn to_binding(&self, field: &str) -> Result<TariffBinding, ConfigError> {
        let scope = self.scope(field)?;
        let start = self.start_date.unwrap_or_else(default_start_date);
        let end = self.end_date.unwrap_or_else(default_end_date);
        if start > end {
            return Err(ConfigError::new(
                format!("{field}.start_date"),
                format!("start {start} is after end {end}"),
            ));
        }
        let unit_rates = self
            .unit_rates
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let window =
                    SlotWindow::parse(&format!("{field}.unit_rates[{i}]"), &r.from, &r.to)?;
                Ok(UnitRate {
                    name: r.name.clone(),
                    window,
                    rate: r.rate,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        let charges = self
            .charges
            .iter()
            .enumerate()
            .map(|(i, c)| c.charge(&format!("{field}.charges[{i}]")))
            .collect::<Result<Vec<_>, _>>()?;
        let rates = ConfiguredRates::new(unit_rates, charges, self.vat_percent)
            .map_err(|e| ConfigError::new(format!("{field}.{}", e.field), e.message))?;

        let mut binding = TariffBinding::new(self.id.clone(), scope, Arc::new(rates))
            .with_dates(start, end)
            .with_days(self.days);
        if let Some(created_at) = self.created_at {
            binding = binding.with_created_at(created_at);
        }
        if self.source == TariffSource::Dcc {
            binding = binding.dcc();
        }
        Ok(binding)
    }
}

impl SchoolConfig {
    /// Parses a school from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "school".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a school from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    /// Meter-scoped and fuel-matching tariffs visible to a meter, in file order.
    pub fn tariffs_for(&self, meter: &MeterConfig) -> impl Iterator<Item = (usize, &TariffConfig)> {
        self.tariffs
            .iter()
            .enumerate()
            .filter(move |(_, t)| t.applies_to(&meter.id, meter.fuel))
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid. Solar installations
    /// using the yield-table model are checked only for capacity, since their
    /// yields arrive separately.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let b = &self.baseload;
        if b.window_slots == 0 || b.window_slots > SLOTS_PER_DAY {
            errors.push(ConfigError::new("baseload.window_slots", "must be in 1..=48"));
        }
        if b.solar_offset_slot >= SLOTS_PER_DAY {
            errors.push(ConfigError::new("baseload.solar_offset_slot", "must be < 48"));
        }
        if self.carbon.electricity_kg_per_kwh < 0.0 {
            errors.push(ConfigError::new("carbon.electricity_kg_per_kwh", "must be >= 0"));
        }
        if self.carbon.gas_kg_per_kwh < 0.0 {
            errors.push(ConfigError::new("carbon.gas_kg_per_kwh", "must be >= 0"));
        }

        let mut meter_ids = HashSet::new();
        for (i, m) in self.meters.iter().enumerate() {
            let field = format!("meters[{i}]");
            if m.id.trim().is_empty() {
                errors.push(ConfigError::new(format!("{field}.id"), "must not be empty"));
            } else if !meter_ids.insert(m.id.as_str()) {
                errors.push(ConfigError::new(
                    format!("{field}.id"),
                    format!("duplicate meter id \"{}\"", m.id),
                ));
            }
            if m.backdate_tariff_days.is_some_and(|d| d > MAX_BACKDATE_OVERRIDE_DAYS) {
                errors.push(ConfigError::new(
                    format!("{field}.backdate_tariff_days"),
                    format!("must be <= {MAX_BACKDATE_OVERRIDE_DAYS}"),
                ));
            }
            for (j, range) in m.confirmed_zero.iter().enumerate() {
                if range.start > range.end {
                    errors.push(ConfigError::new(
                        format!("{field}.confirmed_zero[{j}]"),
                        "start is after end",
                    ));
                }
            }
            if let Some(sh) = &m.storage_heaters {
                if m.fuel.fuel_class() != FuelType::Electricity.fuel_class() {
                    errors.push(ConfigError::new(
                        format!("{field}.storage_heaters"),
                        "storage heaters need an electricity meter",
                    ));
                }
                if let Err(e) = sh.settings(&format!("{field}.storage_heaters")) {
                    errors.push(e);
                }
            }
            if let Some(pv) = &m.solar_pv {
                let pv_field = format!("{field}.solar_pv");
                let check = match pv.model {
                    GenerationModelKind::Daylight => pv.installation(&pv_field, None).err(),
                    GenerationModelKind::YieldTable => (pv.capacity_kwp <= 0.0).then(|| {
                        ConfigError::new(format!("{pv_field}.capacity_kwp"), "must be > 0")
                    }),
                };
                errors.extend(check);
            }
        }

        let mut tariff_ids = HashSet::new();
        for (i, t) in self.tariffs.iter().enumerate() {
            let field = format!("tariffs[{i}]");
            if !tariff_ids.insert(t.id.as_str()) {
                errors.push(ConfigError::new(
                    format!("{field}.id"),
                    format!("duplicate tariff id \"{}\"", t.id),
                ));
            }
            match t.scope(&field) {
                Ok(HolderScope::Meter) => match &t.meter_id {
                    Some(id) if meter_ids.contains(id.as_str()) => {}
                    Some(id) => errors.push(ConfigError::new(
                        format!("{field}.meter_id"),
                        format!("unknown meter \"{id}\""),
                    )),
                    None => errors.push(ConfigError::new(
                        format!("{field}.meter_id"),
                        "meter-scoped tariffs need a meter_id",
                    )),
                },
                Ok(_) => {
                    if t.meter_id.is_some() {
                        errors.push(ConfigError::new(
                            format!("{field}.meter_id"),
                            "only meter-scoped tariffs may name a meter",
                        ));
                    }
                    if t.fuel.is_none() {
                        errors.push(ConfigError::new(
                            format!("{field}.fuel"),
                            "school, group and system tariffs need a fuel",
                        ));
                    }
                }
                Err(e) => errors.push(e),
            }
            if let Err(e) = t.to_binding(&field) {
                // Unknown scope is already reported above
                if !e.field.ends_with(".holder") {
                    errors.push(e);
                }
            }
        }

        errors
    }
}
