//! Solar generation models used to split meters with PV panels.

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fmt;

use chrono::{Datelike, NaiveDate};
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::types::{SLOTS_PER_DAY, X48, ZERO_X48};
use crate::error::ConfigError;

/// Supplies half-hourly PV generation for an installation.
pub trait GenerationModel: fmt::Debug + Send + Sync {
    /// Generation in kWh per slot on `date` for `capacity_kwp` of panels.
    ///
    /// Returns `None` if the model has no data for the date.
    fn generation_kwh_x48(&self, date: NaiveDate, capacity_kwp: f64) -> Option<X48>;
}

/// Half-sine daylight curve with per-day weather noise.
///
/// Noise is drawn from an RNG seeded with the model seed and the date, so the
/// same date always produces the same profile.
#[derive(Debug, Clone, PartialEq)]
pub struct DaylightProfileModel {
    /// First daylight slot (inclusive).
    pub sunrise_slot: usize,
    /// Last daylight slot (exclusive).
    pub sunset_slot: usize,
    /// Output at solar noon per kWp of panels (kW).
    pub peak_kw_per_kwp: f64,
    /// Standard deviation of the multiplicative noise.
    pub noise_std: f64,
    pub seed: u64,
}

impl DaylightProfileModel {
    /// Creates a daylight model.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if `sunrise_slot >= sunset_slot` or
    /// `sunset_slot > 48`.
    pub fn new(
        sunrise_slot: usize,
        sunset_slot: usize,
        peak_kw_per_kwp: f64,
        noise_std: f64,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        if sunrise_slot >= sunset_slot || sunset_slot > SLOTS_PER_DAY {
            return Err(ConfigError::new(
                "solar_pv.sunrise_slot",
                format!(
                    "daylight {sunrise_slot}..{sunset_slot} must be non-empty and within 0..48"
                ),
            ));
        }
        Ok(Self {
            sunrise_slot,
            sunset_slot,
            peak_kw_per_kwp: peak_kw_per_kwp.max(0.0),
            noise_std: noise_std.max(0.0),
            seed,
        })
    }

    /// Fraction of peak output at the middle of `slot`.
    fn daylight_frac(&self, slot: usize) -> f64 {
        if slot < self.sunrise_slot || slot >= self.sunset_slot {
            return 0.0;
        }
        let span = (self.sunset_slot - self.sunrise_slot) as f64;
        let x = (slot - self.sunrise_slot) as f64 + 0.5;
        (PI * x / span).sin()
    }
}

impl GenerationModel for DaylightProfileModel {
    fn generation_kwh_x48(&self, date: NaiveDate, capacity_kwp: f64) -> Option<X48> {
        let day_seed = self.seed ^ u64::from(date.num_days_from_ce().unsigned_abs());
        let mut rng = StdRng::seed_from_u64(day_seed);
        let mut x48 = ZERO_X48;
        for (slot, kwh) in x48.iter_mut().enumerate() {
            let frac = self.daylight_frac(slot);
            if frac <= 0.0 {
                continue;
            }
            let noise_mult = 1.0 + gaussian_noise(&mut rng, self.noise_std);
            let kw = capacity_kwp * self.peak_kw_per_kwp * frac * noise_mult;
            *kwh = kw.max(0.0) / 2.0;
        }
        Some(x48)
    }
}

/// Gaussian noise with mean 0 via the Box-Muller transform.
fn gaussian_noise(rng: &mut StdRng, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }
    let u1: f64 = rng.random::<f64>().clamp(1e-12, 1.0);
    let u2: f64 = rng.random::<f64>();
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
    z0 * std_dev
}

/// Per-date yields, e.g. from a regional PV output feed.
///
/// Yields are in kW per kWp for each half hour, so kWh = yield × capacity / 2.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct YieldTableModel {
    yields: BTreeMap<NaiveDate, X48>,
}

impl YieldTableModel {
    pub fn new(yields: BTreeMap<NaiveDate, X48>) -> Self {
        Self { yields }
    }

    pub fn len(&self) -> usize {
        self.yields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.yields.is_empty()
    }
}

impl GenerationModel for YieldTableModel {
    fn generation_kwh_x48(&self, date: NaiveDate, capacity_kwp: f64) -> Option<X48> {
        self.yields
            .get(&date)
            .map(|kw_per_kwp| kw_per_kwp.map(|y| y * capacity_kwp / 2.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amr::types::sum_x48;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 21).expect("valid date")
    }

    #[test]
    fn test_invalid_daylight_rejected() {
        assert!(DaylightProfileModel::new(30, 12, 0.8, 0.0, 1).is_err());
        assert!(DaylightProfileModel::new(12, 49, 0.8, 0.0, 1).is_err());
    }

    #[test]
    fn test_negative_parameters_clamped_to_zero() {
        let m = DaylightProfileModel::new(12, 40, -1.0, -0.1, 1).expect("valid");
        assert_eq!(m.peak_kw_per_kwp, 0.0);
        assert_eq!(m.noise_std, 0.0);
    }

    #[test]
    fn test_daylight_frac_shape() {
        let m = DaylightProfileModel::new(12, 36, 0.8, 0.0, 1).expect("valid");
        assert_eq!(m.daylight_frac(0), 0.0);
        assert_eq!(m.daylight_frac(11), 0.0);
        assert_eq!(m.daylight_frac(36), 0.0);
        assert!(m.daylight_frac(12) < 0.1);
        assert!(m.daylight_frac(23) > 0.99);
        assert!((m.daylight_frac(15) - m.daylight_frac(32)).abs() < 1e-9);
    }

    #[test]
    fn test_no_generation_at_night() {
        let m = DaylightProfileModel::new(12, 36, 0.8, 0.1, 1).expect("valid");
        let x48 = m.generation_kwh_x48(date(), 10.0).expect("always available");
        assert!(x48[..12].iter().all(|v| *v == 0.0));
        assert!(x48[36..].iter().all(|v| *v == 0.0));
        assert!(x48.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_peak_output_without_noise() {
        let m = DaylightProfileModel::new(12, 36, 0.8, 0.0, 1).expect("valid");
        let x48 = m.generation_kwh_x48(date(), 10.0).expect("always available");
        // 10 kWp at 0.8 kW/kWp for half an hour
        assert!(x48[23] > 3.95 && x48[23] <= 4.0);
    }

    #[test]
    fn test_same_date_same_profile() {
        let m = DaylightProfileModel::new(12, 36, 0.8, 0.2, 42).expect("valid");
        assert_eq!(m.generation_kwh_x48(date(), 5.0), m.generation_kwh_x48(date(), 5.0));
        let other = DaylightProfileModel::new(12, 36, 0.8, 0.2, 43).expect("valid");
        assert_ne!(m.generation_kwh_x48(date(), 5.0), other.generation_kwh_x48(date(), 5.0));
    }

    #[test]
    fn test_yield_table_scales_by_capacity() {
        let model = YieldTableModel::new(BTreeMap::from([(date(), [0.5; 48])]));
        let x48 = model.generation_kwh_x48(date(), 4.0).expect("date present");
        assert!((sum_x48(&x48) - 48.0).abs() < 1e-9);
        assert!(model.generation_kwh_x48(date().succ_opt().expect("valid"), 4.0).is_none());
    }
}
