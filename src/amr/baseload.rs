//! Baseload estimation: the continuous background draw of always-on equipment.

use serde::Deserialize;

use super::types::{SLOTS_PER_DAY, X48};

/// Parameters for the lowest-block baseload estimate.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BaseloadSettings {
    /// Length of the contiguous block of slots averaged (must be 1..=48).
    pub window_slots: usize,
    /// First slot considered when the meter has simulated solar (default 41, 20:30).
    pub solar_offset_slot: usize,
}

impl Default for BaseloadSettings {
    fn default() -> Self {
        Self {
            window_slots: 8,
            solar_offset_slot: 41,
        }
    }
}

/// Estimates baseload (kW) for one day of half-hourly kWh.
///
/// Finds the contiguous block of `window_slots` slots with the lowest total
/// and returns its mean converted from kWh per half hour to kW. When
/// `exclude_solar` is set only slots from `solar_offset_slot` onwards are
/// searched, since daytime consumption is masked by generation; the block is
/// shortened if fewer slots remain.
///
/// # Arguments
///
/// * `kwh_x48` - One day's half-hourly consumption
/// * `settings` - Block length and solar offset
/// * `exclude_solar` - Restrict the search to post-generation evening slots
///
/// # Returns
///
/// Estimated baseload in kW.
pub fn baseload_kw(kwh_x48: &X48, settings: &BaseloadSettings, exclude_solar: bool) -> f64 {
    let first = if exclude_solar {
        settings.solar_offset_slot.min(SLOTS_PER_DAY - 1)
    } else {
        0
    };
    let candidates = &kwh_x48[first..];
    let window = settings.window_slots.clamp(1, candidates.len());

    let lowest_block_kwh = candidates
        .windows(window)
        .map(|block| block.iter().sum::<f64>())
        .fold(f64::INFINITY, f64::min);

    // kWh per half hour to kW
    2.0 * lowest_block_kwh / window as f64
}
