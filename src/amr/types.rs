//! Half-hourly slot constants, 48-slot vector helpers and time-of-day windows.

use chrono::{NaiveTime, Timelike};

use crate::error::ConfigError;

/// Number of half-hour slots in a calendar day.
pub const SLOTS_PER_DAY: usize = 48;

/// One day of half-hourly values, slot 0 covering 00:00-00:30.
pub type X48 = [f64; SLOTS_PER_DAY];

/// A day of zeros.
pub const ZERO_X48: X48 = [0.0; SLOTS_PER_DAY];

/// Element-wise sum of two day vectors.
pub fn add_x48(a: &X48, b: &X48) -> X48 {
    let mut out = ZERO_X48;
    for (slot, v) in out.iter_mut().enumerate() {
        *v = a[slot] + b[slot];
    }
    out
}

/// Element-wise product of two day vectors.
pub fn multiply_x48(a: &X48, b: &X48) -> X48 {
    let mut out = ZERO_X48;
    for (slot, v) in out.iter_mut().enumerate() {
        *v = a[slot] * b[slot];
    }
    out
}

/// Multiplies every slot by `factor`.
pub fn scale_x48(a: &X48, factor: f64) -> X48 {
    a.map(|v| v * factor)
}

/// Sum of all 48 slots.
pub fn sum_x48(a: &X48) -> f64 {
    a.iter().sum()
}

/// A daily time-of-day window expressed in whole half-hour slots.
///
/// `start` is inclusive and `end` exclusive. A window whose end is before its
/// start wraps midnight (e.g. 23:00-07:00 covers slots 46, 47 and 0..14).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotWindow {
    start: usize,
    end: usize,
}

impl SlotWindow {
    /// The whole day.
    pub const ALL_DAY: SlotWindow = SlotWindow {
        start: 0,
        end: SLOTS_PER_DAY,
    };

    /// Creates a window from slot indices.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if either index exceeds 48 or the window is empty.
    pub fn new(start: usize, end: usize) -> Result<Self, ConfigError> {
        if start >= SLOTS_PER_DAY || end > SLOTS_PER_DAY || start == end {
            return Err(ConfigError::new(
                "window",
                format!("slot window {start}..{end} is empty or outside 0..48"),
            ));
        }
        Ok(Self { start, end })
    }

    /// Creates a window from wall-clock times on half-hour boundaries.
    ///
    /// A `to` of 00:00 means midnight at the end of the day, so 00:00-00:00
    /// is the whole day.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a time is not on a half-hour boundary.
    pub fn from_times(from: NaiveTime, to: NaiveTime) -> Result<Self, ConfigError> {
        let start = time_to_slot(from)?;
        let end = match time_to_slot(to)? {
            0 => SLOTS_PER_DAY,
            slot => slot,
        };
        Self::new(start, end)
    }

    /// Parses `"HH:MM"` strings into a window.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` naming `field` if either time is malformed.
    pub fn parse(field: &str, from: &str, to: &str) -> Result<Self, ConfigError> {
        let parse_time = |s: &str| {
            NaiveTime::parse_from_str(s, "%H:%M")
                .map_err(|e| ConfigError::new(field, format!("invalid time \"{s}\": {e}")))
        };
        Self::from_times(parse_time(from)?, parse_time(to)?)
            .map_err(|e| ConfigError::new(field, e.message))
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// Returns `true` if `slot` falls inside the window.
    pub fn contains(&self, slot: usize) -> bool {
        if self.start < self.end {
            slot >= self.start && slot < self.end
        } else {
            slot >= self.start || slot < self.end
        }
    }

    /// Number of slots covered.
    pub fn len(&self) -> usize {
        (0..SLOTS_PER_DAY).filter(|&s| self.contains(s)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if any slot is in both windows.
    pub fn overlaps(&self, other: &SlotWindow) -> bool {
        (0..SLOTS_PER_DAY).any(|s| self.contains(s) && other.contains(s))
    }
}

fn time_to_slot(t: NaiveTime) -> Result<usize, ConfigError> {
    if t.second() != 0 || !(t.minute() == 0 || t.minute() == 30) {
        return Err(ConfigError::new(
            "window",
            format!("{} is not on a half-hour boundary", t.format("%H:%M:%S")),
        ));
    }
    Ok(t.hour() as usize * 2 + t.minute() as usize / 30)
}
