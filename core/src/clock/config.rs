//! Clock rate configuration.

use keel_hal::{CounterWidth, TimerError};

use crate::error::ClockError;

/// Hardclock rate used when the configured one is unusable
pub const DEFAULT_HZ: u32 = 100;

/// Fewest counter ticks a statclock period may span. Below this the
/// variance window collapses and the period cannot be randomized.
pub const MIN_STAT_INTERVAL: u64 = 16;

/// Requested clock rates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockConfig {
    /// Hardclock rate
    pub hz: u32,
    /// Statclock rate
    pub stathz: u32,
    /// Statclock rate while profiling
    pub profhz: u32,
}

impl ClockConfig {
    /// `hz` with statclock at the same rate and profiling at ten times it
    pub const fn new(hz: u32) -> Self {
        Self {
            hz,
            stathz: hz,
            profhz: hz.saturating_mul(10),
        }
    }

    /// Check the rates against a counter of `frequency` Hz and `width`,
    /// substituting fallbacks for the ones it cannot produce.
    ///
    /// Only a counter that cannot run the clock at [`DEFAULT_HZ`] either is
    /// an error.
    pub fn resolve(&self, frequency: u64, width: CounterWidth) -> Result<ClockRates, ClockError> {
        if frequency == 0 {
            return Err(ClockError::NoFrequency);
        }

        let mut hz = self.hz;
        if !hard_rate_usable(frequency, width, hz) {
            log::warn!(
                "clock: hz {} not possible with a {} Hz counter, using {}",
                hz,
                frequency,
                DEFAULT_HZ
            );
            hz = DEFAULT_HZ;
            if !hard_rate_usable(frequency, width, hz) {
                return Err(ClockError::Timer(TimerError::UnsupportedFrequency(frequency)));
            }
        }

        let stathz = if stat_rate_usable(frequency, width, self.stathz) {
            self.stathz
        } else {
            log::warn!("clock: stathz {} not possible, using hz {}", self.stathz, hz);
            hz
        };
        let profhz = if stat_rate_usable(frequency, width, self.profhz) {
            self.profhz
        } else {
            log::warn!("clock: profhz {} not possible, using stathz {}", self.profhz, stathz);
            stathz
        };

        Ok(ClockRates {
            frequency,
            hz,
            stathz,
            profhz,
        })
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HZ)
    }
}

/// Whether a hardclock at `rate` can also serve as the statclock fallback
#[inline]
fn hard_rate_usable(frequency: u64, width: CounterWidth, rate: u32) -> bool {
    stat_rate_usable(frequency, width, rate)
}

/// Whether a statclock at `rate` leaves room for the variance window and
/// keeps every randomized period under half the counter range.
///
/// A period is at most `statint + statint / 4`, since the window never
/// exceeds half the nominal interval.
#[inline]
pub(crate) fn stat_rate_usable(frequency: u64, width: CounterWidth, rate: u32) -> bool {
    if rate == 0 {
        return false;
    }
    let statint = frequency / u64::from(rate);
    statint >= MIN_STAT_INTERVAL && statint.saturating_add(statint / 4) < width.half()
}

/// Rates in force after validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockRates {
    /// Counter frequency
    pub frequency: u64,
    /// Hardclock rate
    pub hz: u32,
    /// Statclock rate
    pub stathz: u32,
    /// Profiling statclock rate
    pub profhz: u32,
}
