//! # Hardware Timer Sources
//!
//! One contract over several generations of SoC timer hardware:
//!
//! ```text
//! ┌──────────────┬───────────┬──────────────┬──────────────────────────────┐
//! │ Backend      │ Counter   │ Arm model    │ Acknowledge                  │
//! ├──────────────┼───────────┼──────────────┼──────────────────────────────┤
//! │ ARM generic  │ 64-bit up │ Relative     │ reprogramming TVAL           │
//! │ i80321       │ 32-bit dn │ Relative     │ write-1-to-clear TISR        │
//! │ SA-11x0 OST  │ 32-bit up │ Absolute     │ write-1-to-clear OSSR        │
//! └──────────────┴───────────┴──────────────┴──────────────────────────────┘
//! ```
//!
//! Down-counting hardware is normalized so [`HwTimerSource::read_counter`]
//! always increases. Counters wrap at their hardware width, so callers
//! compare counts with [`CounterWidth`] wrapping arithmetic, never with `<`.

pub mod generic;
pub mod i80321;
pub mod sa11x0;

// ============================================================================
// Timer Constants
// ============================================================================

/// Smallest deadline a comparator is re-armed with after an overshoot
pub const MIN_ARM_TICKS: u64 = 10;

static_assertions::const_assert!(MIN_ARM_TICKS > 0);

// ============================================================================
// Common Timer Types
// ============================================================================

/// Timer error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// Timer frequency not available
    FrequencyNotAvailable,
    /// Requested frequency cannot be produced by the hardware
    UnsupportedFrequency(u64),
}

impl core::fmt::Display for TimerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::FrequencyNotAvailable => write!(f, "timer frequency not available"),
            Self::UnsupportedFrequency(hz) => write!(f, "unsupported timer frequency {} Hz", hz),
        }
    }
}

/// How [`HwTimerSource::arm`] interprets its argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmMode {
    /// Fire after N further ticks (down-counters, TVAL-style registers)
    Relative,
    /// Fire when the counter equals X (match/compare registers)
    Absolute,
}

// ============================================================================
// Counter Arithmetic
// ============================================================================

/// Width of a free-running counter, and wrap-tolerant arithmetic on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterWidth {
    bits: u32,
}

impl CounterWidth {
    /// 32-bit counter
    pub const BITS32: Self = Self::new(32);
    /// 64-bit counter
    pub const BITS64: Self = Self::new(64);

    /// Counter of `bits` width (2..=64)
    pub const fn new(bits: u32) -> Self {
        assert!(bits >= 2 && bits <= 64);
        Self { bits }
    }

    /// Number of bits
    #[inline]
    pub const fn bits(self) -> u32 {
        self.bits
    }

    /// All-ones mask for this width
    #[inline]
    pub const fn mask(self) -> u64 {
        if self.bits == 64 {
            u64::MAX
        } else {
            (1u64 << self.bits) - 1
        }
    }

    /// Half the counter range; differences at or above this are "in the past"
    #[inline]
    pub const fn half(self) -> u64 {
        1u64 << (self.bits - 1)
    }

    /// `a - b` modulo the counter width
    #[inline]
    pub const fn sub(self, a: u64, b: u64) -> u64 {
        a.wrapping_sub(b) & self.mask()
    }

    /// `a + b` modulo the counter width
    #[inline]
    pub const fn add(self, a: u64, b: u64) -> u64 {
        a.wrapping_add(b) & self.mask()
    }

    /// Whether `now` has reached or passed `deadline`.
    ///
    /// Valid as long as the two are less than half the range apart.
    #[inline]
    pub const fn reached(self, now: u64, deadline: u64) -> bool {
        self.sub(now, deadline) < self.half()
    }

    /// Ticks from `now` until `deadline`, or `None` once it has been reached
    #[inline]
    pub const fn until(self, now: u64, deadline: u64) -> Option<u64> {
        if self.reached(now, deadline) {
            None
        } else {
            Some(self.sub(deadline, now))
        }
    }
}

// ============================================================================
// Timer Source Contract
// ============================================================================

/// A free-running counter plus a one-shot comparator.
pub trait HwTimerSource {
    /// Counter frequency in Hz
    fn frequency(&self) -> u64;

    /// Counter width; [`read_counter`](Self::read_counter) wraps at it
    fn width(&self) -> CounterWidth;

    /// How [`arm`](Self::arm) interprets its argument
    fn arm_mode(&self) -> ArmMode;

    /// Current count. Safe from interrupt and thread context.
    fn read_counter(&self) -> u64;

    /// Program the next interrupt; see [`ArmMode`].
    fn arm(&mut self, value: u64);

    /// Clear the interrupt-pending status. Called exactly once per serviced
    /// interrupt, before re-arming.
    fn acknowledge(&mut self);

    /// Enable the counter and its interrupt output
    fn start(&mut self) {}

    /// Stop generating interrupts
    fn stop(&mut self) {}

    /// Program an interrupt `ticks` after `now` regardless of arm model
    fn arm_after(&mut self, now: u64, ticks: u64) {
        let ticks = ticks.max(1);
        match self.arm_mode() {
            ArmMode::Relative => self.arm(ticks),
            ArmMode::Absolute => {
                let deadline = self.width().add(now, ticks);
                self.arm(deadline);
            },
        }
    }
}

/// Overshoot check for absolute comparators.
///
/// After writing `deadline` to a match register the counter is re-read as
/// `now`. If the deadline is already behind the counter the match will not
/// fire until the counter wraps, so the replacement deadline to write is
/// returned.
#[inline]
pub fn overshoot_rearm(width: CounterWidth, deadline: u64, now: u64) -> Option<u64> {
    if width.reached(now, deadline) {
        Some(width.add(now, MIN_ARM_TICKS))
    } else {
        None
    }
}
