//! # StrongARM SA-11x0 OS Timer
//!
//! A 32-bit up-counter (OSCR) at 3.6864 MHz and four match registers. Match
//! register 0 drives the clock interrupt; arming writes an absolute count.
//!
//! A match only fires on equality. If the deadline computed from an earlier
//! snapshot of OSCR is already behind the counter by the time OSMR0 is
//! written, the interrupt would not arrive until the counter wraps, about
//! twenty minutes later. [`Sa11x0Ost::arm`] re-reads OSCR after the write and
//! in that case pulls the match in to [`MIN_ARM_TICKS`] ahead.

use bitflags::bitflags;

use super::{overshoot_rearm, ArmMode, CounterWidth, HwTimerSource, MIN_ARM_TICKS};
use crate::mmio::RegisterBlock;

// ============================================================================
// Register Offsets
// ============================================================================

/// Match register 0
pub const OSMR0: usize = 0x00;
/// Match register 1
pub const OSMR1: usize = 0x04;
/// Match register 2
pub const OSMR2: usize = 0x08;
/// Match register 3
pub const OSMR3: usize = 0x0c;
/// Counter
pub const OSCR: usize = 0x10;
/// Status (write one to clear)
pub const OSSR: usize = 0x14;
/// Watchdog enable
pub const OWER: usize = 0x18;
/// Interrupt enable
pub const OIER: usize = 0x1c;

/// Register window size
pub const OST_SIZE: usize = 0x20;

/// Crystal frequency of the OS timer
pub const OST_FREQUENCY: u64 = 3_686_400;

bitflags! {
    /// OSSR / OIER match channel bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MatchChannels: u32 {
        /// OSMR0
        const M0 = 1 << 0;
        /// OSMR1
        const M1 = 1 << 1;
        /// OSMR2
        const M2 = 1 << 2;
        /// OSMR3
        const M3 = 1 << 3;
    }
}

// ============================================================================
// Driver
// ============================================================================

/// SA-11x0 OS timer as a [`HwTimerSource`]
#[derive(Debug)]
pub struct Sa11x0Ost<R: RegisterBlock> {
    regs: R,
    /// Number of arms that had to be pulled in after overshooting
    overshoots: u64,
}

impl<R: RegisterBlock> Sa11x0Ost<R> {
    /// Take over the OS timer with all channels masked
    pub fn new(regs: R) -> Self {
        regs.write32(OIER, 0);
        regs.write32(OSSR, MatchChannels::all().bits());
        Self { regs, overshoots: 0 }
    }

    /// Underlying registers
    pub fn regs(&self) -> &R {
        &self.regs
    }

    /// How many times [`arm`](HwTimerSource::arm) found its deadline passed
    pub fn overshoots(&self) -> u64 {
        self.overshoots
    }
}

impl<R: RegisterBlock> HwTimerSource for Sa11x0Ost<R> {
    fn frequency(&self) -> u64 {
        OST_FREQUENCY
    }

    fn width(&self) -> CounterWidth {
        CounterWidth::BITS32
    }

    fn arm_mode(&self) -> ArmMode {
        ArmMode::Absolute
    }

    #[inline]
    fn read_counter(&self) -> u64 {
        u64::from(self.regs.read32(OSCR))
    }

    fn arm(&mut self, deadline: u64) {
        let width = self.width();
        let deadline = deadline & width.mask();
        self.regs.write32(OSMR0, deadline as u32);

        let now = self.read_counter();
        if let Some(rearm) = overshoot_rearm(width, deadline, now) {
            // Corrected once, never looped on
            self.regs.write32(OSMR0, rearm as u32);
            self.overshoots += 1;
            log::trace!(
                "ost: match {:#x} behind counter {:#x}, pulled in by {} ticks",
                deadline,
                now,
                MIN_ARM_TICKS
            );
        }
    }

    fn acknowledge(&mut self) {
        self.regs.write32(OSSR, MatchChannels::M0.bits());
    }

    fn start(&mut self) {
        let ier = MatchChannels::from_bits_truncate(self.regs.read32(OIER));
        self.regs.write32(OIER, (ier | MatchChannels::M0).bits());
    }

    fn stop(&mut self) {
        let ier = MatchChannels::from_bits_truncate(self.regs.read32(OIER));
        self.regs.write32(OIER, (ier - MatchChannels::M0).bits());
        self.regs.write32(OSSR, MatchChannels::M0.bits());
    }
}
