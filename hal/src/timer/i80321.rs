//! # Intel i80321 (XScale) Timers
//!
//! The i80321 has two 32-bit down-counters clocked from the core. Timer 1
//! free-runs from `0xffff_ffff` with auto-reload and supplies the counter;
//! its value is inverted so the count increases. Timer 0 is loaded with the
//! number of ticks to the next event and started one-shot, so arming is
//! relative.
//!
//! ## Registers (coprocessor 6, CRm = c1)
//!
//! ```text
//! ┌───────┬─────┬─────────────────────────────────┐
//! │ Name  │ CRn │ Description                     │
//! ├───────┼─────┼─────────────────────────────────┤
//! │ TMR0  │ c0  │ Timer 0 mode                    │
//! │ TMR1  │ c1  │ Timer 1 mode                    │
//! │ TCR0  │ c2  │ Timer 0 count                   │
//! │ TCR1  │ c3  │ Timer 1 count                   │
//! │ TRR0  │ c4  │ Timer 0 reload                  │
//! │ TRR1  │ c5  │ Timer 1 reload                  │
//! │ TISR  │ c6  │ Interrupt status (W1C)          │
//! └───────┴─────┴─────────────────────────────────┘
//! ```

use bitflags::bitflags;

use super::{ArmMode, CounterWidth, HwTimerSource, TimerError};
use crate::mmio::RegisterBlock;

// ============================================================================
// Register Indices
// ============================================================================

/// Timer 0 mode
pub const TMR0: usize = 0x00;
/// Timer 1 mode
pub const TMR1: usize = 0x04;
/// Timer 0 count
pub const TCR0: usize = 0x08;
/// Timer 1 count
pub const TCR1: usize = 0x0c;
/// Timer 0 reload
pub const TRR0: usize = 0x10;
/// Timer 1 reload
pub const TRR1: usize = 0x14;
/// Timer interrupt status
pub const TISR: usize = 0x18;

bitflags! {
    /// TMRx bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TimerMode: u32 {
        /// Terminal count reached
        const TC = 1 << 0;
        /// Counting enabled
        const ENABLE = 1 << 1;
        /// Reload from TRRx at terminal count
        const RELOAD = 1 << 2;
        /// Privileged-only access
        const PRIV = 1 << 3;
    }
}

bitflags! {
    /// TISR bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TimerStatus: u32 {
        /// Timer 0 interrupt pending
        const TMR0 = 1 << 0;
        /// Timer 1 interrupt pending
        const TMR1 = 1 << 1;
    }
}

// ============================================================================
// Driver
// ============================================================================

/// i80321 timer pair as a [`HwTimerSource`]
#[derive(Debug)]
pub struct I80321Timer<R: RegisterBlock> {
    regs: R,
    frequency: u64,
}

impl<R: RegisterBlock> I80321Timer<R> {
    /// Take over both timers. `frequency` is the core clock the timers run at.
    pub fn new(regs: R, frequency: u64) -> Result<Self, TimerError> {
        if frequency == 0 || frequency > u64::from(u32::MAX) {
            return Err(TimerError::UnsupportedFrequency(frequency));
        }

        // Free-running count source
        regs.write32(TMR1, 0);
        regs.write32(TRR1, u32::MAX);
        regs.write32(TCR1, u32::MAX);
        regs.write32(TMR1, (TimerMode::ENABLE | TimerMode::RELOAD | TimerMode::PRIV).bits());

        // One-shot event timer, idle until armed
        regs.write32(TMR0, 0);
        regs.write32(TISR, (TimerStatus::TMR0 | TimerStatus::TMR1).bits());

        Ok(Self { regs, frequency })
    }

    /// Underlying registers
    pub fn regs(&self) -> &R {
        &self.regs
    }
}

impl<R: RegisterBlock> HwTimerSource for I80321Timer<R> {
    fn frequency(&self) -> u64 {
        self.frequency
    }

    fn width(&self) -> CounterWidth {
        CounterWidth::BITS32
    }

    fn arm_mode(&self) -> ArmMode {
        ArmMode::Relative
    }

    #[inline]
    fn read_counter(&self) -> u64 {
        u64::from(!self.regs.read32(TCR1))
    }

    fn arm(&mut self, ticks: u64) {
        let count = ticks.clamp(1, u64::from(u32::MAX)) as u32;
        self.regs.write32(TMR0, 0);
        self.regs.write32(TCR0, count);
        self.regs.write32(TMR0, (TimerMode::ENABLE | TimerMode::PRIV).bits());
    }

    fn acknowledge(&mut self) {
        self.regs.write32(TISR, TimerStatus::TMR0.bits());
    }

    fn stop(&mut self) {
        self.regs.write32(TMR0, 0);
        self.regs.write32(TISR, TimerStatus::TMR0.bits());
    }
}

// ============================================================================
// Coprocessor Access
// ============================================================================

cfg_if::cfg_if! {
    if #[cfg(target_arch = "arm")] {
        /// Coprocessor 6 timer registers, indexed by the constants above
        #[derive(Debug, Default)]
        pub struct Cp6Timers;

        macro_rules! cp6_read {
            ($crn:literal) => {{
                let v: u32;
                // SAFETY: CP6 timer registers are accessible in privileged mode
                unsafe { core::arch::asm!(concat!("mrc p6, 0, {}, ", $crn, ", c1, 0"), out(reg) v, options(nomem, nostack)) };
                v
            }};
        }

        macro_rules! cp6_write {
            ($crn:literal, $v:expr) => {{
                let v: u32 = $v;
                // SAFETY: CP6 timer registers are accessible in privileged mode
                unsafe { core::arch::asm!(concat!("mcr p6, 0, {}, ", $crn, ", c1, 0"), in(reg) v, options(nomem, nostack)) };
            }};
        }

        impl RegisterBlock for Cp6Timers {
            fn read32(&self, offset: usize) -> u32 {
                match offset {
                    TMR0 => cp6_read!("c0"),
                    TMR1 => cp6_read!("c1"),
                    TCR0 => cp6_read!("c2"),
                    TCR1 => cp6_read!("c3"),
                    TRR0 => cp6_read!("c4"),
                    TRR1 => cp6_read!("c5"),
                    TISR => cp6_read!("c6"),
                    _ => panic!("i80321: no timer register at {:#x}", offset),
                }
            }

            fn write32(&self, offset: usize, value: u32) {
                match offset {
                    TMR0 => cp6_write!("c0", value),
                    TMR1 => cp6_write!("c1", value),
                    TCR0 => cp6_write!("c2", value),
                    TCR1 => cp6_write!("c3", value),
                    TRR0 => cp6_write!("c4", value),
                    TRR1 => cp6_write!("c5", value),
                    TISR => cp6_write!("c6", value),
                    _ => panic!("i80321: no timer register at {:#x}", offset),
                }
            }
        }
    }
}
