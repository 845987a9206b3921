//! # ARM Generic Timer
//!
//! 64-bit system counter with a per-CPU comparator. The comparator is
//! programmed through the 32-bit signed TVAL view ("fire after N ticks"), so
//! this backend arms relatively and never has to worry about overshoot: a
//! TVAL of N is always N ticks from the moment of the write.
//!
//! The line is level-sensitive and stays asserted until the comparator is
//! reprogrammed, so [`acknowledge`](HwTimerSource::acknowledge) sets IMASK
//! and [`arm`](HwTimerSource::arm) clears it again.

use bitflags::bitflags;

use super::{ArmMode, CounterWidth, HwTimerSource, TimerError};

bitflags! {
    /// CNTx_CTL_EL0 bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TimerControl: u32 {
        /// Timer enabled
        const ENABLE = 1 << 0;
        /// Interrupt output masked
        const IMASK = 1 << 1;
        /// Condition met (read-only)
        const ISTATUS = 1 << 2;
    }
}

/// Largest delay the TVAL register can express
pub const TVAL_MAX: u64 = i32::MAX as u64;

/// Register view of one generic timer (physical or virtual).
pub trait GenericTimerRegs {
    /// CNTFRQ_EL0
    fn frequency(&self) -> u64;
    /// CNTVCT_EL0 / CNTPCT_EL0
    fn counter(&self) -> u64;
    /// CNTx_CTL_EL0
    fn control(&self) -> TimerControl;
    /// Write CNTx_CTL_EL0
    fn set_control(&mut self, ctl: TimerControl);
    /// Write CNTx_TVAL_EL0
    fn set_tval(&mut self, tval: u32);
}

/// ARM generic timer as a [`HwTimerSource`]
#[derive(Debug)]
pub struct GenericTimer<R: GenericTimerRegs> {
    regs: R,
    frequency: u64,
}

impl<R: GenericTimerRegs> GenericTimer<R> {
    /// Use the frequency the firmware programmed into CNTFRQ
    pub fn new(regs: R) -> Result<Self, TimerError> {
        let frequency = regs.frequency();
        if frequency == 0 {
            return Err(TimerError::FrequencyNotAvailable);
        }
        Ok(Self { regs, frequency })
    }

    /// Override CNTFRQ with a frequency from the device tree
    pub fn with_frequency(regs: R, frequency: u64) -> Result<Self, TimerError> {
        if frequency == 0 {
            return Err(TimerError::UnsupportedFrequency(frequency));
        }
        if regs.frequency() != frequency {
            log::info!(
                "generic timer: using {} Hz instead of CNTFRQ {} Hz",
                frequency,
                regs.frequency()
            );
        }
        Ok(Self { regs, frequency })
    }

    /// Underlying registers
    pub fn regs(&self) -> &R {
        &self.regs
    }

    /// Whether the comparator condition is currently met
    pub fn is_pending(&self) -> bool {
        self.regs.control().contains(TimerControl::ISTATUS)
    }
}

impl<R: GenericTimerRegs> HwTimerSource for GenericTimer<R> {
    fn frequency(&self) -> u64 {
        self.frequency
    }

    fn width(&self) -> CounterWidth {
        CounterWidth::BITS64
    }

    fn arm_mode(&self) -> ArmMode {
        ArmMode::Relative
    }

    #[inline]
    fn read_counter(&self) -> u64 {
        self.regs.counter()
    }

    fn arm(&mut self, ticks: u64) {
        let tval = ticks.clamp(1, TVAL_MAX) as u32;
        self.regs.set_tval(tval);
        self.regs.set_control(TimerControl::ENABLE);
    }

    fn acknowledge(&mut self) {
        self.regs
            .set_control(TimerControl::ENABLE | TimerControl::IMASK);
    }

    fn start(&mut self) {
        self.regs.set_control(TimerControl::ENABLE);
    }

    fn stop(&mut self) {
        self.regs.set_control(TimerControl::IMASK);
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "aarch64")] {
        /// EL1 virtual timer system registers
        #[derive(Debug, Default)]
        pub struct VirtualTimerRegs;

        impl GenericTimerRegs for VirtualTimerRegs {
            #[inline]
            fn frequency(&self) -> u64 {
                let freq: u64;
                // SAFETY: CNTFRQ_EL0 is readable at EL1
                unsafe { core::arch::asm!("mrs {}, cntfrq_el0", out(reg) freq, options(nomem, nostack)) };
                freq
            }

            #[inline]
            fn counter(&self) -> u64 {
                let count: u64;
                // SAFETY: ISB orders the read after preceding instructions
                unsafe {
                    core::arch::asm!("isb", "mrs {}, cntvct_el0", out(reg) count, options(nomem, nostack));
                }
                count
            }

            #[inline]
            fn control(&self) -> TimerControl {
                let ctl: u64;
                // SAFETY: CNTV_CTL_EL0 is accessible at EL1
                unsafe { core::arch::asm!("mrs {}, cntv_ctl_el0", out(reg) ctl, options(nomem, nostack)) };
                TimerControl::from_bits_truncate(ctl as u32)
            }

            #[inline]
            fn set_control(&mut self, ctl: TimerControl) {
                let value = u64::from(ctl.bits());
                // SAFETY: CNTV_CTL_EL0 is accessible at EL1
                unsafe {
                    core::arch::asm!("msr cntv_ctl_el0, {}", "isb", in(reg) value, options(nomem, nostack));
                }
            }

            #[inline]
            fn set_tval(&mut self, tval: u32) {
                let value = u64::from(tval);
                // SAFETY: CNTV_TVAL_EL0 is accessible at EL1
                unsafe {
                    core::arch::asm!("msr cntv_tval_el0, {}", "isb", in(reg) value, options(nomem, nostack));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Default)]
    struct SimRegs {
        freq: u64,
        count: Cell<u64>,
        ctl: Cell<u32>,
        tval: Cell<Option<u32>>,
    }

    impl GenericTimerRegs for SimRegs {
        fn frequency(&self) -> u64 {
            self.freq
        }
        fn counter(&self) -> u64 {
            self.count.get()
        }
        fn control(&self) -> TimerControl {
            TimerControl::from_bits_truncate(self.ctl.get())
        }
        fn set_control(&mut self, ctl: TimerControl) {
            self.ctl.set(ctl.bits());
        }
        fn set_tval(&mut self, tval: u32) {
            self.tval.set(Some(tval));
        }
    }

    #[test]
    fn test_missing_frequency_rejected() {
        assert_eq!(
            GenericTimer::new(SimRegs::default()).err(),
            Some(TimerError::FrequencyNotAvailable)
        );
    }

    #[test]
    fn test_arm_is_relative_and_unmasks() {
        let mut timer = GenericTimer::new(SimRegs {
            freq: 24_000_000,
            ..Default::default()
        })
        .unwrap();
        timer.acknowledge();
        assert!(timer.regs().control().contains(TimerControl::IMASK));

        timer.arm_after(5_000, 240_000);
        assert_eq!(timer.regs().tval.get(), Some(240_000));
        assert_eq!(timer.regs().control(), TimerControl::ENABLE);
    }

    #[test]
    fn test_arm_clamps_to_tval_range() {
        let mut timer = GenericTimer::with_frequency(SimRegs::default(), 1_000_000).unwrap();
        timer.arm(u64::MAX);
        assert_eq!(timer.regs().tval.get(), Some(i32::MAX as u32));
        timer.arm(0);
        assert_eq!(timer.regs().tval.get(), Some(1));
    }
}
