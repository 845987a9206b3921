//! # Flat Interrupt Controller
//!
//! The priority engine only needs two things from the interrupt controller:
//! a register that says which lines may interrupt the CPU, and a register
//! that says which lines are asserting. Lines are bits of a 32-bit word.

use core::fmt;

use crate::mmio::RegisterBlock;

/// Number of lines a flat controller exposes
pub const MAX_LINES: usize = 32;

static_assertions::const_assert!(MAX_LINES <= u32::BITS as usize);

/// Enable-mask and pending-status access to an interrupt controller.
pub trait IntcHardware: Send {
    /// Write the set of lines allowed to interrupt the CPU
    fn set_enabled(&mut self, mask: u32);

    /// Read the set of lines currently asserting their interrupt
    fn pending(&self) -> u32;
}

// ============================================================================
// i80321 Interrupt Controller
// ============================================================================

/// Interrupt control (enable) register
pub const INTCTL: usize = 0x00;
/// Interrupt steering register (IRQ vs FIQ)
pub const INTSTR: usize = 0x04;
/// IRQ interrupt source register
pub const IINTSRC: usize = 0x08;
/// FIQ interrupt source register
pub const FINTSRC: usize = 0x0c;

/// i80321 interrupt controller.
///
/// All lines are steered to IRQ; FIQ is not used.
pub struct I80321Intc<R: RegisterBlock> {
    regs: R,
}

impl<R: RegisterBlock> I80321Intc<R> {
    /// Take over the controller with every line disabled
    pub fn new(regs: R) -> Self {
        regs.write32(INTCTL, 0);
        regs.write32(INTSTR, 0);
        Self { regs }
    }

    /// Underlying registers
    pub fn regs(&self) -> &R {
        &self.regs
    }
}

impl<R: RegisterBlock + Send> IntcHardware for I80321Intc<R> {
    #[inline]
    fn set_enabled(&mut self, mask: u32) {
        self.regs.write32(INTCTL, mask);
    }

    #[inline]
    fn pending(&self) -> u32 {
        self.regs.read32(IINTSRC)
    }
}

impl<R: RegisterBlock> fmt::Debug for I80321Intc<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("I80321Intc")
            .field("intctl", &format_args!("{:#010x}", self.regs.read32(INTCTL)))
            .finish()
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "arm")] {
        /// Coprocessor 6 interrupt controller registers, indexed by the
        /// constants above
        #[derive(Debug, Default)]
        pub struct Cp6Intc;

        impl RegisterBlock for Cp6Intc {
            fn read32(&self, offset: usize) -> u32 {
                let v: u32;
                // SAFETY: CP6 interrupt registers are accessible in privileged mode
                unsafe {
                    match offset {
                        INTCTL => core::arch::asm!("mrc p6, 0, {}, c0, c4, 0", out(reg) v, options(nomem, nostack)),
                        INTSTR => core::arch::asm!("mrc p6, 0, {}, c4, c4, 0", out(reg) v, options(nomem, nostack)),
                        IINTSRC => core::arch::asm!("mrc p6, 0, {}, c8, c4, 0", out(reg) v, options(nomem, nostack)),
                        FINTSRC => core::arch::asm!("mrc p6, 0, {}, c9, c4, 0", out(reg) v, options(nomem, nostack)),
                        _ => panic!("i80321: no interrupt register at {:#x}", offset),
                    }
                }
                v
            }

            fn write32(&self, offset: usize, value: u32) {
                // SAFETY: CP6 interrupt registers are accessible in privileged mode
                unsafe {
                    match offset {
                        INTCTL => core::arch::asm!("mcr p6, 0, {}, c0, c4, 0", in(reg) value, options(nomem, nostack)),
                        INTSTR => core::arch::asm!("mcr p6, 0, {}, c4, c4, 0", in(reg) value, options(nomem, nostack)),
                        _ => panic!("i80321: register {:#x} is read-only", offset),
                    }
                }
            }
        }
    }
}
