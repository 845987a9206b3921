//! # CPU Interrupt State
//!
//! Masking the processor's interrupt line is the only mutual exclusion this
//! layer has. Priority tables, handler lists and clock state are all mutated
//! inside an [`IrqGuard`], which disables interrupts on creation and restores
//! the previous state on drop, on every exit path.

use core::ffi::c_void;
use core::ptr;

// ============================================================================
// Interrupt Enable Control
// ============================================================================

/// Control over the local CPU's interrupt-enable state.
///
/// Implementations are expected to be stateless handles onto a per-CPU
/// hardware bit, which is why every method takes `&self`.
pub trait CpuInterrupts: Sync {
    /// Disable interrupts, returning whether they were enabled before.
    fn disable(&self) -> bool;

    /// Enable interrupts, returning whether they were enabled before.
    fn enable(&self) -> bool;

    /// Restore a state previously returned by [`disable`](Self::disable) or
    /// [`enable`](Self::enable).
    fn restore(&self, was_enabled: bool);

    /// Whether interrupts are currently enabled.
    fn enabled(&self) -> bool;
}

/// Interrupts-disabled critical section.
///
/// ```ignore
/// {
///     let _guard = IrqGuard::new(cpu);
///     // tables mutated with interrupts off
/// } // previous state restored here
/// ```
#[must_use = "interrupts are re-enabled as soon as the guard is dropped"]
pub struct IrqGuard<'a> {
    cpu: &'a dyn CpuInterrupts,
    was_enabled: bool,
}

impl<'a> IrqGuard<'a> {
    /// Disable interrupts until the guard is dropped.
    #[inline]
    pub fn new(cpu: &'a dyn CpuInterrupts) -> Self {
        Self {
            was_enabled: cpu.disable(),
            cpu,
        }
    }

    /// Whether interrupts were enabled when the guard was taken.
    #[inline]
    pub fn was_enabled(&self) -> bool {
        self.was_enabled
    }
}

impl Drop for IrqGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.cpu.restore(self.was_enabled);
    }
}

impl core::fmt::Debug for IrqGuard<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IrqGuard")
            .field("was_enabled", &self.was_enabled)
            .finish()
    }
}

/// Execute a closure with interrupts disabled
#[inline]
pub fn without_interrupts<F, R>(cpu: &dyn CpuInterrupts, f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = IrqGuard::new(cpu);
    f()
}

// ============================================================================
// Architecture Implementations
// ============================================================================

cfg_if::cfg_if! {
    if #[cfg(target_arch = "aarch64")] {
        /// DAIF.I based interrupt control for AArch64
        #[derive(Debug, Clone, Copy, Default)]
        pub struct Daif;

        /// DAIF I bit (IRQ masked when set)
        const DAIF_I: u64 = 1 << 7;

        impl CpuInterrupts for Daif {
            #[inline]
            fn disable(&self) -> bool {
                let daif: u64;
                // SAFETY: reading DAIF and masking IRQs has no memory effects
                unsafe {
                    core::arch::asm!("mrs {}, daif", out(reg) daif, options(nomem, nostack));
                    core::arch::asm!("msr daifset, #2", options(nomem, nostack));
                }
                daif & DAIF_I == 0
            }

            #[inline]
            fn enable(&self) -> bool {
                let daif: u64;
                // SAFETY: see `disable`
                unsafe {
                    core::arch::asm!("mrs {}, daif", out(reg) daif, options(nomem, nostack));
                    core::arch::asm!("msr daifclr, #2", options(nomem, nostack));
                }
                daif & DAIF_I == 0
            }

            #[inline]
            fn restore(&self, was_enabled: bool) {
                // SAFETY: see `disable`
                unsafe {
                    if was_enabled {
                        core::arch::asm!("msr daifclr, #2", options(nomem, nostack));
                    } else {
                        core::arch::asm!("msr daifset, #2", options(nomem, nostack));
                    }
                }
            }

            #[inline]
            fn enabled(&self) -> bool {
                let daif: u64;
                // SAFETY: reading DAIF has no side effects
                unsafe {
                    core::arch::asm!("mrs {}, daif", out(reg) daif, options(nomem, nostack));
                }
                daif & DAIF_I == 0
            }
        }
    }
}

// ============================================================================
// Trap Frame
// ============================================================================

/// Opaque pointer to the interrupted context.
///
/// Nothing in Keel looks inside it; it is handed to handlers and to the
/// hardclock/statclock consumers exactly as the trap entry code produced it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TrapFrame(*mut c_void);

impl TrapFrame {
    /// Wrap a raw frame pointer from the trap entry code
    #[inline]
    pub const fn from_ptr(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    /// A frame that points at nothing (software-initiated dispatch)
    #[inline]
    pub const fn null() -> Self {
        Self(ptr::null_mut())
    }

    /// The raw frame pointer
    #[inline]
    pub const fn as_ptr(self) -> *mut c_void {
        self.0
    }

    /// Whether this frame is [`null`](Self::null)
    #[inline]
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

// SAFETY: the frame is never dereferenced by this crate or by Keel core
unsafe impl Send for TrapFrame {}
unsafe impl Sync for TrapFrame {}

impl core::fmt::Debug for TrapFrame {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "TrapFrame({:p})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct SimCpu {
        enabled: AtomicBool,
        disables: AtomicUsize,
    }

    impl CpuInterrupts for SimCpu {
        fn disable(&self) -> bool {
            self.disables.fetch_add(1, Ordering::Relaxed);
            self.enabled.swap(false, Ordering::SeqCst)
        }

        fn enable(&self) -> bool {
            self.enabled.swap(true, Ordering::SeqCst)
        }

        fn restore(&self, was_enabled: bool) {
            self.enabled.store(was_enabled, Ordering::SeqCst);
        }

        fn enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }
    }

    fn sim(enabled: bool) -> SimCpu {
        SimCpu {
            enabled: AtomicBool::new(enabled),
            disables: AtomicUsize::new(0),
        }
    }

    #[test]
    fn test_guard_restores_enabled() {
        let cpu = sim(true);
        {
            let guard = IrqGuard::new(&cpu);
            assert!(guard.was_enabled());
            assert!(!cpu.enabled());
        }
        assert!(cpu.enabled());
    }

    #[test]
    fn test_nested_guards_keep_outer_state() {
        let cpu = sim(true);
        {
            let _outer = IrqGuard::new(&cpu);
            {
                let inner = IrqGuard::new(&cpu);
                assert!(!inner.was_enabled());
            }
            // Inner drop must not turn interrupts back on
            assert!(!cpu.enabled());
        }
        assert!(cpu.enabled());
        assert_eq!(cpu.disables.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_without_interrupts_returns_value() {
        let cpu = sim(true);
        let seen = without_interrupts(&cpu, || cpu.enabled());
        assert!(!seen);
        assert!(cpu.enabled());
    }

    #[test]
    fn test_trap_frame_passthrough() {
        let mut slot = 0u64;
        let frame = TrapFrame::from_ptr((&mut slot as *mut u64).cast());
        assert!(!frame.is_null());
        assert_eq!(frame.as_ptr(), (&mut slot as *mut u64).cast());
        assert!(TrapFrame::null().is_null());
    }
}
