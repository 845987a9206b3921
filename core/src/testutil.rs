//! Host-side stand-ins for the CPU and the interrupt controller.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use keel_hal::{CpuInterrupts, IntcHardware};

use crate::interrupts::IplController;

/// Interrupt-enable bit in a boolean
#[derive(Debug, Default)]
pub struct SimCpu {
    enabled: AtomicBool,
}

impl SimCpu {
    /// A leaked CPU, so controllers can hold it for `'static`
    pub fn leak() -> &'static SimCpu {
        Box::leak(Box::new(SimCpu::default()))
    }
}

impl CpuInterrupts for SimCpu {
    fn disable(&self) -> bool {
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

/// Observable controller registers
#[derive(Debug, Default)]
pub struct IntcState {
    pub enabled: AtomicU32,
    pub pending: AtomicU32,
    pub writes: AtomicUsize,
}

impl IntcState {
    pub fn enabled(&self) -> u32 {
        self.enabled.load(Ordering::SeqCst)
    }
    pub fn assert_lines(&self, lines: u32) {
        self.pending.fetch_or(lines, Ordering::SeqCst);
    }
    pub fn clear_lines(&self, lines: u32) {
        self.pending.fetch_and(!lines, Ordering::SeqCst);
    }
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

/// Controller backed by shared [`IntcState`]
pub struct SimIntc(pub Arc<IntcState>);

impl IntcHardware for SimIntc {
    fn set_enabled(&mut self, mask: u32) {
        self.0.enabled.store(mask, Ordering::SeqCst);
        self.0.writes.fetch_add(1, Ordering::SeqCst);
    }
    fn pending(&self) -> u32 {
        self.0.pending.load(Ordering::SeqCst)
    }
}

/// Controller at `IPL_NONE` with its register state
pub fn controller() -> (IplController, Arc<IntcState>) {
    let state = Arc::new(IntcState::default());
    let mut ctl = IplController::new(SimCpu::leak(), Box::new(SimIntc(state.clone())));
    ctl.lower(crate::interrupts::Ipl::None);
    (ctl, state)
}
