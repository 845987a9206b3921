//! # Priority Level Controller
//!
//! One per CPU. Owns the current IPL, the mask tables, the pending soft
//! interrupt word and the hardware enable register.
//!
//! ```text
//!   raise(NET)         lower(NONE)
//!       │                  │
//!       ▼                  ▼
//!   current = max      current = NONE ──► pending & unmasked? ──► drain
//!       │                  │                                      │
//!       └──► INTCTL = established & !hard_masked[current] ◄───────┘
//! ```
//!
//! The hardware enable register is rewritten on every level change, so it
//! never disagrees with `current` outside an interrupts-off window.
//!
//! ## Soft Interrupts
//!
//! [`schedule_soft`](IplController::schedule_soft) marks a soft interrupt
//! pending. It runs as soon as the level drops below its own, from whichever
//! of `schedule_soft`, `lower` or `restore` made it deliverable. Draining
//! visits SOFTTTY, SOFTNET, SOFTCLOCK, SOFT in that order, runs each handler
//! at its soft level with the CPU's interrupt state restored, and repeats
//! until nothing deliverable is left. A drain started from inside a drain
//! returns at once; the outer loop picks up whatever was added.

use alloc::boxed::Box;
use core::fmt;

use keel_hal::{CpuInterrupts, IntcHardware, IrqGuard};

use super::ipl::{Ipl, SoftIntr, SoftMask};
use super::masks::MaskTables;

/// Soft interrupt handler.
///
/// Receives the controller so it can schedule further soft interrupts or
/// take priority brackets of its own.
pub type SoftHandler = Box<dyn FnMut(&mut IplController) + Send>;

/// Per-CPU interrupt priority state
pub struct IplController {
    cpu: &'static dyn CpuInterrupts,
    hw: Box<dyn IntcHardware>,
    current: Ipl,
    tables: MaskTables,
    /// Lines with at least one handler
    established: u32,
    pending: SoftMask,
    draining: bool,
    soft_handlers: [Option<SoftHandler>; SoftIntr::COUNT],
    soft_counts: [u64; SoftIntr::COUNT],
}

impl IplController {
    /// Take over the interrupt controller.
    ///
    /// Starts at [`Ipl::High`] with every line disabled, the state the
    /// kernel boots in. The first `lower` opens it up.
    pub fn new(cpu: &'static dyn CpuInterrupts, hw: Box<dyn IntcHardware>) -> Self {
        let mut ctl = Self {
            cpu,
            hw,
            current: Ipl::High,
            tables: MaskTables::new(),
            established: 0,
            pending: SoftMask::empty(),
            draining: false,
            soft_handlers: [None, None, None, None],
            soft_counts: [0; SoftIntr::COUNT],
        };
        let _guard = IrqGuard::new(cpu);
        ctl.write_mask();
        ctl
    }

    /// CPU interrupt control this controller masks with
    #[inline]
    pub fn cpu(&self) -> &'static dyn CpuInterrupts {
        self.cpu
    }

    /// Current priority level
    #[inline]
    pub fn current(&self) -> Ipl {
        self.current
    }

    /// Mask tables in force
    #[inline]
    pub fn tables(&self) -> &MaskTables {
        &self.tables
    }

    /// Lines the hardware is currently allowed to deliver
    #[inline]
    pub fn enabled_lines(&self) -> u32 {
        self.established & !self.tables.hard_masked(self.current)
    }

    /// Asserting lines that have handlers
    #[inline]
    pub fn hardware_pending(&self) -> u32 {
        self.hw.pending() & self.established
    }

    /// Pending soft interrupts
    #[inline]
    pub fn pending_soft(&self) -> SoftMask {
        self.pending
    }

    /// Number of times the handler for `si` has run
    pub fn soft_count(&self, si: SoftIntr) -> u64 {
        self.soft_counts[si.index()]
    }

    // ========================================================================
    // Level Changes
    // ========================================================================

    /// Raise to at least `level`, returning the previous level.
    ///
    /// Never lowers: raising to a level below the current one leaves it as
    /// is. The hardware mask is rewritten either way.
    pub fn raise(&mut self, level: Ipl) -> Ipl {
        let _guard = IrqGuard::new(self.cpu);
        let old = self.current;
        if level > old {
            self.current = level;
        }
        self.write_mask();
        old
    }

    /// Set the level to `level` and run any soft interrupts that became
    /// deliverable. Returns the previous level.
    ///
    /// The level is set even if it is above the current one.
    pub fn lower(&mut self, level: Ipl) -> Ipl {
        let old = {
            let _guard = IrqGuard::new(self.cpu);
            let old = self.current;
            self.current = level;
            self.write_mask();
            old
        };
        if !self.deliverable().is_empty() {
            self.drain();
        }
        old
    }

    /// Return to a level saved from [`raise`](Self::raise)
    #[inline]
    pub fn restore(&mut self, saved: Ipl) {
        self.lower(saved);
    }

    /// Run `f` raised to at least `level`, restoring the previous level on
    /// the way out
    pub fn with_raised<R>(&mut self, level: Ipl, f: impl FnOnce(&mut Self) -> R) -> R {
        let saved = self.raise(level);
        let result = f(self);
        self.restore(saved);
        result
    }

    // ========================================================================
    // Soft Interrupts
    // ========================================================================

    /// Install the handler for `si`, returning the one it replaces
    pub fn set_soft_handler(&mut self, si: SoftIntr, handler: SoftHandler) -> Option<SoftHandler> {
        let _guard = IrqGuard::new(self.cpu);
        self.soft_handlers[si.index()].replace(handler)
    }

    /// Mark `si` pending, running it now if the current level allows
    pub fn schedule_soft(&mut self, si: SoftIntr) {
        {
            let _guard = IrqGuard::new(self.cpu);
            self.pending |= si.bit();
        }
        if !self.deliverable().is_empty() {
            self.drain();
        }
    }

    #[inline]
    fn deliverable(&self) -> SoftMask {
        self.pending & self.tables.soft_unmasked(self.current)
    }

    fn drain(&mut self) {
        let cpu = self.cpu;
        let was_enabled = cpu.disable();
        if self.draining {
            cpu.restore(was_enabled);
            return;
        }
        self.draining = true;
        let saved = self.current;

        while !self.deliverable().is_empty() {
            for si in SoftIntr::DRAIN_ORDER {
                if !self.deliverable().contains(si.bit()) {
                    continue;
                }
                self.pending.remove(si.bit());
                if self.current < si.ipl() {
                    self.current = si.ipl();
                    self.write_mask();
                }

                let handler = self.soft_handlers[si.index()].take();
                cpu.restore(was_enabled);
                match handler {
                    Some(mut handler) => {
                        handler(self);
                        let slot = &mut self.soft_handlers[si.index()];
                        if slot.is_none() {
                            *slot = Some(handler);
                        }
                    },
                    None => log::trace!("soft interrupt {:?} pending with no handler", si),
                }
                cpu.disable();

                self.soft_counts[si.index()] += 1;
                self.current = saved;
                self.write_mask();
            }
        }

        self.draining = false;
        cpu.restore(was_enabled);
    }

    // ========================================================================
    // Hardware
    // ========================================================================

    /// Swap in freshly computed tables. Called with interrupts disabled by
    /// the dispatch table whenever a handler is added or removed.
    pub(crate) fn install_masks(&mut self, tables: MaskTables, established: u32) {
        self.tables = tables;
        self.established = established;
        self.write_mask();
    }

    #[inline]
    fn write_mask(&mut self) {
        let enabled = self.enabled_lines();
        self.hw.set_enabled(enabled);
    }
}

impl fmt::Debug for IplController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IplController")
            .field("current", &self.current)
            .field("established", &format_args!("{:#010x}", self.established))
            .field("pending", &self.pending)
            .field("draining", &self.draining)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupts::masks::LineLevels;
    use crate::testutil::controller;
    use std::sync::{Arc, Mutex};

    /// Record the order and level soft handlers run at
    fn recorder(
        ctl: &mut IplController,
        log: &Arc<Mutex<Vec<(SoftIntr, Ipl)>>>,
        sis: &[SoftIntr],
    ) {
        for &si in sis {
            let log = log.clone();
            ctl.set_soft_handler(
                si,
                Box::new(move |ctl: &mut IplController| log.lock().unwrap().push((si, ctl.current()))),
            );
        }
    }

    #[test]
    fn test_boots_at_high() {
        let state = Arc::new(crate::testutil::IntcState::default());
        let ctl = IplController::new(
            crate::testutil::SimCpu::leak(),
            Box::new(crate::testutil::SimIntc(state.clone())),
        );
        assert_eq!(ctl.current(), Ipl::High);
        assert_eq!(state.enabled(), 0);
    }

    #[test]
    fn test_raise_never_lowers() {
        let (mut ctl, _) = controller();
        for &first in &Ipl::ALL {
            for &second in &Ipl::ALL {
                ctl.lower(first);
                let old = ctl.raise(second);
                assert_eq!(old, first);
                assert_eq!(ctl.current(), first.max(second));
            }
        }
    }

    #[test]
    fn test_restore_round_trip() {
        let (mut ctl, _) = controller();
        ctl.lower(Ipl::Bio);
        let s1 = ctl.raise(Ipl::Net);
        let s2 = ctl.raise(Ipl::Clock);
        let s3 = ctl.raise(Ipl::High);
        ctl.restore(s3);
        assert_eq!(ctl.current(), Ipl::Clock);
        ctl.restore(s2);
        assert_eq!(ctl.current(), Ipl::Net);
        ctl.restore(s1);
        assert_eq!(ctl.current(), Ipl::Bio);
    }

    #[test]
    fn test_hardware_mask_tracks_level() {
        let (mut ctl, state) = controller();
        let tables = MaskTables::compute([
            (2, LineLevels::of([Ipl::Bio]).unwrap()),
            (5, LineLevels::of([Ipl::Clock]).unwrap()),
        ]);
        ctl.install_masks(tables, (1 << 2) | (1 << 5));
        assert_eq!(state.enabled(), (1 << 2) | (1 << 5));

        let s = ctl.raise(Ipl::Net);
        assert_eq!(state.enabled(), 1 << 5);
        ctl.raise(Ipl::High);
        assert_eq!(state.enabled(), 0);
        ctl.restore(s);
        assert_eq!(state.enabled(), (1 << 2) | (1 << 5));
    }

    #[test]
    fn test_raise_rewrites_mask_even_without_change() {
        let (mut ctl, state) = controller();
        ctl.lower(Ipl::Net);
        let before = state.writes();
        ctl.raise(Ipl::Bio);
        assert_eq!(ctl.current(), Ipl::Net);
        assert_eq!(state.writes(), before + 1);
    }

    #[test]
    fn test_soft_runs_immediately_when_unmasked() {
        let (mut ctl, _) = controller();
        let log = Arc::new(Mutex::new(Vec::new()));
        recorder(&mut ctl, &log, &[SoftIntr::SoftNet]);

        ctl.schedule_soft(SoftIntr::SoftNet);
        assert_eq!(*log.lock().unwrap(), vec![(SoftIntr::SoftNet, Ipl::SoftNet)]);
        assert!(ctl.pending_soft().is_empty());
        assert_eq!(ctl.current(), Ipl::None);
    }

    #[test]
    fn test_soft_deferred_until_lowered() {
        let (mut ctl, _) = controller();
        let log = Arc::new(Mutex::new(Vec::new()));
        recorder(&mut ctl, &log, &[SoftIntr::SoftNet]);

        let s = ctl.raise(Ipl::Net);
        ctl.schedule_soft(SoftIntr::SoftNet);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(ctl.pending_soft(), SoftMask::SOFTNET);

        ctl.restore(s);
        assert_eq!(*log.lock().unwrap(), vec![(SoftIntr::SoftNet, Ipl::SoftNet)]);
        assert!(ctl.pending_soft().is_empty());
    }

    #[test]
    fn test_drain_order_and_partial_unmask() {
        let (mut ctl, _) = controller();
        let log = Arc::new(Mutex::new(Vec::new()));
        recorder(
            &mut ctl,
            &log,
            &[SoftIntr::Soft, SoftIntr::SoftClock, SoftIntr::SoftNet, SoftIntr::SoftTty],
        );

        ctl.raise(Ipl::High);
        for si in [SoftIntr::Soft, SoftIntr::SoftNet, SoftIntr::SoftClock, SoftIntr::SoftTty] {
            ctl.schedule_soft(si);
        }

        // Only SOFTTTY and SOFTNET run above SOFTCLOCK
        ctl.lower(Ipl::SoftClock);
        assert_eq!(
            *log.lock().unwrap(),
            vec![(SoftIntr::SoftTty, Ipl::SoftTty), (SoftIntr::SoftNet, Ipl::SoftNet)]
        );
        assert_eq!(ctl.pending_soft(), SoftMask::SOFT | SoftMask::SOFTCLOCK);

        ctl.lower(Ipl::None);
        assert_eq!(
            log.lock().unwrap()[2..],
            [(SoftIntr::SoftClock, Ipl::SoftClock), (SoftIntr::Soft, Ipl::Soft)]
        );
        assert!(ctl.pending_soft().is_empty());
    }

    #[test]
    fn test_nested_schedule_drained_by_outer_loop() {
        let (mut ctl, _) = controller();
        let log = Arc::new(Mutex::new(Vec::new()));
        recorder(&mut ctl, &log, &[SoftIntr::SoftTty]);
        {
            let log = log.clone();
            ctl.set_soft_handler(
                SoftIntr::Soft,
                Box::new(move |ctl: &mut IplController| {
                    log.lock().unwrap().push((SoftIntr::Soft, ctl.current()));
                    // Deliverable at SOFT, but the drain is already running
                    ctl.schedule_soft(SoftIntr::SoftTty);
                    assert_eq!(ctl.pending_soft(), SoftMask::SOFTTTY);
                }),
            );
        }

        ctl.schedule_soft(SoftIntr::Soft);
        assert_eq!(
            *log.lock().unwrap(),
            vec![(SoftIntr::Soft, Ipl::Soft), (SoftIntr::SoftTty, Ipl::SoftTty)]
        );
        assert!(ctl.pending_soft().is_empty());
        assert_eq!(ctl.current(), Ipl::None);
        assert_eq!(ctl.soft_count(SoftIntr::SoftTty), 1);
    }

    #[test]
    fn test_missing_handler_consumes_pending_bit() {
        let (mut ctl, _) = controller();
        ctl.schedule_soft(SoftIntr::SoftClock);
        assert!(ctl.pending_soft().is_empty());
        assert_eq!(ctl.soft_count(SoftIntr::SoftClock), 1);
    }

    #[test]
    fn test_with_raised_restores() {
        let (mut ctl, _) = controller();
        ctl.lower(Ipl::Bio);
        let seen = ctl.with_raised(Ipl::Clock, |ctl| ctl.current());
        assert_eq!(seen, Ipl::Clock);
        assert_eq!(ctl.current(), Ipl::Bio);
    }

    #[test]
    fn test_interrupt_state_restored_after_drain() {
        let (mut ctl, _) = controller();
        ctl.cpu().enable();
        ctl.schedule_soft(SoftIntr::SoftNet);
        assert!(ctl.cpu().enabled());
        ctl.raise(Ipl::Net);
        assert!(ctl.cpu().enabled());
    }
}
