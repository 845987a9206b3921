//! # Interrupt Dispatch Table
//!
//! Handler lists for each hardware line, kept in establishment order.
//!
//! ```text
//!   irq 0  ─► [ ]
//!   irq 1  ─► [ com0 @TTY ]
//!   irq 2  ─► [ wd0 @BIO ] ─► [ em0 @NET ]      min BIO, max NET
//!   ...
//!   irq 31 ─► [ ]
//! ```
//!
//! Adding or removing a handler recomputes the per-line level range and
//! hands new mask tables to the [`IplController`], all with interrupts off.
//! Dispatch raises to the line's highest handler level and offers the
//! interrupt to every handler on the line; sharing is level-triggered, so a
//! handler that declines simply returns `false`.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use keel_hal::{IrqGuard, TrapFrame};

use super::controller::IplController;
use super::evcount::{EventCounter, EventRegistry, INTR_EVCOUNTS};
use super::ipl::Ipl;
use super::masks::{LineLevels, MaskTables};
use crate::error::{DisestablishError, EstablishError};

/// Number of hardware interrupt lines
pub const NIRQ: usize = 32;

static_assertions::const_assert!(NIRQ <= keel_hal::intc::MAX_LINES);

/// A hardware interrupt handler.
///
/// Returns whether the interrupt was for this handler.
pub trait InterruptHandler: Send {
    /// Service the interrupt
    fn handle(&mut self, ctl: &mut IplController, frame: TrapFrame) -> bool;
}

impl<F> InterruptHandler for F
where
    F: FnMut(&mut IplController, TrapFrame) -> bool + Send,
{
    fn handle(&mut self, ctl: &mut IplController, frame: TrapFrame) -> bool {
        self(ctl, frame)
    }
}

/// Names an established handler for [`InterruptDispatchTable::disestablish`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntrHandle {
    irq: usize,
    id: u64,
}

impl IntrHandle {
    /// Line the handler is attached to
    pub fn irq(&self) -> usize {
        self.irq
    }
}

struct HandlerRecord {
    id: u64,
    level: Ipl,
    counter: Arc<EventCounter>,
    handler: Box<dyn InterruptHandler>,
}

#[derive(Default)]
struct IrqLine {
    handlers: Vec<HandlerRecord>,
    levels: Option<LineLevels>,
}

impl IrqLine {
    fn refresh_levels(&mut self) {
        self.levels = LineLevels::of(self.handlers.iter().map(|h| h.level));
    }
}

/// One handler, as reported by [`InterruptDispatchTable::line_info`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerInfo {
    /// Name given at establishment
    pub name: &'static str,
    /// Level given at establishment
    pub level: Ipl,
    /// Interrupts claimed
    pub count: u64,
}

/// State of one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineInfo {
    /// Line number
    pub irq: usize,
    /// Level range of the handlers, `None` when the line has none
    pub levels: Option<LineLevels>,
    /// Handlers in dispatch order
    pub handlers: Vec<HandlerInfo>,
}

/// Per-CPU table of hardware handlers
pub struct InterruptDispatchTable {
    lines: [IrqLine; NIRQ],
    next_id: u64,
    registry: &'static EventRegistry,
}

impl InterruptDispatchTable {
    /// Empty table reporting to the system-wide counters
    pub fn new() -> Self {
        Self::with_registry(&INTR_EVCOUNTS)
    }

    /// Empty table reporting to `registry`
    pub fn with_registry(registry: &'static EventRegistry) -> Self {
        Self {
            lines: core::array::from_fn(|_| IrqLine::default()),
            next_id: 0,
            registry,
        }
    }

    // ========================================================================
    // Establishment
    // ========================================================================

    /// Attach `handler` to `irq` at `level`.
    ///
    /// The handler goes to the end of the line's list. Mask tables are
    /// recomputed before this returns.
    pub fn establish<H>(
        &mut self,
        ctl: &mut IplController,
        irq: usize,
        level: Ipl,
        name: &'static str,
        handler: H,
    ) -> Result<IntrHandle, EstablishError>
    where
        H: InterruptHandler + 'static,
    {
        if irq >= NIRQ {
            return Err(EstablishError::InvalidIrq(irq));
        }
        if level == Ipl::None {
            return Err(EstablishError::InvalidLevel(level));
        }

        let line = &mut self.lines[irq];
        line.handlers
            .try_reserve(1)
            .map_err(|_| EstablishError::NoMemory)?;

        let id = self.next_id;
        self.next_id += 1;
        let counter = Arc::new(EventCounter::new(name, irq));
        let record = HandlerRecord {
            id,
            level,
            counter: counter.clone(),
            handler: Box::new(handler),
        };

        {
            let _guard = IrqGuard::new(ctl.cpu());
            line.handlers.push(record);
            line.refresh_levels();
            self.recompute(ctl);
        }
        self.registry.attach(counter);

        log::debug!("intr: established {} on irq {} at {}", name, irq, level);
        Ok(IntrHandle { irq, id })
    }

    /// Detach a handler. The others on its line keep their order.
    pub fn disestablish(
        &mut self,
        ctl: &mut IplController,
        handle: IntrHandle,
    ) -> Result<(), DisestablishError> {
        let line = self
            .lines
            .get_mut(handle.irq)
            .ok_or(DisestablishError::InvalidIrq(handle.irq))?;
        let pos = line
            .handlers
            .iter()
            .position(|h| h.id == handle.id)
            .ok_or(DisestablishError::NotFound)?;

        let record = {
            let _guard = IrqGuard::new(ctl.cpu());
            let record = line.handlers.remove(pos);
            line.refresh_levels();
            self.recompute(ctl);
            record
        };
        self.registry.detach(&record.counter);

        log::debug!(
            "intr: disestablished {} on irq {}",
            record.counter.name(),
            handle.irq
        );
        Ok(())
    }

    /// Rebuild the mask tables from every line's level range
    fn recompute(&self, ctl: &mut IplController) {
        let lines = self
            .lines
            .iter()
            .enumerate()
            .filter_map(|(irq, line)| line.levels.map(|l| (irq, l)));
        let established = lines.clone().fold(0u32, |acc, (irq, _)| acc | (1 << irq));
        ctl.install_masks(MaskTables::compute(lines), established);
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Offer an interrupt on `irq` to every handler on the line, in order.
    ///
    /// Runs raised to the line's highest handler level with CPU interrupts
    /// enabled around each handler. Returns whether any handler claimed it.
    pub fn dispatch_irq(&mut self, ctl: &mut IplController, irq: usize, frame: TrapFrame) -> bool {
        let Some(line) = self.lines.get_mut(irq) else {
            log::trace!("intr: irq {} out of range", irq);
            return false;
        };
        let Some(levels) = line.levels else {
            log::trace!("intr: stray irq {}", irq);
            return false;
        };

        let saved = ctl.raise(levels.max);
        let cpu = ctl.cpu();
        let mut claimed = false;
        for record in line.handlers.iter_mut() {
            let was_enabled = cpu.enable();
            let mine = record.handler.handle(ctl, frame);
            cpu.restore(was_enabled);
            if mine {
                record.counter.increment();
                claimed = true;
            }
        }
        ctl.restore(saved);

        if !claimed {
            log::trace!("intr: irq {} not claimed", irq);
        }
        claimed
    }

    /// Service every line that is asserting and enabled at the current
    /// level, lowest line first. Called from the IRQ trap entry.
    pub fn dispatch_pending(&mut self, ctl: &mut IplController, frame: TrapFrame) -> bool {
        let mut pending = ctl.hardware_pending() & ctl.enabled_lines();
        let mut claimed = false;
        while pending != 0 {
            let irq = pending.trailing_zeros() as usize;
            pending &= pending - 1;
            claimed |= self.dispatch_irq(ctl, irq, frame);
        }
        claimed
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Handlers and level range of `irq`
    pub fn line_info(&self, irq: usize) -> Option<LineInfo> {
        let line = self.lines.get(irq)?;
        Some(LineInfo {
            irq,
            levels: line.levels,
            handlers: line
                .handlers
                .iter()
                .map(|h| HandlerInfo {
                    name: h.counter.name(),
                    level: h.level,
                    count: h.counter.count(),
                })
                .collect(),
        })
    }

    /// Number of handlers across all lines
    pub fn handler_count(&self) -> usize {
        self.lines.iter().map(|l| l.handlers.len()).sum()
    }
}

impl Default for InterruptDispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InterruptDispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (irq, line) in self.lines.iter().enumerate() {
            if let Some(levels) = line.levels {
                map.entry(&irq, &(line.handlers.len(), levels));
            }
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::controller;
    use std::sync::{Arc, Mutex};

    fn registry() -> &'static EventRegistry {
        Box::leak(Box::new(EventRegistry::new()))
    }

    /// Handler that logs its name and level, claims when `claim` is set
    fn probe(
        log: &Arc<Mutex<Vec<(&'static str, Ipl)>>>,
        name: &'static str,
        claim: bool,
    ) -> impl InterruptHandler {
        let log = log.clone();
        move |ctl: &mut IplController, _frame: TrapFrame| {
            log.lock().unwrap().push((name, ctl.current()));
            claim
        }
    }

    #[test]
    fn test_establish_validates() {
        let (mut ctl, _) = controller();
        let mut table = InterruptDispatchTable::with_registry(registry());
        let never = |_: &mut IplController, _: TrapFrame| false;
        assert_eq!(
            table.establish(&mut ctl, NIRQ, Ipl::Net, "bad", never),
            Err(EstablishError::InvalidIrq(NIRQ))
        );
        assert_eq!(
            table.establish(&mut ctl, 3, Ipl::None, "bad", never),
            Err(EstablishError::InvalidLevel(Ipl::None))
        );
        assert_eq!(table.handler_count(), 0);
    }

    #[test]
    fn test_establish_enables_and_masks_line() {
        let (mut ctl, state) = controller();
        let mut table = InterruptDispatchTable::with_registry(registry());
        assert_eq!(state.enabled(), 0);

        table
            .establish(&mut ctl, 4, Ipl::Net, "em0", |_: &mut IplController, _: TrapFrame| true)
            .unwrap();
        assert_eq!(state.enabled(), 1 << 4);
        assert_eq!(ctl.tables().hard_masked(Ipl::Bio), 0);
        assert_eq!(ctl.tables().hard_masked(Ipl::Net), 1 << 4);

        let s = ctl.raise(Ipl::Net);
        assert_eq!(state.enabled(), 0);
        ctl.restore(s);
        assert!(ctl.tables().is_monotonic());
    }

    #[test]
    fn test_shared_line_fifo_and_raise_to_max() {
        let (mut ctl, _) = controller();
        let mut table = InterruptDispatchTable::with_registry(registry());
        let log = Arc::new(Mutex::new(Vec::new()));

        table.establish(&mut ctl, 5, Ipl::Bio, "A", probe(&log, "A", false)).unwrap();
        table.establish(&mut ctl, 5, Ipl::Net, "B", probe(&log, "B", true)).unwrap();
        let info = table.line_info(5).unwrap();
        assert_eq!(info.levels, Some(LineLevels { min: Ipl::Bio, max: Ipl::Net }));

        assert!(table.dispatch_irq(&mut ctl, 5, TrapFrame::null()));
        assert_eq!(*log.lock().unwrap(), vec![("A", Ipl::Net), ("B", Ipl::Net)]);
        assert_eq!(ctl.current(), Ipl::None);

        // Line blocked from the lower handler's level
        assert_eq!(ctl.tables().hard_masked(Ipl::Bio), 1 << 5);

        let info = table.line_info(5).unwrap();
        assert_eq!(info.handlers[0].count, 0);
        assert_eq!(info.handlers[1].count, 1);
    }

    #[test]
    fn test_unclaimed_and_stray() {
        let (mut ctl, _) = controller();
        let mut table = InterruptDispatchTable::with_registry(registry());
        let log = Arc::new(Mutex::new(Vec::new()));
        table.establish(&mut ctl, 1, Ipl::Tty, "com0", probe(&log, "com0", false)).unwrap();

        assert!(!table.dispatch_irq(&mut ctl, 1, TrapFrame::null()));
        assert!(!table.dispatch_irq(&mut ctl, 2, TrapFrame::null()));
        assert!(!table.dispatch_irq(&mut ctl, 99, TrapFrame::null()));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_disestablish_recomputes() {
        let (mut ctl, state) = controller();
        let reg = registry();
        let mut table = InterruptDispatchTable::with_registry(reg);
        let log = Arc::new(Mutex::new(Vec::new()));

        let a = table.establish(&mut ctl, 6, Ipl::Bio, "A", probe(&log, "A", true)).unwrap();
        let b = table.establish(&mut ctl, 6, Ipl::Clock, "B", probe(&log, "B", true)).unwrap();
        let c = table.establish(&mut ctl, 6, Ipl::Net, "C", probe(&log, "C", true)).unwrap();
        assert_eq!(reg.len(), 3);

        table.disestablish(&mut ctl, a).unwrap();
        assert_eq!(table.line_info(6).unwrap().levels, Some(LineLevels { min: Ipl::Net, max: Ipl::Clock }));
        assert_eq!(ctl.tables().hard_masked(Ipl::Bio), 0);

        table.dispatch_irq(&mut ctl, 6, TrapFrame::null());
        assert_eq!(*log.lock().unwrap(), vec![("B", Ipl::Clock), ("C", Ipl::Clock)]);

        table.disestablish(&mut ctl, b).unwrap();
        table.disestablish(&mut ctl, c).unwrap();
        assert_eq!(table.line_info(6).unwrap().levels, None);
        assert_eq!(state.enabled(), 0);
        assert_eq!(ctl.tables().hard_masked(Ipl::High), 0);
        assert!(reg.is_empty());

        assert_eq!(table.disestablish(&mut ctl, c), Err(DisestablishError::NotFound));
    }

    #[test]
    fn test_dispatch_pending_only_unmasked_lines() {
        let (mut ctl, state) = controller();
        let mut table = InterruptDispatchTable::with_registry(registry());
        let log = Arc::new(Mutex::new(Vec::new()));
        table.establish(&mut ctl, 2, Ipl::Bio, "wd0", probe(&log, "wd0", true)).unwrap();
        table.establish(&mut ctl, 9, Ipl::Clock, "clock", probe(&log, "clock", true)).unwrap();

        state.assert_lines((1 << 2) | (1 << 9) | (1 << 20));
        let s = ctl.raise(Ipl::Net);
        assert!(table.dispatch_pending(&mut ctl, TrapFrame::null()));
        assert_eq!(*log.lock().unwrap(), vec![("clock", Ipl::Clock)]);
        ctl.restore(s);

        state.clear_lines(1 << 9);
        assert!(table.dispatch_pending(&mut ctl, TrapFrame::null()));
        assert_eq!(log.lock().unwrap()[1], ("wd0", Ipl::Bio));
    }

    #[test]
    fn test_handler_soft_interrupt_deferred_until_dispatch_returns() {
        use crate::interrupts::ipl::SoftIntr;

        let (mut ctl, _) = controller();
        let mut table = InterruptDispatchTable::with_registry(registry());
        let ran_at = Arc::new(Mutex::new(Vec::new()));
        {
            let ran_at = ran_at.clone();
            ctl.set_soft_handler(
                SoftIntr::SoftNet,
                Box::new(move |ctl: &mut IplController| ran_at.lock().unwrap().push(ctl.current())),
            );
        }
        table
            .establish(&mut ctl, 7, Ipl::Net, "em0", |ctl: &mut IplController, _: TrapFrame| {
                ctl.schedule_soft(SoftIntr::SoftNet);
                assert_eq!(ctl.current(), Ipl::Net);
                true
            })
            .unwrap();

        table.dispatch_irq(&mut ctl, 7, TrapFrame::null());
        assert_eq!(*ran_at.lock().unwrap(), vec![Ipl::SoftNet]);
        assert_eq!(ctl.current(), Ipl::None);
    }
}
