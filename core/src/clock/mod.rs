//! # Clock Interrupts
//!
//! One hardware timer per CPU drives two cadences: `hardclock` at `hz` for
//! timekeeping and scheduling, and `statclock` at a randomized period around
//! `1 / stathz` for statistics and profiling.
//!
//! ```text
//!   ┌──────────────┐  irq @CLOCK  ┌──────────────────┐  hardclock  ┌───────────┐
//!   │ HwTimerSource│ ───────────► │  TickScheduler   │ ──────────► │ ClockSink │
//!   │  (one-shot)  │ ◄─────────── │ (deadlines, rng) │  statclock  │           │
//!   └──────────────┘   re-arm     └──────────────────┘ ──────────► └───────────┘
//! ```
//!
//! [`cpu_initclocks`] resolves the rates, attaches the clock interrupt at
//! [`Ipl::Clock`] and starts the timer. The returned [`Clock`] changes the
//! statclock rate and detaches again.

mod config;
mod random;
mod tick;

use alloc::boxed::Box;
use alloc::sync::Arc;

use keel_hal::{HwTimerSource, TrapFrame};
use spin::Mutex;

pub use config::{ClockConfig, ClockRates, DEFAULT_HZ, MIN_STAT_INTERVAL};
pub use random::{StatRandom, XorShift32};
pub use tick::TickScheduler;

use crate::error::ClockError;
use crate::interrupts::{InterruptDispatchTable, InterruptHandler, IntrHandle, Ipl, IplController};

/// Consumer of clock events
pub trait ClockSink: Send {
    /// Called `hz` times a second
    fn hardclock(&mut self, frame: TrapFrame);

    /// Called on each statclock period
    fn statclock(&mut self, frame: TrapFrame);
}

struct ClockState<T, R> {
    sched: TickScheduler<T, R>,
    sink: Box<dyn ClockSink>,
}

type SharedClock<T, R> = Arc<Mutex<ClockState<T, R>>>;

/// The clock's [`InterruptHandler`]
struct ClockInterrupt<T, R> {
    shared: SharedClock<T, R>,
}

impl<T, R> InterruptHandler for ClockInterrupt<T, R>
where
    T: HwTimerSource + Send,
    R: StatRandom + Send,
{
    fn handle(&mut self, _ctl: &mut IplController, frame: TrapFrame) -> bool {
        let mut state = self.shared.lock();
        let ClockState { sched, sink } = &mut *state;
        sched.handle_interrupt(sink.as_mut(), frame)
    }
}

/// A running clock
pub struct Clock<T, R> {
    shared: SharedClock<T, R>,
    handle: IntrHandle,
    rates: ClockRates,
}

impl<T, R> core::fmt::Debug for Clock<T, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Clock")
            .field("handle", &self.handle)
            .field("rates", &self.rates)
            .finish()
    }
}

/// Start the clock interrupt on `irq`.
///
/// The timer is armed with the clock interrupt blocked, so the first
/// interrupt cannot arrive before the scheduler is set up.
pub fn cpu_initclocks<T, R, S>(
    table: &mut InterruptDispatchTable,
    ctl: &mut IplController,
    irq: usize,
    timer: T,
    rng: R,
    sink: S,
    config: &ClockConfig,
) -> Result<Clock<T, R>, ClockError>
where
    T: HwTimerSource + Send + 'static,
    R: StatRandom + Send + 'static,
    S: ClockSink + 'static,
{
    let rates = config.resolve(timer.frequency(), timer.width())?;
    let sched = TickScheduler::new(timer, rng, &rates);
    log::info!(
        "clock: {} Hz counter, hz {} ({} ticks, {} carried), stathz {}, profhz {}",
        rates.frequency,
        rates.hz,
        sched.ticks_per_interrupt(),
        sched.tick_error_per_interrupt(),
        rates.stathz,
        rates.profhz
    );

    let shared: SharedClock<T, R> = Arc::new(Mutex::new(ClockState {
        sched,
        sink: Box::new(sink),
    }));
    let handler = ClockInterrupt {
        shared: shared.clone(),
    };

    let handle = ctl.with_raised(Ipl::Clock, |ctl| {
        let handle = table.establish(ctl, irq, Ipl::Clock, "clock", handler)?;
        shared.lock().sched.start();
        Ok::<_, ClockError>(handle)
    })?;

    Ok(Clock {
        shared,
        handle,
        rates,
    })
}

impl<T, R> Clock<T, R>
where
    T: HwTimerSource + Send + 'static,
    R: StatRandom + Send + 'static,
{
    /// Handle of the clock interrupt
    pub fn handle(&self) -> IntrHandle {
        self.handle
    }

    /// Rates resolved at startup
    pub fn rates(&self) -> ClockRates {
        self.rates
    }

    /// Change the statclock rate, with the clock interrupt blocked
    pub fn set_stat_rate(&self, ctl: &mut IplController, newhz: u32) -> Result<(), ClockError> {
        ctl.with_raised(Ipl::Clock, |_| self.shared.lock().sched.set_stat_rate(newhz))
    }

    /// Switch the statclock to the profiling rate
    pub fn start_profiling(&self, ctl: &mut IplController) -> Result<(), ClockError> {
        self.set_stat_rate(ctl, self.rates.profhz)
    }

    /// Switch the statclock back to its normal rate
    pub fn stop_profiling(&self, ctl: &mut IplController) -> Result<(), ClockError> {
        self.set_stat_rate(ctl, self.rates.stathz)
    }

    /// Inspect the scheduler with the clock interrupt blocked
    pub fn with_scheduler<U>(
        &self,
        ctl: &mut IplController,
        f: impl FnOnce(&TickScheduler<T, R>) -> U,
    ) -> U {
        ctl.with_raised(Ipl::Clock, |_| f(&self.shared.lock().sched))
    }

    /// Detach the clock interrupt and stop the timer
    pub fn stop(
        self,
        table: &mut InterruptDispatchTable,
        ctl: &mut IplController,
    ) -> Result<(), ClockError> {
        ctl.with_raised(Ipl::Clock, |ctl| {
            table.disestablish(ctl, self.handle)?;
            self.shared.lock().sched.timer_mut().stop();
            Ok(())
        })
    }
}

/// Busy-wait for `us` microseconds on `timer`'s counter.
///
/// Elapsed time is summed between successive reads, so waits longer than
/// the counter's wrap period are fine as long as it is polled faster than
/// it wraps.
pub fn delay<T: HwTimerSource + ?Sized>(timer: &T, us: u64) {
    let width = timer.width();
    let ticks = u128::from(us) * u128::from(timer.frequency()) / 1_000_000;
    let mut remaining = u64::try_from(ticks).unwrap_or(u64::MAX);
    let mut last = timer.read_counter();
    while remaining > 0 {
        core::hint::spin_loop();
        let now = timer.read_counter();
        remaining = remaining.saturating_sub(width.sub(now, last));
        last = now;
    }
}
