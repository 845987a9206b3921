//! # Tick Scheduler
//!
//! Derives two event streams from one one-shot timer:
//!
//! ```text
//!   counter ─────┬──────────┬──────────┬──────────┬─────────►
//!   hardclock    │ tpi      │ tpi      │ tpi + 1  │           (error carried)
//!   statclock    └─ statmin + r ─┘└── statmin + r' ──┘        (r random, > 0)
//!   one-shot     armed for whichever deadline comes first
//! ```
//!
//! The hardclock period is `frequency / hz` ticks with the remainder
//! `frequency % hz` accumulated once per tick; each time the accumulator
//! reaches `hz` one extra tick is added. Over any `hz` hardclocks the
//! deadline advances by exactly `frequency`.
//!
//! Deadlines are absolute counter values advanced from their previous value,
//! never from "now", so a late interrupt does not shift the schedule. If
//! several deadlines have passed by the time the interrupt is serviced, each
//! one is delivered, in order.

use keel_hal::{CounterWidth, HwTimerSource, TrapFrame};

use super::config::{stat_rate_usable, ClockRates};
use super::random::StatRandom;
use super::ClockSink;
use crate::error::ClockError;
use keel_hal::TimerError;

/// Starting statclock variance window, halved until it fits the interval
const STATVAR_START: u64 = 0x4000_0000;

/// Clock state for one CPU
#[derive(Debug)]
pub struct TickScheduler<T, R> {
    timer: T,
    rng: R,
    width: CounterWidth,
    frequency: u64,
    hz: u32,
    ticks_per_intr: u64,
    ticks_err_cnt: u64,
    ticks_err_sum: u64,
    next_tick: u64,
    next_stat: u64,
    stat_rate: u32,
    statmin: u64,
    statvar: u64,
}

impl<T: HwTimerSource, R: StatRandom> TickScheduler<T, R> {
    /// Scheduler for `rates`, not yet started.
    ///
    /// `rates` must come from [`ClockConfig::resolve`] against this timer's
    /// frequency and width.
    ///
    /// [`ClockConfig::resolve`]: super::ClockConfig::resolve
    pub fn new(timer: T, rng: R, rates: &ClockRates) -> Self {
        let frequency = rates.frequency;
        let hz = u64::from(rates.hz);
        let mut sched = Self {
            width: timer.width(),
            timer,
            rng,
            frequency,
            hz: rates.hz,
            ticks_per_intr: frequency / hz,
            ticks_err_cnt: frequency % hz,
            ticks_err_sum: 0,
            next_tick: 0,
            next_stat: 0,
            stat_rate: 0,
            statmin: 0,
            statvar: 0,
        };
        sched.apply_stat_rate(rates.stathz);
        sched
    }

    /// Take the first deadlines from the current count and arm the timer.
    pub fn start(&mut self) {
        let now = self.timer.read_counter();
        self.ticks_err_sum = 0;
        self.next_tick = self.width.add(now, self.ticks_per_intr);
        self.next_stat = self.next_tick;
        self.timer.start();
        self.timer.arm_after(now, self.ticks_per_intr);
    }

    /// Service one timer interrupt.
    ///
    /// Acknowledges the hardware, delivers every hardclock and statclock
    /// whose deadline has passed and re-arms for the earlier of the two next
    /// deadlines. Returns whether anything was delivered.
    pub fn handle_interrupt(&mut self, sink: &mut dyn ClockSink, frame: TrapFrame) -> bool {
        self.timer.acknowledge();
        let now = self.timer.read_counter();
        let width = self.width;
        let mut delivered = false;

        while width.reached(now, self.next_tick) {
            self.next_tick = width.add(self.next_tick, self.ticks_per_intr);
            self.ticks_err_sum += self.ticks_err_cnt;
            while self.ticks_err_sum >= u64::from(self.hz) {
                self.next_tick = width.add(self.next_tick, 1);
                self.ticks_err_sum -= u64::from(self.hz);
            }
            sink.hardclock(frame);
            delivered = true;
        }

        while width.reached(now, self.next_stat) {
            let interval = self.next_stat_interval();
            self.next_stat = width.add(self.next_stat, interval);
            sink.statclock(frame);
            delivered = true;
        }

        let to_tick = width.until(now, self.next_tick).unwrap_or(1);
        let to_stat = width.until(now, self.next_stat).unwrap_or(1);
        self.timer.arm_after(now, to_tick.min(to_stat));

        if !delivered {
            log::trace!("clock: early interrupt at {:#x}", now);
        }
        delivered
    }

    /// Change the statclock rate.
    ///
    /// Takes effect from the next statclock period; the deadline already
    /// scheduled is kept.
    pub fn set_stat_rate(&mut self, newhz: u32) -> Result<(), ClockError> {
        if !stat_rate_usable(self.frequency, self.width, newhz) {
            log::warn!("clock: statclock rate {} not possible, keeping {}", newhz, self.stat_rate);
            return Err(ClockError::Timer(TimerError::UnsupportedFrequency(u64::from(newhz))));
        }
        self.apply_stat_rate(newhz);
        Ok(())
    }

    fn apply_stat_rate(&mut self, newhz: u32) {
        let statint = self.frequency / u64::from(newhz);
        let mut statvar = STATVAR_START;
        while statvar > statint / 2 {
            statvar >>= 1;
        }
        self.statvar = statvar;
        self.statmin = statint - statvar / 2;
        self.stat_rate = newhz;
    }

    /// `statmin + r` with `r` drawn from `[1, statvar)`
    fn next_stat_interval(&mut self) -> u64 {
        loop {
            let r = u64::from(self.rng.next_u32()) & (self.statvar - 1);
            if r != 0 {
                return self.statmin + r;
            }
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Next hardclock deadline
    pub fn next_tick(&self) -> u64 {
        self.next_tick
    }

    /// Next statclock deadline
    pub fn next_stat(&self) -> u64 {
        self.next_stat
    }

    /// Whole counter ticks per hardclock
    pub fn ticks_per_interrupt(&self) -> u64 {
        self.ticks_per_intr
    }

    /// Remainder accumulated per hardclock
    pub fn tick_error_per_interrupt(&self) -> u64 {
        self.ticks_err_cnt
    }

    /// Current accumulated remainder, always below `hz`
    pub fn tick_error(&self) -> u64 {
        self.ticks_err_sum
    }

    /// Hardclock rate
    pub fn hz(&self) -> u32 {
        self.hz
    }

    /// Statclock rate in force
    pub fn stat_rate(&self) -> u32 {
        self.stat_rate
    }

    /// Minimum statclock interval and variance window
    pub fn stat_window(&self) -> (u64, u64) {
        (self.statmin, self.statvar)
    }

    /// Timer backend
    pub fn timer(&self) -> &T {
        &self.timer
    }

    /// Timer backend, mutably
    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }
}
