//! # Keel Kernel Core: Interrupts and Clocks
//!
//! The machine-independent half of Keel's interrupt and clock handling.
//!
//! ## Components
//!
//! - **IPL engine** ([`interrupts::IplController`]): per-CPU priority level,
//!   level-to-mask tables, raise/lower/restore and deferred soft interrupts.
//! - **Dispatch table** ([`interrupts::InterruptDispatchTable`]): ordered
//!   handler lists for shared lines, and mask recomputation on change.
//! - **Clocks** ([`clock`]): the hardclock and statclock cadences driven from
//!   one [`keel_hal::HwTimerSource`].
//! - **Interrupt affinity** ([`intrmap`]): attach-time placement of a
//!   device's interrupt sources across CPUs.
//!
//! ## Execution Model
//!
//! Everything except the intrmap CPU snapshot is per-CPU. Mutual exclusion
//! is "interrupts disabled on this CPU" ([`keel_hal::IrqGuard`]); nothing
//! here sleeps or takes a blocking lock.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod clock;
pub mod error;
pub mod interrupts;
pub mod intrmap;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{ClockError, DisestablishError, EstablishError, IntrmapError};
