//! # Keel Hardware Abstraction Layer
//!
//! The leaf layer under the interrupt priority engine and the clock
//! subsystem. Everything here touches hardware (or a stand-in for it) and
//! nothing here knows about priority levels, handler lists or hz.
//!
//! ## Components
//!
//! - **CPU interrupt state** ([`cpu`]): disable/enable/restore of the
//!   processor's interrupt-enable bit, the [`cpu::IrqGuard`] critical section
//!   and the opaque [`cpu::TrapFrame`].
//! - **Interrupt controller** ([`intc`]): the enable-mask and pending-status
//!   registers of a flat, bitmask-style controller.
//! - **Hardware timers** ([`timer`]): the [`timer::HwTimerSource`] contract
//!   and its per-SoC backends.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod cpu;
pub mod intc;
pub mod mmio;
pub mod timer;

pub use cpu::{CpuInterrupts, IrqGuard, TrapFrame};
pub use intc::IntcHardware;
pub use timer::{ArmMode, CounterWidth, HwTimerSource, TimerError};
