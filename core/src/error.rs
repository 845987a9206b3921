//! # Error Types
//!
//! Errors returned at the boundary of the interrupt and clock layers. The
//! interrupt hot path itself never returns one.

use core::fmt;

use keel_hal::TimerError;

use crate::interrupts::Ipl;

/// Failure to attach an interrupt handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstablishError {
    /// IRQ number beyond the controller's lines
    InvalidIrq(usize),
    /// Level a hardware handler cannot run at
    InvalidLevel(Ipl),
    /// Handler record could not be allocated
    NoMemory,
}

impl fmt::Display for EstablishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidIrq(irq) => write!(f, "invalid irq {}", irq),
            Self::InvalidLevel(ipl) => write!(f, "invalid handler level {}", ipl),
            Self::NoMemory => write!(f, "out of memory for interrupt handler"),
        }
    }
}

/// Failure to detach an interrupt handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisestablishError {
    /// IRQ number beyond the controller's lines
    InvalidIrq(usize),
    /// Handle does not name an attached handler
    NotFound,
}

impl fmt::Display for DisestablishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidIrq(irq) => write!(f, "invalid irq {}", irq),
            Self::NotFound => write!(f, "interrupt handler not established"),
        }
    }
}

/// Clock subsystem errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    /// The timer reports no usable frequency
    NoFrequency,
    /// Timer backend failure
    Timer(TimerError),
    /// Attaching the clock interrupt failed
    Establish(EstablishError),
    /// Detaching the clock interrupt failed
    Disestablish(DisestablishError),
}

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFrequency => write!(f, "clock frequency not available"),
            Self::Timer(e) => write!(f, "timer error: {}", e),
            Self::Establish(e) => write!(f, "clock interrupt: {}", e),
            Self::Disestablish(e) => write!(f, "clock interrupt: {}", e),
        }
    }
}

impl From<TimerError> for ClockError {
    fn from(e: TimerError) -> Self {
        Self::Timer(e)
    }
}

impl From<EstablishError> for ClockError {
    fn from(e: EstablishError) -> Self {
        Self::Establish(e)
    }
}

impl From<DisestablishError> for ClockError {
    fn from(e: DisestablishError) -> Self {
        Self::Disestablish(e)
    }
}

/// Interrupt affinity errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrmapError {
    /// Maximum interrupt count of zero
    InvalidMaximum,
    /// Topology has no usable CPUs
    NoCpus,
    /// Map storage could not be allocated
    NoMemory,
    /// Two maps built from different CPU snapshots
    Mismatched,
}

impl fmt::Display for IntrmapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMaximum => write!(f, "invalid maximum interrupt count 0"),
            Self::NoCpus => write!(f, "no cpus available for interrupts"),
            Self::NoMemory => write!(f, "out of memory for intrmap"),
            Self::Mismatched => write!(f, "intrmaps use different cpu snapshots"),
        }
    }
}
