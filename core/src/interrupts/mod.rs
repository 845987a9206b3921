//! # Interrupt Priority and Dispatch
//!
//! ```text
//!   trap entry ──► InterruptDispatchTable::dispatch_pending
//!                        │  raise(line max)
//!                        ▼
//!                  handlers (FIFO) ──► schedule_soft ──┐
//!                        │  restore                    │
//!                        ▼                             ▼
//!                  IplController ◄──── drain when pending & unmasked
//!                        │
//!                        ▼
//!                  IntcHardware enable mask
//! ```

pub mod controller;
pub mod dispatch;
pub mod evcount;
pub mod ipl;
pub mod masks;

pub use controller::{IplController, SoftHandler};
pub use dispatch::{HandlerInfo, InterruptDispatchTable, InterruptHandler, IntrHandle, LineInfo, NIRQ};
pub use evcount::{EventCounter, EventRegistry, EventSample, INTR_EVCOUNTS};
pub use ipl::{Ipl, SoftIntr, SoftMask, NIPL};
pub use masks::{LineLevels, MaskTables};
