//! # Register Access
//!
//! Timer and interrupt controller backends are written against
//! [`RegisterBlock`], a 32-bit register file addressed by byte offset. On
//! real hardware that is either a memory-mapped window ([`Mmio`]) or a
//! coprocessor register bank; under test it is a simulation.

use core::ptr::NonNull;

/// A bank of 32-bit device registers addressed by byte offset.
pub trait RegisterBlock {
    /// Read the register at `offset`
    fn read32(&self, offset: usize) -> u32;

    /// Write `value` to the register at `offset`
    fn write32(&self, offset: usize, value: u32);
}

/// Memory-mapped register window.
#[derive(Debug)]
pub struct Mmio {
    base: NonNull<u32>,
    size: usize,
}

impl Mmio {
    /// Map a register window.
    ///
    /// # Safety
    /// `base` must be the virtual address of a device register window of at
    /// least `size` bytes, mapped uncached, for the lifetime of the value.
    pub unsafe fn new(base: usize, size: usize) -> Option<Self> {
        let base = NonNull::new(base as *mut u32)?;
        Some(Self { base, size })
    }

    /// Base address of the window
    #[inline]
    pub fn base(&self) -> usize {
        self.base.as_ptr() as usize
    }

    #[inline]
    fn reg(&self, offset: usize) -> *mut u32 {
        assert!(
            offset % 4 == 0 && offset + 4 <= self.size,
            "register offset {:#x} outside window of {:#x} bytes",
            offset,
            self.size
        );
        // SAFETY: offset is inside the window checked above
        unsafe { self.base.as_ptr().byte_add(offset) }
    }
}

// SAFETY: device registers are not tied to the thread that mapped them
unsafe impl Send for Mmio {}
unsafe impl Sync for Mmio {}

impl RegisterBlock for Mmio {
    #[inline]
    fn read32(&self, offset: usize) -> u32 {
        // SAFETY: `new` guarantees the window is mapped device memory
        unsafe { core::ptr::read_volatile(self.reg(offset)) }
    }

    #[inline]
    fn write32(&self, offset: usize, value: u32) {
        // SAFETY: `new` guarantees the window is mapped device memory
        unsafe { core::ptr::write_volatile(self.reg(offset), value) }
    }
}
