//! # Interrupt Priority Levels
//!
//! ```text
//! NONE < SOFT < SOFTCLOCK < SOFTNET < SOFTTTY < BIO < NET < TTY < VM
//!      < AUDIO < CLOCK < STATCLOCK < HIGH
//! ```
//!
//! Running at a level blocks every source whose level is at or below it.
//! The four soft levels double as the levels of the four soft interrupts.

use core::fmt;

use bitflags::bitflags;

/// Number of priority levels
pub const NIPL: usize = 13;

/// Interrupt priority level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Ipl {
    /// Nothing blocked
    None      = 0,
    /// Generic soft interrupts blocked
    Soft      = 1,
    /// Soft clock (timeouts) blocked
    SoftClock = 2,
    /// Soft network blocked
    SoftNet   = 3,
    /// Soft tty blocked
    SoftTty   = 4,
    /// Block I/O devices
    Bio       = 5,
    /// Network devices
    Net       = 6,
    /// Terminal devices
    Tty       = 7,
    /// Memory allocation
    Vm        = 8,
    /// Audio devices
    Audio     = 9,
    /// Hardclock
    Clock     = 10,
    /// Statclock
    StatClock = 11,
    /// Everything blocked
    High      = 12,
}

static_assertions::const_assert_eq!(Ipl::High as usize + 1, NIPL);

impl Ipl {
    /// Every level, lowest first
    pub const ALL: [Ipl; NIPL] = [
        Ipl::None,
        Ipl::Soft,
        Ipl::SoftClock,
        Ipl::SoftNet,
        Ipl::SoftTty,
        Ipl::Bio,
        Ipl::Net,
        Ipl::Tty,
        Ipl::Vm,
        Ipl::Audio,
        Ipl::Clock,
        Ipl::StatClock,
        Ipl::High,
    ];

    /// Table index of this level
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Level for a table index
    #[inline]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Short name, as in `splnet`
    pub const fn name(self) -> &'static str {
        match self {
            Ipl::None => "none",
            Ipl::Soft => "soft",
            Ipl::SoftClock => "softclock",
            Ipl::SoftNet => "softnet",
            Ipl::SoftTty => "softtty",
            Ipl::Bio => "bio",
            Ipl::Net => "net",
            Ipl::Tty => "tty",
            Ipl::Vm => "vm",
            Ipl::Audio => "audio",
            Ipl::Clock => "clock",
            Ipl::StatClock => "statclock",
            Ipl::High => "high",
        }
    }
}

impl TryFrom<u8> for Ipl {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Self::from_index(value as usize).ok_or(value)
    }
}

impl fmt::Display for Ipl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use core::fmt::Write;
        f.write_str("IPL_")?;
        for c in self.name().chars() {
            f.write_char(c.to_ascii_uppercase())?;
        }
        Ok(())
    }
}

// ============================================================================
// Soft Interrupts
// ============================================================================

bitflags! {
    /// Set of soft interrupts
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SoftMask: u32 {
        /// Generic soft interrupt
        const SOFT = 1 << 0;
        /// Soft clock
        const SOFTCLOCK = 1 << 1;
        /// Soft network
        const SOFTNET = 1 << 2;
        /// Soft tty
        const SOFTTTY = 1 << 3;
    }
}

/// A soft interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SoftIntr {
    /// Generic
    Soft      = 0,
    /// Timeouts
    SoftClock = 1,
    /// Network stack
    SoftNet   = 2,
    /// Terminal line disciplines
    SoftTty   = 3,
}

impl SoftIntr {
    /// Number of soft interrupts
    pub const COUNT: usize = 4;

    /// Drain order, highest level first
    pub const DRAIN_ORDER: [SoftIntr; SoftIntr::COUNT] = [
        SoftIntr::SoftTty,
        SoftIntr::SoftNet,
        SoftIntr::SoftClock,
        SoftIntr::Soft,
    ];

    /// Level the soft interrupt runs at, and is blocked by
    #[inline]
    pub const fn ipl(self) -> Ipl {
        match self {
            SoftIntr::Soft => Ipl::Soft,
            SoftIntr::SoftClock => Ipl::SoftClock,
            SoftIntr::SoftNet => Ipl::SoftNet,
            SoftIntr::SoftTty => Ipl::SoftTty,
        }
    }

    /// Pending bit
    #[inline]
    pub const fn bit(self) -> SoftMask {
        SoftMask::from_bits_truncate(1 << self as u32)
    }

    /// Handler slot index
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}
