//! # Level-to-Mask Tables
//!
//! For every priority level, the set of hardware lines and soft interrupts
//! that running at that level blocks.
//!
//! ```text
//!   level        hard_masked                      soft_masked
//!   ─────        ───────────                      ───────────
//!   NONE         ∅                                ∅
//!   SOFT         ∅                                SOFT
//!   ...
//!   NET          lines whose lowest handler ≤ NET  all four
//!   ...
//!   HIGH         every established line           all four
//! ```
//!
//! Both columns only grow going down. A line is blocked from the lowest
//! level among its handlers upward, so a low-priority handler sharing a
//! line with a high-priority one blocks the whole line early. A line with
//! no handlers is never enabled at all.

use super::ipl::{Ipl, SoftIntr, SoftMask, NIPL};

/// Lowest and highest handler levels on one line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineLevels {
    /// Lowest handler level: the line is blocked from here up
    pub min: Ipl,
    /// Highest handler level: dispatch raises to this
    pub max: Ipl,
}

impl LineLevels {
    /// Fold the levels of a line's handlers; `None` for an empty line
    pub fn of<I: IntoIterator<Item = Ipl>>(levels: I) -> Option<Self> {
        levels.into_iter().fold(None, |acc, ipl| match acc {
            None => Some(LineLevels { min: ipl, max: ipl }),
            Some(l) => Some(LineLevels {
                min: l.min.min(ipl),
                max: l.max.max(ipl),
            }),
        })
    }
}

/// Per-level blocked sets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskTables {
    hard: [u32; NIPL],
    soft: [SoftMask; NIPL],
}

impl MaskTables {
    /// Tables with no hardware lines in use
    pub fn new() -> Self {
        let mut soft = [SoftMask::empty(); NIPL];
        for (i, slot) in soft.iter_mut().enumerate() {
            for si in SoftIntr::DRAIN_ORDER {
                if i >= si.ipl().index() {
                    *slot |= si.bit();
                }
            }
        }
        Self {
            hard: [0; NIPL],
            soft,
        }
    }

    /// Build tables from `(irq, levels)` pairs of the lines with handlers
    pub fn compute<I>(lines: I) -> Self
    where
        I: IntoIterator<Item = (usize, LineLevels)>,
    {
        let mut tables = Self::new();
        for (irq, levels) in lines {
            let bit = 1u32 << irq;
            for word in &mut tables.hard[levels.min.index()..] {
                *word |= bit;
            }
        }
        tables
    }

    /// Hardware lines blocked at `ipl`
    #[inline]
    pub fn hard_masked(&self, ipl: Ipl) -> u32 {
        self.hard[ipl.index()]
    }

    /// Soft interrupts blocked at `ipl`
    #[inline]
    pub fn soft_masked(&self, ipl: Ipl) -> SoftMask {
        self.soft[ipl.index()]
    }

    /// Soft interrupts allowed to run at `ipl`
    #[inline]
    pub fn soft_unmasked(&self, ipl: Ipl) -> SoftMask {
        SoftMask::all() - self.soft[ipl.index()]
    }

    /// Whether each level blocks a superset of the level below it
    pub fn is_monotonic(&self) -> bool {
        (1..NIPL).all(|i| {
            self.hard[i] & self.hard[i - 1] == self.hard[i - 1]
                && self.soft[i].contains(self.soft[i - 1])
        })
    }
}

impl Default for MaskTables {
    fn default() -> Self {
        Self::new()
    }
}
