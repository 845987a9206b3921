//! # Interrupt CPU Snapshot
//!
//! The list of CPUs interrupts may be placed on: one hardware thread per
//! core, SMT siblings left out. Built once and shared by every map until the
//! number of running CPUs changes.
//!
//! ```text
//!   get() ─► read lock: same live count? ──yes──► clone Arc
//!                 │ no
//!                 ▼
//!            build outside the lock
//!                 │
//!                 ▼
//!            write lock: someone else installed one for this count?
//!                 ├── yes ─► use theirs, drop ours
//!                 └── no ──► install ours
//! ```
//!
//! The staleness check is a plain comparison of counts and may race with a
//! CPU coming up; the worst case is a map built from a slightly old list.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::RwLock;

use crate::error::IntrmapError;

/// Kernel CPU number
pub type CpuId = usize;

/// One hardware thread as reported by the topology
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuInfo {
    /// CPU number
    pub id: CpuId,
    /// Thread index within its core; 0 for the primary thread
    pub smt_id: u32,
}

/// Source of CPU topology
pub trait CpuTopology: Sync {
    /// Number of CPUs currently running
    fn live_count(&self) -> usize;

    /// Every running CPU, in CPU number order
    fn cpus(&self) -> Vec<CpuInfo>;
}

/// CPUs eligible for interrupts, indexed densely from zero
#[derive(Debug, PartialEq, Eq)]
pub struct IntrmapCpus {
    cpus: Vec<CpuId>,
    live_count: usize,
}

impl IntrmapCpus {
    /// Primary threads of `topo`
    pub fn build(topo: &dyn CpuTopology) -> Result<Self, IntrmapError> {
        let live_count = topo.live_count();
        let all = topo.cpus();
        let mut cpus = Vec::new();
        cpus.try_reserve_exact(all.len())
            .map_err(|_| IntrmapError::NoMemory)?;
        cpus.extend(all.iter().filter(|c| c.smt_id == 0).map(|c| c.id));
        if cpus.is_empty() {
            return Err(IntrmapError::NoCpus);
        }
        Ok(Self { cpus, live_count })
    }

    /// Number of eligible CPUs
    #[inline]
    pub fn count(&self) -> usize {
        self.cpus.len()
    }

    /// CPU at dense index `index`
    #[inline]
    pub fn cpu(&self, index: usize) -> CpuId {
        self.cpus[index]
    }

    /// Live CPU count the snapshot was taken at
    #[inline]
    pub fn live_count(&self) -> usize {
        self.live_count
    }
}

/// Shared, lazily rebuilt [`IntrmapCpus`]
#[derive(Debug)]
pub struct CpuSnapshotCache {
    current: RwLock<Option<Arc<IntrmapCpus>>>,
    builds: AtomicUsize,
}

impl CpuSnapshotCache {
    /// Empty cache
    pub const fn new() -> Self {
        Self {
            current: RwLock::new(None),
            builds: AtomicUsize::new(0),
        }
    }

    /// Snapshot matching the current live CPU count
    pub fn get(&self, topo: &dyn CpuTopology) -> Result<Arc<IntrmapCpus>, IntrmapError> {
        let live = topo.live_count();
        if let Some(snapshot) = self.current.read().as_ref() {
            if snapshot.live_count == live {
                return Ok(snapshot.clone());
            }
        }

        let fresh = Arc::new(IntrmapCpus::build(topo)?);
        Ok(self.install(fresh))
    }

    /// Install `fresh` unless an equivalent snapshot beat it there
    fn install(&self, fresh: Arc<IntrmapCpus>) -> Arc<IntrmapCpus> {
        let mut current = self.current.write();
        if let Some(existing) = current.as_ref() {
            if existing.live_count == fresh.live_count {
                return existing.clone();
            }
        }
        self.builds.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "intrmap: {} of {} cpus usable for interrupts",
            fresh.count(),
            fresh.live_count
        );
        *current = Some(fresh.clone());
        fresh
    }

    /// Number of snapshots installed so far
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }
}

impl Default for CpuSnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

/// System-wide snapshot cache
pub static INTRMAP_CPUS: CpuSnapshotCache = CpuSnapshotCache::new();
