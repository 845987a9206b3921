//! # Interrupt Affinity Maps
//!
//! Placement of a device's interrupt sources (queues) on CPUs, decided at
//! attach time.
//!
//! ## Grid
//!
//! The usable CPUs are cut into equal spans of `grid` CPUs, where `grid` is
//! the smallest divisor of the CPU count that still fits the device's
//! sources. Unit `u` of a device takes the span starting at
//! `(grid * u) % ncpus`, so successive units of the same driver land on
//! different CPUs until the spans run out.
//!
//! ```text
//!   8 cpus, 3 sources per unit: grid 4
//!
//!   cpu    0   1   2   3   4   5   6   7
//!   unit0  q0  q1  q2  .
//!   unit1                  q0  q1  q2  .
//!   unit2  q0  q1  q2  .                    (wraps)
//! ```
//!
//! A device with two kinds of sources (receive and transmit, say) makes a
//! map for each, then [`align`](IntrMap::align)s them to one grid and
//! optionally [`match_offset`](IntrMap::match_offset)s the smaller one to
//! spread it across the larger one's span.

mod cpus;

use alloc::sync::Arc;
use alloc::vec::Vec;

use bitflags::bitflags;

pub use cpus::{CpuId, CpuInfo, CpuSnapshotCache, CpuTopology, IntrmapCpus, INTRMAP_CPUS};

use crate::error::IntrmapError;

bitflags! {
    /// Map creation options
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IntrmapFlags: u32 {
        /// Round the source count down to a power of two
        const POWEROF2 = 1 << 0;
    }
}

/// Source-to-CPU assignment for one device unit
#[derive(Debug)]
pub struct IntrMap {
    cpus: Arc<IntrmapCpus>,
    count: usize,
    grid: usize,
    cpumap: Vec<usize>,
}

/// Smallest divisor of `ncpus` that still holds `nintrs` sources
fn grid_for(ncpus: usize, nintrs: usize) -> usize {
    let mut prev = ncpus;
    let mut grid = ncpus;
    for i in 0..ncpus {
        if ncpus % (i + 1) != 0 {
            continue;
        }
        grid = ncpus / (i + 1);
        if nintrs > grid {
            grid = prev;
            break;
        }
        if nintrs > ncpus / (i + 2) {
            break;
        }
        prev = grid;
    }
    grid
}

impl IntrMap {
    /// Map for `unit` using the system-wide CPU snapshot.
    ///
    /// `nintrs` of zero, or above `maxintrs`, means `maxintrs`. The count is
    /// then capped at the number of usable CPUs.
    pub fn create(
        topo: &dyn CpuTopology,
        unit: usize,
        nintrs: usize,
        maxintrs: usize,
        flags: IntrmapFlags,
    ) -> Result<Self, IntrmapError> {
        Self::create_in(&INTRMAP_CPUS, topo, unit, nintrs, maxintrs, flags)
    }

    /// [`create`](Self::create) against a specific snapshot cache
    pub fn create_in(
        cache: &CpuSnapshotCache,
        topo: &dyn CpuTopology,
        unit: usize,
        nintrs: usize,
        maxintrs: usize,
        flags: IntrmapFlags,
    ) -> Result<Self, IntrmapError> {
        if maxintrs == 0 {
            return Err(IntrmapError::InvalidMaximum);
        }
        let cpus = cache.get(topo)?;
        let ncpus = cpus.count();

        let mut count = if nintrs == 0 || nintrs > maxintrs {
            maxintrs
        } else {
            nintrs
        };
        count = count.min(ncpus);
        if flags.contains(IntrmapFlags::POWEROF2) {
            count = 1 << count.ilog2();
        }

        let mut cpumap = Vec::new();
        cpumap
            .try_reserve_exact(count)
            .map_err(|_| IntrmapError::NoMemory)?;
        cpumap.resize(count, 0);

        let mut map = Self {
            cpus,
            count,
            grid: 0,
            cpumap,
        };
        map.set_grid(unit, grid_for(ncpus, count));
        log::debug!(
            "intrmap: unit {} {} sources on {} cpus, grid {} at {}",
            unit,
            count,
            ncpus,
            map.grid,
            map.cpumap[0]
        );
        Ok(map)
    }

    fn set_grid(&mut self, unit: usize, grid: usize) {
        let ncpus = self.cpus.count();
        self.grid = grid;
        let offset = (grid * (unit % ncpus)) % ncpus;
        for (i, slot) in self.cpumap.iter_mut().enumerate() {
            *slot = offset + i;
            assert!(
                *slot < ncpus,
                "intrmap: cpumap[{}] = {} beyond {} cpus",
                i,
                *slot,
                ncpus
            );
        }
    }

    /// Put two maps of one device unit on the same grid, the larger of
    /// their two.
    pub fn align(unit: usize, im0: &mut IntrMap, im1: &mut IntrMap) -> Result<(), IntrmapError> {
        if !Arc::ptr_eq(&im0.cpus, &im1.cpus) {
            return Err(IntrmapError::Mismatched);
        }
        if im0.grid < im1.grid {
            im0.set_grid(unit, im1.grid);
        } else if im0.grid > im1.grid {
            im1.set_grid(unit, im0.grid);
        }
        Ok(())
    }

    /// Align two maps, then shift the smaller one inside the larger one's
    /// span by unit, when the larger has at least twice the sources.
    ///
    /// Units that share a span get different slices of it, so the minority
    /// sources of consecutive units do not pile onto the same CPUs.
    pub fn match_offset(
        unit: usize,
        im0: &mut IntrMap,
        im1: &mut IntrMap,
    ) -> Result<(), IntrmapError> {
        Self::align(unit, im0, im1)?;

        let (superset, subset) = if im0.count >= 2 * im1.count {
            (&*im0, im1)
        } else if im1.count >= 2 * im0.count {
            (&*im1, im0)
        } else {
            return Ok(());
        };

        let ncpus = subset.cpus.count();
        let modulus = superset.count / subset.count;
        let divisor = ncpus / subset.grid;
        let offset = ((unit / divisor) % modulus) * subset.count;
        for (i, slot) in subset.cpumap.iter_mut().enumerate() {
            *slot += offset;
            assert!(
                *slot < ncpus,
                "intrmap: cpumap[{}] = {} beyond {} cpus",
                i,
                *slot,
                ncpus
            );
        }

        for &cpu in &subset.cpumap {
            if !superset.cpumap.contains(&cpu) {
                log::error!(
                    "intrmap: unit {} slot {} outside superset {:?}",
                    unit,
                    cpu,
                    superset.cpumap
                );
                #[cfg(feature = "diagnostic")]
                panic!("intrmap: subset not contained in superset");
            }
        }
        Ok(())
    }

    /// Number of sources
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Span width chosen for this map
    #[inline]
    pub fn grid(&self) -> usize {
        self.grid
    }

    /// CPU that source `index` should interrupt
    #[inline]
    pub fn cpu(&self, index: usize) -> CpuId {
        assert!(
            index < self.count,
            "intrmap: source {} of {}",
            index,
            self.count
        );
        self.cpus.cpu(self.cpumap[index])
    }

    /// Dense CPU indices, one per source
    pub fn cpumap(&self) -> &[usize] {
        &self.cpumap
    }

    /// CPU snapshot the map was built from
    pub fn cpus(&self) -> &Arc<IntrmapCpus> {
        &self.cpus
    }
}

/// CPU for a device unit with a single interrupt
pub fn intrmap_one(topo: &dyn CpuTopology, unit: usize) -> Result<CpuId, IntrmapError> {
    intrmap_one_in(&INTRMAP_CPUS, topo, unit)
}

/// [`intrmap_one`] against a specific snapshot cache
pub fn intrmap_one_in(
    cache: &CpuSnapshotCache,
    topo: &dyn CpuTopology,
    unit: usize,
) -> Result<CpuId, IntrmapError> {
    let cpus = cache.get(topo)?;
    Ok(cpus.cpu(unit % cpus.count()))
}

#[cfg(test)]
mod tests {
    use super::cpus::tests::SimTopology;
    use super::*;

    fn create(
        cache: &CpuSnapshotCache,
        topo: &SimTopology,
        unit: usize,
        nintrs: usize,
    ) -> IntrMap {
        IntrMap::create_in(cache, topo, unit, nintrs, 64, IntrmapFlags::empty()).unwrap()
    }

    #[test]
    fn test_grid_is_smallest_fitting_divisor() {
        assert_eq!(grid_for(8, 1), 1);
        assert_eq!(grid_for(8, 2), 2);
        assert_eq!(grid_for(8, 3), 4);
        assert_eq!(grid_for(8, 5), 8);
        assert_eq!(grid_for(8, 8), 8);
        assert_eq!(grid_for(6, 4), 6);
        assert_eq!(grid_for(12, 5), 6);
        assert_eq!(grid_for(7, 2), 7);
    }

    #[test]
    fn test_units_do_not_collide() {
        let cache = CpuSnapshotCache::new();
        let topo = SimTopology::flat(8);
        let u0 = create(&cache, &topo, 0, 2);
        let u1 = create(&cache, &topo, 1, 2);
        assert_eq!(u0.grid(), 2);
        assert_eq!(u0.cpumap(), &[0, 1]);
        assert_eq!(u1.cpumap(), &[2, 3]);

        let u0 = create(&cache, &topo, 0, 3);
        let u1 = create(&cache, &topo, 1, 3);
        assert_eq!(u1.grid(), 4);
        assert_eq!(u0.cpumap(), &[0, 1, 2]);
        assert_eq!(u1.cpumap(), &[4, 5, 6]);
    }

    #[test]
    fn test_huge_unit_numbers_wrap() {
        let cache = CpuSnapshotCache::new();
        let topo = SimTopology::flat(8);
        let map = create(&cache, &topo, usize::MAX, 3);
        assert_eq!(map.grid(), 4);
        // usize::MAX is 7 mod 8, so it shares unit 7's slot
        assert_eq!(map.cpumap(), create(&cache, &topo, 7, 3).cpumap());
        assert_eq!(map.cpumap(), &[4, 5, 6]);
    }

    #[test]
    fn test_count_clamps() {
        let cache = CpuSnapshotCache::new();
        let topo = SimTopology::flat(6);
        let max = |n, m| IntrMap::create_in(&cache, &topo, 0, n, m, IntrmapFlags::empty()).unwrap();
        assert_eq!(max(0, 4).count(), 4);
        assert_eq!(max(9, 4).count(), 4);
        assert_eq!(max(8, 16).count(), 6);
        assert_eq!(max(3, 16).count(), 3);

        let p2 = IntrMap::create_in(&cache, &topo, 0, 6, 16, IntrmapFlags::POWEROF2).unwrap();
        assert_eq!(p2.count(), 4);

        assert_eq!(
            IntrMap::create_in(&cache, &topo, 0, 1, 0, IntrmapFlags::empty()).err(),
            Some(IntrmapError::InvalidMaximum)
        );
    }

    #[test]
    fn test_cpu_skips_smt_siblings() {
        let cache = CpuSnapshotCache::new();
        let topo = SimTopology::new(4, 2);
        let map = create(&cache, &topo, 1, 2);
        assert_eq!(map.cpumap(), &[2, 3]);
        assert_eq!(map.cpu(0), 4);
        assert_eq!(map.cpu(1), 6);
    }

    #[test]
    #[should_panic]
    fn test_cpu_index_out_of_range() {
        let cache = CpuSnapshotCache::new();
        let topo = SimTopology::flat(4);
        create(&cache, &topo, 0, 2).cpu(2);
    }

    #[test]
    fn test_bounds_fuzz() {
        let cache = CpuSnapshotCache::new();
        let mut seed = 0xdead_beefu32;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            seed as usize
        };
        for ncpus in 1..=24 {
            let topo = SimTopology::flat(ncpus);
            for _ in 0..50 {
                let nintrs = 1 + next() % ncpus;
                let unit = next() % 64;
                let map = create(&cache, &topo, unit, nintrs);
                assert_eq!(map.count(), nintrs);
                assert_eq!(ncpus % map.grid(), 0);
                assert!(map.grid() >= nintrs);
                assert!(map.cpumap().iter().all(|&c| c < ncpus));
                for i in 0..map.count() {
                    map.cpu(i);
                }
            }
        }
    }

    #[test]
    fn test_align_adopts_larger_grid() {
        let cache = CpuSnapshotCache::new();
        let topo = SimTopology::flat(8);
        let mut rx = create(&cache, &topo, 1, 4);
        let mut tx = create(&cache, &topo, 1, 2);
        assert_eq!((rx.grid(), tx.grid()), (4, 2));
        assert_eq!(tx.cpumap(), &[2, 3]);

        IntrMap::align(1, &mut rx, &mut tx).unwrap();
        assert_eq!(tx.grid(), 4);
        assert_eq!(rx.cpumap(), &[4, 5, 6, 7]);
        assert_eq!(tx.cpumap(), &[4, 5]);
    }

    #[test]
    fn test_align_rejects_foreign_snapshot() {
        let topo = SimTopology::flat(4);
        let mut a = create(&CpuSnapshotCache::new(), &topo, 0, 2);
        let mut b = create(&CpuSnapshotCache::new(), &topo, 0, 2);
        assert_eq!(IntrMap::align(0, &mut a, &mut b), Err(IntrmapError::Mismatched));
    }

    #[test]
    fn test_match_offset_spreads_subset_within_superset() {
        let cache = CpuSnapshotCache::new();
        let topo = SimTopology::flat(8);
        let mut placed = Vec::new();
        for unit in 0..4 {
            let mut rx = create(&cache, &topo, unit, 4);
            let mut tx = create(&cache, &topo, unit, 2);
            IntrMap::match_offset(unit, &mut rx, &mut tx).unwrap();
            assert!(tx.cpumap().iter().all(|c| rx.cpumap().contains(c)));
            placed.push(tx.cpumap().to_vec());
        }
        // Units 0 and 2 share a span but not CPUs
        assert_eq!(placed[0], vec![0, 1]);
        assert_eq!(placed[1], vec![4, 5]);
        assert_eq!(placed[2], vec![2, 3]);
        assert_eq!(placed[3], vec![6, 7]);
    }

    #[test]
    fn test_match_offset_similar_sizes_only_aligns() {
        let cache = CpuSnapshotCache::new();
        let topo = SimTopology::flat(8);
        let mut a = create(&cache, &topo, 1, 3);
        let mut b = create(&cache, &topo, 1, 2);
        IntrMap::match_offset(1, &mut a, &mut b).unwrap();
        assert_eq!(a.cpumap(), &[4, 5, 6]);
        assert_eq!(b.cpumap(), &[4, 5]);
    }

    #[test]
    fn test_intrmap_one() {
        let cache = CpuSnapshotCache::new();
        let topo = SimTopology::new(3, 2);
        assert_eq!(intrmap_one_in(&cache, &topo, 0), Ok(0));
        assert_eq!(intrmap_one_in(&cache, &topo, 2), Ok(4));
        assert_eq!(intrmap_one_in(&cache, &topo, 4), Ok(2));
    }
}
