//! # Reclaimed Space
//!
//! Freed byte regions of a store, kept for best-fit reuse.
//!
//! ## Structure
//!
//! Regions are indexed twice:
//!
//! ```text
//! by_size:     BTreeSet<(size, position)>   best-fit lookup: first entry >= (size, 0)
//! by_position: BTreeMap<position, size>     overlap check against both neighbors
//! ```
//!
//! Regions of equal size coexist because the size index is keyed by
//! `(size, position)`.
//!
//! ## Allocation Strategy
//!
//! `take_best_fit(size)` removes the smallest region whose size is at least
//! `size`. When more than `RECLAIM_MIN_REMAINDER` bytes would remain, the tail
//! of the region is put back as a smaller entry; otherwise the whole region
//! is handed out and the excess stays unused inside the allocation.
//!
//! Adjacent regions are not coalesced, and reclaimed space lives in memory
//! only: a reopened store starts with an empty set.
//!
//! ## Thread Safety
//!
//! `ReclaimedSpace` is not synchronized. Stores keep it behind a
//! `parking_lot::Mutex`.

use std::collections::{BTreeMap, BTreeSet};

use eyre::{bail, ensure, Result};

use crate::config::RECLAIM_MIN_REMAINDER;

#[derive(Debug, Default)]
pub struct ReclaimedSpace {
    by_size: BTreeSet<(u64, u64)>,
    by_position: BTreeMap<u64, u64>,
}

impl ReclaimedSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_position.is_empty()
    }

    /// Sum of all reclaimed region sizes.
    pub fn total_bytes(&self) -> u64 {
        self.by_position.values().sum()
    }

    /// Regions in position order as `(position, size)`.
    pub fn regions(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.by_position.iter().map(|(&p, &s)| (p, s))
    }

    /// Adds a freed region. Fails if it overlaps a region already present.
    pub fn insert(&mut self, position: u64, size: u64) -> Result<()> {
        ensure!(size > 0, "cannot reclaim an empty region at {}", position);

        if let Some((&prev_pos, &prev_size)) = self.by_position.range(..=position).next_back() {
            if prev_pos + prev_size > position {
                bail!(
                    "reclaimed region ({}, {}) overlaps existing region ({}, {})",
                    position,
                    size,
                    prev_pos,
                    prev_size
                );
            }
        }

        if let Some((&next_pos, &next_size)) = self.by_position.range(position + 1..).next() {
            if position + size > next_pos {
                bail!(
                    "reclaimed region ({}, {}) overlaps existing region ({}, {})",
                    position,
                    size,
                    next_pos,
                    next_size
                );
            }
        }

        self.by_size.insert((size, position));
        self.by_position.insert(position, size);
        Ok(())
    }

    /// Removes and returns the position of the smallest region that can hold
    /// `size` bytes, splitting off the tail when it is large enough to keep.
    pub fn take_best_fit(&mut self, size: u64) -> Option<u64> {
        let &(region_size, position) = self.by_size.range((size, 0)..).next()?;

        self.by_size.remove(&(region_size, position));
        self.by_position.remove(&position);

        let remainder = region_size - size;
        if remainder > RECLAIM_MIN_REMAINDER {
            let tail = position + size;
            self.by_size.insert((remainder, tail));
            self.by_position.insert(tail, remainder);
        }

        Some(position)
    }

    pub fn clear(&mut self) {
        self.by_size.clear();
        self.by_position.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_has_no_fit() {
        let mut space = ReclaimedSpace::new();
        assert_eq!(space.take_best_fit(1), None);
    }

    #[test]
    fn best_fit_picks_smallest_sufficient_region() {
        let mut space = ReclaimedSpace::new();
        space.insert(100, 64).unwrap();
        space.insert(200, 32).unwrap();
        space.insert(300, 128).unwrap();

        assert_eq!(space.take_best_fit(30), Some(200));
        assert_eq!(space.len(), 2);
    }

    #[test]
    fn exact_size_region_is_reused() {
        let mut space = ReclaimedSpace::new();
        space.insert(100, 40).unwrap();

        assert_eq!(space.take_best_fit(40), Some(100));
        assert!(space.is_empty());
    }

    #[test]
    fn large_leftover_is_split_off() {
        let mut space = ReclaimedSpace::new();
        space.insert(1000, 100).unwrap();

        assert_eq!(space.take_best_fit(50), Some(1000));
        assert_eq!(space.regions().collect::<Vec<_>>(), vec![(1050, 50)]);
    }

    #[test]
    fn small_leftover_is_wasted() {
        let mut space = ReclaimedSpace::new();
        space.insert(1000, 60).unwrap();

        assert_eq!(space.take_best_fit(40), Some(1000));
        assert!(space.is_empty());
    }

    #[test]
    fn leftover_equal_to_threshold_is_wasted() {
        let mut space = ReclaimedSpace::new();
        space.insert(0, 40 + RECLAIM_MIN_REMAINDER).unwrap();

        assert_eq!(space.take_best_fit(40), Some(0));
        assert!(space.is_empty());
    }

    #[test]
    fn equal_sized_regions_coexist() {
        let mut space = ReclaimedSpace::new();
        space.insert(100, 32).unwrap();
        space.insert(500, 32).unwrap();

        assert_eq!(space.len(), 2);
        assert_eq!(space.take_best_fit(32), Some(100));
        assert_eq!(space.take_best_fit(32), Some(500));
    }

    #[test]
    fn overlapping_insert_is_rejected() {
        let mut space = ReclaimedSpace::new();
        space.insert(100, 50).unwrap();

        assert!(space.insert(120, 10).is_err());
        assert!(space.insert(90, 20).is_err());
        assert!(space.insert(100, 1).is_err());
        assert!(space.insert(150, 10).is_ok());
        assert!(space.insert(80, 20).is_ok());
    }

    #[test]
    fn adjacent_regions_are_not_coalesced() {
        let mut space = ReclaimedSpace::new();
        space.insert(0, 30).unwrap();
        space.insert(30, 30).unwrap();

        assert_eq!(space.take_best_fit(50), None);
        assert_eq!(space.total_bytes(), 60);
    }
}
