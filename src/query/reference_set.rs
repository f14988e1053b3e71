//! # Reference Sets
//!
//! Ordered sets of record references within one partition. Iteration follows
//! first-insertion order, which is what makes criteria evaluation
//! deterministic: when OR branches overlap, a reference keeps the position
//! given by the first branch that produced it.

use hashbrown::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceSet {
    order: Vec<u64>,
    members: HashSet<u64>,
}

impl ReferenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            order: Vec::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Adds `reference`; returns false if it was already present.
    pub fn insert(&mut self, reference: u64) -> bool {
        if self.members.insert(reference) {
            self.order.push(reference);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, reference: u64) -> bool {
        self.members.contains(&reference)
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.order.iter().copied()
    }

    /// Appends every reference of `other` not already present.
    pub fn union_with(&mut self, other: &ReferenceSet) {
        for reference in other.iter() {
            self.insert(reference);
        }
    }

    /// Keeps only references also present in `other`, in this set's order.
    pub fn intersect_with(&mut self, other: &ReferenceSet) {
        self.order.retain(|r| other.contains(*r));
        self.members.retain(|r| other.contains(*r));
    }

    pub fn truncate(&mut self, len: usize) {
        for reference in self.order.drain(len.min(self.order.len())..) {
            self.members.remove(&reference);
        }
    }

    pub fn into_vec(self) -> Vec<u64> {
        self.order
    }
}

impl FromIterator<u64> for ReferenceSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        let mut set = ReferenceSet::new();
        for reference in iter {
            set.insert(reference);
        }
        set
    }
}
