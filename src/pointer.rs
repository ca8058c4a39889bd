//! Pointers and points-to sets.
//!
//! A `Pointer` pairs the node id of an allocation site with a byte `Offset`
//! into it. A `PointsToSet` holds the pointers a node may denote, kept
//! canonical with respect to the unknown offset: once `(t, UNKNOWN)` is
//! present, every concrete offset of `t` is subsumed by it.

use crate::subgraph::{NodeId, NULL_ADDR};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Add;

/// A byte offset into an abstract memory object.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Offset(u64);

impl Offset {
    /// The unknown offset, standing for any offset into the object.
    pub const UNKNOWN: Offset = Offset(u64::MAX);

    pub fn new(value: u64) -> Offset {
        Offset(value)
    }

    /// Returns true if this is the unknown offset.
    pub fn is_unknown(&self) -> bool {
        *self == Offset::UNKNOWN
    }

    /// The concrete value of this offset, or `None` when unknown.
    pub fn value(&self) -> Option<u64> {
        if self.is_unknown() {
            None
        } else {
            Some(self.0)
        }
    }
}

impl Add for Offset {
    type Output = Offset;

    /// Offset addition saturates: the sum is unknown if either side is
    /// unknown or the numeric sum overflows.
    fn add(self, rhs: Offset) -> Offset {
        if self.is_unknown() || rhs.is_unknown() {
            return Offset::UNKNOWN;
        }
        self.0
            .checked_add(rhs.0)
            .map(Offset)
            .unwrap_or(Offset::UNKNOWN)
    }
}

impl From<u64> for Offset {
    fn from(value: u64) -> Offset {
        Offset(value)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_unknown() {
            write!(f, "?")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// A pointer: an allocation-site node and a byte offset into it.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Pointer {
    target: NodeId,
    offset: Offset,
}

impl Pointer {
    pub fn new(target: NodeId, offset: Offset) -> Pointer {
        Pointer { target, offset }
    }

    /// A pointer to the given target at the unknown offset.
    pub fn unknown(target: NodeId) -> Pointer {
        Pointer::new(target, Offset::UNKNOWN)
    }

    /// The null pointer.
    pub fn null() -> Pointer {
        Pointer::new(NULL_ADDR, Offset::new(0))
    }

    /// The allocation-site node this pointer refers into.
    pub fn target(&self) -> NodeId {
        self.target
    }

    /// The byte offset of this pointer into its target.
    pub fn offset(&self) -> Offset {
        self.offset
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({} + {})", self.target, self.offset)
    }
}

/// A set of pointers forming the may-point-to lattice value of a node.
///
/// The set is kept canonical: when `(t, UNKNOWN)` is a member, no concrete
/// `(t, k)` is stored, and membership queries for any `(t, k)` succeed.
/// All mutating operations report whether the observable content of the
/// set grew, which is what drives the solver's worklist.
#[derive(
    Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct PointsToSet {
    pointers: BTreeSet<Pointer>,
}

impl PointsToSet {
    pub fn new() -> PointsToSet {
        PointsToSet {
            pointers: BTreeSet::new(),
        }
    }

    /// Insert a pointer, canonicalizing around the unknown offset.
    ///
    /// Inserting `(t, k)` while `(t, UNKNOWN)` is present is a no-op.
    /// Inserting `(t, UNKNOWN)` collapses any concrete entries for `t`
    /// and reports change.
    pub fn insert(&mut self, pointer: Pointer) -> bool {
        if self.pointers.contains(&Pointer::unknown(pointer.target())) {
            return false;
        }
        if pointer.offset().is_unknown() {
            let concrete: Vec<Pointer> = self
                .pointers
                .range(Pointer::new(pointer.target(), Offset::new(0))..=pointer)
                .copied()
                .collect();
            for stale in concrete {
                self.pointers.remove(&stale);
            }
            self.pointers.insert(pointer);
            return true;
        }
        self.pointers.insert(pointer)
    }

    /// Union another set into this one. Equivalent to inserting every
    /// member of `other`; returns whether this set grew.
    pub fn union_from(&mut self, other: &PointsToSet) -> bool {
        let mut changed = false;
        for pointer in other.iter() {
            changed |= self.insert(*pointer);
        }
        changed
    }

    /// Membership honoring canonicalization: `(t, k)` is contained when
    /// either `(t, k)` or `(t, UNKNOWN)` is stored.
    pub fn contains(&self, pointer: &Pointer) -> bool {
        self.pointers.contains(pointer)
            || self.pointers.contains(&Pointer::unknown(pointer.target()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pointer> {
        self.pointers.iter()
    }

    /// The number of stored pointers (collapsed entries count once).
    pub fn len(&self) -> usize {
        self.pointers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pointers.is_empty()
    }
}

impl fmt::Display for PointsToSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        let mut is_first = true;
        for pointer in &self.pointers {
            if !is_first {
                write!(f, ", ")?;
            }
            write!(f, "{}", pointer)?;
            is_first = false;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(index: usize) -> NodeId {
        NodeId::from_index(index)
    }

    #[test]
    fn offset_addition() {
        assert_eq!(Offset::new(8) + Offset::new(4), Offset::new(12));
        assert_eq!(Offset::new(8) + Offset::UNKNOWN, Offset::UNKNOWN);
        assert_eq!(Offset::UNKNOWN + Offset::new(4), Offset::UNKNOWN);
        assert_eq!(Offset::UNKNOWN + Offset::UNKNOWN, Offset::UNKNOWN);
        // overflow saturates
        assert_eq!(Offset::new(u64::MAX - 1) + Offset::new(8), Offset::UNKNOWN);
    }

    #[test]
    fn insert_reports_growth() {
        let mut set = PointsToSet::new();
        assert!(set.insert(Pointer::new(target(2), Offset::new(0))));
        assert!(!set.insert(Pointer::new(target(2), Offset::new(0))));
        assert!(set.insert(Pointer::new(target(2), Offset::new(8))));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn unknown_offset_subsumes_concrete() {
        let mut set = PointsToSet::new();
        set.insert(Pointer::unknown(target(2)));
        // concrete entries under an unknown entry are no-ops
        assert!(!set.insert(Pointer::new(target(2), Offset::new(4))));
        assert_eq!(set.len(), 1);
        // but they are still contained
        assert!(set.contains(&Pointer::new(target(2), Offset::new(4))));
        assert!(set.contains(&Pointer::unknown(target(2))));
        // other targets are unaffected
        assert!(!set.contains(&Pointer::new(target(3), Offset::new(4))));
    }

    #[test]
    fn unknown_offset_collapses_concrete() {
        let mut set = PointsToSet::new();
        set.insert(Pointer::new(target(2), Offset::new(0)));
        set.insert(Pointer::new(target(2), Offset::new(8)));
        set.insert(Pointer::new(target(3), Offset::new(16)));
        assert_eq!(set.len(), 3);

        // collapsing replaces the concrete family and reports change
        assert!(set.insert(Pointer::unknown(target(2))));
        assert_eq!(set.len(), 2);
        assert!(set.contains(&Pointer::new(target(2), Offset::new(8))));
        assert!(set.contains(&Pointer::new(target(3), Offset::new(16))));

        // a second collapse is a no-op
        assert!(!set.insert(Pointer::unknown(target(2))));
    }

    #[test]
    fn union_from_is_sequential_insert() {
        let mut lhs = PointsToSet::new();
        lhs.insert(Pointer::new(target(2), Offset::new(0)));

        let mut rhs = PointsToSet::new();
        rhs.insert(Pointer::new(target(2), Offset::new(0)));
        rhs.insert(Pointer::unknown(target(3)));

        assert!(lhs.union_from(&rhs));
        assert_eq!(lhs.len(), 2);
        assert!(!lhs.union_from(&rhs));
    }
}
