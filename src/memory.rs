//! Abstract memory objects.
//!
//! A `MemoryObject` summarizes the memory of one allocation site as a map
//! from byte offsets to the pointers stored there. The store is owned by
//! the analysis policy; the solver's load, store, and memcpy transfers
//! read and write objects through it.

use crate::pointer::{Offset, Pointer, PointsToSet};
use crate::subgraph::NodeId;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Uniquely identifies a `MemoryObject` within an `ObjectStore`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ObjectId(usize);

impl ObjectId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "mo{}", self.0)
    }
}

/// The abstract memory of one allocation site.
///
/// Entries recorded at the unknown offset are visible to reads at every
/// offset, and reads at the unknown offset see every entry. Recording is
/// monotone: entries only ever grow.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MemoryObject {
    node: NodeId,
    pointees: BTreeMap<Offset, PointsToSet>,
}

impl MemoryObject {
    pub(crate) fn new(node: NodeId) -> MemoryObject {
        MemoryObject {
            node,
            pointees: BTreeMap::new(),
        }
    }

    /// The allocation-site node this object summarizes.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Unions every points-to set recorded at `offset` into `out`,
    /// honoring the unknown offset on both sides. Returns whether `out`
    /// grew.
    pub fn gather(&self, offset: Offset, out: &mut PointsToSet) -> bool {
        let mut changed = false;
        if offset.is_unknown() {
            for pointees in self.pointees.values() {
                changed |= out.union_from(pointees);
            }
            return changed;
        }
        if let Some(pointees) = self.pointees.get(&offset) {
            changed |= out.union_from(pointees);
        }
        if let Some(pointees) = self.pointees.get(&Offset::UNKNOWN) {
            changed |= out.union_from(pointees);
        }
        changed
    }

    /// Whether any entry is recorded at `offset`, honoring the unknown
    /// offset on both sides.
    pub fn has_pointees_at(&self, offset: Offset) -> bool {
        if offset.is_unknown() {
            return !self.pointees.is_empty();
        }
        self.pointees.contains_key(&offset) || self.pointees.contains_key(&Offset::UNKNOWN)
    }

    /// Records `pointees` at `offset`. Returns whether the object grew.
    pub fn add_pointees(&mut self, offset: Offset, pointees: &PointsToSet) -> bool {
        if pointees.is_empty() {
            return false;
        }
        self.pointees
            .entry(offset)
            .or_insert_with(PointsToSet::new)
            .union_from(pointees)
    }

    /// Records a single pointer at `offset`. Returns whether the object
    /// grew.
    pub fn add_pointee(&mut self, offset: Offset, pointer: Pointer) -> bool {
        self.pointees
            .entry(offset)
            .or_insert_with(PointsToSet::new)
            .insert(pointer)
    }

    /// Iterates the recorded `(offset, pointees)` entries.
    pub fn entries(&self) -> impl Iterator<Item = (Offset, &PointsToSet)> {
        self.pointees.iter().map(|(offset, pointees)| (*offset, pointees))
    }

    pub fn is_empty(&self) -> bool {
        self.pointees.is_empty()
    }
}

impl fmt::Display for MemoryObject {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "object of {} {{", self.node)?;
        let mut is_first = true;
        for (offset, pointees) in self.entries() {
            if !is_first {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", offset, pointees)?;
            is_first = false;
        }
        write!(f, "}}")
    }
}

/// An arena of memory objects handed out by id.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ObjectStore {
    objects: Vec<MemoryObject>,
}

impl ObjectStore {
    pub fn new() -> ObjectStore {
        ObjectStore {
            objects: Vec::new(),
        }
    }

    /// Allocates a fresh, empty object summarizing `node`. Returns the
    /// new id together with the object, so callers can seed initial
    /// entries without a second lookup.
    pub fn allocate(&mut self, node: NodeId) -> (ObjectId, &mut MemoryObject) {
        let id = ObjectId(self.objects.len());
        self.objects.push(MemoryObject::new(node));
        (id, &mut self.objects[id.0])
    }

    /// Fetches an object by id.
    pub fn object(&self, id: ObjectId) -> Result<&MemoryObject, Error> {
        self.objects.get(id.index()).ok_or(Error::ObjectNotFound(id))
    }

    /// Fetches a mutable reference to an object by id.
    pub fn object_mut(&mut self, id: ObjectId) -> Result<&mut MemoryObject, Error> {
        self.objects
            .get_mut(id.index())
            .ok_or(Error::ObjectNotFound(id))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(index: usize) -> NodeId {
        NodeId::from_index(index)
    }

    #[test]
    fn gather_at_concrete_offset() {
        let mut object = MemoryObject::new(site(2));
        object.add_pointee(Offset::new(0), Pointer::new(site(3), Offset::new(0)));
        object.add_pointee(Offset::new(8), Pointer::new(site(4), Offset::new(0)));

        let mut out = PointsToSet::new();
        assert!(object.gather(Offset::new(0), &mut out));
        assert_eq!(out.len(), 1);
        assert!(out.contains(&Pointer::new(site(3), Offset::new(0))));
    }

    #[test]
    fn gather_at_unknown_offset_sees_everything() {
        let mut object = MemoryObject::new(site(2));
        object.add_pointee(Offset::new(0), Pointer::new(site(3), Offset::new(0)));
        object.add_pointee(Offset::new(8), Pointer::new(site(4), Offset::new(0)));

        let mut out = PointsToSet::new();
        assert!(object.gather(Offset::UNKNOWN, &mut out));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn entries_at_unknown_offset_are_seen_everywhere() {
        let mut object = MemoryObject::new(site(2));
        object.add_pointee(Offset::UNKNOWN, Pointer::new(site(3), Offset::new(0)));

        let mut out = PointsToSet::new();
        assert!(object.gather(Offset::new(16), &mut out));
        assert!(out.contains(&Pointer::new(site(3), Offset::new(0))));
        assert!(object.has_pointees_at(Offset::new(16)));
    }

    #[test]
    fn add_pointees_reports_growth() {
        let mut object = MemoryObject::new(site(2));
        let mut pointees = PointsToSet::new();
        pointees.insert(Pointer::new(site(3), Offset::new(0)));

        assert!(object.add_pointees(Offset::new(0), &pointees));
        assert!(!object.add_pointees(Offset::new(0), &pointees));

        // recording an empty set never creates entries
        assert!(!object.add_pointees(Offset::new(8), &PointsToSet::new()));
        assert!(!object.has_pointees_at(Offset::new(8)));
    }

    #[test]
    fn store_hands_out_objects_by_id() {
        let mut store = ObjectStore::new();
        let (a, _) = store.allocate(site(2));
        let (b, _) = store.allocate(site(3));
        assert_eq!(store.len(), 2);
        assert_eq!(store.object(a).unwrap().node(), site(2));
        assert_eq!(store.object(b).unwrap().node(), site(3));

        store
            .object_mut(a)
            .unwrap()
            .add_pointee(Offset::new(0), Pointer::new(site(3), Offset::new(0)));
        assert!(!store.object(a).unwrap().is_empty());
        assert!(store.object(b).unwrap().is_empty());
    }
}
