//! The worklist fixpoint solver.
//!
//! `PointerAnalysis` drains a FIFO worklist of subgraph nodes, applying
//! the transfer function of each node's kind. Transfers are monotone
//! (points-to sets and memory objects only ever grow), and the lattice is
//! finite, so the computation terminates. Whenever a transfer changes
//! state, every node reachable from the changed node is re-enqueued.
//!
//! A single drain of the queue can settle prematurely: a load may be
//! processed before the store that feeds it, and the store's change only
//! re-enqueues nodes reachable *from* the store. The solver therefore
//! re-seeds the worklist from the root and drains again until a whole
//! pass completes without any change; that quiescent pass is the fixpoint
//! witness.
//!
//! Policy-dependent behavior (which memory objects model a dereference,
//! how calls through function pointers are spliced into the graph, how
//! empty dereferences are treated) lives behind the `AnalysisPolicy`
//! trait; the solver is generic over it. `FlowInsensitiveAnalysis` is the
//! bundled context-insensitive implementation.

mod flow_insensitive;

pub use self::flow_insensitive::FlowInsensitiveAnalysis;

use crate::memory::{ObjectId, ObjectStore};
use crate::pointer::{Offset, Pointer, PointsToSet};
use crate::subgraph::{NodeId, NodeKind, Subgraph};
use crate::Error;
use log::{debug, trace, warn};
use std::collections::VecDeque;

/// The capability set the solver consults while computing the fixpoint.
///
/// An analysis variant implements this trait to decide how abstract
/// memory is partitioned into objects and how interprocedural edges are
/// discovered. The instrumentation and error hooks default to no-ops.
pub trait AnalysisPolicy {
    /// Populates `objects` with the ids of the memory objects relevant
    /// for the address-bearing node `access` at the program point
    /// `location`.
    fn memory_objects(
        &mut self,
        subgraph: &Subgraph,
        location: NodeId,
        access: NodeId,
        objects: &mut Vec<ObjectId>,
    );

    /// The store holding this policy's memory objects.
    fn objects(&self) -> &ObjectStore;

    /// The store holding this policy's memory objects.
    fn objects_mut(&mut self) -> &mut ObjectStore;

    /// Splices interprocedural edges when the call at `location`
    /// discovers `callee` as a target. Returns whether the subgraph
    /// changed; the solver then revisits the newly connected region.
    fn function_pointer_call(
        &mut self,
        _subgraph: &mut Subgraph,
        _location: NodeId,
        _callee: NodeId,
    ) -> Result<bool, Error> {
        Ok(false)
    }

    /// Reports an analysis error at a node. Returns whether the policy
    /// changed any points-to state in response.
    fn error(&mut self, _at: NodeId, _message: &str) -> bool {
        false
    }

    /// A dereference at `from` found an empty points-to set at `to`.
    /// In a flow-insensitive analysis this is benign; a flow-sensitive
    /// analysis may treat it as a program error, or grow `from` with the
    /// unknown-memory pointer. Returns whether any state changed.
    fn error_empty_points_to(
        &mut self,
        _subgraph: &mut Subgraph,
        _from: NodeId,
        _to: NodeId,
    ) -> bool {
        false
    }

    /// Chooses the nodes to revisit after `node`'s transfer changed
    /// state. The default revisits `node` and everything reachable from
    /// it.
    fn enqueue(&mut self, subgraph: &mut Subgraph, node: NodeId, queue: &mut VecDeque<NodeId>) {
        subgraph.enqueue_reachable(node, queue);
    }

    /// Called before a node's transfer is applied.
    fn before_processed(&mut self, _subgraph: &Subgraph, _node: NodeId) {}

    /// Called after a node's transfer is applied.
    fn after_processed(&mut self, _subgraph: &Subgraph, _node: NodeId) {}
}

/// A points-to analysis run over one pointer subgraph.
///
/// The solver holds the root node id, the worklist, and the policy; the
/// subgraph stays owned by the caller and is borrowed for the duration of
/// `run`. After `run` returns, the points-to set of every node reachable
/// from the root is final and can be read with `Subgraph::points_to`.
pub struct PointerAnalysis<P: AnalysisPolicy> {
    root: NodeId,
    policy: P,
    queue: VecDeque<NodeId>,
}

impl<P: AnalysisPolicy> PointerAnalysis<P> {
    pub fn new(root: NodeId, policy: P) -> PointerAnalysis<P> {
        PointerAnalysis {
            root,
            policy,
            queue: VecDeque::new(),
        }
    }

    /// The root node the worklist is seeded from.
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    pub fn into_policy(self) -> P {
        self.policy
    }

    /// The number of nodes currently pending in the worklist. Useful for
    /// callers imposing an external bound between iterations.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Runs the solver to the fixpoint.
    pub fn run(&mut self, subgraph: &mut Subgraph) -> Result<(), Error> {
        self.run_with_max_steps(subgraph, usize::MAX)
    }

    /// Runs the solver to the fixpoint, processing at most `max_steps`
    /// nodes across all passes. Returns `Error::MaxStepsExceeded` when
    /// the bound is hit first; the subgraph then holds a sound but
    /// possibly unfinished intermediate state.
    pub fn run_with_max_steps(
        &mut self,
        subgraph: &mut Subgraph,
        max_steps: usize,
    ) -> Result<(), Error> {
        if !subgraph.has_node(self.root) {
            return Err(Error::NodeNotFound(self.root));
        }

        let mut steps = 0;
        let mut pass = 0;
        loop {
            pass += 1;
            subgraph.enqueue_reachable(self.root, &mut self.queue);
            let changed = self.drain(subgraph, &mut steps, max_steps)?;
            debug!("solver pass {} done, {} steps so far", pass, steps);
            if !changed {
                break;
            }
        }

        if cfg!(debug_assertions) {
            self.verify_fixpoint(subgraph)?;
        }
        Ok(())
    }

    fn drain(
        &mut self,
        subgraph: &mut Subgraph,
        steps: &mut usize,
        max_steps: usize,
    ) -> Result<bool, Error> {
        let mut changed_any = false;
        while let Some(node) = self.queue.pop_front() {
            if *steps >= max_steps {
                return Err(Error::MaxStepsExceeded(max_steps));
            }
            *steps += 1;

            self.policy.before_processed(subgraph, node);
            let changed = self.process_node(subgraph, node)?;
            if changed {
                changed_any = true;
                self.policy.enqueue(subgraph, node, &mut self.queue);
            }
            self.policy.after_processed(subgraph, node);
        }
        Ok(changed_any)
    }

    // One more sweep over the reachable set must be change-free; a change
    // here means an enqueue override failed to revisit a consumer.
    fn verify_fixpoint(&mut self, subgraph: &mut Subgraph) -> Result<(), Error> {
        for node in subgraph.reachable_nodes(self.root) {
            self.policy.before_processed(subgraph, node);
            let changed = self.process_node(subgraph, node)?;
            self.policy.after_processed(subgraph, node);
            if changed {
                warn!("{} changed during the fixpoint verification sweep", node);
                self.policy
                    .error(node, "solver settled without reaching a fixpoint");
            }
        }
        Ok(())
    }

    /// Applies the transfer function of `node`'s kind. Returns whether
    /// any points-to state changed.
    pub fn process_node(&mut self, subgraph: &mut Subgraph, node: NodeId) -> Result<bool, Error> {
        let kind = subgraph.node(node)?.kind();
        trace!("processing {} ({})", node, kind);
        match kind {
            NodeKind::Load => self.process_load(subgraph, node),
            NodeKind::Store => self.process_store(subgraph, node),
            NodeKind::Memcpy => self.process_memcpy(subgraph, node),
            NodeKind::Gep => self.process_gep(subgraph, node),
            NodeKind::Cast => self.process_copy(subgraph, node),
            NodeKind::Phi | NodeKind::CallReturn | NodeKind::Return => {
                self.process_gather(subgraph, node)
            }
            NodeKind::CallFuncptr => self.process_funcptr_call(subgraph, node),
            // allocation sites and constants carry their initial
            // contribution; the rest carry no points-to information
            NodeKind::Alloc
            | NodeKind::DynAlloc
            | NodeKind::Function
            | NodeKind::Constant
            | NodeKind::NullAddr
            | NodeKind::UnknownMem
            | NodeKind::Call
            | NodeKind::Entry
            | NodeKind::Noop => Ok(false),
        }
    }

    fn process_copy(&mut self, subgraph: &mut Subgraph, node: NodeId) -> Result<bool, Error> {
        let operand = subgraph.node(node)?.operand(0)?;
        let pointees = subgraph.node(operand)?.points_to().clone();
        Ok(subgraph.union_pointees(node, &pointees))
    }

    fn process_gather(&mut self, subgraph: &mut Subgraph, node: NodeId) -> Result<bool, Error> {
        let operands = subgraph.node(node)?.operands().to_vec();
        let mut changed = false;
        for operand in operands {
            let pointees = subgraph.node(operand)?.points_to().clone();
            changed |= subgraph.union_pointees(node, &pointees);
        }
        Ok(changed)
    }

    fn process_gep(&mut self, subgraph: &mut Subgraph, node: NodeId) -> Result<bool, Error> {
        let base = subgraph.node(node)?.operand(0)?;
        let shift = subgraph.node(node)?.offset();
        let pointers: Vec<Pointer> = subgraph.node(base)?.points_to().iter().copied().collect();

        let mut changed = false;
        for pointer in pointers {
            let offset = clamp_to_size(subgraph, pointer.target(), pointer.offset() + shift)?;
            changed |= subgraph.add_pointee(node, Pointer::new(pointer.target(), offset));
        }
        Ok(changed)
    }

    fn process_load(&mut self, subgraph: &mut Subgraph, node: NodeId) -> Result<bool, Error> {
        let addr = subgraph.node(node)?.operand(0)?;
        if subgraph.node(addr)?.points_to().is_empty() {
            return Ok(self.policy.error_empty_points_to(subgraph, node, addr));
        }

        let pointers: Vec<Pointer> = subgraph.node(addr)?.points_to().iter().copied().collect();
        let mut objects = Vec::new();
        self.policy.memory_objects(subgraph, node, addr, &mut objects);

        let mut gathered = PointsToSet::new();
        for pointer in &pointers {
            for &id in &objects {
                let object = self.policy.objects().object(id)?;
                if object.node() != pointer.target() {
                    continue;
                }
                if object.has_pointees_at(pointer.offset()) {
                    object.gather(pointer.offset(), &mut gathered);
                } else if subgraph.node(pointer.target())?.zero_initialized() {
                    // zeroed memory reads as the null pointer
                    gathered.insert(Pointer::null());
                }
            }
        }
        Ok(subgraph.union_pointees(node, &gathered))
    }

    fn process_store(&mut self, subgraph: &mut Subgraph, node: NodeId) -> Result<bool, Error> {
        let value = subgraph.node(node)?.operand(0)?;
        let addr = subgraph.node(node)?.operand(1)?;
        if subgraph.node(addr)?.points_to().is_empty() {
            return Ok(self.policy.error_empty_points_to(subgraph, node, addr));
        }

        let pointees = subgraph.node(value)?.points_to().clone();
        if pointees.is_empty() {
            return Ok(false);
        }

        let pointers: Vec<Pointer> = subgraph.node(addr)?.points_to().iter().copied().collect();
        let mut objects = Vec::new();
        self.policy.memory_objects(subgraph, node, addr, &mut objects);

        let mut changed = false;
        for pointer in &pointers {
            for &id in &objects {
                if self.policy.objects().object(id)?.node() != pointer.target() {
                    continue;
                }
                changed |= self
                    .policy
                    .objects_mut()
                    .object_mut(id)?
                    .add_pointees(pointer.offset(), &pointees);
            }
        }
        Ok(changed)
    }

    fn process_memcpy(&mut self, subgraph: &mut Subgraph, node: NodeId) -> Result<bool, Error> {
        let from = subgraph.node(node)?.operand(0)?;
        let to = subgraph.node(node)?.operand(1)?;
        let shift = subgraph.node(node)?.offset();
        let len = subgraph.node(node)?.len();

        if subgraph.node(from)?.points_to().is_empty() {
            return Ok(self.policy.error_empty_points_to(subgraph, node, from));
        }
        if subgraph.node(to)?.points_to().is_empty() {
            return Ok(self.policy.error_empty_points_to(subgraph, node, to));
        }

        let from_pointers: Vec<Pointer> =
            subgraph.node(from)?.points_to().iter().copied().collect();
        let to_pointers: Vec<Pointer> = subgraph.node(to)?.points_to().iter().copied().collect();

        let mut from_objects = Vec::new();
        self.policy
            .memory_objects(subgraph, node, from, &mut from_objects);
        let mut to_objects = Vec::new();
        self.policy
            .memory_objects(subgraph, node, to, &mut to_objects);

        let mut changed = false;
        for from_pointer in &from_pointers {
            let window = from_pointer.offset() + shift;
            for &from_id in &from_objects {
                // snapshot the window's entries so the writes below (which
                // may target the same object) cannot shift the iteration
                let entries: Vec<(Offset, PointsToSet)> = {
                    let object = self.policy.objects().object(from_id)?;
                    if object.node() != from_pointer.target() {
                        continue;
                    }
                    object
                        .entries()
                        .filter(|(offset, _)| in_window(*offset, window, len))
                        .map(|(offset, pointees)| (offset, pointees.clone()))
                        .collect()
                };
                for to_pointer in &to_pointers {
                    for &to_id in &to_objects {
                        if self.policy.objects().object(to_id)?.node() != to_pointer.target() {
                            continue;
                        }
                        for (offset, pointees) in &entries {
                            let dest =
                                destination_offset(*offset, window, to_pointer.offset());
                            let dest = clamp_to_size(subgraph, to_pointer.target(), dest)?;
                            changed |= self
                                .policy
                                .objects_mut()
                                .object_mut(to_id)?
                                .add_pointees(dest, pointees);
                        }
                    }
                }
            }
        }
        Ok(changed)
    }

    fn process_funcptr_call(
        &mut self,
        subgraph: &mut Subgraph,
        node: NodeId,
    ) -> Result<bool, Error> {
        let fp = subgraph.node(node)?.operand(0)?;
        let pointers: Vec<Pointer> = subgraph.node(fp)?.points_to().iter().copied().collect();

        let mut changed = false;
        for pointer in pointers {
            // targets that are not functions are silently ignored
            if subgraph.node(pointer.target())?.kind() != NodeKind::Function {
                continue;
            }
            changed |= self
                .policy
                .function_pointer_call(subgraph, node, pointer.target())?;
        }
        Ok(changed)
    }
}

/// Saturates a concrete offset to unknown when it escapes an allocation
/// of known size.
fn clamp_to_size(subgraph: &Subgraph, target: NodeId, offset: Offset) -> Result<Offset, Error> {
    if let Some(value) = offset.value() {
        let size = subgraph.node(target)?.size();
        if size > 0 && value >= size {
            return Ok(Offset::UNKNOWN);
        }
    }
    Ok(offset)
}

/// Whether a recorded entry offset falls inside the copied window. Any
/// unknown bound copies conservatively.
fn in_window(offset: Offset, window: Offset, len: Offset) -> bool {
    match (offset.value(), window.value(), len.value()) {
        (Some(offset), Some(window), Some(len)) => offset >= window && offset - window < len,
        _ => true,
    }
}

/// The destination offset for a copied entry; unknown as soon as any
/// component is unknown.
fn destination_offset(offset: Offset, window: Offset, to_offset: Offset) -> Offset {
    match (offset.value(), window.value(), to_offset.value()) {
        (Some(offset), Some(window), Some(to_offset)) => {
            debug_assert!(offset >= window);
            Offset::new(to_offset) + Offset::new(offset - window)
        }
        _ => Offset::UNKNOWN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solved(
        subgraph: &mut Subgraph,
        root: NodeId,
    ) -> PointerAnalysis<FlowInsensitiveAnalysis> {
        let mut analysis = PointerAnalysis::new(root, FlowInsensitiveAnalysis::new());
        analysis.run(subgraph).unwrap();
        analysis
    }

    #[test]
    fn cast_passes_pointers_through() {
        let mut subgraph = Subgraph::new();
        let root = subgraph.entry();
        let a = subgraph.alloc();
        let c = subgraph.cast(a);
        subgraph.add_edge(root, a).unwrap();
        subgraph.add_edge(a, c).unwrap();

        solved(&mut subgraph, root);

        // pts(op) is a subset of pts(n)
        let operand = subgraph.points_to(a).unwrap().clone();
        let result = subgraph.points_to(c).unwrap();
        assert!(operand.iter().all(|p| result.contains(p)));
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn gather_unions_all_operands() {
        let mut subgraph = Subgraph::new();
        let root = subgraph.entry();
        let a = subgraph.alloc();
        let b = subgraph.alloc();
        let c = subgraph.alloc();
        let p = subgraph.phi(&[a, b, c]);
        subgraph.add_edge(root, a).unwrap();
        subgraph.add_edge(a, b).unwrap();
        subgraph.add_edge(b, c).unwrap();
        subgraph.add_edge(c, p).unwrap();

        solved(&mut subgraph, root);

        let result = subgraph.points_to(p).unwrap();
        for id in &[a, b, c] {
            assert!(result.contains(&Pointer::new(*id, Offset::new(0))));
        }
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn gep_shifts_every_base_pointer() {
        let mut subgraph = Subgraph::new();
        let root = subgraph.entry();
        let a = subgraph.alloc();
        let b = subgraph.alloc();
        let p = subgraph.phi(&[a, b]);
        let g = subgraph.gep(p, Offset::new(8));
        subgraph.add_edge(root, a).unwrap();
        subgraph.add_edge(a, b).unwrap();
        subgraph.add_edge(b, p).unwrap();
        subgraph.add_edge(p, g).unwrap();

        solved(&mut subgraph, root);

        let base = subgraph.points_to(p).unwrap().clone();
        let result = subgraph.points_to(g).unwrap();
        for pointer in base.iter() {
            let shifted = Pointer::new(pointer.target(), pointer.offset() + Offset::new(8));
            assert!(result.contains(&shifted));
        }
    }

    #[test]
    fn gep_saturates_past_known_allocation_size() {
        let mut subgraph = Subgraph::new();
        let root = subgraph.entry();
        let a = subgraph.alloc();
        subgraph.node_mut(a).unwrap().set_size(16);
        let g = subgraph.gep(a, Offset::new(24));
        subgraph.add_edge(root, a).unwrap();
        subgraph.add_edge(a, g).unwrap();

        solved(&mut subgraph, root);

        let result = subgraph.points_to(g).unwrap();
        assert_eq!(result.len(), 1);
        assert!(result.contains(&Pointer::unknown(a)));
    }

    #[test]
    fn max_steps_is_reported() {
        let mut subgraph = Subgraph::new();
        let root = subgraph.entry();
        let a = subgraph.alloc();
        let c = subgraph.cast(a);
        subgraph.add_edge(root, a).unwrap();
        subgraph.add_edge(a, c).unwrap();

        let mut analysis = PointerAnalysis::new(root, FlowInsensitiveAnalysis::new());
        match analysis.run_with_max_steps(&mut subgraph, 1) {
            Err(Error::MaxStepsExceeded(1)) => {}
            other => panic!("expected MaxStepsExceeded, got {:?}", other),
        }
    }

    #[test]
    fn unknown_root_is_reported() {
        let mut subgraph = Subgraph::new();
        let mut analysis = PointerAnalysis::new(
            NodeId::from_index(99),
            FlowInsensitiveAnalysis::new(),
        );
        assert!(matches!(
            analysis.run(&mut subgraph),
            Err(Error::NodeNotFound(_))
        ));
    }

    #[test]
    fn copy_window_bounds() {
        assert!(in_window(Offset::new(4), Offset::new(0), Offset::new(8)));
        assert!(!in_window(Offset::new(8), Offset::new(0), Offset::new(8)));
        assert!(!in_window(Offset::new(0), Offset::new(4), Offset::new(8)));
        assert!(in_window(Offset::new(64), Offset::new(0), Offset::UNKNOWN));
        assert!(in_window(Offset::UNKNOWN, Offset::new(0), Offset::new(8)));
        assert!(in_window(Offset::new(0), Offset::UNKNOWN, Offset::new(8)));
    }

    #[test]
    fn copied_entry_destination() {
        assert_eq!(
            destination_offset(Offset::new(4), Offset::new(0), Offset::new(8)),
            Offset::new(12)
        );
        assert_eq!(
            destination_offset(Offset::new(4), Offset::new(4), Offset::new(0)),
            Offset::new(0)
        );
        assert_eq!(
            destination_offset(Offset::UNKNOWN, Offset::new(0), Offset::new(8)),
            Offset::UNKNOWN
        );
        assert_eq!(
            destination_offset(Offset::new(4), Offset::new(0), Offset::UNKNOWN),
            Offset::UNKNOWN
        );
    }
}
