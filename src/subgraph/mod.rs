//! The pointer subgraph: an arena of memory-effect nodes wired along the
//! program's control flow.
//!
//! All inter-node references are `NodeId` indices into the arena, so the
//! graph may freely contain cycles (loops, recursion through spliced
//! calls). Successor and predecessor lists are mirror images with
//! multiplicity one; every operation here restores that invariant or fails
//! without touching the graph.
//!
//! Two nodes are reserved and allocated by `Subgraph::new` before any
//! client node: `NULL_ADDR`, the target of the null pointer, and
//! `UNKNOWN_MEM`, the "any memory" target. Their points-to sets are fixed
//! at construction.

mod node;

pub use self::node::{Node, NodeId, NodeKind};

use crate::pointer::{Offset, Pointer, PointsToSet};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// The reserved node id of the null pointer's target.
pub const NULL_ADDR: NodeId = NodeId(0);

/// The reserved node id of the unknown-memory target.
pub const UNKNOWN_MEM: NodeId = NodeId(1);

/// An arena of pointer-subgraph nodes.
///
/// The subgraph owns every node for the lifetime of the analysis; clients
/// and the solver refer to nodes by id. Nodes are created with the
/// per-kind factory methods, which encode each kind's operand arity in
/// their signature.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Subgraph {
    nodes: Vec<Node>,
    // The current visitation epoch. Bumped once per traversal so node
    // marks never need resetting. Bookkeeping only, so it takes no part
    // in comparison or serialization.
    #[serde(skip)]
    dfs_epoch: u64,
}

impl Subgraph {
    /// Creates a subgraph holding only the two reserved nodes.
    pub fn new() -> Subgraph {
        let mut subgraph = Subgraph {
            nodes: Vec::new(),
            dfs_epoch: 0,
        };
        let null_addr = subgraph.add_node(NodeKind::NullAddr);
        subgraph.nodes[null_addr.index()]
            .points_to
            .insert(Pointer::new(null_addr, Offset::new(0)));
        let unknown_mem = subgraph.add_node(NodeKind::UnknownMem);
        subgraph.nodes[unknown_mem.index()]
            .points_to
            .insert(Pointer::unknown(unknown_mem));
        subgraph
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the given id resolves to a node in this subgraph.
    pub fn has_node(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len()
    }

    /// Fetches a node by id.
    pub fn node(&self, id: NodeId) -> Result<&Node, Error> {
        self.nodes.get(id.index()).ok_or(Error::NodeNotFound(id))
    }

    /// Fetches a mutable reference to a node by id.
    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, Error> {
        self.nodes.get_mut(id.index()).ok_or(Error::NodeNotFound(id))
    }

    /// Every node in the subgraph, in allocation order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// The current may-point-to set of a node.
    pub fn points_to(&self, id: NodeId) -> Result<&PointsToSet, Error> {
        Ok(self.node(id)?.points_to())
    }

    fn add_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(id, kind));
        id
    }

    fn add_node_with_operands(&mut self, kind: NodeKind, operands: &[NodeId]) -> NodeId {
        debug_assert!(operands.iter().all(|&operand| self.has_node(operand)));
        let id = self.add_node(kind);
        self.nodes[id.index()].operands = operands.to_vec();
        id
    }

    /// Creates a static allocation site. It points to itself at offset 0.
    pub fn alloc(&mut self) -> NodeId {
        let id = self.add_node(NodeKind::Alloc);
        self.nodes[id.index()]
            .points_to
            .insert(Pointer::new(id, Offset::new(0)));
        id
    }

    /// Creates a heap allocation site. One abstract object summarizes the
    /// site no matter how often it executes.
    pub fn dyn_alloc(&mut self) -> NodeId {
        let id = self.add_node(NodeKind::DynAlloc);
        self.nodes[id.index()]
            .points_to
            .insert(Pointer::new(id, Offset::new(0)));
        self.nodes[id.index()].is_heap = true;
        id
    }

    /// Creates the memory object representing a function, so that it can
    /// be pointed to and called through.
    pub fn function(&mut self) -> NodeId {
        let id = self.add_node(NodeKind::Function);
        self.nodes[id.index()]
            .points_to
            .insert(Pointer::new(id, Offset::new(0)));
        id
    }

    /// Creates a procedure entry marker.
    pub fn entry(&mut self) -> NodeId {
        self.add_node(NodeKind::Entry)
    }

    /// Creates a no-op node, usable as a branch or join point.
    pub fn noop(&mut self) -> NodeId {
        self.add_node(NodeKind::Noop)
    }

    /// Creates a load of the pointers stored at the address held by
    /// `addr`.
    pub fn load(&mut self, addr: NodeId) -> NodeId {
        self.add_node_with_operands(NodeKind::Load, &[addr])
    }

    /// Creates a store of `value`'s pointers into the memory addressed by
    /// `addr`.
    pub fn store(&mut self, value: NodeId, addr: NodeId) -> NodeId {
        self.add_node_with_operands(NodeKind::Store, &[value, addr])
    }

    /// Creates an offset adjustment of `base` by `offset` bytes.
    pub fn gep(&mut self, base: NodeId, offset: Offset) -> NodeId {
        let id = self.add_node_with_operands(NodeKind::Gep, &[base]);
        self.nodes[id.index()].offset = offset;
        id
    }

    /// Creates a pointer cast of `operand`. Pointers pass through.
    pub fn cast(&mut self, operand: NodeId) -> NodeId {
        self.add_node_with_operands(NodeKind::Cast, &[operand])
    }

    /// Creates a node with the fixed points-to relation
    /// `(target, offset)`. No transfer ever mutates it.
    pub fn constant(&mut self, target: NodeId, offset: Offset) -> NodeId {
        debug_assert!(self.has_node(target));
        let id = self.add_node(NodeKind::Constant);
        self.nodes[id.index()]
            .points_to
            .insert(Pointer::new(target, offset));
        id
    }

    /// Creates a phi node gathering the pointers of `operands`.
    pub fn phi(&mut self, operands: &[NodeId]) -> NodeId {
        self.add_node_with_operands(NodeKind::Phi, operands)
    }

    /// Creates a call marker. The operands are user-defined and ignored
    /// by the analysis.
    pub fn call(&mut self, operands: &[NodeId]) -> NodeId {
        self.add_node_with_operands(NodeKind::Call, operands)
    }

    /// Creates a call through the function pointer held by `fp`. Pair it
    /// with its call-return node (`Node::set_paired_node`) so discovered
    /// callees can be spliced in.
    pub fn call_funcptr(&mut self, fp: NodeId) -> NodeId {
        self.add_node_with_operands(NodeKind::CallFuncptr, &[fp])
    }

    /// Creates the site a call returns to, gathering the pointers of
    /// `operands` like a phi.
    pub fn call_return(&mut self, operands: &[NodeId]) -> NodeId {
        self.add_node_with_operands(NodeKind::CallReturn, operands)
    }

    /// Creates a procedure exit gathering the returned pointers of
    /// `operands`.
    pub fn ret(&mut self, operands: &[NodeId]) -> NodeId {
        self.add_node_with_operands(NodeKind::Return, operands)
    }

    /// Creates a copy of the memory window `[offset, offset + len)` of
    /// the region addressed by `from` into the region addressed by `to`.
    pub fn memcpy(&mut self, from: NodeId, to: NodeId, offset: Offset, len: Offset) -> NodeId {
        let id = self.add_node_with_operands(NodeKind::Memcpy, &[from, to]);
        self.nodes[id.index()].offset = offset;
        self.nodes[id.index()].len = len;
        id
    }

    /// Adds a control-flow edge from `from` to `to`, keeping the
    /// predecessor list of `to` in sync. Returns whether the edge is new;
    /// parallel edges are never created.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) -> Result<bool, Error> {
        if !self.has_node(from) {
            return Err(Error::NodeNotFound(from));
        }
        if !self.has_node(to) {
            return Err(Error::NodeNotFound(to));
        }
        if self.nodes[from.index()].successors.contains(&to) {
            return Ok(false);
        }
        self.nodes[from.index()].successors.push(to);
        self.nodes[to.index()].predecessors.push(from);
        Ok(true)
    }

    /// Splices `node` in directly after `target`: `node` takes over
    /// `target`'s successors and becomes its single successor. `node`
    /// must not yet have any edges.
    pub fn insert_after(&mut self, node: NodeId, target: NodeId) -> Result<(), Error> {
        self.ensure_detached(node)?;
        if !self.has_node(target) {
            return Err(Error::NodeNotFound(target));
        }

        let successors = std::mem::take(&mut self.nodes[target.index()].successors);
        for &successor in &successors {
            for predecessor in self.nodes[successor.index()].predecessors.iter_mut() {
                if *predecessor == target {
                    *predecessor = node;
                }
            }
        }
        self.nodes[node.index()].successors = successors;
        self.nodes[target.index()].successors.push(node);
        self.nodes[node.index()].predecessors.push(target);
        Ok(())
    }

    /// Splices `node` in directly before `target`: `node` takes over
    /// `target`'s predecessors and `target` becomes its single successor.
    /// `node` must not yet have any edges.
    pub fn insert_before(&mut self, node: NodeId, target: NodeId) -> Result<(), Error> {
        self.ensure_detached(node)?;
        if !self.has_node(target) {
            return Err(Error::NodeNotFound(target));
        }

        let predecessors = std::mem::take(&mut self.nodes[target.index()].predecessors);
        for &predecessor in &predecessors {
            for successor in self.nodes[predecessor.index()].successors.iter_mut() {
                if *successor == target {
                    *successor = node;
                }
            }
        }
        self.nodes[node.index()].predecessors = predecessors;
        self.nodes[node.index()].successors.push(target);
        self.nodes[target.index()].predecessors.push(node);
        Ok(())
    }

    /// Splices the sequence `first .. last` in before `target`. `first`
    /// takes over `target`'s predecessors; `target` becomes `last`'s
    /// successor. `first` must have no predecessors and `last` no
    /// successors.
    pub fn insert_sequence_before(
        &mut self,
        first: NodeId,
        last: NodeId,
        target: NodeId,
    ) -> Result<(), Error> {
        if !self.has_node(target) {
            return Err(Error::NodeNotFound(target));
        }
        if !self.node(first)?.predecessors().is_empty() {
            return Err(Error::NodeNotDetached(first));
        }
        if !self.node(last)?.successors().is_empty() {
            return Err(Error::NodeNotDetached(last));
        }

        let predecessors = std::mem::take(&mut self.nodes[target.index()].predecessors);
        for &predecessor in &predecessors {
            for successor in self.nodes[predecessor.index()].successors.iter_mut() {
                if *successor == target {
                    *successor = first;
                }
            }
        }
        self.nodes[first.index()].predecessors = predecessors;
        self.nodes[last.index()].successors.push(target);
        self.nodes[target.index()].predecessors.push(last);
        Ok(())
    }

    /// Redirects the single successor edge of `node` to `new`. `node`
    /// must have exactly one successor.
    pub fn replace_single_successor(&mut self, node: NodeId, new: NodeId) -> Result<(), Error> {
        if !self.has_node(new) {
            return Err(Error::NodeNotFound(new));
        }
        let old = self
            .node(node)?
            .single_successor()
            .ok_or(Error::SingleSuccessorRequired(node))?;

        self.nodes[old.index()].predecessors.retain(|&p| p != node);
        self.nodes[node.index()].successors.clear();
        self.nodes[node.index()].successors.push(new);
        self.nodes[new.index()].predecessors.push(node);
        Ok(())
    }

    fn ensure_detached(&self, node: NodeId) -> Result<(), Error> {
        let n = self.node(node)?;
        if !n.successors().is_empty() || !n.predecessors().is_empty() {
            return Err(Error::NodeNotDetached(node));
        }
        Ok(())
    }

    /// Pushes `from` and every node reachable from it onto `queue`, in
    /// BFS order, de-duplicated with the visitation epoch.
    pub fn enqueue_reachable(&mut self, from: NodeId, queue: &mut VecDeque<NodeId>) {
        debug_assert!(self.has_node(from));
        self.dfs_epoch += 1;
        let epoch = self.dfs_epoch;

        let mut pending = VecDeque::new();
        self.nodes[from.index()].dfsid = epoch;
        pending.push_back(from);

        while let Some(node) = pending.pop_front() {
            queue.push_back(node);
            for i in 0..self.nodes[node.index()].successors.len() {
                let successor = self.nodes[node.index()].successors[i];
                if self.nodes[successor.index()].dfsid != epoch {
                    self.nodes[successor.index()].dfsid = epoch;
                    pending.push_back(successor);
                }
            }
        }
    }

    /// Collects `from` and every node reachable from it, in BFS order.
    pub fn reachable_nodes(&mut self, from: NodeId) -> Vec<NodeId> {
        let mut queue = VecDeque::new();
        self.enqueue_reachable(from, &mut queue);
        queue.into_iter().collect()
    }

    /// Verifies the bidirectional edge invariant over the whole subgraph:
    /// every successor edge is mirrored by exactly one predecessor edge
    /// and vice versa, with no parallel edges on either side.
    pub fn check_consistency(&self) -> Result<(), Error> {
        for node in &self.nodes {
            for (i, &successor) in node.successors().iter().enumerate() {
                if !self.has_node(successor) {
                    return Err(Error::NodeNotFound(successor));
                }
                if node.successors()[..i].contains(&successor) {
                    return Err(
                        format!("parallel edge {} -> {}", node.id(), successor).into(),
                    );
                }
                let mirrored = self.nodes[successor.index()]
                    .predecessors()
                    .iter()
                    .filter(|&&p| p == node.id())
                    .count();
                if mirrored != 1 {
                    return Err(format!(
                        "edge {} -> {} is mirrored {} times",
                        node.id(),
                        successor,
                        mirrored
                    )
                    .into());
                }
            }
            for &predecessor in node.predecessors() {
                if !self.has_node(predecessor) {
                    return Err(Error::NodeNotFound(predecessor));
                }
                let mirrored = self.nodes[predecessor.index()]
                    .successors()
                    .iter()
                    .filter(|&&s| s == node.id())
                    .count();
                if mirrored != 1 {
                    return Err(format!(
                        "back edge {} -> {} is mirrored {} times",
                        predecessor,
                        node.id(),
                        mirrored
                    )
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Grows the points-to set of a node by one pointer. Reserved and
    /// constant nodes are never grown.
    pub(crate) fn add_pointee(&mut self, node: NodeId, pointer: Pointer) -> bool {
        debug_assert!(self.has_node(node));
        debug_assert!(!matches!(
            self.nodes[node.index()].kind,
            NodeKind::Constant | NodeKind::NullAddr | NodeKind::UnknownMem
        ));
        self.nodes[node.index()].points_to.insert(pointer)
    }

    /// Grows the points-to set of a node by a whole set.
    pub(crate) fn union_pointees(&mut self, node: NodeId, pointees: &PointsToSet) -> bool {
        debug_assert!(self.has_node(node));
        debug_assert!(!matches!(
            self.nodes[node.index()].kind,
            NodeKind::Constant | NodeKind::NullAddr | NodeKind::UnknownMem
        ));
        self.nodes[node.index()].points_to.union_from(pointees)
    }
}

/// Equality covers the analysis state (nodes, edges, points-to sets),
/// not the traversal epoch.
impl PartialEq for Subgraph {
    fn eq(&self, other: &Subgraph) -> bool {
        self.nodes == other.nodes
    }
}

impl Eq for Subgraph {}

impl Default for Subgraph {
    fn default() -> Subgraph {
        Subgraph::new()
    }
}

impl fmt::Display for Subgraph {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for node in &self.nodes {
            writeln!(f, "{} -> {}", node, node.points_to())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_nodes() {
        let subgraph = Subgraph::new();
        assert_eq!(subgraph.num_nodes(), 2);
        assert_eq!(subgraph.node(NULL_ADDR).unwrap().kind(), NodeKind::NullAddr);
        assert_eq!(
            subgraph.node(UNKNOWN_MEM).unwrap().kind(),
            NodeKind::UnknownMem
        );
        assert!(subgraph
            .points_to(NULL_ADDR)
            .unwrap()
            .contains(&Pointer::null()));
        assert!(subgraph
            .points_to(UNKNOWN_MEM)
            .unwrap()
            .contains(&Pointer::unknown(UNKNOWN_MEM)));
    }

    #[test]
    fn allocation_kinds_point_to_themselves() {
        let mut subgraph = Subgraph::new();
        let a = subgraph.alloc();
        let d = subgraph.dyn_alloc();
        let f = subgraph.function();

        for id in &[a, d, f] {
            let pointees = subgraph.points_to(*id).unwrap();
            assert_eq!(pointees.len(), 1);
            assert!(pointees.contains(&Pointer::new(*id, Offset::new(0))));
        }
        assert!(subgraph.node(d).unwrap().is_heap());
        assert!(!subgraph.node(a).unwrap().is_heap());
    }

    #[test]
    fn add_edge_keeps_lists_mirrored() {
        let mut subgraph = Subgraph::new();
        let a = subgraph.noop();
        let b = subgraph.noop();

        assert!(subgraph.add_edge(a, b).unwrap());
        assert_eq!(subgraph.node(a).unwrap().successors(), &[b]);
        assert_eq!(subgraph.node(b).unwrap().predecessors(), &[a]);

        // no parallel edges
        assert!(!subgraph.add_edge(a, b).unwrap());
        assert_eq!(subgraph.node(a).unwrap().successors(), &[b]);
        subgraph.check_consistency().unwrap();
    }

    #[test]
    fn add_edge_rejects_missing_nodes() {
        let mut subgraph = Subgraph::new();
        let a = subgraph.noop();
        let bogus = NodeId::from_index(99);
        assert!(subgraph.add_edge(a, bogus).is_err());
        assert!(subgraph.add_edge(bogus, a).is_err());
    }

    #[test]
    fn insert_after_takes_over_successors() {
        let mut subgraph = Subgraph::new();
        let a = subgraph.noop();
        let b = subgraph.noop();
        let c = subgraph.noop();
        subgraph.add_edge(a, b).unwrap();
        subgraph.add_edge(a, c).unwrap();

        let n = subgraph.noop();
        subgraph.insert_after(n, a).unwrap();

        assert_eq!(subgraph.node(a).unwrap().successors(), &[n]);
        assert_eq!(subgraph.node(n).unwrap().successors(), &[b, c]);
        assert_eq!(subgraph.node(b).unwrap().predecessors(), &[n]);
        assert_eq!(subgraph.node(c).unwrap().predecessors(), &[n]);
        subgraph.check_consistency().unwrap();
    }

    #[test]
    fn insert_before_takes_over_predecessors() {
        let mut subgraph = Subgraph::new();
        let a = subgraph.noop();
        let b = subgraph.noop();
        let c = subgraph.noop();
        subgraph.add_edge(a, c).unwrap();
        subgraph.add_edge(b, c).unwrap();

        let n = subgraph.noop();
        subgraph.insert_before(n, c).unwrap();

        assert_eq!(subgraph.node(n).unwrap().predecessors(), &[a, b]);
        assert_eq!(subgraph.node(n).unwrap().successors(), &[c]);
        assert_eq!(subgraph.node(c).unwrap().predecessors(), &[n]);
        assert_eq!(subgraph.node(a).unwrap().successors(), &[n]);
        subgraph.check_consistency().unwrap();
    }

    #[test]
    fn insert_rejects_attached_nodes() {
        let mut subgraph = Subgraph::new();
        let a = subgraph.noop();
        let b = subgraph.noop();
        subgraph.add_edge(a, b).unwrap();

        match subgraph.insert_after(b, a) {
            Err(Error::NodeNotDetached(node)) => assert_eq!(node, b),
            other => panic!("expected NodeNotDetached, got {:?}", other),
        }
        // the failed edit left the graph untouched
        assert_eq!(subgraph.node(a).unwrap().successors(), &[b]);
        subgraph.check_consistency().unwrap();
    }

    #[test]
    fn insert_sequence_before_rewires_both_ends() {
        let mut subgraph = Subgraph::new();
        let a = subgraph.noop();
        let b = subgraph.noop();
        subgraph.add_edge(a, b).unwrap();

        let first = subgraph.noop();
        let last = subgraph.noop();
        subgraph.add_edge(first, last).unwrap();

        subgraph.insert_sequence_before(first, last, b).unwrap();

        assert_eq!(subgraph.node(a).unwrap().successors(), &[first]);
        assert_eq!(subgraph.node(first).unwrap().predecessors(), &[a]);
        assert_eq!(subgraph.node(last).unwrap().successors(), &[b]);
        assert_eq!(subgraph.node(b).unwrap().predecessors(), &[last]);
        subgraph.check_consistency().unwrap();
    }

    #[test]
    fn replace_single_successor_rewires_edge() {
        let mut subgraph = Subgraph::new();
        let a = subgraph.noop();
        let b = subgraph.noop();
        let c = subgraph.noop();
        subgraph.add_edge(a, b).unwrap();

        subgraph.replace_single_successor(a, c).unwrap();

        assert_eq!(subgraph.node(a).unwrap().successors(), &[c]);
        assert!(subgraph.node(b).unwrap().predecessors().is_empty());
        assert_eq!(subgraph.node(c).unwrap().predecessors(), &[a]);
        subgraph.check_consistency().unwrap();
    }

    #[test]
    fn replace_single_successor_requires_one_successor() {
        let mut subgraph = Subgraph::new();
        let a = subgraph.noop();
        let b = subgraph.noop();
        let c = subgraph.noop();
        subgraph.add_edge(a, b).unwrap();
        subgraph.add_edge(a, c).unwrap();

        assert!(matches!(
            subgraph.replace_single_successor(a, b),
            Err(Error::SingleSuccessorRequired(_))
        ));
    }

    #[test]
    fn reachable_nodes_handles_cycles() {
        let mut subgraph = Subgraph::new();
        let a = subgraph.noop();
        let b = subgraph.noop();
        let c = subgraph.noop();
        let d = subgraph.noop();
        subgraph.add_edge(a, b).unwrap();
        subgraph.add_edge(b, c).unwrap();
        subgraph.add_edge(c, a).unwrap();

        let reachable = subgraph.reachable_nodes(a);
        assert_eq!(reachable, vec![a, b, c]);
        assert!(!reachable.contains(&d));

        // a fresh epoch visits everything again
        let again = subgraph.reachable_nodes(a);
        assert_eq!(again, vec![a, b, c]);
    }

    #[test]
    fn operand_out_of_range() {
        let mut subgraph = Subgraph::new();
        let a = subgraph.alloc();
        let l = subgraph.load(a);

        assert_eq!(subgraph.node(l).unwrap().operand(0).unwrap(), a);
        assert!(matches!(
            subgraph.node(l).unwrap().operand(1),
            Err(Error::OperandOutOfRange { .. })
        ));
    }
}
