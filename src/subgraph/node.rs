//! Nodes of the pointer subgraph.

use crate::pointer::{Offset, PointsToSet};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Uniquely identifies a `Node` within a `Subgraph`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Creates a node id from a raw arena index.
    pub fn from_index(index: usize) -> NodeId {
        NodeId(index)
    }

    /// The raw arena index of this node id.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// The kind of a pointer-subgraph node.
///
/// The kind determines the node's operand arity and its transfer function
/// in the solver. Nodes are created through the per-kind factory methods on
/// `Subgraph`, which encode the arities in their signatures.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum NodeKind {
    /// A static allocation site; points to itself at offset 0.
    Alloc,
    /// A heap allocation site, summarized per site: one abstract object
    /// regardless of how often the site executes at runtime.
    DynAlloc,
    /// Reads the pointers stored in memory at the address held by the
    /// operand.
    Load,
    /// Stores the pointers of the first operand into the memory addressed
    /// by the second.
    Store,
    /// Adjusts the operand pointer by a byte offset (get element pointer).
    Gep,
    /// Gathers the pointers of all operands at a control-flow merge.
    Phi,
    /// A pointer cast; pointers pass through unchanged.
    Cast,
    /// An object representing a function in memory. Structurally an
    /// allocation; the separate kind lets callees be checked.
    Function,
    /// Marker for a call site. The operand list is user-defined and the
    /// node carries no points-to semantics of its own.
    Call,
    /// A call through the function pointer held by the operand.
    CallFuncptr,
    /// The site a call returns to; gathers its operands like a phi.
    CallReturn,
    /// Entry of a procedure; a no-op marker.
    Entry,
    /// Exit of a procedure returning a value; gathers operands like a phi.
    Return,
    /// A fixed points-to relation established at construction and never
    /// mutated by any transfer.
    Constant,
    /// No operation; a convenience branch or join point.
    Noop,
    /// Copies a block of memory between the regions addressed by two
    /// pointers.
    Memcpy,
    /// The reserved target of the null pointer.
    NullAddr,
    /// The reserved "any memory" target.
    UnknownMem,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            NodeKind::Alloc => "alloc",
            NodeKind::DynAlloc => "dyn-alloc",
            NodeKind::Load => "load",
            NodeKind::Store => "store",
            NodeKind::Gep => "gep",
            NodeKind::Phi => "phi",
            NodeKind::Cast => "cast",
            NodeKind::Function => "function",
            NodeKind::Call => "call",
            NodeKind::CallFuncptr => "call-funcptr",
            NodeKind::CallReturn => "call-return",
            NodeKind::Entry => "entry",
            NodeKind::Return => "return",
            NodeKind::Constant => "constant",
            NodeKind::Noop => "noop",
            NodeKind::Memcpy => "memcpy",
            NodeKind::NullAddr => "null-addr",
            NodeKind::UnknownMem => "unknown-mem",
        };
        write!(f, "{}", name)
    }
}

/// A node in the pointer subgraph.
///
/// Nodes are owned by the `Subgraph` arena and referenced by `NodeId`.
/// Successor and predecessor lists are mirror images of each other; the
/// subgraph's edge and editing operations keep them consistent.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Node {
    pub(super) id: NodeId,
    pub(super) kind: NodeKind,
    pub(super) operands: Vec<NodeId>,
    pub(super) successors: Vec<NodeId>,
    pub(super) predecessors: Vec<NodeId>,
    pub(super) points_to: PointsToSet,
    /// Byte offset applied by gep, or the source window shift of memcpy.
    pub(super) offset: Offset,
    /// Length of the window copied by memcpy.
    pub(super) len: Offset,
    /// Size of the allocation in bytes; 0 means unknown.
    pub(super) size: u64,
    pub(super) zero_initialized: bool,
    pub(super) is_heap: bool,
    pub(super) paired_node: Option<NodeId>,
    /// Visitation mark for epoch-based traversal. Bookkeeping only, so
    /// it takes no part in comparison or serialization.
    #[serde(skip)]
    pub(super) dfsid: u64,
}

impl Node {
    pub(super) fn new(id: NodeId, kind: NodeKind) -> Node {
        Node {
            id,
            kind,
            operands: Vec::new(),
            successors: Vec::new(),
            predecessors: Vec::new(),
            points_to: PointsToSet::new(),
            offset: Offset::new(0),
            len: Offset::new(0),
            size: 0,
            zero_initialized: false,
            is_heap: false,
            paired_node: None,
            dfsid: 0,
        }
    }

    /// The id of this node within its subgraph.
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// The operand references of this node, in kind-defined order.
    pub fn operands(&self) -> &[NodeId] {
        &self.operands
    }

    /// An operand by index.
    pub fn operand(&self, index: usize) -> Result<NodeId, Error> {
        self.operands
            .get(index)
            .copied()
            .ok_or(Error::OperandOutOfRange {
                node: self.id,
                index,
            })
    }

    pub fn successors(&self) -> &[NodeId] {
        &self.successors
    }

    pub fn predecessors(&self) -> &[NodeId] {
        &self.predecessors
    }

    /// The successor, when this node has exactly one.
    pub fn single_successor(&self) -> Option<NodeId> {
        if self.successors.len() == 1 {
            Some(self.successors[0])
        } else {
            None
        }
    }

    /// The predecessor, when this node has exactly one.
    pub fn single_predecessor(&self) -> Option<NodeId> {
        if self.predecessors.len() == 1 {
            Some(self.predecessors[0])
        } else {
            None
        }
    }

    /// The current may-point-to set of this node.
    pub fn points_to(&self) -> &PointsToSet {
        &self.points_to
    }

    /// The byte offset of a gep node, or the source shift of a memcpy.
    pub fn offset(&self) -> Offset {
        self.offset
    }

    /// The copied window length of a memcpy node.
    pub fn len(&self) -> Offset {
        self.len
    }

    /// The allocation size in bytes; 0 means unknown.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    /// Whether the allocated memory was zeroed; loads from untouched
    /// offsets of such memory read as the null pointer.
    pub fn zero_initialized(&self) -> bool {
        self.zero_initialized
    }

    pub fn set_zero_initialized(&mut self, zero_initialized: bool) {
        self.zero_initialized = zero_initialized;
    }

    pub fn is_heap(&self) -> bool {
        self.is_heap
    }

    pub fn set_is_heap(&mut self, is_heap: bool) {
        self.is_heap = is_heap;
    }

    /// The sibling of this node, when it has one: a call node is paired
    /// with its call-return node, a formal parameter with its actual.
    pub fn paired_node(&self) -> Option<NodeId> {
        self.paired_node
    }

    pub fn set_paired_node(&mut self, paired: NodeId) {
        self.paired_node = Some(paired);
    }

    /// Whether this is the reserved null-address node.
    pub fn is_null(&self) -> bool {
        self.kind == NodeKind::NullAddr
    }

    /// Whether this is the reserved unknown-memory node.
    pub fn is_unknown_memory(&self) -> bool {
        self.kind == NodeKind::UnknownMem
    }
}

/// Equality covers the analysis state of the node, not its visitation
/// mark.
impl PartialEq for Node {
    fn eq(&self, other: &Node) -> bool {
        self.id == other.id
            && self.kind == other.kind
            && self.operands == other.operands
            && self.successors == other.successors
            && self.predecessors == other.predecessors
            && self.points_to == other.points_to
            && self.offset == other.offset
            && self.len == other.len
            && self.size == other.size
            && self.zero_initialized == other.zero_initialized
            && self.is_heap == other.is_heap
            && self.paired_node == other.paired_node
    }
}

impl Eq for Node {}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.kind)
    }
}
