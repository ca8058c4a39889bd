//! Osprey error types.

use crate::memory::ObjectId;
use crate::subgraph::NodeId;

/// Errors raised while building, editing, or solving a pointer subgraph.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A node id did not resolve to a node in the subgraph.
    #[error("The node {0} does not exist in the subgraph")]
    NodeNotFound(NodeId),

    /// An operand index was out of range for the node's kind.
    #[error("Operand {index} is out of range for node {node}")]
    OperandOutOfRange { node: NodeId, index: usize },

    /// A structural edit requires the node to have no edges.
    #[error("The node {0} must not have any edges for this operation")]
    NodeNotDetached(NodeId),

    /// A structural edit requires the node to have exactly one successor.
    #[error("The node {0} must have exactly one successor")]
    SingleSuccessorRequired(NodeId),

    /// A call node was missing its paired call-return node.
    #[error("The call node {0} has no paired call-return node")]
    PairedNodeMissing(NodeId),

    /// A memory object id did not resolve to an object in the store.
    #[error("The memory object {0} does not exist in the store")]
    ObjectNotFound(ObjectId),

    /// The solver hit the caller-imposed step limit before converging.
    #[error("The solver exceeded the step limit of {0}")]
    MaxStepsExceeded(usize),

    #[error("{0}")]
    Custom(String),
}

impl From<&str> for Error {
    fn from(message: &str) -> Error {
        Error::Custom(message.to_string())
    }
}

impl From<String> for Error {
    fn from(message: String) -> Error {
        Error::Custom(message)
    }
}
