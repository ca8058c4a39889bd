//! The flow-insensitive analysis policy.

use crate::memory::{ObjectId, ObjectStore};
use crate::pointer::{Offset, Pointer};
use crate::solver::AnalysisPolicy;
use crate::subgraph::{NodeId, Subgraph, NULL_ADDR};
use crate::Error;
use log::trace;
use rustc_hash::FxHashMap;

// Entry and return nodes of one registered procedure body.
#[derive(Clone, Copy, Debug)]
struct ProcedureBody {
    entry: NodeId,
    ret: NodeId,
}

/// A context-insensitive, flow-insensitive analysis policy.
///
/// One memory object summarizes each allocation site for the entire run,
/// regardless of program point, so stores anywhere are visible to loads
/// everywhere. Empty dereferences are benign: the callbacks keep the
/// default no-change behavior.
///
/// Calls through function pointers are resolved against a registry of
/// procedure bodies. Front-ends register each callable function's entry
/// and return nodes with `register_function`; when the solver discovers a
/// callee, the policy splices an edge from the call site to the callee's
/// entry and from the callee's return to the call site's paired
/// call-return node.
#[derive(Debug, Default)]
pub struct FlowInsensitiveAnalysis {
    objects: ObjectStore,
    object_by_node: FxHashMap<NodeId, ObjectId>,
    procedures: FxHashMap<NodeId, ProcedureBody>,
}

impl FlowInsensitiveAnalysis {
    pub fn new() -> FlowInsensitiveAnalysis {
        FlowInsensitiveAnalysis::default()
    }

    /// Registers the entry and return nodes of the procedure behind the
    /// `function` node, making it callable through function pointers.
    pub fn register_function(&mut self, function: NodeId, entry: NodeId, ret: NodeId) {
        self.procedures
            .insert(function, ProcedureBody { entry, ret });
    }

    // The one object summarizing `target`, created on first use. The
    // unknown-memory object is born holding the unknown pointer, keeping
    // it a fixed point of load transfers.
    fn ensure_object(&mut self, subgraph: &Subgraph, target: NodeId) -> ObjectId {
        if let Some(&id) = self.object_by_node.get(&target) {
            return id;
        }
        let unknown_memory = subgraph
            .node(target)
            .map(|node| node.is_unknown_memory())
            .unwrap_or(false);
        let (id, object) = self.objects.allocate(target);
        if unknown_memory {
            object.add_pointee(Offset::UNKNOWN, Pointer::unknown(target));
        }
        self.object_by_node.insert(target, id);
        id
    }
}

impl AnalysisPolicy for FlowInsensitiveAnalysis {
    fn memory_objects(
        &mut self,
        subgraph: &Subgraph,
        _location: NodeId,
        access: NodeId,
        objects: &mut Vec<ObjectId>,
    ) {
        let node = match subgraph.node(access) {
            Ok(node) => node,
            Err(_) => return,
        };
        // one object per pointed-to allocation site; dereferences through
        // null contribute nothing
        let targets: Vec<NodeId> = node
            .points_to()
            .iter()
            .map(|pointer| pointer.target())
            .filter(|&target| target != NULL_ADDR)
            .collect();
        for target in targets {
            let id = self.ensure_object(subgraph, target);
            if !objects.contains(&id) {
                objects.push(id);
            }
        }
    }

    fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    fn objects_mut(&mut self) -> &mut ObjectStore {
        &mut self.objects
    }

    fn function_pointer_call(
        &mut self,
        subgraph: &mut Subgraph,
        location: NodeId,
        callee: NodeId,
    ) -> Result<bool, Error> {
        let body = match self.procedures.get(&callee) {
            Some(body) => *body,
            None => {
                trace!("no registered body for callee {}", callee);
                return Ok(false);
            }
        };
        let call_return = subgraph
            .node(location)?
            .paired_node()
            .ok_or(Error::PairedNodeMissing(location))?;

        let mut changed = subgraph.add_edge(location, body.entry)?;
        changed |= subgraph.add_edge(body.ret, call_return)?;
        if changed {
            trace!("spliced call {} into callee {}", location, callee);
        }
        Ok(changed)
    }
}
