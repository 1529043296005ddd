use tracing::trace;

use crate::graph::{
    utils::tensor_spec, DType, DataflowGraph, GraphError, OpId, OpKind, OpParams, Operator,
    TensorData, TensorId, TensorRole,
};

/// Bookkeeping accumulated by a [`GraphRewriter`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RewriteStats {
    pub erased_ops: usize,
    pub erased_tensors: usize,
    pub created_ops: usize,
}

/// Mutable graph editor used by patterns.
///
/// Every mutation goes through [`DataflowGraph`] primitives, so the
/// producer/consumer indices stay consistent after each call.
pub struct GraphRewriter<'a> {
    graph: &'a mut DataflowGraph,
    stats: RewriteStats,
}

impl<'a> GraphRewriter<'a> {
    pub fn new(graph: &'a mut DataflowGraph) -> Self {
        Self {
            graph,
            stats: RewriteStats::default(),
        }
    }

    pub fn graph(&self) -> &DataflowGraph {
        self.graph
    }

    pub fn stats(&self) -> RewriteStats {
        self.stats
    }

    pub fn contains(&self, op: OpId) -> bool {
        self.graph.contains(op)
    }

    pub fn operator(&self, op: OpId) -> Option<&Operator> {
        self.graph.operator(op)
    }

    pub fn consumers_of(&self, tensor: TensorId) -> &[OpId] {
        self.graph.consumers_of(tensor)
    }

    pub fn producer_of(&self, tensor: TensorId) -> Option<OpId> {
        self.graph.producer_of(tensor)
    }

    /// Erases one operator, leaving the tensors it touched registered.
    pub fn erase_op(&mut self, op: OpId) -> Result<Operator, GraphError> {
        let removed = self.graph.remove_operator(op)?;
        self.stats.erased_ops += 1;
        Ok(removed)
    }

    /// Erases `ops` in order, returning the removed operators.
    pub fn erase_ops(&mut self, ops: &[OpId]) -> Result<Vec<Operator>, GraphError> {
        ops.iter().map(|op| self.erase_op(*op)).collect()
    }

    /// Unregisters tensors among `candidates` that lost every reference.
    ///
    /// A candidate is dead when it has no consumers and is neither a graph
    /// input nor a graph output. A dead tensor whose producer survives is
    /// released together with that producer when none of the producer's
    /// outputs are consumed or exported; the producer's own inputs are then
    /// examined the same way. Tensors listed in `keep` are never touched.
    pub fn sweep_dead_tensors(
        &mut self,
        candidates: impl IntoIterator<Item = TensorId>,
        keep: &[TensorId],
    ) -> Result<(), GraphError> {
        let mut worklist: Vec<TensorId> = candidates.into_iter().collect();
        worklist.reverse();
        while let Some(tensor) = worklist.pop() {
            if keep.contains(&tensor) || !self.is_dead(tensor) {
                continue;
            }
            if let Some(producer) = self.graph.producer_of(tensor) {
                let Some(op) = self.graph.operator(producer) else {
                    return Err(GraphError::StaleOperator { op: producer });
                };
                let exported = op.outputs().iter().any(|out| {
                    keep.contains(out)
                        || !self.graph.consumers_of(*out).is_empty()
                        || self.graph.tensor(*out).map(|t| t.role()) == Some(TensorRole::Output)
                });
                if exported {
                    continue;
                }
                let removed = self.erase_op(producer)?;
                trace!(op = %producer, kind = %removed.kind(), "erased orphaned producer");
                worklist.extend(removed.outputs().iter().rev().copied());
                worklist.extend(removed.inputs().iter().rev().copied());
                continue;
            }
            self.graph.remove_tensor(tensor)?;
            self.stats.erased_tensors += 1;
        }
        Ok(())
    }

    fn is_dead(&self, tensor: TensorId) -> bool {
        let Some(record) = self.graph.tensor(tensor) else {
            return false;
        };
        !matches!(record.role(), TensorRole::Input | TensorRole::Output)
            && self.graph.consumers_of(tensor).is_empty()
    }

    /// Registers a new `f32` constant holding `values`.
    pub fn materialize_f32_constant(
        &mut self,
        dims: &[usize],
        values: &[f32],
    ) -> Result<TensorId, GraphError> {
        self.graph.add_constant(
            tensor_spec(DType::F32, dims, TensorRole::Constant),
            TensorData::from_f32(values),
        )
    }

    /// Registers a new operator.
    pub fn insert_op(
        &mut self,
        kind: OpKind,
        inputs: &[TensorId],
        outputs: &[TensorId],
        params: OpParams,
    ) -> Result<OpId, GraphError> {
        let id = self.graph.add_operator(kind, inputs, outputs, params)?;
        self.stats.created_ops += 1;
        Ok(id)
    }

    /// Verifies the graph invariants after mutations.
    pub fn verify(&self) -> Result<(), GraphError> {
        self.graph.verify()
    }
}
