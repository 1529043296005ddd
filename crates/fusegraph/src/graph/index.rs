use std::collections::HashMap;

use smallvec::SmallVec;

use super::error::GraphError;
use super::{OpId, TensorId};

/// Producer/consumer indices derived from the live operator list.
///
/// `consumers` is an insertion-ordered set: an operator reading the same
/// tensor through several input slots is listed once.
#[derive(Debug, Clone, Default)]
pub struct GraphIndices {
    producer: HashMap<TensorId, OpId>,
    consumers: HashMap<TensorId, SmallVec<[OpId; 4]>>,
}

impl GraphIndices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the operator producing `tensor`, if any.
    pub fn producer_of(&self, tensor: TensorId) -> Option<OpId> {
        self.producer.get(&tensor).copied()
    }

    /// Returns the operators reading `tensor`, in registration order.
    pub fn consumers_of(&self, tensor: TensorId) -> &[OpId] {
        self.consumers
            .get(&tensor)
            .map(|list| list.as_slice())
            .unwrap_or(&[])
    }

    /// Checks that `outputs` can be claimed by a new producer.
    pub(crate) fn check_outputs(&self, outputs: &[TensorId]) -> Result<(), GraphError> {
        for (idx, tensor) in outputs.iter().enumerate() {
            if let Some(producer) = self.producer_of(*tensor) {
                return Err(GraphError::OutputAlreadyProduced {
                    tensor: *tensor,
                    producer,
                });
            }
            if outputs[..idx].contains(tensor) {
                return Err(GraphError::TensorInUse { tensor: *tensor });
            }
        }
        Ok(())
    }

    /// Records `op` as consumer of `inputs` and producer of `outputs`.
    ///
    /// Callers must run [`GraphIndices::check_outputs`] first; this keeps the
    /// insertion free of partial failure.
    pub(crate) fn link(&mut self, op: OpId, inputs: &[TensorId], outputs: &[TensorId]) {
        for tensor in inputs {
            self.add_consumer(*tensor, op);
        }
        for tensor in outputs {
            self.producer.insert(*tensor, op);
        }
    }

    pub(crate) fn unlink(&mut self, op: OpId, inputs: &[TensorId], outputs: &[TensorId]) {
        for tensor in inputs {
            self.remove_consumer(*tensor, op);
        }
        for tensor in outputs {
            if self.producer.get(tensor) == Some(&op) {
                self.producer.remove(tensor);
            }
        }
    }

    pub(crate) fn add_consumer(&mut self, tensor: TensorId, op: OpId) {
        let list = self.consumers.entry(tensor).or_default();
        if !list.contains(&op) {
            list.push(op);
        }
    }

    pub(crate) fn remove_consumer(&mut self, tensor: TensorId, op: OpId) {
        if let Some(list) = self.consumers.get_mut(&tensor) {
            list.retain(|id| *id != op);
            if list.is_empty() {
                self.consumers.remove(&tensor);
            }
        }
    }

    /// Returns every tensor with a producer or at least one consumer.
    pub fn indexed_tensors(&self) -> Vec<TensorId> {
        let mut tensors: Vec<TensorId> = self
            .producer
            .keys()
            .chain(self.consumers.keys())
            .copied()
            .collect();
        tensors.sort_unstable();
        tensors.dedup();
        tensors
    }

    /// Compares two index sets, ignoring consumer ordering.
    ///
    /// Returns the first tensor whose entries differ.
    pub fn first_mismatch(&self, other: &GraphIndices) -> Option<TensorId> {
        let mut tensors = self.indexed_tensors();
        tensors.extend(other.indexed_tensors());
        tensors.sort_unstable();
        tensors.dedup();
        tensors.into_iter().find(|tensor| {
            if self.producer_of(*tensor) != other.producer_of(*tensor) {
                return true;
            }
            let mut lhs = self.consumers_of(*tensor).to_vec();
            let mut rhs = other.consumers_of(*tensor).to_vec();
            lhs.sort_unstable();
            rhs.sort_unstable();
            lhs != rhs
        })
    }
}
