//! Dataflow graph model: tensors, operators and their producer/consumer indices.
//!
//! Tensors and operators live in an append-only arena. Removing an entry
//! tombstones its slot; slots are never reused, so a handle captured before a
//! removal can be tested for liveness with [`DataflowGraph::contains`] and the
//! slot order doubles as insertion order.

mod data;
mod error;
mod index;
pub mod spec;
mod text;
mod topology;
pub mod utils;

use std::fmt;

use smallvec::SmallVec;

pub use data::{check_payload, decode_f32, f32_to_bytes, DataError, TensorData};
pub use error::GraphError;
pub use index::GraphIndices;
pub use spec::*;
pub use topology::TopologyError;

/// Stable handle to a tensor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct TensorId(pub u32);

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%t{}", self.0)
    }
}

/// Stable handle to an operator slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct OpId(pub u32);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

/// A value flowing through the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub spec: TensorSpec,
    data: Option<TensorData>,
}

impl Tensor {
    pub fn role(&self) -> TensorRole {
        self.spec.role
    }

    pub fn shape(&self) -> &Shape {
        &self.spec.shape
    }

    pub fn data(&self) -> Option<&TensorData> {
        self.data.as_ref()
    }

    pub fn is_constant(&self) -> bool {
        self.spec.is_constant()
    }
}

/// One computation node.
#[derive(Debug, Clone, PartialEq)]
pub struct Operator {
    kind: OpKind,
    inputs: SmallVec<[TensorId; 4]>,
    outputs: SmallVec<[TensorId; 2]>,
    params: OpParams,
}

impl Operator {
    pub fn kind(&self) -> OpKind {
        self.kind
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    pub fn params(&self) -> &OpParams {
        &self.params
    }

    /// Returns the output tensor when the operator has exactly one.
    pub fn single_output(&self) -> Option<TensorId> {
        match self.outputs.as_slice() {
            [output] => Some(*output),
            _ => None,
        }
    }

    pub fn reads(&self, tensor: TensorId) -> bool {
        self.inputs.contains(&tensor)
    }
}

/// Arena-backed dataflow graph with producer/consumer indices.
#[derive(Debug, Clone, Default)]
pub struct DataflowGraph {
    tensors: Vec<Option<Tensor>>,
    operators: Vec<Option<Operator>>,
    live_tensors: usize,
    live_operators: usize,
    indices: GraphIndices,
}

impl DataflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tensor without backing data.
    pub fn add_tensor(&mut self, spec: TensorSpec) -> TensorId {
        self.push_tensor(Tensor { spec, data: None })
    }

    /// Registers a constant tensor and its payload.
    pub fn add_constant(
        &mut self,
        mut spec: TensorSpec,
        data: TensorData,
    ) -> Result<TensorId, GraphError> {
        spec.role = TensorRole::Constant;
        let next = TensorId(self.tensors.len() as u32);
        check_payload(&spec, &data)
            .map_err(|source| GraphError::ConstantData { tensor: next, source })?;
        Ok(self.push_tensor(Tensor {
            spec,
            data: Some(data),
        }))
    }

    fn push_tensor(&mut self, tensor: Tensor) -> TensorId {
        let id = TensorId(self.tensors.len() as u32);
        self.tensors.push(Some(tensor));
        self.live_tensors += 1;
        id
    }

    /// Unregisters a tensor no operator references any more.
    pub fn remove_tensor(&mut self, id: TensorId) -> Result<Tensor, GraphError> {
        if !self.contains_tensor(id) {
            return Err(GraphError::StaleTensor { tensor: id });
        }
        if self.indices.producer_of(id).is_some() || !self.indices.consumers_of(id).is_empty() {
            return Err(GraphError::TensorInUse { tensor: id });
        }
        self.live_tensors -= 1;
        self.tensors[id.0 as usize]
            .take()
            .ok_or(GraphError::StaleTensor { tensor: id })
    }

    /// Registers an operator and indexes its inputs and outputs.
    ///
    /// Every check runs before the graph is touched, so a failed call leaves
    /// the graph unchanged.
    pub fn add_operator(
        &mut self,
        kind: OpKind,
        inputs: &[TensorId],
        outputs: &[TensorId],
        params: OpParams,
    ) -> Result<OpId, GraphError> {
        if !params.belongs_to(kind) {
            return Err(GraphError::ParamsKindMismatch { kind });
        }
        for tensor in inputs {
            if !self.contains_tensor(*tensor) {
                return Err(GraphError::StaleTensor { tensor: *tensor });
            }
        }
        for tensor in outputs {
            let Some(record) = self.tensor(*tensor) else {
                return Err(GraphError::StaleTensor { tensor: *tensor });
            };
            match record.role() {
                TensorRole::Constant => {
                    return Err(GraphError::ConstantProduced { tensor: *tensor })
                }
                TensorRole::Input => return Err(GraphError::InputProduced { tensor: *tensor }),
                TensorRole::Output | TensorRole::Transient => {}
            }
        }
        self.indices.check_outputs(outputs)?;

        let id = OpId(self.operators.len() as u32);
        self.indices.link(id, inputs, outputs);
        self.operators.push(Some(Operator {
            kind,
            inputs: SmallVec::from_slice(inputs),
            outputs: SmallVec::from_slice(outputs),
            params,
        }));
        self.live_operators += 1;
        Ok(id)
    }

    /// Removes an operator from the live list and the indices.
    ///
    /// Tensors it read or wrote stay registered; unregistering orphans is the
    /// caller's job.
    pub fn remove_operator(&mut self, id: OpId) -> Result<Operator, GraphError> {
        let operator = self
            .operators
            .get_mut(id.0 as usize)
            .and_then(Option::take)
            .ok_or(GraphError::StaleOperator { op: id })?;
        self.indices
            .unlink(id, &operator.inputs, &operator.outputs);
        self.live_operators -= 1;
        Ok(operator)
    }

    /// Rebinds every input slot of `op` reading `from` to read `to` instead.
    pub fn replace_input(&mut self, op: OpId, from: TensorId, to: TensorId) -> Result<(), GraphError> {
        if !self.contains_tensor(to) {
            return Err(GraphError::StaleTensor { tensor: to });
        }
        let operator = self
            .operators
            .get_mut(op.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(GraphError::StaleOperator { op })?;
        if !operator.reads(from) {
            return Err(GraphError::InputNotFound { op, tensor: from });
        }
        if from == to {
            return Ok(());
        }
        for input in operator.inputs.iter_mut() {
            if *input == from {
                *input = to;
            }
        }
        self.indices.remove_consumer(from, op);
        self.indices.add_consumer(to, op);
        Ok(())
    }

    pub fn tensor(&self, id: TensorId) -> Option<&Tensor> {
        self.tensors.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn operator(&self, id: OpId) -> Option<&Operator> {
        self.operators.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn contains(&self, id: OpId) -> bool {
        self.operator(id).is_some()
    }

    pub fn contains_tensor(&self, id: TensorId) -> bool {
        self.tensor(id).is_some()
    }

    pub fn kind_of(&self, id: OpId) -> Option<OpKind> {
        self.operator(id).map(Operator::kind)
    }

    pub fn producer_of(&self, tensor: TensorId) -> Option<OpId> {
        self.indices.producer_of(tensor)
    }

    pub fn consumers_of(&self, tensor: TensorId) -> &[OpId] {
        self.indices.consumers_of(tensor)
    }

    pub fn indices(&self) -> &GraphIndices {
        &self.indices
    }

    /// Returns a snapshot of the live operators in insertion order.
    pub fn live_operators(&self) -> Vec<OpId> {
        self.operators().map(|(id, _)| id).collect()
    }

    pub fn operators(&self) -> impl Iterator<Item = (OpId, &Operator)> + '_ {
        self.operators
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|op| (OpId(idx as u32), op)))
    }

    pub fn tensors(&self) -> impl Iterator<Item = (TensorId, &Tensor)> + '_ {
        self.tensors
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|t| (TensorId(idx as u32), t)))
    }

    pub fn operator_count(&self) -> usize {
        self.live_operators
    }

    pub fn tensor_count(&self) -> usize {
        self.live_tensors
    }

    pub fn graph_inputs(&self) -> Vec<TensorId> {
        self.tensors_with_role(TensorRole::Input)
    }

    pub fn graph_outputs(&self) -> Vec<TensorId> {
        self.tensors_with_role(TensorRole::Output)
    }

    fn tensors_with_role(&self, role: TensorRole) -> Vec<TensorId> {
        self.tensors()
            .filter(|(_, tensor)| tensor.role() == role)
            .map(|(id, _)| id)
            .collect()
    }

    /// Reads a constant tensor as dense `f32` values.
    pub fn constant_f32(&self, id: TensorId) -> Result<Vec<f32>, DataError> {
        let tensor = self.tensor(id).ok_or(DataError::MissingPayload)?;
        if !tensor.is_constant() {
            return Err(DataError::NotConstant);
        }
        let data = tensor.data().ok_or(DataError::MissingPayload)?;
        decode_f32(&tensor.spec, data)
    }

    /// Returns live operators ordered so every producer precedes its consumers.
    pub fn topological_order(&self) -> Result<Vec<OpId>, TopologyError> {
        topology::topological_order(self)
    }

    /// Checks the graph invariants from scratch.
    ///
    /// Rebuilds producer/consumer indices from the operator lists and compares
    /// them with the maintained ones, then checks tensor roles: constants carry
    /// data and have no producer, inputs have no producer, every other tensor
    /// has exactly one.
    pub fn verify(&self) -> Result<(), GraphError> {
        let mut rebuilt = GraphIndices::new();
        for (id, op) in self.operators() {
            for tensor in op.inputs().iter().chain(op.outputs()) {
                if !self.contains_tensor(*tensor) {
                    return Err(GraphError::StaleTensor { tensor: *tensor });
                }
            }
            rebuilt.check_outputs(op.outputs())?;
            rebuilt.link(id, op.inputs(), op.outputs());
        }
        if let Some(tensor) = rebuilt.first_mismatch(&self.indices) {
            return Err(GraphError::IndexMismatch { tensor });
        }

        for (id, tensor) in self.tensors() {
            let producer = self.producer_of(id);
            match tensor.role() {
                TensorRole::Constant => {
                    if producer.is_some() {
                        return Err(GraphError::ConstantProduced { tensor: id });
                    }
                    let data = tensor.data().ok_or(GraphError::ConstantData {
                        tensor: id,
                        source: DataError::MissingPayload,
                    })?;
                    check_payload(&tensor.spec, data)
                        .map_err(|source| GraphError::ConstantData { tensor: id, source })?;
                }
                TensorRole::Input => {
                    if producer.is_some() {
                        return Err(GraphError::InputProduced { tensor: id });
                    }
                }
                TensorRole::Output | TensorRole::Transient => {
                    if producer.is_none() {
                        return Err(GraphError::MissingProducer { tensor: id });
                    }
                }
            }
        }
        Ok(())
    }
}
