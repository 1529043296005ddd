//! Builders for tensor specs and constants.

use super::{
    DType, DataflowGraph, GraphError, OpKind, OpParams, ReduceParams, Shape, TensorData, TensorId,
    TensorRole, TensorSpec,
};

/// Builds a tensor spec from explicit dimensions.
pub fn tensor_spec(dtype: DType, dims: &[usize], role: TensorRole) -> TensorSpec {
    TensorSpec::new(dtype, Shape::new(dims), role)
}

/// Registers an `f32` graph input.
pub fn add_f32_input(graph: &mut DataflowGraph, dims: &[usize]) -> TensorId {
    graph.add_tensor(tensor_spec(DType::F32, dims, TensorRole::Input))
}

/// Registers an `f32` intermediate tensor.
pub fn add_f32_transient(graph: &mut DataflowGraph, dims: &[usize]) -> TensorId {
    graph.add_tensor(tensor_spec(DType::F32, dims, TensorRole::Transient))
}

/// Registers an `f32` graph output.
pub fn add_f32_output(graph: &mut DataflowGraph, dims: &[usize]) -> TensorId {
    graph.add_tensor(tensor_spec(DType::F32, dims, TensorRole::Output))
}

/// Registers an `f32` constant holding `values`.
pub fn add_f32_constant(
    graph: &mut DataflowGraph,
    dims: &[usize],
    values: &[f32],
) -> Result<TensorId, GraphError> {
    graph.add_constant(
        tensor_spec(DType::F32, dims, TensorRole::Constant),
        TensorData::from_f32(values),
    )
}

/// Adds a single-output operator writing into a fresh tensor of `output`'s spec.
pub fn add_single_output_op(
    graph: &mut DataflowGraph,
    kind: OpKind,
    inputs: &[TensorId],
    output: TensorSpec,
    params: OpParams,
) -> Result<TensorId, GraphError> {
    let out = graph.add_tensor(output);
    graph.add_operator(kind, inputs, &[out], params)?;
    Ok(out)
}

/// Mean reduction keeping reduced dimensions.
pub fn reduce_mean(axes: &[i32]) -> OpParams {
    OpParams::Reduce(ReduceParams::mean(axes))
}
