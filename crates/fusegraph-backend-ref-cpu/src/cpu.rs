use std::collections::HashMap;
use std::sync::Arc;

use fusegraph::graph::{
    DataError, DataLayout, DataflowGraph, OpId, OpKind, Operator, ReduceKind, TensorId,
    TensorRole, TopologyError,
};
use thiserror::Error;
use tracing::{debug, trace};

/// Dense row-major `f32` tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuTensor {
    dims: Vec<usize>,
    data: Arc<[f32]>,
}

impl CpuTensor {
    pub fn new(dims: impl Into<Vec<usize>>, data: impl Into<Arc<[f32]>>) -> Result<Self, CpuError> {
        let dims = dims.into();
        let data = data.into();
        let expected: usize = dims.iter().product();
        if expected != data.len() {
            return Err(CpuError::DataLength {
                dims,
                actual: data.len(),
            });
        }
        Ok(Self { dims, data })
    }

    pub fn scalar(value: f32) -> Self {
        Self {
            dims: Vec::new(),
            data: Arc::from(vec![value]),
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum CpuError {
    #[error("graph input {tensor} has no feed")]
    MissingFeed { tensor: TensorId },
    #[error("feed for {tensor} has shape {actual:?}, declared {expected:?}")]
    FeedShape {
        tensor: TensorId,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("{actual} values do not fill shape {dims:?}")]
    DataLength { dims: Vec<usize>, actual: usize },
    #[error("operator {op} is not live")]
    UnknownOperator { op: OpId },
    #[error("operand {tensor} of {op} has no value")]
    MissingValue { op: OpId, tensor: TensorId },
    #[error("{kind} expects {expected} inputs, got {actual}")]
    Arity {
        kind: OpKind,
        expected: usize,
        actual: usize,
    },
    #[error("shapes {lhs:?} and {rhs:?} do not broadcast")]
    Broadcast { lhs: Vec<usize>, rhs: Vec<usize> },
    #[error("{kind}: {message}")]
    Unsupported { kind: OpKind, message: &'static str },
    #[error("{op} ({kind}) computed shape {actual:?}, declared {expected:?}")]
    OutputShape {
        op: OpId,
        kind: OpKind,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("constant {tensor} is unreadable")]
    Constant {
        tensor: TensorId,
        #[source]
        source: DataError,
    },
    #[error(transparent)]
    Topology(#[from] TopologyError),
}

/// Evaluates every operator of `graph` in dependency order.
///
/// Constants are decoded from their payloads; every graph input needs an
/// entry in `feeds`. Returns the value of every live tensor.
pub fn execute_graph(
    graph: &DataflowGraph,
    feeds: &HashMap<TensorId, CpuTensor>,
) -> Result<HashMap<TensorId, CpuTensor>, CpuError> {
    let mut values: HashMap<TensorId, CpuTensor> = HashMap::new();
    for (id, tensor) in graph.tensors() {
        match tensor.role() {
            TensorRole::Constant => {
                let data = graph
                    .constant_f32(id)
                    .map_err(|source| CpuError::Constant { tensor: id, source })?;
                values.insert(id, CpuTensor::new(tensor.shape().dims(), data)?);
            }
            TensorRole::Input => {
                let feed = feeds
                    .get(&id)
                    .ok_or(CpuError::MissingFeed { tensor: id })?;
                if feed.dims() != tensor.shape().dims() {
                    return Err(CpuError::FeedShape {
                        tensor: id,
                        expected: tensor.shape().dims().to_vec(),
                        actual: feed.dims().to_vec(),
                    });
                }
                values.insert(id, feed.clone());
            }
            TensorRole::Output | TensorRole::Transient => {}
        }
    }

    let order = graph.topological_order()?;
    debug!(operators = order.len(), "executing graph on cpu");
    for op_id in order {
        let op = graph
            .operator(op_id)
            .ok_or(CpuError::UnknownOperator { op: op_id })?;
        let mut inputs = Vec::with_capacity(op.inputs().len());
        for tensor in op.inputs() {
            let value = values.get(tensor).cloned().ok_or(CpuError::MissingValue {
                op: op_id,
                tensor: *tensor,
            })?;
            inputs.push(value);
        }
        let Some(output) = op.single_output() else {
            return Err(CpuError::Unsupported {
                kind: op.kind(),
                message: "multi-output operators",
            });
        };
        let result = execute_operator(op, &inputs)?;
        if let Some(declared) = graph.tensor(output) {
            if declared.shape().dims() != result.dims() {
                return Err(CpuError::OutputShape {
                    op: op_id,
                    kind: op.kind(),
                    expected: declared.shape().dims().to_vec(),
                    actual: result.dims().to_vec(),
                });
            }
        }
        trace!(op = %op_id, kind = %op.kind(), output = %output, "executed operator");
        values.insert(output, result);
    }
    Ok(values)
}

fn execute_operator(op: &Operator, inputs: &[CpuTensor]) -> Result<CpuTensor, CpuError> {
    let kind = op.kind();
    match kind {
        OpKind::Add | OpKind::Subtract | OpKind::Multiply | OpKind::Divide | OpKind::Pow => {
            let [lhs, rhs] = expect_inputs::<2>(kind, inputs)?;
            op_elementwise_binary(kind, lhs, rhs)
        }
        OpKind::Rsqrt | OpKind::Sqrt | OpKind::Neg | OpKind::Relu | OpKind::DataConvert => {
            let [input] = expect_inputs::<1>(kind, inputs)?;
            op_elementwise_unary(kind, input)
        }
        OpKind::Reduce => {
            let [input] = expect_inputs::<1>(kind, inputs)?;
            let params = op.params().reduce().ok_or(CpuError::Unsupported {
                kind,
                message: "missing reduce parameters",
            })?;
            let axes = params
                .normalized_axes(input.dims().len())
                .ok_or(CpuError::Unsupported {
                    kind,
                    message: "reduce axis out of range",
                })?;
            let (dims, data) = reduce_axes(input, &axes, params.kind);
            let dims = if params.keep_dims {
                dims
            } else {
                dims.iter()
                    .enumerate()
                    .filter(|(axis, _)| !axes.contains(axis))
                    .map(|(_, dim)| *dim)
                    .collect()
            };
            CpuTensor::new(dims, data)
        }
        OpKind::LayerNormalization => {
            let [input, beta, gamma] = expect_inputs::<3>(kind, inputs)?;
            let params = op.params().layer_norm().ok_or(CpuError::Unsupported {
                kind,
                message: "missing layer normalization parameters",
            })?;
            if params.axis >= input.dims().len() {
                return Err(CpuError::Unsupported {
                    kind,
                    message: "normalized axis out of range",
                });
            }
            op_normalize(input, beta, gamma, &[params.axis], params.eps)
        }
        OpKind::InstanceNormalization => {
            let [input, beta, gamma] = expect_inputs::<3>(kind, inputs)?;
            let params = op.params().instance_norm().ok_or(CpuError::Unsupported {
                kind,
                message: "missing instance normalization parameters",
            })?;
            let rank = input.dims().len();
            if rank < 3 {
                return Err(CpuError::Unsupported {
                    kind,
                    message: "instance normalization needs a batch, spatial and channel axis",
                });
            }
            let spatial: Vec<usize> = match params.layout {
                DataLayout::Nhwc => (1..rank - 1).collect(),
                DataLayout::Nchw => (2..rank).collect(),
            };
            op_normalize(input, beta, gamma, &spatial, params.eps)
        }
    }
}

fn expect_inputs<const N: usize>(
    kind: OpKind,
    inputs: &[CpuTensor],
) -> Result<&[CpuTensor; N], CpuError> {
    inputs.try_into().map_err(|_| CpuError::Arity {
        kind,
        expected: N,
        actual: inputs.len(),
    })
}

fn op_elementwise_binary(
    kind: OpKind,
    lhs: &CpuTensor,
    rhs: &CpuTensor,
) -> Result<CpuTensor, CpuError> {
    let out_dims = broadcast_shape(lhs.dims(), rhs.dims()).ok_or_else(|| CpuError::Broadcast {
        lhs: lhs.dims().to_vec(),
        rhs: rhs.dims().to_vec(),
    })?;
    let out_len: usize = out_dims.iter().product();
    let a = broadcast_to_f32(lhs.data(), lhs.dims(), &out_dims, out_len);
    let b = broadcast_to_f32(rhs.data(), rhs.dims(), &out_dims, out_len);
    let result: Vec<f32> = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| match kind {
            OpKind::Add => x + y,
            OpKind::Subtract => x - y,
            OpKind::Multiply => x * y,
            OpKind::Divide => x / y,
            _ => x.powf(*y),
        })
        .collect();
    CpuTensor::new(out_dims, result)
}

fn op_elementwise_unary(kind: OpKind, input: &CpuTensor) -> Result<CpuTensor, CpuError> {
    let values = input.data();
    let result: Vec<f32> = match kind {
        OpKind::Rsqrt => values.iter().map(|&x| 1.0 / x.sqrt()).collect(),
        OpKind::Sqrt => values.iter().map(|&x| x.sqrt()).collect(),
        OpKind::Neg => values.iter().map(|&x| -x).collect(),
        OpKind::Relu => values.iter().map(|&x| x.max(0.0)).collect(),
        // Values are already decoded to f32.
        _ => values.to_vec(),
    };
    CpuTensor::new(input.dims(), result)
}

/// `gamma * (x - mean) / sqrt(var + eps) + beta` with statistics over `axes`.
fn op_normalize(
    input: &CpuTensor,
    beta: &CpuTensor,
    gamma: &CpuTensor,
    axes: &[usize],
    eps: f32,
) -> Result<CpuTensor, CpuError> {
    let dims = input.dims();
    let len = input.len();
    for param in [beta, gamma] {
        if broadcast_shape(param.dims(), dims).as_deref() != Some(dims) {
            return Err(CpuError::Broadcast {
                lhs: param.dims().to_vec(),
                rhs: dims.to_vec(),
            });
        }
    }
    let beta = broadcast_to_f32(beta.data(), beta.dims(), dims, len);
    let gamma = broadcast_to_f32(gamma.data(), gamma.dims(), dims, len);

    let (stat_dims, mean) = reduce_axes(input, axes, ReduceKind::Mean);
    let mean = broadcast_to_f32(&mean, &stat_dims, dims, len);
    let centered: Vec<f32> = input
        .data()
        .iter()
        .zip(mean.iter())
        .map(|(x, m)| x - m)
        .collect();
    let squared = CpuTensor::new(dims, centered.iter().map(|d| d * d).collect::<Vec<_>>())?;
    let (_, variance) = reduce_axes(&squared, axes, ReduceKind::Mean);
    let variance = broadcast_to_f32(&variance, &stat_dims, dims, len);

    let result: Vec<f32> = (0..len)
        .map(|idx| gamma[idx] * centered[idx] / (variance[idx] + eps).sqrt() + beta[idx])
        .collect();
    CpuTensor::new(dims, result)
}

/// Reduces `input` over `axes`, returning keep-dims shape and values.
fn reduce_axes(input: &CpuTensor, axes: &[usize], kind: ReduceKind) -> (Vec<usize>, Vec<f32>) {
    let dims = input.dims();
    let mut out_dims = dims.to_vec();
    for axis in axes {
        out_dims[*axis] = 1;
    }
    let out_len: usize = out_dims.iter().product();
    let init = match kind {
        ReduceKind::Mean | ReduceKind::Sum => 0.0f32,
        ReduceKind::Max => f32::NEG_INFINITY,
        ReduceKind::Min => f32::INFINITY,
    };
    let mut acc = vec![init; out_len];
    let out_strides = compute_strides(&out_dims);
    for (idx, value) in input.data().iter().enumerate() {
        let coords = unravel_index(idx, dims);
        let offset: usize = coords
            .iter()
            .zip(out_dims.iter())
            .zip(out_strides.iter())
            .map(|((coord, dim), stride)| if *dim == 1 { 0 } else { coord * stride })
            .sum();
        let slot = &mut acc[offset];
        *slot = match kind {
            ReduceKind::Mean | ReduceKind::Sum => *slot + value,
            ReduceKind::Max => slot.max(*value),
            ReduceKind::Min => slot.min(*value),
        };
    }
    if kind == ReduceKind::Mean && out_len > 0 {
        let count = (input.len() / out_len) as f32;
        acc.iter_mut().for_each(|value| *value /= count);
    }
    (out_dims, acc)
}

/// Numpy-style broadcast of two shapes, right-aligned.
fn broadcast_shape(lhs: &[usize], rhs: &[usize]) -> Option<Vec<usize>> {
    let rank = lhs.len().max(rhs.len());
    let mut out = vec![1usize; rank];
    for (axis, slot) in out.iter_mut().enumerate() {
        let l = dim_from_right(lhs, rank - axis);
        let r = dim_from_right(rhs, rank - axis);
        *slot = match (l, r) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            _ => return None,
        };
    }
    Some(out)
}

fn dim_from_right(dims: &[usize], position: usize) -> usize {
    if position > dims.len() {
        1
    } else {
        dims[dims.len() - position]
    }
}

fn broadcast_to_f32(
    input: &[f32],
    input_dims: &[usize],
    out_dims: &[usize],
    out_len: usize,
) -> Vec<f32> {
    if out_len == 0 {
        return Vec::new();
    }
    if input_dims == out_dims {
        return input.to_vec();
    }
    let rank_diff = out_dims.len().saturating_sub(input_dims.len());
    let mut aligned_in_dims = vec![1usize; out_dims.len()];
    aligned_in_dims[rank_diff..].copy_from_slice(input_dims);
    let in_strides = compute_strides(&aligned_in_dims);
    (0..out_len)
        .map(|idx| {
            let coords = unravel_index(idx, out_dims);
            let offset: usize = coords
                .iter()
                .zip(aligned_in_dims.iter())
                .zip(in_strides.iter())
                .map(|((coord, dim), stride)| if *dim == 1 { 0 } else { coord * stride })
                .sum();
            input[offset]
        })
        .collect()
}

fn compute_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; dims.len()];
    let mut acc = 1usize;
    for (i, dim) in dims.iter().enumerate().rev() {
        strides[i] = acc;
        acc *= *dim;
    }
    strides
}

fn unravel_index(mut index: usize, dims: &[usize]) -> Vec<usize> {
    let mut coords = vec![0; dims.len()];
    for (i, dim) in dims.iter().enumerate().rev() {
        coords[i] = index % *dim;
        index /= *dim;
    }
    coords
}
