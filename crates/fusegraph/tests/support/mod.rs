#![allow(dead_code)]

use std::collections::HashMap;

use fusegraph::graph::{
    utils::{add_f32_constant, reduce_mean, tensor_spec},
    DType, DataflowGraph, OpId, OpKind, OpParams, TensorData, TensorId, TensorRole,
};

/// Operators of the primitive mean/stddev normalization expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Mean0,
    Sub0,
    Pow,
    Mean1,
    Add0,
    Rsqrt,
    Mul0,
    Mul1,
    Mul2,
    Sub1,
    Add1,
}

impl Step {
    pub const ALL: [Step; 11] = [
        Step::Mean0,
        Step::Sub0,
        Step::Pow,
        Step::Mean1,
        Step::Add0,
        Step::Rsqrt,
        Step::Mul0,
        Step::Mul1,
        Step::Mul2,
        Step::Sub1,
        Step::Add1,
    ];
}

/// Builds one occurrence of the normalization chain, with knobs to break it.
#[derive(Debug, Clone)]
pub struct NormChain {
    pub dims: Vec<usize>,
    pub axes: Vec<i32>,
    pub eps: f32,
    pub gamma_dims: Vec<usize>,
    pub gamma: Vec<f32>,
    pub beta_dims: Vec<usize>,
    pub beta: Vec<f32>,
    pub pow_exponent: f32,
    /// Store eps as f16 and convert it to f32 in the graph.
    pub eps_via_convert: bool,
    /// Register `Mul2` before `Sub0` and `Mul1`, reversing consumer order.
    pub swap_branch_order: bool,
    /// `Sub0` subtracts the mean from a second, unrelated input.
    pub sub0_reads_other_input: bool,
    /// Drop `Pow` or `Rsqrt`; its consumer reads the dropped op's input.
    pub bypass: Option<Step>,
    /// Replace the kind of one operator.
    pub substitute: Option<(Step, OpKind)>,
    /// Hang an extra `Relu` consumer on the output of this step.
    pub extra_consumer: Option<Step>,
    /// Mark this step's output as a graph output.
    pub export: Option<Step>,
    /// Override the second mean's parameters.
    pub mean1_params: Option<OpParams>,
}

impl NormChain {
    /// Layer normalization over the last axis of a `[1, 8]` input.
    pub fn layer_norm() -> Self {
        Self {
            dims: vec![1, 8],
            axes: vec![1],
            eps: 1e-5,
            gamma_dims: vec![8],
            gamma: (0..8).map(|i| 0.5 + i as f32 * 0.25).collect(),
            beta_dims: vec![8],
            beta: (0..8).map(|i| i as f32 * 0.1 - 0.3).collect(),
            pow_exponent: 2.0,
            eps_via_convert: false,
            swap_branch_order: false,
            sub0_reads_other_input: false,
            bypass: None,
            substitute: None,
            extra_consumer: None,
            export: None,
            mean1_params: None,
        }
    }

    /// Instance normalization over the spatial axes of an NHWC `[2, 4, 4, 3]` input.
    pub fn instance_norm() -> Self {
        Self {
            dims: vec![2, 4, 4, 3],
            axes: vec![1, 2],
            eps: 1e-3,
            gamma_dims: vec![3],
            gamma: vec![1.5, 0.75, 2.0],
            beta_dims: vec![3],
            beta: vec![0.1, -0.2, 0.3],
            ..Self::layer_norm()
        }
    }

    pub fn build(&self) -> NormGraph {
        let mut graph = DataflowGraph::new();
        let occurrence = self.build_into(&mut graph, None);
        NormGraph { graph, occurrence }
    }

    /// Adds one occurrence to `graph`, reading `source` when given.
    pub fn build_into(&self, graph: &mut DataflowGraph, source: Option<TensorId>) -> NormOccurrence {
        let stat_dims: Vec<usize> = {
            let rank = self.dims.len() as i32;
            let mut dims = self.dims.clone();
            for axis in &self.axes {
                let axis = if *axis < 0 { axis + rank } else { *axis };
                dims[axis as usize] = 1;
            }
            dims
        };
        let scaled_dims = broadcast_dims(&stat_dims, &self.gamma_dims);
        let shift_dims = broadcast_dims(&self.beta_dims, &scaled_dims);

        let x = source.unwrap_or_else(|| add_tensor(graph, &self.dims, TensorRole::Input));
        let other = self
            .sub0_reads_other_input
            .then(|| add_tensor(graph, &self.dims, TensorRole::Input));

        let exponent = add_f32_constant(graph, &[], &[self.pow_exponent]).expect("exponent");
        let (eps_const, eps) = if self.eps_via_convert {
            let stored = graph
                .add_constant(
                    tensor_spec(DType::F16, &[1], TensorRole::Constant),
                    TensorData::from_f16(&[self.eps]),
                )
                .expect("f16 eps");
            let converted = add_tensor(graph, &[1], TensorRole::Transient);
            (stored, converted)
        } else {
            let eps = add_f32_constant(graph, &[1], &[self.eps]).expect("eps");
            (eps, eps)
        };
        let gamma = add_f32_constant(graph, &self.gamma_dims, &self.gamma).expect("gamma");
        let beta = add_f32_constant(graph, &self.beta_dims, &self.beta).expect("beta");

        let mut outputs: HashMap<Step, TensorId> = HashMap::new();
        for step in Step::ALL {
            if self.bypass == Some(step) {
                continue;
            }
            let dims = match step {
                Step::Mean0 | Step::Mean1 | Step::Add0 | Step::Rsqrt => stat_dims.clone(),
                Step::Mul0 | Step::Mul2 => scaled_dims.clone(),
                Step::Sub1 => shift_dims.clone(),
                _ => self.dims.clone(),
            };
            let role = if step == Step::Add1 || self.export == Some(step) {
                TensorRole::Output
            } else {
                TensorRole::Transient
            };
            outputs.insert(step, add_tensor(graph, &dims, role));
        }
        let out = |step: Step| -> TensorId {
            match (self.bypass, step) {
                (Some(Step::Pow), Step::Pow) => outputs[&Step::Sub0],
                (Some(Step::Rsqrt), Step::Rsqrt) => outputs[&Step::Add0],
                _ => outputs[&step],
            }
        };

        let order: &[Step] = if self.swap_branch_order {
            &[
                Step::Mean0,
                Step::Mul2,
                Step::Sub0,
                Step::Pow,
                Step::Mean1,
                Step::Add0,
                Step::Rsqrt,
                Step::Mul0,
                Step::Mul1,
                Step::Sub1,
                Step::Add1,
            ]
        } else {
            &Step::ALL
        };

        let mut ops = HashMap::new();
        if self.eps_via_convert {
            graph
                .add_operator(OpKind::DataConvert, &[eps_const], &[eps], OpParams::None)
                .expect("convert eps");
        }
        for step in order.iter().copied() {
            if self.bypass == Some(step) {
                continue;
            }
            let (kind, inputs, params) = match step {
                Step::Mean0 => (OpKind::Reduce, vec![x], reduce_mean(&self.axes)),
                Step::Sub0 => (
                    OpKind::Subtract,
                    vec![other.unwrap_or(x), out(Step::Mean0)],
                    OpParams::None,
                ),
                Step::Pow => (OpKind::Pow, vec![out(Step::Sub0), exponent], OpParams::None),
                Step::Mean1 => (
                    OpKind::Reduce,
                    vec![out(Step::Pow)],
                    self.mean1_params
                        .clone()
                        .unwrap_or_else(|| reduce_mean(&self.axes)),
                ),
                Step::Add0 => (OpKind::Add, vec![out(Step::Mean1), eps], OpParams::None),
                Step::Rsqrt => (OpKind::Rsqrt, vec![out(Step::Add0)], OpParams::None),
                Step::Mul0 => (
                    OpKind::Multiply,
                    vec![out(Step::Rsqrt), gamma],
                    OpParams::None,
                ),
                Step::Mul1 => (OpKind::Multiply, vec![x, out(Step::Mul0)], OpParams::None),
                Step::Mul2 => (
                    OpKind::Multiply,
                    vec![out(Step::Mean0), out(Step::Mul0)],
                    OpParams::None,
                ),
                Step::Sub1 => (OpKind::Subtract, vec![beta, out(Step::Mul2)], OpParams::None),
                Step::Add1 => (
                    OpKind::Add,
                    vec![out(Step::Mul1), out(Step::Sub1)],
                    OpParams::None,
                ),
            };
            let kind = match self.substitute {
                Some((target, replacement)) if target == step => replacement,
                _ => kind,
            };
            let id = graph
                .add_operator(kind, &inputs, &[out(step)], params)
                .expect("add pattern operator");
            ops.insert(step, id);
        }

        let extra = self.extra_consumer.map(|step| {
            let tapped = out(step);
            let dims = graph.tensor(tapped).expect("tapped").shape().dims().to_vec();
            let side = add_tensor(graph, &dims, TensorRole::Output);
            graph
                .add_operator(OpKind::Relu, &[tapped], &[side], OpParams::None)
                .expect("extra consumer")
        });

        NormOccurrence {
            x,
            y: outputs[&Step::Add1],
            gamma,
            beta,
            eps: eps_const,
            ops,
            extra,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NormOccurrence {
    pub x: TensorId,
    pub y: TensorId,
    pub gamma: TensorId,
    pub beta: TensorId,
    pub eps: TensorId,
    pub ops: HashMap<Step, OpId>,
    pub extra: Option<OpId>,
}

impl NormOccurrence {
    pub fn op(&self, step: Step) -> OpId {
        self.ops[&step]
    }
}

pub struct NormGraph {
    pub graph: DataflowGraph,
    pub occurrence: NormOccurrence,
}

pub fn add_tensor(graph: &mut DataflowGraph, dims: &[usize], role: TensorRole) -> TensorId {
    graph.add_tensor(tensor_spec(DType::F32, dims, role))
}

/// Right-aligned numpy broadcast of two shapes.
pub fn broadcast_dims(lhs: &[usize], rhs: &[usize]) -> Vec<usize> {
    let rank = lhs.len().max(rhs.len());
    let pad = |dims: &[usize]| {
        let mut padded = vec![1; rank - dims.len()];
        padded.extend_from_slice(dims);
        padded
    };
    pad(lhs)
        .into_iter()
        .zip(pad(rhs))
        .map(|(a, b)| if a == 1 { b } else { a })
        .collect()
}

/// Kinds of the live operators, in insertion order.
pub fn live_kinds(graph: &DataflowGraph) -> Vec<OpKind> {
    graph.operators().map(|(_, op)| op.kind()).collect()
}

pub fn count_kind(graph: &DataflowGraph, kind: OpKind) -> usize {
    graph.operators().filter(|(_, op)| op.kind() == kind).count()
}

/// Deterministic pseudo-random values in `[-2, 2)`.
pub fn seeded_values(seed: u64, len: usize) -> Vec<f32> {
    use rand::{rngs::StdRng, Rng, SeedableRng};
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen_range(-2.0f32..2.0)).collect()
}
