//! Fuses the primitive-operator expansion of mean/stddev normalization.
//!
//! ```text
//!          x
//!        / | \
//!       /  |  Mean0
//!      |   |  /  |
//!      |  Sub0   |
//!      |   |     |
//!      |  Pow    |
//!      |   |     |
//!      |  Mean1  |
//!      |   |     |
//!      |  Add0 (+eps)
//!      |   |     |
//!      |  Rsqrt  |
//!      |   |     |
//!      |  Mul0 (*gamma)
//!      |  /  \   |
//!     Mul1    Mul2
//!      |       |
//!      |     Sub1 (beta - Mul2)
//!       \     /
//!        Add1
//!         |
//!         y
//! ```
//!
//! A single reduced axis becomes `LayerNormalization`; several spatial axes
//! of an NHWC tensor become `InstanceNormalization`.

use smallvec::SmallVec;
use tracing::{debug, debug_span, trace};

use crate::driver::{apply_pattern_once, DriverConfig};
use crate::graph::{
    DataLayout, DataflowGraph, GraphError, InstanceNormParams, LayerNormParams, OpId, OpKind,
    OpParams, Operator, ReduceKind, TensorId, TensorRole,
};
use crate::optimizer::{FusionConfig, GraphPass, PassResult};
use crate::pattern::{
    expect_branch, expect_successor, operand_besides, other_consumer, resolve_constant,
    shared_inputs, Candidate, Pattern,
};
use crate::rewriter::GraphRewriter;

const MEAN_0: usize = 0;
const SUB_0: usize = 1;
const MUL_2: usize = 2;
const POW: usize = 3;
const MEAN_1: usize = 4;
const ADD_0: usize = 5;
const RSQRT: usize = 6;
const MUL_0: usize = 7;
const MUL_1: usize = 8;
const ADD_1: usize = 9;
const SUB_1: usize = 10;
const PATTERN_LEN: usize = 11;

/// Reason a candidate was abandoned. Never surfaced to callers.
#[derive(Debug, Clone, Copy)]
struct MatchMiss(&'static str);

type MatchResult<T> = Result<T, MatchMiss>;

trait OrMiss<T> {
    fn or_miss(self, reason: &'static str) -> MatchResult<T>;
}

impl<T> OrMiss<T> for Option<T> {
    fn or_miss(self, reason: &'static str) -> MatchResult<T> {
        self.ok_or(MatchMiss(reason))
    }
}

fn ensure(condition: bool, reason: &'static str) -> MatchResult<()> {
    if condition {
        Ok(())
    } else {
        Err(MatchMiss(reason))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Replacement {
    LayerNorm { axis: usize },
    InstanceNorm,
}

/// Everything the rewrite needs, gathered before the graph is touched.
#[derive(Debug)]
struct FusionPlan {
    candidate: Candidate,
    source: TensorId,
    output: TensorId,
    replacement: Replacement,
    eps: f32,
    param_dims: Vec<usize>,
    gamma: Vec<f32>,
    beta: Vec<f32>,
}

/// Walks the consumer index from `root` and fills all eleven positions.
fn match_structure(graph: &DataflowGraph, root: OpId) -> MatchResult<Candidate> {
    let mut candidate = Candidate::new(root);

    let (sub0, mul2) = expect_branch(graph, root, OpKind::Subtract, OpKind::Multiply)
        .or_miss("mean0 must feed exactly one subtract and one multiply")?;
    candidate.push(sub0);
    candidate.push(mul2);

    let pow = expect_successor(graph, sub0, OpKind::Pow).or_miss("sub0 must feed a single pow")?;
    candidate.push(pow);
    let mean1 =
        expect_successor(graph, pow, OpKind::Reduce).or_miss("pow must feed a single reduce")?;
    candidate.push(mean1);
    let add0 =
        expect_successor(graph, mean1, OpKind::Add).or_miss("mean1 must feed a single add")?;
    candidate.push(add0);
    let rsqrt =
        expect_successor(graph, add0, OpKind::Rsqrt).or_miss("add0 must feed a single rsqrt")?;
    candidate.push(rsqrt);
    let mul0 = expect_successor(graph, rsqrt, OpKind::Multiply)
        .or_miss("rsqrt must feed a single multiply")?;
    candidate.push(mul0);

    let mul1 = other_consumer(graph, mul0, OpKind::Multiply, mul2)
        .or_miss("mul0 must feed mul2 and exactly one other multiply")?;
    candidate.push(mul1);

    ensure(
        !shared_inputs(graph, &[root, sub0, mul1]).is_empty(),
        "mean0, sub0 and mul1 share no input tensor",
    )?;

    let add1 =
        expect_successor(graph, mul1, OpKind::Add).or_miss("mul1 must feed a single add")?;
    candidate.push(add1);
    let sub1 = expect_successor(graph, mul2, OpKind::Subtract)
        .or_miss("mul2 must feed a single subtract")?;
    candidate.push(sub1);

    ensure(
        expect_successor(graph, sub1, OpKind::Add) == Some(add1),
        "sub1 must feed add1 and nothing else",
    )?;

    debug_assert_eq!(candidate.len(), PATTERN_LEN);
    Ok(candidate)
}

/// Checks operand roles and constants of a structural match and extracts the
/// fused operator's parameters.
fn plan_fusion(
    graph: &DataflowGraph,
    candidate: Candidate,
    config: &FusionConfig,
) -> MatchResult<FusionPlan> {
    let op = |position: usize| -> MatchResult<&Operator> {
        graph
            .operator(candidate.at(position))
            .or_miss("candidate operator is not live")
    };
    let out = |position: usize| -> MatchResult<TensorId> {
        op(position)?
            .single_output()
            .or_miss("candidate operator must write one tensor")
    };

    let [source] = op(MEAN_0)?.inputs() else {
        return Err(MatchMiss("mean0 must read one tensor"));
    };
    let source = *source;
    let source_dims = graph
        .tensor(source)
        .or_miss("source tensor is not live")?
        .shape()
        .dims()
        .to_vec();
    let rank = source_dims.len();

    let axes = mean_axes(op(MEAN_0)?, rank).or_miss("mean0 must be a keep-dims mean")?;
    let variance_axes = mean_axes(op(MEAN_1)?, rank).or_miss("mean1 must be a keep-dims mean")?;
    ensure(axes == variance_axes, "mean0 and mean1 reduce different axes")?;

    let mean = out(MEAN_0)?;
    ensure(
        same_operands(op(SUB_0)?.inputs(), source, mean),
        "sub0 must subtract mean0 from the source",
    )?;

    let [base, exponent] = op(POW)?.inputs() else {
        return Err(MatchMiss("pow must take two operands"));
    };
    ensure(*base == out(SUB_0)?, "pow must raise sub0")?;
    let exponent =
        scalar_constant(graph, *exponent).or_miss("pow exponent must be a scalar constant")?;
    ensure(exponent == 2.0, "pow exponent must be 2")?;
    ensure(op(MEAN_1)?.inputs() == [out(POW)?], "mean1 must read pow")?;

    let eps_tensor = operand_besides(graph, candidate.at(ADD_0), candidate.at(MEAN_1))
        .or_miss("add0 must add one operand to mean1")?;
    let eps = scalar_constant(graph, eps_tensor).or_miss("eps must be a scalar constant")?;
    ensure(op(RSQRT)?.inputs() == [out(ADD_0)?], "rsqrt must read add0")?;

    let gamma_tensor = operand_besides(graph, candidate.at(MUL_0), candidate.at(RSQRT))
        .or_miss("mul0 must scale rsqrt by one operand")?;
    let scaled = out(MUL_0)?;
    ensure(
        same_operands(op(MUL_1)?.inputs(), source, scaled),
        "mul1 must multiply the source by mul0",
    )?;
    ensure(
        same_operands(op(MUL_2)?.inputs(), mean, scaled),
        "mul2 must multiply mean0 by mul0",
    )?;
    let [beta_tensor, subtrahend] = op(SUB_1)?.inputs() else {
        return Err(MatchMiss("sub1 must take two operands"));
    };
    ensure(*subtrahend == out(MUL_2)?, "sub1 must subtract mul2 from beta")?;
    ensure(
        same_operands(op(ADD_1)?.inputs(), out(MUL_1)?, out(SUB_1)?),
        "add1 must sum mul1 and sub1",
    )?;
    let output = out(ADD_1)?;

    for position in (0..PATTERN_LEN).filter(|p| *p != ADD_1) {
        let role = graph.tensor(out(position)?).map(|t| t.role());
        ensure(
            role != Some(TensorRole::Output),
            "intermediate tensor is a graph output",
        )?;
    }

    let (replacement, param_axis) = select_replacement(&axes, rank, config)?;
    let extent = source_dims[param_axis];
    let gamma = param_values(graph, gamma_tensor, rank, param_axis, extent)
        .or_miss("gamma must be a constant along the parameter axis")?;
    let beta = param_values(graph, *beta_tensor, rank, param_axis, extent)
        .or_miss("beta must be a constant along the parameter axis")?;
    let mut param_dims = vec![1; rank];
    param_dims[param_axis] = extent;

    Ok(FusionPlan {
        candidate,
        source,
        output,
        replacement,
        eps,
        param_dims,
        gamma,
        beta,
    })
}

fn mean_axes(op: &Operator, rank: usize) -> Option<SmallVec<[usize; 4]>> {
    let reduce = op.params().reduce()?;
    if reduce.kind != ReduceKind::Mean || !reduce.keep_dims {
        return None;
    }
    let axes = reduce.normalized_axes(rank)?;
    (!axes.is_empty()).then_some(axes)
}

/// `true` when `operands` is exactly `{a, b}` in either order.
fn same_operands(operands: &[TensorId], a: TensorId, b: TensorId) -> bool {
    operands == [a, b] || operands == [b, a]
}

/// Picks the fused kind from the reduced axes; returns it with the axis the
/// scale and shift vectors run along.
fn select_replacement(
    axes: &[usize],
    rank: usize,
    config: &FusionConfig,
) -> MatchResult<(Replacement, usize)> {
    if let [axis] = axes {
        ensure(config.enable_layer_norm, "layer normalization fusion disabled")?;
        return Ok((Replacement::LayerNorm { axis: *axis }, *axis));
    }
    ensure(
        config.enable_instance_norm,
        "instance normalization fusion disabled",
    )?;
    ensure(
        rank >= 3 && axes.iter().copied().eq(1..rank - 1),
        "multi-axis mean must cover exactly the NHWC spatial axes",
    )?;
    Ok((Replacement::InstanceNorm, DataLayout::Nhwc.channel_axis(rank)))
}

fn scalar_constant(graph: &DataflowGraph, tensor: TensorId) -> Option<f32> {
    let constant = resolve_constant(graph, tensor)?;
    match graph.constant_f32(constant).ok()?.as_slice() {
        [value] => Some(*value),
        _ => None,
    }
}

/// Reads a scale/shift constant as one value per element of `axis`.
///
/// The constant's shape, right-aligned against the source rank, must be 1 on
/// every other axis. A single element is broadcast across the extent.
fn param_values(
    graph: &DataflowGraph,
    tensor: TensorId,
    rank: usize,
    axis: usize,
    extent: usize,
) -> Option<Vec<f32>> {
    let constant = resolve_constant(graph, tensor)?;
    let dims = graph.tensor(constant)?.shape().dims();
    let offset = rank.checked_sub(dims.len())?;
    let along_other_axes = dims
        .iter()
        .enumerate()
        .any(|(idx, dim)| offset + idx != axis && *dim != 1);
    if along_other_axes {
        return None;
    }
    let values = graph.constant_f32(constant).ok()?;
    match values.len() {
        1 => Some(vec![values[0]; extent]),
        len if len == extent => Some(values),
        _ => None,
    }
}

/// Replaces the matched operators with one fused operator.
///
/// Runs only after [`plan_fusion`] succeeded; any error here is an invariant
/// violation.
fn rewrite(rewriter: &mut GraphRewriter, plan: FusionPlan) -> Result<OpId, GraphError> {
    let removed = rewriter.erase_ops(plan.candidate.as_slice())?;
    let touched = removed
        .iter()
        .flat_map(|op| op.inputs().iter().chain(op.outputs()).copied())
        .collect::<Vec<_>>();
    rewriter.sweep_dead_tensors(touched, &[plan.source, plan.output])?;

    let beta = rewriter.materialize_f32_constant(&plan.param_dims, &plan.beta)?;
    let gamma = rewriter.materialize_f32_constant(&plan.param_dims, &plan.gamma)?;
    let (kind, params) = match plan.replacement {
        Replacement::LayerNorm { axis } => (
            OpKind::LayerNormalization,
            OpParams::LayerNorm(LayerNormParams {
                axis,
                eps: plan.eps,
            }),
        ),
        Replacement::InstanceNorm => (
            OpKind::InstanceNormalization,
            OpParams::InstanceNorm(InstanceNormParams {
                eps: plan.eps,
                layout: DataLayout::Nhwc,
            }),
        ),
    };
    rewriter.insert_op(kind, &[plan.source, beta, gamma], &[plan.output], params)
}

struct NormalizationPattern {
    config: FusionConfig,
}

impl Pattern for NormalizationPattern {
    fn name(&self) -> &'static str {
        "mean-stddev-normalization"
    }

    fn anchor(&self) -> OpKind {
        OpKind::Reduce
    }

    fn match_and_rewrite(
        &self,
        root: OpId,
        rewriter: &mut GraphRewriter,
    ) -> Result<bool, GraphError> {
        let graph = rewriter.graph();
        let plan = match match_structure(graph, root)
            .and_then(|candidate| plan_fusion(graph, candidate, &self.config))
        {
            Ok(plan) => plan,
            Err(MatchMiss(reason)) => {
                trace!(anchor = %root, reason, "normalization candidate abandoned");
                return Ok(false);
            }
        };
        let replacement = plan.replacement;
        let fused = rewrite(rewriter, plan)?;
        debug!(anchor = %root, fused = %fused, ?replacement, "fused mean/stddev normalization");
        Ok(true)
    }
}

/// Graph pass fusing every mean/stddev normalization occurrence.
pub struct MeanStdDevNormalizationFusion {
    config: FusionConfig,
}

impl MeanStdDevNormalizationFusion {
    const NAME: &'static str = "mean-stddev-normalization-fusion";

    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }
}

impl Default for MeanStdDevNormalizationFusion {
    fn default() -> Self {
        Self::new(FusionConfig::from_env())
    }
}

impl GraphPass for MeanStdDevNormalizationFusion {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut DataflowGraph) -> Result<PassResult, GraphError> {
        if !self.config.enabled {
            debug!(pass = Self::NAME, "pass disabled");
            return Ok(PassResult::default());
        }
        let span = debug_span!("graph_pass", pass = Self::NAME);
        let _guard = span.enter();

        let pattern = NormalizationPattern {
            config: self.config,
        };
        let driver = DriverConfig {
            verify_each_rewrite: self.config.verify_rewrites,
        };
        let stats = apply_pattern_once(graph, &pattern, &driver)?;
        Ok(PassResult {
            changed: stats.applied > 0,
            rewrites_applied: stats.applied,
            erased_ops: stats.rewrite.erased_ops,
            erased_tensors: stats.rewrite.erased_tensors,
            created_ops: stats.rewrite.created_ops,
        })
    }
}

/// Runs mean/stddev normalization fusion over `graph` with the environment
/// configuration.
///
/// On `Ok` the graph is fully and validly rewritten (possibly unchanged). On
/// `Err` an invariant was violated and the graph must not be compiled.
pub fn fuse_mean_stddev_normalization(graph: &mut DataflowGraph) -> Result<PassResult, GraphError> {
    MeanStdDevNormalizationFusion::default().run(graph)
}
