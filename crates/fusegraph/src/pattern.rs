//! Building blocks for anchor-driven subgraph matching.
//!
//! A pattern is seeded at an operator of its anchor kind and grows a
//! positional [`Candidate`] by walking the consumer index. Helpers here only
//! read the graph; any `None` they return is a match-miss, not an error.

use smallvec::SmallVec;

use crate::graph::{DataflowGraph, GraphError, OpId, OpKind, TensorId};
use crate::rewriter::GraphRewriter;

/// Base trait for rewrite patterns anchored at one operator kind.
pub trait Pattern: Send + Sync {
    fn name(&self) -> &'static str;

    /// Kind of the operators the driver offers to [`Pattern::match_and_rewrite`].
    fn anchor(&self) -> OpKind;

    /// Attempts to match at `root` and rewrite the occurrence.
    ///
    /// Returns `Ok(false)` on a match-miss. An `Err` is an invariant violation
    /// raised while rewriting and aborts the whole pass.
    fn match_and_rewrite(
        &self,
        root: OpId,
        rewriter: &mut GraphRewriter,
    ) -> Result<bool, GraphError>;
}

/// Ordered, in-progress list of operators believed to form one occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    ops: SmallVec<[OpId; 16]>,
}

impl Candidate {
    pub fn new(anchor: OpId) -> Self {
        let mut ops = SmallVec::new();
        ops.push(anchor);
        Self { ops }
    }

    pub fn push(&mut self, op: OpId) {
        self.ops.push(op);
    }

    /// Returns the operator recorded at `position`.
    ///
    /// # Panics
    /// Panics when `position` has not been filled yet; positions are fixed by
    /// the pattern, so this is a pattern-definition bug.
    pub fn at(&self, position: usize) -> OpId {
        self.ops[position]
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn as_slice(&self) -> &[OpId] {
        &self.ops
    }
}

/// Returns the consumers of `op`'s only output.
///
/// `None` when `op` is not live or writes more than one tensor.
pub fn output_consumers(graph: &DataflowGraph, op: OpId) -> Option<&[OpId]> {
    let output = graph.operator(op)?.single_output()?;
    Some(graph.consumers_of(output))
}

/// Single-successor step: `op`'s output must feed exactly one operator, of `kind`.
pub fn expect_successor(graph: &DataflowGraph, op: OpId, kind: OpKind) -> Option<OpId> {
    match output_consumers(graph, op)? {
        [next] if graph.kind_of(*next) == Some(kind) => Some(*next),
        _ => None,
    }
}

/// Branch step: `op`'s output must feed exactly two operators, one of each kind.
///
/// The pair is returned in canonical order (the `first`-kind operator first),
/// whatever order the consumer index holds them in. Extra consumers are a
/// cardinality mismatch. `first` and `second` must differ; same-kind
/// branches are split by identity with [`other_consumer`].
pub fn expect_branch(
    graph: &DataflowGraph,
    op: OpId,
    first: OpKind,
    second: OpKind,
) -> Option<(OpId, OpId)> {
    debug_assert_ne!(first, second, "same-kind branches need other_consumer");
    let [a, b] = output_consumers(graph, op)? else {
        return None;
    };
    let kinds = (graph.kind_of(*a)?, graph.kind_of(*b)?);
    if kinds == (first, second) {
        Some((*a, *b))
    } else if kinds == (second, first) {
        Some((*b, *a))
    } else {
        None
    }
}

/// Same-kind branch step: `op`'s output must feed exactly two operators of
/// `kind`, one of which is `known`; returns the other one.
///
/// Finding `known` among the consumers proves the two branches reconverge
/// through this tensor rather than merely repeating the same kind sequence.
pub fn other_consumer(graph: &DataflowGraph, op: OpId, kind: OpKind, known: OpId) -> Option<OpId> {
    let [a, b] = output_consumers(graph, op)? else {
        return None;
    };
    if graph.kind_of(*a) != Some(kind) || graph.kind_of(*b) != Some(kind) {
        return None;
    }
    if *a == known {
        Some(*b)
    } else if *b == known {
        Some(*a)
    } else {
        None
    }
}

/// Multi-way intersection of the input tensor lists of `ops`.
pub fn shared_inputs(graph: &DataflowGraph, ops: &[OpId]) -> SmallVec<[TensorId; 2]> {
    let mut lists = ops.iter().map(|op| {
        let mut inputs: SmallVec<[TensorId; 4]> = graph
            .operator(*op)
            .map(|operator| SmallVec::from_slice(operator.inputs()))
            .unwrap_or_default();
        inputs.sort_unstable();
        inputs.dedup();
        inputs
    });
    let Some(first) = lists.next() else {
        return SmallVec::new();
    };
    let mut shared: SmallVec<[TensorId; 2]> = first.into_iter().collect();
    for inputs in lists {
        shared.retain(|tensor| inputs.binary_search(tensor).is_ok());
    }
    shared
}

/// Returns the operand of the binary operator `op` that `other_producer` did not write.
///
/// `None` unless `op` has exactly two inputs and exactly one of them comes from
/// `other_producer`.
pub fn operand_besides(graph: &DataflowGraph, op: OpId, other_producer: OpId) -> Option<TensorId> {
    let [lhs, rhs] = graph.operator(op)?.inputs() else {
        return None;
    };
    let from_lhs = graph.producer_of(*lhs) == Some(other_producer);
    let from_rhs = graph.producer_of(*rhs) == Some(other_producer);
    match (from_lhs, from_rhs) {
        (true, false) => Some(*rhs),
        (false, true) => Some(*lhs),
        _ => None,
    }
}

/// Resolves a tensor to the constant carrying its value.
///
/// A constant resolves to itself. A tensor written by a [`OpKind::DataConvert`]
/// with one input and one output resolves to that input when it is constant.
/// Any other producer changes the value and does not resolve.
pub fn resolve_constant(graph: &DataflowGraph, tensor: TensorId) -> Option<TensorId> {
    if graph.tensor(tensor)?.is_constant() {
        return Some(tensor);
    }
    let producer = graph.operator(graph.producer_of(tensor)?)?;
    if producer.kind() != OpKind::DataConvert {
        return None;
    }
    producer.single_output()?;
    let [source] = producer.inputs() else {
        return None;
    };
    graph
        .tensor(*source)
        .filter(|t| t.is_constant())
        .map(|_| *source)
}
