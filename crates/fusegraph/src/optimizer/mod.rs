//! Pass infrastructure run between graph construction and compilation.

mod config;

use tracing::debug;

use crate::graph::{DataflowGraph, GraphError};

pub use config::FusionConfig;

/// Result returned by a [`GraphPass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the graph.
    pub changed: bool,
    /// Total number of pattern occurrences rewritten.
    pub rewrites_applied: usize,
    /// Operators removed, including orphaned producers swept after a rewrite.
    pub erased_ops: usize,
    /// Tensors unregistered after losing every reference.
    pub erased_tensors: usize,
    /// Operators created by rewrites.
    pub created_ops: usize,
}

impl PassResult {
    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
            erased_ops: self.erased_ops + other.erased_ops,
            erased_tensors: self.erased_tensors + other.erased_tensors,
            created_ops: self.created_ops + other.created_ops,
        }
    }
}

/// A transformation over a whole graph.
///
/// An `Err` means the graph's invariants can no longer be trusted; callers
/// must not compile it.
pub trait GraphPass: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, graph: &mut DataflowGraph) -> Result<PassResult, GraphError>;
}

/// Ordered list of passes applied once each.
#[derive(Default)]
pub struct PassPipeline {
    passes: Vec<Box<dyn GraphPass>>,
}

impl PassPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<P>(&mut self, pass: P) -> &mut Self
    where
        P: GraphPass + 'static,
    {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn run(&self, graph: &mut DataflowGraph) -> Result<PassResult, GraphError> {
        let mut total = PassResult::default();
        for pass in &self.passes {
            let result = pass.run(graph)?;
            debug!(
                pass = pass.name(),
                changed = result.changed,
                rewrites = result.rewrites_applied,
                "pass finished"
            );
            total = total.merge(result);
        }
        Ok(total)
    }
}
