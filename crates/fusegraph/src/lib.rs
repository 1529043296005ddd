//! Dataflow graph model with a fusion pass collapsing primitive mean/stddev
//! normalization chains into single normalization operators.

pub mod driver;
mod env;
pub mod graph;
pub mod optimizer;
pub mod passes;
pub mod pattern;
pub mod rewriter;

pub use graph::{
    DType, DataflowGraph, GraphError, OpId, OpKind, OpParams, Operator, Shape, Tensor, TensorData,
    TensorId, TensorRole, TensorSpec,
};
pub use optimizer::{FusionConfig, GraphPass, PassPipeline, PassResult};
pub use passes::{fuse_mean_stddev_normalization, MeanStdDevNormalizationFusion};
