//! Reference `f32` evaluator for fusegraph dataflow graphs.

pub mod cpu;

pub use cpu::{execute_graph, CpuError, CpuTensor};
