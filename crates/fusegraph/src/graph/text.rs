//! Human-readable dump of a graph.
//!
//! ```text
//! %t0: f32[1, 8] input
//! %t1: f32[1, 1] transient
//! op0 = reduce(mean, axes=[1], keep_dims) %t0 -> %t1
//! ```

use std::fmt;

use super::{DataflowGraph, OpParams, Operator, TensorId};

impl fmt::Display for DataflowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, tensor) in self.tensors() {
            write!(
                f,
                "{id}: {}{} {}",
                tensor.spec.dtype.name(),
                tensor.spec.shape,
                tensor.role().name()
            )?;
            if let Some(quant) = tensor.spec.quantization {
                write!(f, " quant(scale={}, zp={})", quant.scale, quant.zero_point)?;
            }
            writeln!(f)?;
        }
        for (id, op) in self.operators() {
            writeln!(f, "{id} = {}", OperatorText(op))?;
        }
        Ok(())
    }
}

struct OperatorText<'a>(&'a Operator);

impl fmt::Display for OperatorText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = self.0;
        write!(f, "{}", op.kind())?;
        match op.params() {
            OpParams::None => {}
            OpParams::Reduce(params) => {
                write!(f, "({}, axes={:?}", params.kind.name(), params.axes.as_slice())?;
                if params.keep_dims {
                    write!(f, ", keep_dims")?;
                }
                write!(f, ")")?;
            }
            OpParams::LayerNorm(params) => {
                write!(f, "(axis={}, eps={:e})", params.axis, params.eps)?;
            }
            OpParams::InstanceNorm(params) => {
                write!(f, "(eps={:e}, layout={:?})", params.eps, params.layout)?;
            }
        }
        write_list(f, " ", op.inputs())?;
        write_list(f, " -> ", op.outputs())
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, lead: &str, tensors: &[TensorId]) -> fmt::Result {
    f.write_str(lead)?;
    for (idx, tensor) in tensors.iter().enumerate() {
        if idx > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{tensor}")?;
    }
    Ok(())
}
