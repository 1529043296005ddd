use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Scalar element types a tensor may be stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F16,
    Bf16,
    F32,
    F64,
    Si8,
    Ui8,
    Si32,
}

impl DType {
    /// Returns the storage size of a single element in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Si8 | DType::Ui8 => 1,
            DType::F16 | DType::Bf16 => 2,
            DType::F32 | DType::Si32 => 4,
            DType::F64 => 8,
        }
    }

    /// Returns `true` when the dtype is a floating-point representation.
    pub fn is_float(self) -> bool {
        matches!(self, DType::F16 | DType::Bf16 | DType::F32 | DType::F64)
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::F16 => "f16",
            DType::Bf16 => "bf16",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::Si8 => "si8",
            DType::Ui8 => "ui8",
            DType::Si32 => "si32",
        }
    }
}

/// Logical tensor shape as an ordered list of static extents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self { dims: dims.into() }
    }

    pub fn scalar() -> Self {
        Self { dims: Vec::new() }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the element count, or `None` on overflow.
    pub fn element_count(&self) -> Option<usize> {
        self.dims
            .iter()
            .try_fold(1usize, |count, dim| count.checked_mul(*dim))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (idx, dim) in self.dims.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{dim}")?;
        }
        write!(f, "]")
    }
}

/// Role a tensor plays in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TensorRole {
    /// Graph-level input; never produced by an operator.
    Input,
    /// Graph-level output; produced by exactly one operator.
    Output,
    /// Constant with backing data; never produced by an operator.
    Constant,
    /// Intermediate value flowing between operators.
    Transient,
}

impl TensorRole {
    pub fn name(self) -> &'static str {
        match self {
            TensorRole::Input => "input",
            TensorRole::Output => "output",
            TensorRole::Constant => "constant",
            TensorRole::Transient => "transient",
        }
    }
}

/// Asymmetric affine quantization: `real = (stored - zero_point) * scale`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineQuantization {
    pub scale: f32,
    pub zero_point: i32,
}

/// Tensor metadata coupling dtype, shape and role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: Shape,
    pub role: TensorRole,
    pub quantization: Option<AffineQuantization>,
}

impl TensorSpec {
    pub fn new(dtype: DType, shape: Shape, role: TensorRole) -> Self {
        Self {
            dtype,
            shape,
            role,
            quantization: None,
        }
    }

    pub fn with_quantization(mut self, quantization: AffineQuantization) -> Self {
        self.quantization = Some(quantization);
        self
    }

    pub fn element_count(&self) -> Option<usize> {
        self.shape.element_count()
    }

    /// Returns the byte length of a dense payload for this spec.
    pub fn byte_len(&self) -> Option<usize> {
        self.element_count()?.checked_mul(self.dtype.size_in_bytes())
    }

    pub fn is_constant(&self) -> bool {
        self.role == TensorRole::Constant
    }
}

/// Closed set of operator kinds understood by the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    Reduce,
    Add,
    Subtract,
    Multiply,
    Divide,
    Pow,
    Rsqrt,
    Sqrt,
    Neg,
    Relu,
    DataConvert,
    LayerNormalization,
    InstanceNormalization,
}

impl OpKind {
    pub fn name(self) -> &'static str {
        match self {
            OpKind::Reduce => "reduce",
            OpKind::Add => "add",
            OpKind::Subtract => "subtract",
            OpKind::Multiply => "multiply",
            OpKind::Divide => "divide",
            OpKind::Pow => "pow",
            OpKind::Rsqrt => "rsqrt",
            OpKind::Sqrt => "sqrt",
            OpKind::Neg => "neg",
            OpKind::Relu => "relu",
            OpKind::DataConvert => "data_convert",
            OpKind::LayerNormalization => "layer_normalization",
            OpKind::InstanceNormalization => "instance_normalization",
        }
    }

    /// Returns `true` for elementwise kinds taking two broadcastable operands.
    pub fn is_elementwise_binary(self) -> bool {
        matches!(
            self,
            OpKind::Add | OpKind::Subtract | OpKind::Multiply | OpKind::Divide | OpKind::Pow
        )
    }

    /// Returns `true` for elementwise kinds taking a single operand.
    pub fn is_elementwise_unary(self) -> bool {
        matches!(
            self,
            OpKind::Rsqrt | OpKind::Sqrt | OpKind::Neg | OpKind::Relu | OpKind::DataConvert
        )
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reduction families supported by [`OpKind::Reduce`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceKind {
    Mean,
    Sum,
    Max,
    Min,
}

impl ReduceKind {
    pub fn name(self) -> &'static str {
        match self {
            ReduceKind::Mean => "mean",
            ReduceKind::Sum => "sum",
            ReduceKind::Max => "max",
            ReduceKind::Min => "min",
        }
    }
}

/// Parameter block of [`OpKind::Reduce`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceParams {
    pub kind: ReduceKind,
    /// Reduced axes; negative values count from the last axis.
    pub axes: SmallVec<[i32; 4]>,
    pub keep_dims: bool,
}

impl ReduceParams {
    pub fn new(kind: ReduceKind, axes: &[i32], keep_dims: bool) -> Self {
        Self {
            kind,
            axes: SmallVec::from_slice(axes),
            keep_dims,
        }
    }

    pub fn mean(axes: &[i32]) -> Self {
        Self::new(ReduceKind::Mean, axes, true)
    }

    /// Resolves the axes against `rank`, returning them sorted and deduplicated.
    ///
    /// Returns `None` when any axis falls outside the tensor rank.
    pub fn normalized_axes(&self, rank: usize) -> Option<SmallVec<[usize; 4]>> {
        let mut axes = SmallVec::<[usize; 4]>::new();
        for &axis in &self.axes {
            let resolved = if axis < 0 {
                rank.checked_sub(axis.unsigned_abs() as usize)?
            } else {
                axis as usize
            };
            if resolved >= rank {
                return None;
            }
            axes.push(resolved);
        }
        axes.sort_unstable();
        axes.dedup();
        Some(axes)
    }
}

/// Memory layout of an instance-normalized activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataLayout {
    /// Channels last; spatial axes are `1..rank-1`.
    Nhwc,
    /// Channels second; spatial axes are `2..rank`.
    Nchw,
}

impl DataLayout {
    pub fn channel_axis(self, rank: usize) -> usize {
        match self {
            DataLayout::Nhwc => rank.saturating_sub(1),
            DataLayout::Nchw => 1,
        }
    }
}

/// Parameter block of [`OpKind::LayerNormalization`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerNormParams {
    pub axis: usize,
    pub eps: f32,
}

/// Parameter block of [`OpKind::InstanceNormalization`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstanceNormParams {
    pub eps: f32,
    pub layout: DataLayout,
}

/// Kind-specific parameter block attached to every operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpParams {
    None,
    Reduce(ReduceParams),
    LayerNorm(LayerNormParams),
    InstanceNorm(InstanceNormParams),
}

impl OpParams {
    /// Returns `true` when this parameter block is the one `kind` expects.
    pub fn belongs_to(&self, kind: OpKind) -> bool {
        match self {
            OpParams::None => !matches!(
                kind,
                OpKind::Reduce | OpKind::LayerNormalization | OpKind::InstanceNormalization
            ),
            OpParams::Reduce(_) => kind == OpKind::Reduce,
            OpParams::LayerNorm(_) => kind == OpKind::LayerNormalization,
            OpParams::InstanceNorm(_) => kind == OpKind::InstanceNormalization,
        }
    }

    pub fn reduce(&self) -> Option<&ReduceParams> {
        match self {
            OpParams::Reduce(params) => Some(params),
            _ => None,
        }
    }

    pub fn layer_norm(&self) -> Option<&LayerNormParams> {
        match self {
            OpParams::LayerNorm(params) => Some(params),
            _ => None,
        }
    }

    pub fn instance_norm(&self) -> Option<&InstanceNormParams> {
        match self {
            OpParams::InstanceNorm(params) => Some(params),
            _ => None,
        }
    }
}
