use thiserror::Error;

use super::data::DataError;
use super::spec::OpKind;
use super::{OpId, TensorId};

/// Invariant violations raised by graph mutation primitives.
///
/// None of these describe a property of the input graph: they mean a caller
/// broke the producer/consumer bookkeeping, and a graph that produced one must
/// not be compiled.
#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("operator {op} is not live")]
    StaleOperator { op: OpId },
    #[error("tensor {tensor} is not live")]
    StaleTensor { tensor: TensorId },
    #[error("tensor {tensor} already has producer {producer}")]
    OutputAlreadyProduced { tensor: TensorId, producer: OpId },
    #[error("constant tensor {tensor} cannot be an operator output")]
    ConstantProduced { tensor: TensorId },
    #[error("graph input {tensor} cannot be an operator output")]
    InputProduced { tensor: TensorId },
    #[error("parameter block does not belong to operator kind {kind}")]
    ParamsKindMismatch { kind: OpKind },
    #[error("tensor {tensor} is still referenced by the graph")]
    TensorInUse { tensor: TensorId },
    #[error("operator {op} does not read tensor {tensor}")]
    InputNotFound { op: OpId, tensor: TensorId },
    #[error("tensor {tensor} has no producer")]
    MissingProducer { tensor: TensorId },
    #[error("constant tensor {tensor}: {source}")]
    ConstantData {
        tensor: TensorId,
        #[source]
        source: DataError,
    },
    #[error("producer/consumer index disagrees with operator lists at tensor {tensor}")]
    IndexMismatch { tensor: TensorId },
}
