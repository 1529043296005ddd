//! Constant tensor payloads and their conversion to dense `f32` buffers.

use std::sync::Arc;

use half::{bf16, f16};
use thiserror::Error;

use super::spec::{DType, TensorSpec};

/// Dense little-endian payload backing a constant tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorData {
    bytes: Arc<[u8]>,
}

impl TensorData {
    pub fn new(bytes: Arc<[u8]>) -> Self {
        Self { bytes }
    }

    pub fn from_f32(values: &[f32]) -> Self {
        Self::new(f32_to_bytes(values))
    }

    pub fn from_f16(values: &[f32]) -> Self {
        let mut bytes = Vec::with_capacity(values.len() * 2);
        for &value in values {
            bytes.extend_from_slice(&f16::from_f32(value).to_le_bytes());
        }
        Self::new(Arc::from(bytes.into_boxed_slice()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}

/// Errors raised while reading constant tensor payloads.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DataError {
    #[error("tensor is not a constant")]
    NotConstant,
    #[error("constant tensor has no backing data")]
    MissingPayload,
    #[error("payload is {actual} bytes but the tensor spec requires {expected}")]
    ByteLength { expected: usize, actual: usize },
    #[error("element count overflows for shape {shape}")]
    Overflow { shape: String },
}

/// Checks that `data` has exactly the byte length `spec` requires.
pub fn check_payload(spec: &TensorSpec, data: &TensorData) -> Result<(), DataError> {
    let expected = spec.byte_len().ok_or_else(|| DataError::Overflow {
        shape: spec.shape.to_string(),
    })?;
    if data.byte_len() != expected {
        return Err(DataError::ByteLength {
            expected,
            actual: data.byte_len(),
        });
    }
    Ok(())
}

/// Decodes a payload into dense `f32` values regardless of storage precision.
///
/// Integer payloads are dequantized when the tensor spec carries affine quantization
/// parameters and cast otherwise.
pub fn decode_f32(spec: &TensorSpec, data: &TensorData) -> Result<Vec<f32>, DataError> {
    check_payload(spec, data)?;
    let bytes = data.as_bytes();
    let values = match spec.dtype {
        DType::F32 => bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
        DType::F64 => bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw) as f32
            })
            .collect(),
        DType::F16 => bytes
            .chunks_exact(2)
            .map(|chunk| f16::from_le_bytes([chunk[0], chunk[1]]).to_f32())
            .collect(),
        DType::Bf16 => bytes
            .chunks_exact(2)
            .map(|chunk| bf16::from_le_bytes([chunk[0], chunk[1]]).to_f32())
            .collect(),
        DType::Si8 => dequantize(spec, bytes.iter().map(|&b| b as i8 as i32)),
        DType::Ui8 => dequantize(spec, bytes.iter().map(|&b| b as i32)),
        DType::Si32 => dequantize(
            spec,
            bytes
                .chunks_exact(4)
                .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])),
        ),
    };
    Ok(values)
}

fn dequantize(spec: &TensorSpec, stored: impl Iterator<Item = i32>) -> Vec<f32> {
    match spec.quantization {
        Some(quant) => stored
            .map(|q| (q - quant.zero_point) as f32 * quant.scale)
            .collect(),
        None => stored.map(|q| q as f32).collect(),
    }
}

/// Encodes `values` as little-endian `f32` bytes.
pub fn f32_to_bytes(values: &[f32]) -> Arc<[u8]> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for &value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    Arc::from(bytes.into_boxed_slice())
}
