use crate::{DType, Shape};

/// Failures raised by descriptors and the artifact container.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Buffer sizing overflowed or the allocator refused the reservation.
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// A shape/stride pairing addresses memory past the end of the buffer.
    #[error("element offset {offset} lies outside a buffer of {extent} elements")]
    ExtentOutOfBounds { offset: usize, extent: usize },

    #[error("stride count {strides} does not match rank {rank}")]
    StrideRankMismatch { rank: usize, strides: usize },

    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },

    #[error("unknown dtype `{0}`")]
    UnknownDType(String),

    #[error("invalid artifact: {0}")]
    InvalidArtifact(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
