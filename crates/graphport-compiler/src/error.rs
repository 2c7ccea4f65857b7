use std::fmt;

use graphport_ir::IrError;

/// Why a compilation attempt ended in `Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    InvalidGraph,
    Inference,
    ShapeInferenceStalled,
    Lowering,
    Codegen,
    ArtifactCollision,
    Io,
    /// A step was called in a state that does not precede it.
    OutOfOrder,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::InvalidGraph => "invalid graph",
            FailureKind::Inference => "inference error",
            FailureKind::ShapeInferenceStalled => "shape inference stalled",
            FailureKind::Lowering => "lowering error",
            FailureKind::Codegen => "codegen error",
            FailureKind::ArtifactCollision => "artifact collision",
            FailureKind::Io => "i/o error",
            FailureKind::OutOfOrder => "step out of order",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    ShapeInference,
    Lowering,
    Codegen,
    Emit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::ShapeInference => "shape inference",
            Phase::Lowering => "lowering",
            Phase::Codegen => "codegen",
            Phase::Emit => "emit",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("{phase} failed ({kind}): {msg}")]
pub struct CompileError {
    pub phase: Phase,
    pub kind: FailureKind,
    pub msg: String,
}

impl CompileError {
    pub fn new(phase: Phase, kind: FailureKind, msg: impl Into<String>) -> Self {
        Self {
            phase,
            kind,
            msg: msg.into(),
        }
    }

    pub(crate) fn from_ir(phase: Phase, err: IrError) -> Self {
        let kind = match &err {
            IrError::InvalidGraph { .. } => FailureKind::InvalidGraph,
            IrError::Inference { .. } | IrError::OutputMismatch { .. } => FailureKind::Inference,
            IrError::Stalled { .. } => FailureKind::ShapeInferenceStalled,
            IrError::Lowering { .. } => FailureKind::Lowering,
        };
        Self::new(phase, kind, err.to_string())
    }
}
