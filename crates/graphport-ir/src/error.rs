use graphport_core::TensorType;

use crate::OpKind;

/// A node that could not be typed, and why.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pending {
    pub node: String,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum IrError {
    #[error("invalid graph `{graph}`: {msg}")]
    InvalidGraph { graph: String, msg: String },

    #[error("shape inference failed at node `{node}` ({kind}): {msg}")]
    Inference {
        node: String,
        kind: OpKind,
        msg: String,
    },

    #[error("graph output `{output}` is declared {declared} but inferred {inferred}")]
    OutputMismatch {
        output: String,
        declared: TensorType,
        inferred: TensorType,
    },

    #[error("shape inference stalled after {passes} passes; unresolved: {}", describe(pending))]
    Stalled { passes: usize, pending: Vec<Pending> },

    #[error("lowering failed at node `{node}` ({kind}): {msg}")]
    Lowering {
        node: String,
        kind: OpKind,
        msg: String,
    },
}

fn describe(pending: &[Pending]) -> String {
    pending
        .iter()
        .map(|p| format!("`{}` ({})", p.node, p.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, IrError>;
