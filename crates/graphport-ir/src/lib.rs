//! # graphport-ir
//!
//! Operator graph, per-operator shape/type inference and lowering into the
//! primitive instruction set.
//
//   Graph ──► validate ──► infer_graph ──► lower_graph ──► LoweredGraph
//
// Every operator kind is a variant of the closed `OpKind` enum; its
// behaviour lives behind the `OpRule` trait in `ops/`.

pub mod error;
pub mod graph;
pub mod infer;
pub mod lower;
pub mod ops;

pub use error::{IrError, Pending, Result};
pub use graph::{AttrValue, Attrs, Graph, Node, OutputSpec};
pub use infer::{infer, infer_graph, Inference, InferredTypes};
pub use lower::{
    lower_graph, lower_node, LowerCtx, LoweredGraph, LoweredOp, LoweredValue, NodeLowering,
    ValueId,
};
pub use ops::category::CategorySentinels;
pub use ops::{Arity, OpKind, OpRule};
