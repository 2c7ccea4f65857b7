//! Operator kinds and their inference/lowering rules.

pub mod category;
mod elementwise;
mod layout;
mod linalg;

use std::fmt;

use graphport_core::program::{BinaryFn, UnaryFn};
use graphport_core::{Dim, TensorType};
use serde::{Deserialize, Serialize};

use crate::infer::Inference;
use crate::lower::LowerCtx;
use crate::Node;

/// How many values an operator consumes or produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Exactly(k) => n == k,
            Arity::AtLeast(k) => n >= k,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exactly(k) => write!(f, "{k}"),
            Arity::AtLeast(k) => write!(f, "at least {k}"),
        }
    }
}

/// Inference and lowering behaviour of one operator kind.
///
/// `infer` only sees typed inputs whose count already satisfies
/// [`OpRule::inputs`]; it returns `Err` for an inconsistent node. `lower`
/// runs after inference succeeded and must emit exactly one primitive per
/// node output.
pub trait OpRule: Sync {
    fn inputs(&self) -> Arity;
    fn outputs(&self) -> Arity;
    fn infer(&self, node: &Node, inputs: &[TensorType]) -> Result<Inference, String>;
    fn lower(&self, node: &Node, ctx: &mut LowerCtx<'_>) -> Result<(), String>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    Identity,
    Neg,
    Abs,
    Relu,
    Exp,
    Sqrt,
    Add,
    Sub,
    Mul,
    Div,
    Cast,
    Reshape,
    Transpose,
    MatMul,
    ReduceSum,
    Concat,
    Split,
    CategoryMapper,
}

impl OpKind {
    pub const ALL: [OpKind; 18] = [
        OpKind::Identity,
        OpKind::Neg,
        OpKind::Abs,
        OpKind::Relu,
        OpKind::Exp,
        OpKind::Sqrt,
        OpKind::Add,
        OpKind::Sub,
        OpKind::Mul,
        OpKind::Div,
        OpKind::Cast,
        OpKind::Reshape,
        OpKind::Transpose,
        OpKind::MatMul,
        OpKind::ReduceSum,
        OpKind::Concat,
        OpKind::Split,
        OpKind::CategoryMapper,
    ];

    pub fn rule(self) -> &'static dyn OpRule {
        use elementwise::{Binary, Cast, Identity, Unary};
        match self {
            OpKind::Identity => &Identity,
            OpKind::Neg => &Unary(UnaryFn::Neg),
            OpKind::Abs => &Unary(UnaryFn::Abs),
            OpKind::Relu => &Unary(UnaryFn::Relu),
            OpKind::Exp => &Unary(UnaryFn::Exp),
            OpKind::Sqrt => &Unary(UnaryFn::Sqrt),
            OpKind::Add => &Binary(BinaryFn::Add),
            OpKind::Sub => &Binary(BinaryFn::Sub),
            OpKind::Mul => &Binary(BinaryFn::Mul),
            OpKind::Div => &Binary(BinaryFn::Div),
            OpKind::Cast => &Cast,
            OpKind::Reshape => &layout::Reshape,
            OpKind::Transpose => &layout::Transpose,
            OpKind::MatMul => &linalg::MatMul,
            OpKind::ReduceSum => &linalg::ReduceSum,
            OpKind::Concat => &layout::Concat,
            OpKind::Split => &layout::Split,
            OpKind::CategoryMapper => &category::CategoryMapper,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OpKind::Identity => "Identity",
            OpKind::Neg => "Neg",
            OpKind::Abs => "Abs",
            OpKind::Relu => "Relu",
            OpKind::Exp => "Exp",
            OpKind::Sqrt => "Sqrt",
            OpKind::Add => "Add",
            OpKind::Sub => "Sub",
            OpKind::Mul => "Mul",
            OpKind::Div => "Div",
            OpKind::Cast => "Cast",
            OpKind::Reshape => "Reshape",
            OpKind::Transpose => "Transpose",
            OpKind::MatMul => "MatMul",
            OpKind::ReduceSum => "ReduceSum",
            OpKind::Concat => "Concat",
            OpKind::Split => "Split",
            OpKind::CategoryMapper => "CategoryMapper",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Dims of a ranked input, or a `Deferred` reason naming the operator that
/// needs the rank.
pub(crate) fn ranked<'a>(ty: &'a TensorType, what: &str) -> Result<&'a [Dim], Inference> {
    match &ty.dims {
        Some(dims) => Ok(dims),
        None => Err(Inference::Deferred {
            reason: format!("{what} needs the rank of an unranked input"),
        }),
    }
}

/// Unwrap the dims of a ranked input or return its `Deferred` from the
/// enclosing rule.
macro_rules! ranked_or_defer {
    ($ty:expr, $what:expr) => {
        match $crate::ops::ranked($ty, $what) {
            Ok(dims) => dims,
            Err(deferred) => return Ok(deferred),
        }
    };
}
pub(crate) use ranked_or_defer;

/// Map a possibly negative axis onto `0..rank`.
pub(crate) fn normalize_axis(axis: i64, rank: usize) -> Result<usize, String> {
    let r = rank as i64;
    let a = if axis < 0 { axis + r } else { axis };
    if a < 0 || a >= r {
        return Err(format!("axis {axis} out of range for rank {rank}"));
    }
    Ok(a as usize)
}

/// Multidirectional (numpy-style) broadcast of two static shapes.
pub(crate) fn broadcast_dims(a: &[Dim], b: &[Dim]) -> Result<Vec<Dim>, String> {
    let rank = a.len().max(b.len());
    let mut out = Vec::with_capacity(rank);
    for i in 0..rank {
        let da = if i < rank - a.len() {
            Dim::Known(1)
        } else {
            a[i - (rank - a.len())]
        };
        let db = if i < rank - b.len() {
            Dim::Known(1)
        } else {
            b[i - (rank - b.len())]
        };
        out.push(broadcast_dim(da, db).ok_or_else(|| {
            format!(
                "cannot broadcast {} against {}",
                fmt_dims(a),
                fmt_dims(b)
            )
        })?);
    }
    Ok(out)
}

fn broadcast_dim(a: Dim, b: Dim) -> Option<Dim> {
    match (a, b) {
        (Dim::Known(1), d) | (d, Dim::Known(1)) => Some(d),
        (Dim::Known(p), Dim::Known(q)) if p != q => None,
        (Dim::Known(p), _) | (_, Dim::Known(p)) => Some(Dim::Known(p)),
        (Dim::Unknown, Dim::Unknown) => Some(Dim::Unknown),
    }
}

/// Agreeing dims along a non-concatenated axis.
pub(crate) fn merge_dim(a: Dim, b: Dim) -> Option<Dim> {
    match (a, b) {
        (Dim::Known(p), Dim::Known(q)) if p != q => None,
        (Dim::Known(p), _) | (_, Dim::Known(p)) => Some(Dim::Known(p)),
        (Dim::Unknown, Dim::Unknown) => Some(Dim::Unknown),
    }
}

pub(crate) fn fmt_dims(dims: &[Dim]) -> String {
    let parts: Vec<String> = dims.iter().map(Dim::to_string).collect();
    format!("[{}]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(dims: &[usize]) -> Vec<Dim> {
        dims.iter().map(|&d| Dim::Known(d)).collect()
    }

    #[test]
    fn broadcast_right_aligns() {
        assert_eq!(broadcast_dims(&k(&[2, 3]), &k(&[3])).unwrap(), k(&[2, 3]));
        assert_eq!(broadcast_dims(&k(&[4, 1]), &k(&[1, 5])).unwrap(), k(&[4, 5]));
        assert!(broadcast_dims(&k(&[2, 3]), &k(&[4])).is_err());
    }

    #[test]
    fn broadcast_with_unknown_dims() {
        let a = vec![Dim::Unknown, Dim::Known(3)];
        let b = vec![Dim::Known(5), Dim::Unknown];
        assert_eq!(broadcast_dims(&a, &b).unwrap(), k(&[5, 3]));
        let c = vec![Dim::Unknown];
        assert_eq!(broadcast_dims(&c, &[Dim::Known(1)]).unwrap(), vec![Dim::Unknown]);
    }

    #[test]
    fn negative_axes_wrap() {
        assert_eq!(normalize_axis(-1, 3).unwrap(), 2);
        assert_eq!(normalize_axis(0, 3).unwrap(), 0);
        assert!(normalize_axis(3, 3).is_err());
        assert!(normalize_axis(-4, 3).is_err());
    }

    #[test]
    fn every_kind_has_a_rule() {
        for kind in OpKind::ALL {
            let rule = kind.rule();
            assert!(rule.inputs().accepts(match rule.inputs() {
                Arity::Exactly(n) | Arity::AtLeast(n) => n,
            }));
            let back: OpKind =
                serde_json::from_str(&serde_json::to_string(&kind).unwrap()).unwrap();
            assert_eq!(back, kind);
            assert_eq!(kind.to_string(), kind.name());
        }
    }
}
