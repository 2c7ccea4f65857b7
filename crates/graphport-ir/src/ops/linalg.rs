use graphport_core::program::PrimOp;
use graphport_core::{Dim, TensorType};

use super::{broadcast_dims, normalize_axis, ranked_or_defer, Arity, OpRule};
use crate::infer::Inference;
use crate::lower::LowerCtx;
use crate::Node;

/// Batched matrix product over the last two axes; leading axes broadcast.
pub(crate) struct MatMul;

impl OpRule for MatMul {
    fn inputs(&self) -> Arity {
        Arity::Exactly(2)
    }

    fn outputs(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn infer(&self, _node: &Node, inputs: &[TensorType]) -> Result<Inference, String> {
        let (a, b) = (&inputs[0], &inputs[1]);
        if a.dtype != b.dtype {
            return Err(format!("operand types differ: {} and {}", a.dtype, b.dtype));
        }
        if !a.dtype.is_numeric() {
            return Err(format!("element type {} is not numeric", a.dtype));
        }
        let da = ranked_or_defer!(a, "MatMul");
        let db = ranked_or_defer!(b, "MatMul");
        if da.len() < 2 || db.len() < 2 {
            return Err(format!(
                "operands must have rank >= 2, got {} and {}",
                da.len(),
                db.len()
            ));
        }

        let (ra, rb) = (da.len(), db.len());
        let (k1, k2) = (da[ra - 1], db[rb - 2]);
        if let (Dim::Known(p), Dim::Known(q)) = (k1, k2) {
            if p != q {
                return Err(format!("inner dimensions disagree: {p} vs {q}"));
            }
        }

        let mut out = broadcast_dims(&da[..ra - 2], &db[..rb - 2])?;
        out.push(da[ra - 2]);
        out.push(db[rb - 1]);
        Ok(Inference::Resolved(vec![TensorType::ranked(a.dtype, out)]))
    }

    fn lower(&self, _node: &Node, ctx: &mut LowerCtx<'_>) -> Result<(), String> {
        ctx.emit(PrimOp::MatMul, 0)
    }
}

/// `axes`: default all. `keepdims`: 0 or 1, default 1.
pub(crate) struct ReduceSum;

impl ReduceSum {
    fn axes(node: &Node, rank: usize) -> Result<Vec<usize>, String> {
        let axes = match node.attrs().ints("axes")? {
            Some(axes) if !axes.is_empty() => axes
                .iter()
                .map(|&a| normalize_axis(a, rank))
                .collect::<Result<Vec<_>, _>>()?,
            _ => (0..rank).collect(),
        };
        let mut sorted = axes.clone();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != axes.len() {
            return Err(format!("`axes` repeats an axis: {axes:?}"));
        }
        Ok(sorted)
    }

    fn keepdims(node: &Node) -> Result<bool, String> {
        match node.attrs().int("keepdims")?.unwrap_or(1) {
            0 => Ok(false),
            1 => Ok(true),
            k => Err(format!("`keepdims` must be 0 or 1, got {k}")),
        }
    }
}

impl OpRule for ReduceSum {
    fn inputs(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn outputs(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn infer(&self, node: &Node, inputs: &[TensorType]) -> Result<Inference, String> {
        let x = &inputs[0];
        if !x.dtype.is_numeric() {
            return Err(format!("element type {} is not numeric", x.dtype));
        }
        let dims = ranked_or_defer!(x, "ReduceSum");
        let axes = Self::axes(node, dims.len())?;
        let keepdims = Self::keepdims(node)?;

        let mut out = Vec::with_capacity(dims.len());
        for (i, &d) in dims.iter().enumerate() {
            if axes.contains(&i) {
                if keepdims {
                    out.push(Dim::Known(1));
                }
            } else {
                out.push(d);
            }
        }
        Ok(Inference::Resolved(vec![TensorType::ranked(x.dtype, out)]))
    }

    fn lower(&self, node: &Node, ctx: &mut LowerCtx<'_>) -> Result<(), String> {
        let rank = ctx
            .input_type(0)
            .rank()
            .ok_or_else(|| "input is still unranked".to_string())?;
        let axes = Self::axes(node, rank)?;
        let keepdims = Self::keepdims(node)?;
        ctx.emit(PrimOp::ReduceSum { axes, keepdims }, 0)
    }
}
