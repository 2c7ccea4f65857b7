use graphport_core::program::{BinaryFn, PrimOp, UnaryFn};
use graphport_core::{DType, TensorType};

use super::{broadcast_dims, Arity, OpRule};
use crate::infer::Inference;
use crate::lower::LowerCtx;
use crate::Node;

pub(crate) struct Identity;

impl OpRule for Identity {
    fn inputs(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn outputs(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn infer(&self, _node: &Node, inputs: &[TensorType]) -> Result<Inference, String> {
        Ok(Inference::Resolved(vec![inputs[0].clone()]))
    }

    fn lower(&self, _node: &Node, ctx: &mut LowerCtx<'_>) -> Result<(), String> {
        ctx.emit(PrimOp::Copy, 0)
    }
}

pub(crate) struct Unary(pub UnaryFn);

impl OpRule for Unary {
    fn inputs(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn outputs(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn infer(&self, _node: &Node, inputs: &[TensorType]) -> Result<Inference, String> {
        let x = &inputs[0];
        let ok = match self.0 {
            UnaryFn::Exp | UnaryFn::Sqrt => x.dtype.is_float(),
            UnaryFn::Neg | UnaryFn::Abs | UnaryFn::Relu => x.dtype.is_numeric(),
        };
        if !ok {
            return Err(format!("element type {} is not supported", x.dtype));
        }
        Ok(Inference::Resolved(vec![x.clone()]))
    }

    fn lower(&self, _node: &Node, ctx: &mut LowerCtx<'_>) -> Result<(), String> {
        ctx.emit(PrimOp::Unary(self.0), 0)
    }
}

pub(crate) struct Binary(pub BinaryFn);

impl OpRule for Binary {
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
        let out = match (&a.dims, &b.dims) {
            (Some(da), Some(db)) => TensorType::ranked(a.dtype, broadcast_dims(da, db)?),
            _ => TensorType::unranked(a.dtype),
        };
        Ok(Inference::Resolved(vec![out]))
    }

    fn lower(&self, _node: &Node, ctx: &mut LowerCtx<'_>) -> Result<(), String> {
        ctx.emit(PrimOp::Binary(self.0), 0)
    }
}

/// `to`: target element type name.
pub(crate) struct Cast;

impl Cast {
    fn target(node: &Node) -> Result<DType, String> {
        let to = node
            .attrs()
            .str("to")?
            .ok_or_else(|| "missing required attribute `to`".to_string())?;
        to.parse::<DType>().map_err(|e| e.to_string())
    }
}

impl OpRule for Cast {
    fn inputs(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn outputs(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn infer(&self, node: &Node, inputs: &[TensorType]) -> Result<Inference, String> {
        let to = Self::target(node)?;
        let from = inputs[0].dtype;
        if (from == DType::String) != (to == DType::String) {
            return Err(format!("cannot cast {from} to {to}"));
        }
        Ok(Inference::Resolved(vec![inputs[0].with_dtype(to)]))
    }

    fn lower(&self, node: &Node, ctx: &mut LowerCtx<'_>) -> Result<(), String> {
        let to = Self::target(node)?;
        if ctx.input_type(0).dtype == to {
            ctx.emit(PrimOp::Copy, 0)
        } else {
            ctx.emit(PrimOp::Convert { to }, 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OpKind;
    use graphport_core::Dim;

    fn resolved(r: Result<Inference, String>) -> Vec<TensorType> {
        match r.unwrap() {
            Inference::Resolved(t) => t,
            Inference::Deferred { reason } => panic!("deferred: {reason}"),
        }
    }

    #[test]
    fn float_only_unaries_reject_integers() {
        let node = Node::new("e", OpKind::Exp);
        let x = TensorType::fixed(DType::I64, &[2]);
        assert!(Unary(UnaryFn::Exp).infer(&node, &[x.clone()]).is_err());
        assert_eq!(resolved(Unary(UnaryFn::Neg).infer(&node, &[x.clone()])), vec![x]);
    }

    #[test]
    fn binary_broadcasts_and_keeps_unranked() {
        let node = Node::new("a", OpKind::Add);
        let a = TensorType::ranked(DType::F32, [Dim::Unknown, Dim::Known(3)]);
        let b = TensorType::fixed(DType::F32, &[3]);
        assert_eq!(
            resolved(Binary(BinaryFn::Add).infer(&node, &[a, b.clone()]))[0],
            TensorType::ranked(DType::F32, [Dim::Unknown, Dim::Known(3)])
        );

        let u = TensorType::unranked(DType::F32);
        assert_eq!(
            resolved(Binary(BinaryFn::Mul).infer(&node, &[u, b.clone()]))[0],
            TensorType::unranked(DType::F32)
        );

        let c = TensorType::fixed(DType::F64, &[3]);
        assert!(Binary(BinaryFn::Add).infer(&node, &[b, c]).is_err());
    }

    #[test]
    fn cast_changes_only_dtype() {
        let node = Node::new("c", OpKind::Cast).attr("to", "f32");
        let x = TensorType::fixed(DType::I32, &[2, 2]);
        assert_eq!(
            resolved(Cast.infer(&node, &[x]))[0],
            TensorType::fixed(DType::F32, &[2, 2])
        );
        let s = TensorType::fixed(DType::String, &[2]);
        assert!(Cast.infer(&node, &[s]).is_err());
        let bad = Node::new("c", OpKind::Cast).attr("to", "complex");
        assert!(Cast.infer(&bad, &[TensorType::fixed(DType::I32, &[1])]).is_err());
    }
}
