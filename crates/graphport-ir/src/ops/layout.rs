use graphport_core::program::PrimOp;
use graphport_core::{Dim, TensorType};

use super::{fmt_dims, merge_dim, normalize_axis, ranked_or_defer, Arity, OpRule};
use crate::infer::Inference;
use crate::lower::LowerCtx;
use crate::Node;

fn known_rank(ctx: &LowerCtx<'_>, index: usize) -> Result<usize, String> {
    ctx.input_type(index)
        .rank()
        .ok_or_else(|| format!("input {index} is still unranked"))
}

/// `shape`: target dims, `0` copies the input dim at that position and one
/// `-1` absorbs the remaining element count.
pub(crate) struct Reshape;

impl Reshape {
    fn target(node: &Node) -> Result<&[i64], String> {
        node.attrs()
            .ints("shape")?
            .ok_or_else(|| "missing required attribute `shape`".to_string())
    }
}

impl OpRule for Reshape {
    fn inputs(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn outputs(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn infer(&self, node: &Node, inputs: &[TensorType]) -> Result<Inference, String> {
        let target = Self::target(node)?;
        let x = &inputs[0];

        let mut wildcard = None;
        let mut dims = Vec::with_capacity(target.len());
        for (i, &t) in target.iter().enumerate() {
            let dim = match t {
                -1 => {
                    if wildcard.replace(i).is_some() {
                        return Err("`shape` may contain at most one -1".to_string());
                    }
                    Dim::Unknown
                }
                0 => match &x.dims {
                    Some(src) => *src
                        .get(i)
                        .ok_or_else(|| format!("`shape[{i}]` = 0 but input has rank {}", src.len()))?,
                    None => Dim::Unknown,
                },
                t if t > 0 => Dim::Known(t as usize),
                t => return Err(format!("invalid target dimension {t}")),
            };
            dims.push(dim);
        }

        if x.is_static() {
            let total: usize = x
                .dims
                .iter()
                .flatten()
                .filter_map(|d| d.known())
                .product();
            let rest: Option<usize> = dims
                .iter()
                .enumerate()
                .filter(|(i, _)| Some(*i) != wildcard)
                .map(|(_, d)| d.known())
                .product();
            match (wildcard, rest) {
                (Some(i), Some(rest)) => {
                    if rest == 0 || total % rest != 0 {
                        return Err(format!(
                            "cannot reshape {total} elements into {target:?}"
                        ));
                    }
                    dims[i] = Dim::Known(total / rest);
                }
                (None, Some(rest)) if rest != total => {
                    return Err(format!(
                        "cannot reshape {} ({total} elements) into {}",
                        x,
                        fmt_dims(&dims)
                    ));
                }
                _ => {}
            }
        }
        Ok(Inference::Resolved(vec![TensorType::ranked(x.dtype, dims)]))
    }

    fn lower(&self, node: &Node, ctx: &mut LowerCtx<'_>) -> Result<(), String> {
        let target = Self::target(node)?.to_vec();
        ctx.emit(PrimOp::Reshape { target }, 0)
    }
}

/// `perm`: optional axis permutation, reversed axes when absent.
pub(crate) struct Transpose;

impl Transpose {
    fn perm(node: &Node, rank: usize) -> Result<Vec<usize>, String> {
        let Some(perm) = node.attrs().ints("perm")? else {
            return Ok((0..rank).rev().collect());
        };
        if perm.len() != rank {
            return Err(format!("`perm` has {} entries for rank {rank}", perm.len()));
        }
        let mut seen = vec![false; rank];
        let mut out = Vec::with_capacity(rank);
        for &p in perm {
            let axis = normalize_axis(p, rank)?;
            if std::mem::replace(&mut seen[axis], true) {
                return Err(format!("`perm` repeats axis {axis}"));
            }
            out.push(axis);
        }
        Ok(out)
    }
}

impl OpRule for Transpose {
    fn inputs(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn outputs(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn infer(&self, node: &Node, inputs: &[TensorType]) -> Result<Inference, String> {
        let dims = ranked_or_defer!(&inputs[0], "Transpose");
        let perm = Self::perm(node, dims.len())?;
        let out = perm.iter().map(|&p| dims[p]);
        Ok(Inference::Resolved(vec![TensorType::ranked(
            inputs[0].dtype,
            out,
        )]))
    }

    fn lower(&self, node: &Node, ctx: &mut LowerCtx<'_>) -> Result<(), String> {
        let perm = Self::perm(node, known_rank(ctx, 0)?)?;
        ctx.emit(PrimOp::Permute { perm }, 0)
    }
}

/// `axis`: required concatenation axis.
pub(crate) struct Concat;

impl Concat {
    fn axis(node: &Node, rank: usize) -> Result<usize, String> {
        let axis = node
            .attrs()
            .int("axis")?
            .ok_or_else(|| "missing required attribute `axis`".to_string())?;
        normalize_axis(axis, rank)
    }
}

impl OpRule for Concat {
    fn inputs(&self) -> Arity {
        Arity::AtLeast(1)
    }

    fn outputs(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn infer(&self, node: &Node, inputs: &[TensorType]) -> Result<Inference, String> {
        let first = ranked_or_defer!(&inputs[0], "Concat");
        let dtype = inputs[0].dtype;
        let axis = Self::axis(node, first.len())?;

        let mut out = first.to_vec();
        let mut axis_total = first[axis].known();
        for (i, ty) in inputs.iter().enumerate().skip(1) {
            let dims = ranked_or_defer!(ty, "Concat");
            if ty.dtype != dtype {
                return Err(format!("input {i} is {}, input 0 is {dtype}", ty.dtype));
            }
            if dims.len() != out.len() {
                return Err(format!(
                    "input {i} has rank {}, input 0 has rank {}",
                    dims.len(),
                    out.len()
                ));
            }
            for (d, (acc, &dim)) in out.iter_mut().zip(dims).enumerate() {
                if d == axis {
                    continue;
                }
                *acc = merge_dim(*acc, dim).ok_or_else(|| {
                    format!("input {i} disagrees on dimension {d}: {} vs {}", *acc, dim)
                })?;
            }
            axis_total = axis_total.zip(dims[axis].known()).map(|(a, b)| a + b);
        }
        out[axis] = axis_total.map_or(Dim::Unknown, Dim::Known);
        Ok(Inference::Resolved(vec![TensorType::ranked(dtype, out)]))
    }

    fn lower(&self, node: &Node, ctx: &mut LowerCtx<'_>) -> Result<(), String> {
        let axis = Self::axis(node, known_rank(ctx, 0)?)?;
        ctx.emit(PrimOp::Concat { axis }, 0)
    }
}

/// `axis`: default 0. `split`: optional sizes, one per output; equal parts
/// when absent.
pub(crate) struct Split;

impl Split {
    fn axis(node: &Node, rank: usize) -> Result<usize, String> {
        normalize_axis(node.attrs().int("axis")?.unwrap_or(0), rank)
    }

    fn sizes(node: &Node, parts: usize) -> Result<Option<Vec<usize>>, String> {
        let Some(split) = node.attrs().ints("split")? else {
            return Ok(None);
        };
        if split.len() != parts {
            return Err(format!(
                "`split` has {} sizes for {parts} outputs",
                split.len()
            ));
        }
        split
            .iter()
            .map(|&s| usize::try_from(s).map_err(|_| format!("negative split size {s}")))
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}

impl OpRule for Split {
    fn inputs(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn outputs(&self) -> Arity {
        Arity::AtLeast(1)
    }

    fn infer(&self, node: &Node, inputs: &[TensorType]) -> Result<Inference, String> {
        let dims = ranked_or_defer!(&inputs[0], "Split");
        let axis = Self::axis(node, dims.len())?;
        let parts = node.outputs.len();
        let sizes = Self::sizes(node, parts)?;

        let axis_dims: Vec<Dim> = match (&sizes, dims[axis]) {
            (Some(sizes), extent) => {
                let sum: usize = sizes.iter().sum();
                if let Dim::Known(n) = extent {
                    if sum != n {
                        return Err(format!("split sizes sum to {sum}, axis {axis} is {n}"));
                    }
                }
                sizes.iter().map(|&s| Dim::Known(s)).collect()
            }
            (None, Dim::Known(n)) => {
                if n % parts != 0 {
                    return Err(format!(
                        "axis {axis} of size {n} does not split into {parts} equal parts"
                    ));
                }
                vec![Dim::Known(n / parts); parts]
            }
            (None, Dim::Unknown) => vec![Dim::Unknown; parts],
        };

        let outs = axis_dims
            .into_iter()
            .map(|d| {
                let mut out = dims.to_vec();
                out[axis] = d;
                TensorType::ranked(inputs[0].dtype, out)
            })
            .collect();
        Ok(Inference::Resolved(outs))
    }

    fn lower(&self, node: &Node, ctx: &mut LowerCtx<'_>) -> Result<(), String> {
        let axis = Self::axis(node, known_rank(ctx, 0)?)?;
        let parts = ctx.num_outputs();
        let sizes = Self::sizes(node, parts)?;
        for index in 0..parts {
            ctx.emit(
                PrimOp::SplitPart {
                    axis,
                    index,
                    parts,
                    sizes: sizes.clone(),
                },
                index,
            )?;
        }
        Ok(())
    }
}
