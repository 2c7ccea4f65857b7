//! Reference kernels for every primitive op.
//!
//! Kernels work on dense row-major [`Value`]s. Any shape or type problem the
//! compiler should have ruled out is still checked here and reported as a
//! fault message, since an artifact may come from anywhere.

use graphport_core::{BinaryFn, DType, PrimOp, Shape, StridedIndex, UnaryFn};
use half::f16;

use crate::category::Lookup;
use crate::value::{Buffer, Value};

pub type KernelResult = Result<Value, String>;

/// Run one primitive over its source values.
pub fn execute(op: &PrimOp, srcs: &[&Value], tables: &[Lookup]) -> KernelResult {
    let want = match op {
        PrimOp::Binary(_) | PrimOp::MatMul => 2,
        PrimOp::Concat { .. } => srcs.len().max(1),
        _ => 1,
    };
    if srcs.len() != want {
        return Err(format!(
            "{} takes {want} operand(s), got {}",
            op.mnemonic(),
            srcs.len()
        ));
    }
    let x = srcs[0];
    match op {
        PrimOp::Copy => Ok(x.clone()),
        PrimOp::Unary(f) => unary(*f, x),
        PrimOp::Binary(f) => binary(*f, x, srcs[1]),
        PrimOp::Convert { to } => convert(x, *to),
        PrimOp::Reshape { target } => reshape(x, target),
        PrimOp::Permute { perm } => permute(x, perm),
        PrimOp::MatMul => matmul(x, srcs[1]),
        PrimOp::ReduceSum { axes, keepdims } => reduce_sum(x, axes, *keepdims),
        PrimOp::Concat { axis } => concat(srcs, *axis),
        PrimOp::SplitPart {
            axis,
            index,
            parts,
            sizes,
        } => split_part(x, *axis, *index, *parts, sizes.as_deref()),
        PrimOp::CallRuntime { func, table } => {
            let lookup = tables
                .get(*table)
                .ok_or_else(|| format!("table {table} does not exist"))?;
            lookup.apply(*func, x)
        }
    }
}

trait Num: Copy + PartialOrd {
    const ZERO: Self;

    fn add(self, o: Self) -> Self;
    fn sub(self, o: Self) -> Self;
    fn mul(self, o: Self) -> Self;
    /// `None` on integer division by zero or overflow.
    fn div(self, o: Self) -> Option<Self>;
    fn neg(self) -> Self;
    fn abs(self) -> Self;
    /// `None` for integer types.
    fn exp(self) -> Option<Self>;
    fn sqrt(self) -> Option<Self>;
}

macro_rules! int_num {
    ($t:ty, $abs:expr) => {
        impl Num for $t {
            const ZERO: Self = 0;

            fn add(self, o: Self) -> Self {
                self.wrapping_add(o)
            }
            fn sub(self, o: Self) -> Self {
                self.wrapping_sub(o)
            }
            fn mul(self, o: Self) -> Self {
                self.wrapping_mul(o)
            }
            fn div(self, o: Self) -> Option<Self> {
                self.checked_div(o)
            }
            fn neg(self) -> Self {
                self.wrapping_neg()
            }
            fn abs(self) -> Self {
                $abs(self)
            }
            fn exp(self) -> Option<Self> {
                None
            }
            fn sqrt(self) -> Option<Self> {
                None
            }
        }
    };
}

int_num!(u8, |x: u8| x);
int_num!(i32, i32::wrapping_abs);
int_num!(i64, i64::wrapping_abs);

macro_rules! float_num {
    ($t:ty) => {
        impl Num for $t {
            const ZERO: Self = 0.0;

            fn add(self, o: Self) -> Self {
                self + o
            }
            fn sub(self, o: Self) -> Self {
                self - o
            }
            fn mul(self, o: Self) -> Self {
                self * o
            }
            fn div(self, o: Self) -> Option<Self> {
                Some(self / o)
            }
            fn neg(self) -> Self {
                -self
            }
            fn abs(self) -> Self {
                <$t>::abs(self)
            }
            fn exp(self) -> Option<Self> {
                Some(<$t>::exp(self))
            }
            fn sqrt(self) -> Option<Self> {
                Some(<$t>::sqrt(self))
            }
        }
    };
}

float_num!(f32);
float_num!(f64);

// Half precision computes in f32 and rounds once per element.
impl Num for f16 {
    const ZERO: Self = f16::ZERO;

    fn add(self, o: Self) -> Self {
        f16::from_f32(self.to_f32() + o.to_f32())
    }
    fn sub(self, o: Self) -> Self {
        f16::from_f32(self.to_f32() - o.to_f32())
    }
    fn mul(self, o: Self) -> Self {
        f16::from_f32(self.to_f32() * o.to_f32())
    }
    fn div(self, o: Self) -> Option<Self> {
        Some(f16::from_f32(self.to_f32() / o.to_f32()))
    }
    fn neg(self) -> Self {
        -self
    }
    fn abs(self) -> Self {
        f16::from_f32(self.to_f32().abs())
    }
    fn exp(self) -> Option<Self> {
        Some(f16::from_f32(self.to_f32().exp()))
    }
    fn sqrt(self) -> Option<Self> {
        Some(f16::from_f32(self.to_f32().sqrt()))
    }
}

/// Dispatch a generic numeric body over the numeric buffer variants.
/// `$other` handles bool and string buffers.
macro_rules! numeric {
    ($buf:expr, $v:ident => $body:expr, $other:ident => $fallback:expr) => {
        match $buf {
            Buffer::U8($v) => Buffer::U8($body),
            Buffer::I32($v) => Buffer::I32($body),
            Buffer::I64($v) => Buffer::I64($body),
            Buffer::F16($v) => Buffer::F16($body),
            Buffer::F32($v) => Buffer::F32($body),
            Buffer::F64($v) => Buffer::F64($body),
            $other => return Err($fallback),
        }
    };
}

fn not_numeric(op: &str, b: &Buffer) -> String {
    format!("{op} is not defined for {} elements", b.dtype())
}

fn unary(f: UnaryFn, x: &Value) -> KernelResult {
    fn apply<T: Num>(f: UnaryFn, xs: &[T]) -> Result<Vec<T>, String> {
        xs.iter()
            .map(|&x| {
                let y = match f {
                    UnaryFn::Neg => Some(x.neg()),
                    UnaryFn::Abs => Some(x.abs()),
                    UnaryFn::Relu => Some(if x > T::ZERO { x } else { T::ZERO }),
                    UnaryFn::Exp => x.exp(),
                    UnaryFn::Sqrt => x.sqrt(),
                };
                y.ok_or_else(|| format!("{f:?} requires floating point elements"))
            })
            .collect()
    }

    let data = numeric!(&x.data, v => apply(f, v)?, other => not_numeric("unary", other));
    Ok(Value::new(x.shape.clone(), data))
}

/// Multidirectional broadcast of two shapes.
pub(crate) fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>, String> {
    let rank = a.len().max(b.len());
    let at = |dims: &[usize], i: usize| {
        let pad = rank - dims.len();
        if i < pad {
            1
        } else {
            dims[i - pad]
        }
    };
    (0..rank)
        .map(|i| match (at(a, i), at(b, i)) {
            (x, y) if x == y => Ok(x),
            (1, y) => Ok(y),
            (x, 1) => Ok(x),
            (x, y) => Err(format!(
                "shapes {a:?} and {b:?} do not broadcast (axis {i}: {x} vs {y})"
            )),
        })
        .collect()
}

/// Offsets into a row-major `input` for every position of the broadcast
/// result `out`, in row-major order.
fn broadcast_offsets(out: &[usize], input: &[usize]) -> Vec<usize> {
    let pad = out.len() - input.len();
    let own = Shape::from_slice(input).contiguous_strides();
    let strides: Vec<usize> = (0..out.len())
        .map(|i| {
            if i < pad || input[i - pad] == 1 {
                0
            } else {
                own[i - pad]
            }
        })
        .collect();
    StridedIndex::new(out, &strides).collect()
}

fn binary(f: BinaryFn, a: &Value, b: &Value) -> KernelResult {
    fn apply<T: Num>(f: BinaryFn, a: &[T], ia: &[usize], b: &[T], ib: &[usize]) -> Result<Vec<T>, String> {
        ia.iter()
            .zip(ib)
            .map(|(&i, &j)| {
                let (x, y) = (a[i], b[j]);
                match f {
                    BinaryFn::Add => Ok(x.add(y)),
                    BinaryFn::Sub => Ok(x.sub(y)),
                    BinaryFn::Mul => Ok(x.mul(y)),
                    BinaryFn::Div => x
                        .div(y)
                        .ok_or_else(|| "integer division by zero or overflow".to_string()),
                }
            })
            .collect()
    }

    let shape = broadcast_shape(&a.shape, &b.shape)?;
    let ia = broadcast_offsets(&shape, &a.shape);
    let ib = broadcast_offsets(&shape, &b.shape);
    let data = match (&a.data, &b.data) {
        (Buffer::U8(x), Buffer::U8(y)) => Buffer::U8(apply(f, x, &ia, y, &ib)?),
        (Buffer::I32(x), Buffer::I32(y)) => Buffer::I32(apply(f, x, &ia, y, &ib)?),
        (Buffer::I64(x), Buffer::I64(y)) => Buffer::I64(apply(f, x, &ia, y, &ib)?),
        (Buffer::F16(x), Buffer::F16(y)) => Buffer::F16(apply(f, x, &ia, y, &ib)?),
        (Buffer::F32(x), Buffer::F32(y)) => Buffer::F32(apply(f, x, &ia, y, &ib)?),
        (Buffer::F64(x), Buffer::F64(y)) => Buffer::F64(apply(f, x, &ia, y, &ib)?),
        (x, y) => {
            return Err(format!(
                "{f:?} over {} and {} elements",
                x.dtype(),
                y.dtype()
            ))
        }
    };
    Ok(Value::new(shape, data))
}

fn convert(x: &Value, to: DType) -> KernelResult {
    if x.dtype() == to {
        return Ok(x.clone());
    }
    // Integers and bools go through i64, floats through f64.
    let (ints, floats): (Option<Vec<i64>>, Option<Vec<f64>>) = match &x.data {
        Buffer::Bool(v) => (Some(v.iter().map(|&b| b as i64).collect()), None),
        Buffer::U8(v) => (Some(v.iter().map(|&e| e as i64).collect()), None),
        Buffer::I32(v) => (Some(v.iter().map(|&e| e as i64).collect()), None),
        Buffer::I64(v) => (Some(v.clone()), None),
        Buffer::F16(v) => (None, Some(v.iter().map(|e| e.to_f64()).collect())),
        Buffer::F32(v) => (None, Some(v.iter().map(|&e| e as f64).collect())),
        Buffer::F64(v) => (None, Some(v.clone())),
        Buffer::Str(_) => return Err("cannot convert string elements".to_string()),
    };
    let floats = match (&ints, floats) {
        (_, Some(f)) => f,
        (Some(i), None) => i.iter().map(|&e| e as f64).collect(),
        (None, None) => Vec::new(),
    };
    let ints = ints.unwrap_or_else(|| floats.iter().map(|&e| e as i64).collect());
    let data = match to {
        DType::Bool => Buffer::Bool(floats.iter().map(|&e| e != 0.0).collect()),
        DType::U8 => Buffer::U8(ints.iter().map(|&e| e as u8).collect()),
        DType::I32 => Buffer::I32(ints.iter().map(|&e| e as i32).collect()),
        DType::I64 => Buffer::I64(ints),
        DType::F16 => Buffer::F16(floats.iter().map(|&e| f16::from_f64(e)).collect()),
        DType::F32 => Buffer::F32(floats.iter().map(|&e| e as f32).collect()),
        DType::F64 => Buffer::F64(floats),
        DType::String => return Err("cannot convert to string elements".to_string()),
    };
    Ok(Value::new(x.shape.clone(), data))
}

fn reshape(x: &Value, target: &[i64]) -> KernelResult {
    let numel: usize = x.shape.iter().product();
    let mut dims = Vec::with_capacity(target.len());
    let mut infer_at = None;
    for (i, &t) in target.iter().enumerate() {
        match t {
            0 => dims.push(
                *x.shape
                    .get(i)
                    .ok_or_else(|| format!("reshape: no input dimension {i} to copy"))?,
            ),
            -1 if infer_at.is_none() => {
                infer_at = Some(i);
                dims.push(1);
            }
            d if d > 0 => dims.push(d as usize),
            d => return Err(format!("reshape: invalid target dimension {d}")),
        }
    }
    let known: usize = dims.iter().product();
    if let Some(i) = infer_at {
        if known == 0 || numel % known != 0 {
            return Err(format!(
                "reshape: cannot infer dimension {i} for {numel} elements into {target:?}"
            ));
        }
        dims[i] = numel / known;
    } else if known != numel {
        return Err(format!(
            "reshape: {numel} elements do not fit {target:?}"
        ));
    }
    Ok(Value::new(dims, x.data.clone()))
}

fn permute(x: &Value, perm: &[usize]) -> KernelResult {
    let rank = x.rank();
    let mut seen = vec![false; rank];
    for &p in perm {
        if p >= rank || std::mem::replace(&mut seen[p], true) {
            return Err(format!("invalid permutation {perm:?} for rank {rank}"));
        }
    }
    if perm.len() != rank {
        return Err(format!("invalid permutation {perm:?} for rank {rank}"));
    }
    let own = Shape::from_slice(&x.shape).contiguous_strides();
    let dims: Vec<usize> = perm.iter().map(|&p| x.shape[p]).collect();
    let strides: Vec<usize> = perm.iter().map(|&p| own[p]).collect();
    let data = x.data.take(StridedIndex::new(&dims, &strides));
    Ok(Value::new(dims, data))
}

fn matmul(a: &Value, b: &Value) -> KernelResult {
    fn apply<T: Num>(
        a: &[T],
        b: &[T],
        a_base: &[usize],
        b_base: &[usize],
        (m, k, n): (usize, usize, usize),
    ) -> Vec<T> {
        let mut out = Vec::with_capacity(a_base.len() * m * n);
        for (&pa, &pb) in a_base.iter().zip(b_base) {
            let (pa, pb) = (pa * m * k, pb * k * n);
            for i in 0..m {
                for j in 0..n {
                    let mut acc = T::ZERO;
                    for p in 0..k {
                        acc = acc.add(a[pa + i * k + p].mul(b[pb + p * n + j]));
                    }
                    out.push(acc);
                }
            }
        }
        out
    }

    if a.rank() < 2 || b.rank() < 2 {
        return Err("matmul needs operands of rank 2 or more".to_string());
    }
    let (ra, rb) = (a.rank(), b.rank());
    let (m, k) = (a.shape[ra - 2], a.shape[ra - 1]);
    let (k2, n) = (b.shape[rb - 2], b.shape[rb - 1]);
    if k != k2 {
        return Err(format!(
            "matmul inner dimensions differ: {:?} x {:?}",
            a.shape, b.shape
        ));
    }
    let batch = broadcast_shape(&a.shape[..ra - 2], &b.shape[..rb - 2])?;
    let a_base = broadcast_offsets(&batch, &a.shape[..ra - 2]);
    let b_base = broadcast_offsets(&batch, &b.shape[..rb - 2]);
    let mkn = (m, k, n);
    let data = match (&a.data, &b.data) {
        (Buffer::U8(x), Buffer::U8(y)) => Buffer::U8(apply(x, y, &a_base, &b_base, mkn)),
        (Buffer::I32(x), Buffer::I32(y)) => Buffer::I32(apply(x, y, &a_base, &b_base, mkn)),
        (Buffer::I64(x), Buffer::I64(y)) => Buffer::I64(apply(x, y, &a_base, &b_base, mkn)),
        (Buffer::F16(x), Buffer::F16(y)) => Buffer::F16(apply(x, y, &a_base, &b_base, mkn)),
        (Buffer::F32(x), Buffer::F32(y)) => Buffer::F32(apply(x, y, &a_base, &b_base, mkn)),
        (Buffer::F64(x), Buffer::F64(y)) => Buffer::F64(apply(x, y, &a_base, &b_base, mkn)),
        (x, y) => {
            return Err(format!(
                "matmul over {} and {} elements",
                x.dtype(),
                y.dtype()
            ))
        }
    };
    let mut shape = batch;
    shape.extend([m, n]);
    Ok(Value::new(shape, data))
}

fn reduce_sum(x: &Value, axes: &[usize], keepdims: bool) -> KernelResult {
    fn apply<T: Num>(xs: &[T], targets: &[usize], len: usize) -> Vec<T> {
        let mut acc = vec![T::ZERO; len];
        for (&v, &t) in xs.iter().zip(targets) {
            acc[t] = acc[t].add(v);
        }
        acc
    }

    let rank = x.rank();
    let all: Vec<usize>;
    let axes = if axes.is_empty() {
        all = (0..rank).collect();
        &all
    } else {
        axes
    };
    if let Some(&bad) = axes.iter().find(|&&a| a >= rank) {
        return Err(format!("reduce axis {bad} out of range for rank {rank}"));
    }
    let kept: Vec<usize> = x
        .shape
        .iter()
        .enumerate()
        .map(|(i, &d)| if axes.contains(&i) { 1 } else { d })
        .collect();
    let kept_strides = Shape::from_slice(&kept).contiguous_strides();
    // Each input position maps to the output cell it accumulates into.
    let strides: Vec<usize> = (0..rank)
        .map(|i| if axes.contains(&i) { 0 } else { kept_strides[i] })
        .collect();
    let targets: Vec<usize> = StridedIndex::new(&x.shape, &strides).collect();
    let len: usize = kept.iter().product();
    let data = numeric!(&x.data, v => apply(v, &targets, len), other => not_numeric("reduce_sum", other));
    let shape = if keepdims {
        kept
    } else {
        x.shape
            .iter()
            .enumerate()
            .filter(|(i, _)| !axes.contains(i))
            .map(|(_, &d)| d)
            .collect()
    };
    Ok(Value::new(shape, data))
}

fn concat(parts: &[&Value], axis: usize) -> KernelResult {
    let first = parts[0];
    let rank = first.rank();
    if axis >= rank {
        return Err(format!("concat axis {axis} out of range for rank {rank}"));
    }
    let mut shape = first.shape.clone();
    shape[axis] = 0;
    for part in parts {
        let same_frame = part.rank() == rank
            && (0..rank).all(|i| i == axis || part.shape[i] == first.shape[i]);
        if !same_frame {
            return Err(format!(
                "concat operands {:?} and {:?} differ off axis {axis}",
                first.shape, part.shape
            ));
        }
        shape[axis] += part.shape[axis];
    }

    let outer: usize = first.shape[..axis].iter().product();
    let inner: usize = first.shape[axis + 1..].iter().product();
    let mut joined = first.data.clone();
    let mut bases = vec![0];
    for part in &parts[1..] {
        bases.push(joined.len());
        joined.append(&part.data)?;
    }
    let mut indices = Vec::with_capacity(joined.len());
    for o in 0..outer {
        for (part, &base) in parts.iter().zip(&bases) {
            let chunk = part.shape[axis] * inner;
            indices.extend(base + o * chunk..base + (o + 1) * chunk);
        }
    }
    Ok(Value::new(shape, joined.take(indices)))
}

fn split_part(
    x: &Value,
    axis: usize,
    index: usize,
    parts: usize,
    sizes: Option<&[usize]>,
) -> KernelResult {
    let rank = x.rank();
    if axis >= rank {
        return Err(format!("split axis {axis} out of range for rank {rank}"));
    }
    let dim = x.shape[axis];
    let (start, len) = match sizes {
        Some(sizes) => {
            if sizes.iter().sum::<usize>() != dim || index >= sizes.len() {
                return Err(format!("split sizes {sizes:?} do not cover dimension {dim}"));
            }
            (sizes[..index].iter().sum(), sizes[index])
        }
        None => {
            if parts == 0 || dim % parts != 0 || index >= parts {
                return Err(format!(
                    "dimension {dim} does not split into {parts} equal parts"
                ));
            }
            let each = dim / parts;
            (index * each, each)
        }
    };
    let outer: usize = x.shape[..axis].iter().product();
    let inner: usize = x.shape[axis + 1..].iter().product();
    let indices = (0..outer).flat_map(|o| {
        let from = o * dim * inner + start * inner;
        from..from + len * inner
    });
    let data = x.data.take(indices);
    let mut shape = x.shape.clone();
    shape[axis] = len;
    Ok(Value::new(shape, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32s(shape: &[usize], v: &[f32]) -> Value {
        Value::new(shape.to_vec(), Buffer::F32(v.to_vec()))
    }

    fn i64s(shape: &[usize], v: &[i64]) -> Value {
        Value::new(shape.to_vec(), Buffer::I64(v.to_vec()))
    }

    fn run(op: PrimOp, srcs: &[&Value]) -> KernelResult {
        execute(&op, srcs, &[])
    }

    #[test]
    fn binary_broadcasts_a_row() {
        let a = f32s(&[2, 3], &[1., 2., 3., 4., 5., 6.]);
        let b = f32s(&[3], &[10., 20., 30.]);
        let y = run(PrimOp::Binary(BinaryFn::Add), &[&a, &b]).unwrap();
        assert_eq!(y, f32s(&[2, 3], &[11., 22., 33., 14., 25., 36.]));
    }

    #[test]
    fn integer_division_by_zero_faults() {
        let a = i64s(&[2], &[4, 5]);
        let b = i64s(&[2], &[2, 0]);
        let err = run(PrimOp::Binary(BinaryFn::Div), &[&a, &b]).unwrap_err();
        assert!(err.contains("division by zero"), "{err}");
    }

    #[test]
    fn exp_on_integers_faults() {
        let a = i64s(&[1], &[1]);
        assert!(run(PrimOp::Unary(UnaryFn::Exp), &[&a]).is_err());
        let y = run(PrimOp::Unary(UnaryFn::Relu), &[&i64s(&[3], &[-2, 0, 7])]).unwrap();
        assert_eq!(y, i64s(&[3], &[0, 0, 7]));
    }

    #[test]
    fn permute_and_matmul() {
        let a = f32s(&[2, 3], &[1., 2., 3., 4., 5., 6.]);
        let t = run(PrimOp::Permute { perm: vec![1, 0] }, &[&a]).unwrap();
        assert_eq!(t, f32s(&[3, 2], &[1., 4., 2., 5., 3., 6.]));
        let y = run(PrimOp::MatMul, &[&a, &t]).unwrap();
        assert_eq!(y, f32s(&[2, 2], &[14., 32., 32., 77.]));
    }

    #[test]
    fn matmul_broadcasts_batch() {
        let a = f32s(&[2, 1, 2], &[1., 2., 3., 4.]);
        let b = f32s(&[2, 1], &[1., 1.]);
        let y = run(PrimOp::MatMul, &[&a, &b]).unwrap();
        assert_eq!(y, f32s(&[2, 1, 1], &[3., 7.]));
    }

    #[test]
    fn reduce_sum_over_axes() {
        let a = i64s(&[2, 3], &[1, 2, 3, 4, 5, 6]);
        let rows = run(
            PrimOp::ReduceSum {
                axes: vec![1],
                keepdims: false,
            },
            &[&a],
        )
        .unwrap();
        assert_eq!(rows, i64s(&[2], &[6, 15]));
        let all = run(
            PrimOp::ReduceSum {
                axes: vec![0, 1],
                keepdims: true,
            },
            &[&a],
        )
        .unwrap();
        assert_eq!(all, i64s(&[1, 1], &[21]));
    }

    #[test]
    fn reshape_resolves_placeholders() {
        let a = i64s(&[2, 3], &[1, 2, 3, 4, 5, 6]);
        let y = run(PrimOp::Reshape { target: vec![0, -1, 1] }, &[&a]).unwrap();
        assert_eq!(y.shape, vec![2, 3, 1]);
        assert!(run(PrimOp::Reshape { target: vec![4] }, &[&a]).is_err());
    }

    #[test]
    fn concat_then_split_restores_parts() {
        let a = i64s(&[2, 1], &[1, 2]);
        let b = i64s(&[2, 2], &[3, 4, 5, 6]);
        let joined = run(PrimOp::Concat { axis: 1 }, &[&a, &b]).unwrap();
        assert_eq!(joined, i64s(&[2, 3], &[1, 3, 4, 2, 5, 6]));
        let second = run(
            PrimOp::SplitPart {
                axis: 1,
                index: 1,
                parts: 2,
                sizes: Some(vec![1, 2]),
            },
            &[&joined],
        )
        .unwrap();
        assert_eq!(second, b);
    }

    #[test]
    fn convert_between_families() {
        let a = f32s(&[3], &[1.7, -2.2, 0.0]);
        let y = run(PrimOp::Convert { to: DType::I32 }, &[&a]).unwrap();
        assert_eq!(y.data, Buffer::I32(vec![1, -2, 0]));
        let b = run(PrimOp::Convert { to: DType::Bool }, &[&a]).unwrap();
        assert_eq!(b.data, Buffer::Bool(vec![true, true, false]));
    }
}
