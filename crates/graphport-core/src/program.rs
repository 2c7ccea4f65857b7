//! Primitive instruction set shared by the code generator and the runtime.
//!
//! A [`Program`] is what an artifact carries: a set of functions, each a flat
//! tape of [`Instruction`]s over numbered buffer slots, plus a pool of
//! serialized constant tables and the exported entry symbols.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::{DType, Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryFn {
    Neg,
    Abs,
    Relu,
    Exp,
    Sqrt,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryFn {
    Add,
    Sub,
    Mul,
    Div,
}

/// Byte layout of a serialized constant table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableLayout {
    /// Lookup by i64 key, producing a string.
    Int64ToString,
    /// Lookup by string value, producing an i64.
    StringToInt64,
}

/// Helpers linked into the runtime and called by name from generated code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeFn {
    CategoryMapI64ToStr,
    CategoryMapStrToI64,
}

impl RuntimeFn {
    pub fn symbol(self) -> &'static str {
        match self {
            RuntimeFn::CategoryMapI64ToStr => "category_map_i64_to_str",
            RuntimeFn::CategoryMapStrToI64 => "category_map_str_to_i64",
        }
    }

    /// Layout the helper expects its table constant to have.
    pub fn table_layout(self) -> TableLayout {
        match self {
            RuntimeFn::CategoryMapI64ToStr => TableLayout::Int64ToString,
            RuntimeFn::CategoryMapStrToI64 => TableLayout::StringToInt64,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimOp {
    Copy,
    Unary(UnaryFn),
    /// Elementwise with multidirectional broadcasting.
    Binary(BinaryFn),
    Convert {
        to: DType,
    },
    /// `0` copies the input dimension, `-1` is inferred from the element count.
    Reshape {
        target: Vec<i64>,
    },
    Permute {
        perm: Vec<usize>,
    },
    /// Batched matrix product over the last two axes.
    MatMul,
    ReduceSum {
        axes: Vec<usize>,
        keepdims: bool,
    },
    Concat {
        axis: usize,
    },
    /// Part `index` of `axis` split into `sizes`, or into `parts` equal
    /// pieces when `sizes` is absent.
    SplitPart {
        axis: usize,
        index: usize,
        parts: usize,
        sizes: Option<Vec<usize>>,
    },
    CallRuntime {
        func: RuntimeFn,
        /// Index into [`Program::constants`].
        table: usize,
    },
}

impl PrimOp {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            PrimOp::Copy => "copy",
            PrimOp::Unary(_) => "unary",
            PrimOp::Binary(_) => "binary",
            PrimOp::Convert { .. } => "convert",
            PrimOp::Reshape { .. } => "reshape",
            PrimOp::Permute { .. } => "permute",
            PrimOp::MatMul => "matmul",
            PrimOp::ReduceSum { .. } => "reduce_sum",
            PrimOp::Concat { .. } => "concat",
            PrimOp::SplitPart { .. } => "split_part",
            PrimOp::CallRuntime { .. } => "call",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Instruction {
    Exec {
        op: PrimOp,
        srcs: Vec<usize>,
        dst: usize,
    },
    /// The slot's value is dead; release it.
    Free { slot: usize },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub num_slots: usize,
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
    pub body: Vec<Instruction>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Export {
    pub symbol: String,
    pub function: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Constant {
    pub layout: TableLayout,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub functions: Vec<Function>,
    pub exports: Vec<Export>,
    pub constants: Vec<Constant>,
}

impl Program {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Look up the function behind an exported symbol.
    pub fn resolve(&self, symbol: &str) -> Option<&Function> {
        let export = self.exports.iter().find(|e| e.symbol == symbol)?;
        self.function(&export.function)
    }
}

/// Category lookup table: keys and values are parallel lists matched by
/// position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CategoryTable {
    pub keys: Vec<i64>,
    pub values: Vec<String>,
    pub default_int: i64,
    pub default_string: String,
}

impl CategoryTable {
    /// Serialize as `n:u64 | keys:i64*n | (len:u32 bytes)*n | default_int:i64 |
    /// len:u32 default_string`, little endian.
    pub fn encode(&self, layout: TableLayout) -> Result<Constant> {
        let mut out = Vec::new();
        out.put_u64_le(self.keys.len() as u64);
        for &k in &self.keys {
            out.put_i64_le(k);
        }
        for v in &self.values {
            put_str(&mut out, v)?;
        }
        out.put_i64_le(self.default_int);
        put_str(&mut out, &self.default_string)?;
        Ok(Constant { layout, bytes: out })
    }

    pub fn decode(constant: &Constant, expected: TableLayout) -> Result<Self> {
        if constant.layout != expected {
            return Err(Error::InvalidArtifact(format!(
                "table layout {:?} where {:?} was expected",
                constant.layout, expected
            )));
        }
        let mut buf = constant.bytes.as_slice();
        let n = usize::try_from(get_u64(&mut buf)?)
            .map_err(|_| Error::InvalidArtifact("table length overflows".to_string()))?;
        if buf.remaining() < n.saturating_mul(8) {
            return Err(truncated());
        }
        let keys = (0..n).map(|_| buf.get_i64_le()).collect();
        let values = (0..n)
            .map(|_| get_str(&mut buf))
            .collect::<Result<Vec<_>>>()?;
        let default_int = get_i64(&mut buf)?;
        let default_string = get_str(&mut buf)?;
        if buf.has_remaining() {
            return Err(Error::InvalidArtifact(
                "trailing bytes after table".to_string(),
            ));
        }
        Ok(Self {
            keys,
            values,
            default_int,
            default_string,
        })
    }
}

fn put_str(out: &mut Vec<u8>, s: &str) -> Result<()> {
    out.put_u32_le(str_len(s.len())?);
    out.put_slice(s.as_bytes());
    Ok(())
}

fn str_len(len: usize) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| Error::InvalidArtifact(format!("table string of {len} bytes exceeds u32")))
}

fn truncated() -> Error {
    Error::InvalidArtifact("truncated table constant".to_string())
}

fn get_u64(buf: &mut &[u8]) -> Result<u64> {
    if buf.remaining() < 8 {
        return Err(truncated());
    }
    Ok(buf.get_u64_le())
}

fn get_i64(buf: &mut &[u8]) -> Result<i64> {
    if buf.remaining() < 8 {
        return Err(truncated());
    }
    Ok(buf.get_i64_le())
}

fn get_str(buf: &mut &[u8]) -> Result<String> {
    if buf.remaining() < 4 {
        return Err(truncated());
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(truncated());
    }
    let s = std::str::from_utf8(&buf[..len])
        .map_err(|e| Error::InvalidArtifact(format!("table string: {e}")))?
        .to_string();
    buf.advance(len);
    Ok(s)
}
