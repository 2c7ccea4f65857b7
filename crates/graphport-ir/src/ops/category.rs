//! Category mapping: element-wise lookup between `i64` keys and string
//! values through two position-matched lists.
//!
//! Attributes:
//! - `cats_int64s` (ints, required) and `cats_strings` (strings, required),
//!   equal length, no repeated entries in either;
//! - `default_int64` (int) for string→int misses;
//! - `default_string` (string) for int→string misses;
//! - `direction` (int, optional): `0` int→string, `1` string→int. The input
//!   element type decides; the flag is only checked against it.

use std::collections::HashSet;

use graphport_core::program::{CategoryTable, PrimOp, RuntimeFn};
use graphport_core::{DType, TensorType};
use serde::{Deserialize, Serialize};

use super::{Arity, OpRule};
use crate::infer::Inference;
use crate::lower::LowerCtx;
use crate::Node;

/// Values used for misses when the node declares no default of its own.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategorySentinels {
    pub missing_int: i64,
    pub missing_string: String,
}

impl Default for CategorySentinels {
    fn default() -> Self {
        Self {
            missing_int: -1,
            missing_string: "_Unused".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Direction {
    IntToString,
    StringToInt,
}

impl Direction {
    fn of_input(dtype: DType) -> Result<Self, String> {
        match dtype {
            DType::U8 | DType::I32 | DType::I64 => Ok(Direction::IntToString),
            DType::String => Ok(Direction::StringToInt),
            other => Err(format!(
                "input must be an integer or string tensor, got {other}"
            )),
        }
    }

    fn output_dtype(self) -> DType {
        match self {
            Direction::IntToString => DType::String,
            Direction::StringToInt => DType::I64,
        }
    }

    fn runtime_fn(self) -> RuntimeFn {
        match self {
            Direction::IntToString => RuntimeFn::CategoryMapI64ToStr,
            Direction::StringToInt => RuntimeFn::CategoryMapStrToI64,
        }
    }
}

struct CategoryAttrs<'a> {
    keys: &'a [i64],
    values: &'a [String],
    default_int: Option<i64>,
    default_string: Option<&'a String>,
    direction: Option<i64>,
}

impl<'a> CategoryAttrs<'a> {
    fn parse(node: &'a Node) -> Result<Self, String> {
        let attrs = node.attrs();
        let keys = attrs
            .ints("cats_int64s")?
            .ok_or_else(|| "missing required attribute `cats_int64s`".to_string())?;
        let values = attrs
            .strs("cats_strings")?
            .ok_or_else(|| "missing required attribute `cats_strings`".to_string())?;
        if keys.len() != values.len() {
            return Err(format!(
                "`cats_int64s` has {} entries but `cats_strings` has {}",
                keys.len(),
                values.len()
            ));
        }
        let mut seen_keys = HashSet::new();
        for k in keys {
            if !seen_keys.insert(*k) {
                return Err(format!("`cats_int64s` repeats key {k}"));
            }
        }
        let mut seen_values = HashSet::new();
        for v in values {
            if !seen_values.insert(v.as_str()) {
                return Err(format!("`cats_strings` repeats value {v:?}"));
            }
        }
        Ok(Self {
            keys,
            values,
            default_int: attrs.int("default_int64")?,
            default_string: attrs.str("default_string")?,
            direction: attrs.int("direction")?,
        })
    }

    fn direction(&self, input: DType) -> Result<Direction, String> {
        let dir = Direction::of_input(input)?;
        match (self.direction, dir) {
            (None, _) | (Some(0), Direction::IntToString) | (Some(1), Direction::StringToInt) => {
                Ok(dir)
            }
            (Some(flag @ (0 | 1)), _) => Err(format!(
                "`direction` = {flag} contradicts {input} input"
            )),
            (Some(flag), _) => Err(format!("`direction` must be 0 or 1, got {flag}")),
        }
    }

    fn table(&self, sentinels: &CategorySentinels) -> CategoryTable {
        CategoryTable {
            keys: self.keys.to_vec(),
            values: self.values.to_vec(),
            default_int: self.default_int.unwrap_or(sentinels.missing_int),
            default_string: self
                .default_string
                .cloned()
                .unwrap_or_else(|| sentinels.missing_string.clone()),
        }
    }
}

pub(crate) struct CategoryMapper;

impl OpRule for CategoryMapper {
    fn inputs(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn outputs(&self) -> Arity {
        Arity::Exactly(1)
    }

    fn infer(&self, node: &Node, inputs: &[TensorType]) -> Result<Inference, String> {
        let attrs = CategoryAttrs::parse(node)?;
        let dir = attrs.direction(inputs[0].dtype)?;
        Ok(Inference::Resolved(vec![
            inputs[0].with_dtype(dir.output_dtype())
        ]))
    }

    fn lower(&self, node: &Node, ctx: &mut LowerCtx<'_>) -> Result<(), String> {
        let attrs = CategoryAttrs::parse(node)?;
        let func = attrs.direction(ctx.input_type(0).dtype)?.runtime_fn();
        let table = attrs.table(ctx.sentinels());
        let table = table
            .encode(func.table_layout())
            .map_err(|e| e.to_string())?;
        let table = ctx.add_constant(table);
        ctx.emit(PrimOp::CallRuntime { func, table }, 0)
    }
}
