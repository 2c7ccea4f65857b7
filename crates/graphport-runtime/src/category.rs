//! Category mapping helpers, called by name from generated code.
//!
//! Tables are decoded once when an entry point is loaded and kept as hash
//! lookups for every later call.

use std::collections::HashMap;

use graphport_core::{CategoryTable, Constant, Error, RuntimeFn, TableLayout};

use crate::value::{Buffer, Value};

#[derive(Clone, Debug)]
pub enum Lookup {
    IntToString {
        index: HashMap<i64, String>,
        default: String,
    },
    StringToInt {
        index: HashMap<String, i64>,
        default: i64,
    },
}

impl Lookup {
    pub fn from_constant(constant: &Constant) -> Result<Self, Error> {
        let table = CategoryTable::decode(constant, constant.layout)?;
        if table.keys.len() != table.values.len() {
            return Err(Error::InvalidArtifact(
                "category table keys and values differ in length".to_string(),
            ));
        }
        let pairs = table.keys.into_iter().zip(table.values);
        Ok(match constant.layout {
            TableLayout::Int64ToString => Lookup::IntToString {
                index: pairs.collect(),
                default: table.default_string,
            },
            TableLayout::StringToInt64 => Lookup::StringToInt {
                index: pairs.map(|(k, v)| (v, k)).collect(),
                default: table.default_int,
            },
        })
    }

    pub fn layout(&self) -> TableLayout {
        match self {
            Lookup::IntToString { .. } => TableLayout::Int64ToString,
            Lookup::StringToInt { .. } => TableLayout::StringToInt64,
        }
    }

    /// Run helper `func` over `x` with this table. Integer keys of any width
    /// are accepted.
    pub fn apply(&self, func: RuntimeFn, x: &Value) -> Result<Value, String> {
        if func.table_layout() != self.layout() {
            return Err(format!(
                "{} called with a {:?} table",
                func.symbol(),
                self.layout()
            ));
        }
        let data = match (self, &x.data) {
            (Lookup::IntToString { index, default }, data) => {
                let keys: Vec<i64> = match data {
                    Buffer::U8(v) => v.iter().map(|&k| k as i64).collect(),
                    Buffer::I32(v) => v.iter().map(|&k| k as i64).collect(),
                    Buffer::I64(v) => v.clone(),
                    other => {
                        return Err(format!(
                            "{} expects integer keys, got {}",
                            func.symbol(),
                            other.dtype()
                        ))
                    }
                };
                Buffer::Str(category_map_i64_to_str(index, default, &keys))
            }
            (Lookup::StringToInt { index, default }, Buffer::Str(values)) => {
                Buffer::I64(category_map_str_to_i64(index, *default, values))
            }
            (Lookup::StringToInt { .. }, other) => {
                return Err(format!(
                    "{} expects strings, got {}",
                    func.symbol(),
                    other.dtype()
                ))
            }
        };
        Ok(Value::new(x.shape.clone(), data))
    }
}

pub fn category_map_i64_to_str(
    index: &HashMap<i64, String>,
    default: &str,
    keys: &[i64],
) -> Vec<String> {
    keys.iter()
        .map(|k| index.get(k).map_or(default, String::as_str).to_string())
        .collect()
}

pub fn category_map_str_to_i64(
    index: &HashMap<String, i64>,
    default: i64,
    values: &[String],
) -> Vec<i64> {
    values
        .iter()
        .map(|v| index.get(v).copied().unwrap_or(default))
        .collect()
}
