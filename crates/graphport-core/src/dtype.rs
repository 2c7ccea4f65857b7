use std::fmt;
use std::str::FromStr;

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Element types a tensor can carry across the artifact boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    U8,
    I32,
    I64,
    F16,
    F32,
    F64,
    String,
}

impl DType {
    pub const ALL: [DType; 8] = [
        DType::Bool,
        DType::U8,
        DType::I32,
        DType::I64,
        DType::F16,
        DType::F32,
        DType::F64,
        DType::String,
    ];

    /// Bytes per element, `None` for strings (stored as owned `String`s).
    pub fn byte_width(self) -> Option<usize> {
        match self {
            DType::Bool | DType::U8 => Some(1),
            DType::F16 => Some(2),
            DType::I32 | DType::F32 => Some(4),
            DType::I64 | DType::F64 => Some(8),
            DType::String => None,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F16 | DType::F32 | DType::F64)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, DType::U8 | DType::I32 | DType::I64)
    }

    /// Types that support arithmetic.
    pub fn is_numeric(self) -> bool {
        self.is_float() || self.is_integer()
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::U8 => "u8",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F16 => "f16",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::String => "string",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DType::ALL
            .into_iter()
            .find(|d| d.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownDType(s.to_string()))
    }
}

/// Rust scalar types with a fixed-width little-endian encoding.
pub trait Element: Copy + Send + Sync + fmt::Debug + PartialEq + 'static {
    const DTYPE: DType;
    const WIDTH: usize;

    fn write_le(self, out: &mut impl BufMut);

    /// `bytes` is exactly `WIDTH` long.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! le_element {
    ($ty:ty, $dtype:expr, $width:expr) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;
            const WIDTH: usize = $width;

            fn write_le(self, out: &mut impl BufMut) {
                out.put_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; $width];
                raw.copy_from_slice(bytes);
                <$ty>::from_le_bytes(raw)
            }
        }
    };
}

le_element!(u8, DType::U8, 1);
le_element!(i32, DType::I32, 4);
le_element!(i64, DType::I64, 8);
le_element!(f32, DType::F32, 4);
le_element!(f64, DType::F64, 8);
le_element!(half::f16, DType::F16, 2);

impl Element for bool {
    const DTYPE: DType = DType::Bool;
    const WIDTH: usize = 1;

    fn write_le(self, out: &mut impl BufMut) {
        out.put_u8(self as u8);
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}
