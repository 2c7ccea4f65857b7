use std::fmt;

use serde::{Deserialize, Serialize};

use crate::DType;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IOName(pub String);

impl fmt::Display for IOName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One dimension of a compile-time shape. Serialized as an integer, or
/// `null` when unknown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<usize>", into = "Option<usize>")]
pub enum Dim {
    Known(usize),
    Unknown,
}

impl Dim {
    pub fn known(self) -> Option<usize> {
        match self {
            Dim::Known(n) => Some(n),
            Dim::Unknown => None,
        }
    }

    pub fn is_known(self) -> bool {
        matches!(self, Dim::Known(_))
    }
}

impl From<Option<usize>> for Dim {
    fn from(d: Option<usize>) -> Self {
        d.map_or(Dim::Unknown, Dim::Known)
    }
}

impl From<Dim> for Option<usize> {
    fn from(d: Dim) -> Self {
        d.known()
    }
}

impl From<usize> for Dim {
    fn from(n: usize) -> Self {
        Dim::Known(n)
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Known(n) => write!(f, "{n}"),
            Dim::Unknown => f.write_str("?"),
        }
    }
}

/// Static type of a tensor value: element type plus a possibly partial
/// shape. `dims == None` is an unranked (fully dynamic) tensor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorType {
    pub dtype: DType,
    #[serde(default)]
    pub dims: Option<Vec<Dim>>,
}

impl TensorType {
    pub fn ranked(dtype: DType, dims: impl IntoIterator<Item = Dim>) -> Self {
        Self {
            dtype,
            dims: Some(dims.into_iter().collect()),
        }
    }

    pub fn fixed(dtype: DType, dims: &[usize]) -> Self {
        Self::ranked(dtype, dims.iter().map(|&d| Dim::Known(d)))
    }

    pub fn unranked(dtype: DType) -> Self {
        Self { dtype, dims: None }
    }

    pub fn rank(&self) -> Option<usize> {
        self.dims.as_ref().map(Vec::len)
    }

    /// Ranked with every dimension known.
    pub fn is_static(&self) -> bool {
        self.dims
            .as_ref()
            .is_some_and(|dims| dims.iter().all(|d| d.is_known()))
    }

    pub fn with_dtype(&self, dtype: DType) -> Self {
        Self {
            dtype,
            dims: self.dims.clone(),
        }
    }

    /// Merge two descriptions of the same value, keeping the more precise
    /// information from each. `None` when they contradict.
    pub fn unify(&self, other: &TensorType) -> Option<TensorType> {
        if self.dtype != other.dtype {
            return None;
        }
        let dims = match (&self.dims, &other.dims) {
            (None, d) | (d, None) => d.clone(),
            (Some(a), Some(b)) => {
                if a.len() != b.len() {
                    return None;
                }
                let mut merged = Vec::with_capacity(a.len());
                for (&x, &y) in a.iter().zip(b) {
                    merged.push(match (x, y) {
                        (Dim::Known(p), Dim::Known(q)) if p != q => return None,
                        (Dim::Known(p), _) | (_, Dim::Known(p)) => Dim::Known(p),
                        (Dim::Unknown, Dim::Unknown) => Dim::Unknown,
                    });
                }
                Some(merged)
            }
        };
        Some(TensorType {
            dtype: self.dtype,
            dims,
        })
    }

    /// Check a concrete runtime tensor against this declaration. Unknown
    /// dimensions accept any size; an unranked declaration accepts any rank.
    pub fn check(&self, dtype: DType, shape: &[usize]) -> Result<(), Mismatch> {
        if dtype != self.dtype {
            return Err(Mismatch::DType {
                expected: self.dtype,
                got: dtype,
            });
        }
        let Some(dims) = &self.dims else {
            return Ok(());
        };
        if dims.len() != shape.len() {
            return Err(Mismatch::Rank {
                expected: dims.len(),
                got: shape.len(),
            });
        }
        for (axis, (dim, &got)) in dims.iter().zip(shape).enumerate() {
            if let Dim::Known(expected) = *dim {
                if expected != got {
                    return Err(Mismatch::Dim {
                        axis,
                        expected,
                        got,
                    });
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dims {
            None => write!(f, "tensor<*x{}>", self.dtype),
            Some(dims) => {
                f.write_str("tensor<")?;
                for d in dims {
                    write!(f, "{d}x")?;
                }
                write!(f, "{}>", self.dtype)
            }
        }
    }
}

/// Why a runtime tensor does not fit a declared [`TensorType`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mismatch {
    DType { expected: DType, got: DType },
    Rank { expected: usize, got: usize },
    Dim { axis: usize, expected: usize, got: usize },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::DType { expected, got } => {
                write!(f, "element type {got} does not match declared {expected}")
            }
            Mismatch::Rank { expected, got } => {
                write!(f, "rank {got} does not match declared rank {expected}")
            }
            Mismatch::Dim {
                axis,
                expected,
                got,
            } => write!(f, "dimension {axis} is {got}, declared {expected}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name: IOName,
    #[serde(flatten)]
    pub ty: TensorType,
}

impl TensorSpec {
    pub fn new(name: impl Into<String>, ty: TensorType) -> Self {
        Self {
            name: IOName(name.into()),
            ty,
        }
    }
}

/// Calling contract of one compiled entry point.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSignature {
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
}

impl ArtifactSignature {
    pub fn input_json(&self) -> String {
        signature_json(&self.inputs)
    }

    pub fn output_json(&self) -> String {
        signature_json(&self.outputs)
    }
}

fn signature_json(specs: &[TensorSpec]) -> String {
    // Plain data types only, serialization cannot fail.
    serde_json::to_string(specs).unwrap_or_default()
}
