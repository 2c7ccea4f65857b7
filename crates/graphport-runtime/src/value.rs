//! Dense, typed tensor values the kernels operate on.

use graphport_core::{DType, RtTensor};
use half::f16;

#[derive(Clone, Debug, PartialEq)]
pub enum Buffer {
    Bool(Vec<bool>),
    U8(Vec<u8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F16(Vec<f16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Str(Vec<String>),
}

/// Apply `$body` to the vector inside any buffer, rewrapping the result in
/// the same variant.
macro_rules! map_buffer {
    ($buf:expr, $v:ident => $body:expr) => {
        match $buf {
            Buffer::Bool($v) => Buffer::Bool($body),
            Buffer::U8($v) => Buffer::U8($body),
            Buffer::I32($v) => Buffer::I32($body),
            Buffer::I64($v) => Buffer::I64($body),
            Buffer::F16($v) => Buffer::F16($body),
            Buffer::F32($v) => Buffer::F32($body),
            Buffer::F64($v) => Buffer::F64($body),
            Buffer::Str($v) => Buffer::Str($body),
        }
    };
}

impl Buffer {
    pub fn dtype(&self) -> DType {
        match self {
            Buffer::Bool(_) => DType::Bool,
            Buffer::U8(_) => DType::U8,
            Buffer::I32(_) => DType::I32,
            Buffer::I64(_) => DType::I64,
            Buffer::F16(_) => DType::F16,
            Buffer::F32(_) => DType::F32,
            Buffer::F64(_) => DType::F64,
            Buffer::Str(_) => DType::String,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Buffer::Bool(v) => v.len(),
            Buffer::U8(v) => v.len(),
            Buffer::I32(v) => v.len(),
            Buffer::I64(v) => v.len(),
            Buffer::F16(v) => v.len(),
            Buffer::F32(v) => v.len(),
            Buffer::F64(v) => v.len(),
            Buffer::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// New buffer holding the elements at `indices`, in order.
    pub fn take(&self, indices: impl IntoIterator<Item = usize>) -> Buffer {
        let indices = indices.into_iter();
        map_buffer!(self, v => indices.map(|i| v[i].clone()).collect())
    }

    /// Append `other`, which must hold the same element type.
    pub fn append(&mut self, other: &Buffer) -> Result<(), String> {
        match (self, other) {
            (Buffer::Bool(a), Buffer::Bool(b)) => a.extend_from_slice(b),
            (Buffer::U8(a), Buffer::U8(b)) => a.extend_from_slice(b),
            (Buffer::I32(a), Buffer::I32(b)) => a.extend_from_slice(b),
            (Buffer::I64(a), Buffer::I64(b)) => a.extend_from_slice(b),
            (Buffer::F16(a), Buffer::F16(b)) => a.extend_from_slice(b),
            (Buffer::F32(a), Buffer::F32(b)) => a.extend_from_slice(b),
            (Buffer::F64(a), Buffer::F64(b)) => a.extend_from_slice(b),
            (Buffer::Str(a), Buffer::Str(b)) => a.extend_from_slice(b),
            (a, b) => {
                return Err(format!(
                    "cannot join {} and {} buffers",
                    a.dtype(),
                    b.dtype()
                ))
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Value {
    pub shape: Vec<usize>,
    pub data: Buffer,
}

impl Value {
    pub fn new(shape: Vec<usize>, data: Buffer) -> Self {
        Self { shape, data }
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Gather a descriptor's elements in logical order, whatever its strides.
    pub fn from_tensor(t: &RtTensor<'_>) -> graphport_core::Result<Self> {
        let data = match t.dtype() {
            DType::Bool => Buffer::Bool(t.to_vec()?),
            DType::U8 => Buffer::U8(t.to_vec()?),
            DType::I32 => Buffer::I32(t.to_vec()?),
            DType::I64 => Buffer::I64(t.to_vec()?),
            DType::F16 => Buffer::F16(t.to_vec()?),
            DType::F32 => Buffer::F32(t.to_vec()?),
            DType::F64 => Buffer::F64(t.to_vec()?),
            DType::String => Buffer::Str(t.to_strings()?),
        };
        Ok(Self::new(t.dims().to_vec(), data))
    }

    /// Owned, contiguous descriptor.
    pub fn into_tensor(self) -> graphport_core::Result<RtTensor<'static>> {
        let shape = self.shape;
        match self.data {
            Buffer::Bool(v) => RtTensor::from_slice(shape, &v),
            Buffer::U8(v) => RtTensor::from_slice(shape, &v),
            Buffer::I32(v) => RtTensor::from_slice(shape, &v),
            Buffer::I64(v) => RtTensor::from_slice(shape, &v),
            Buffer::F16(v) => RtTensor::from_slice(shape, &v),
            Buffer::F32(v) => RtTensor::from_slice(shape, &v),
            Buffer::F64(v) => RtTensor::from_slice(shape, &v),
            Buffer::Str(v) => RtTensor::from_strings(shape, v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strided_tensor_is_gathered_in_logical_order() {
        let data: Vec<u8> = [1i32, 2, 3, 4, 5, 6]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        // 2x3 row-major viewed as its 3x2 transpose.
        let t = RtTensor::borrowed(DType::I32, [2, 3], &data)
            .unwrap()
            .with_layout([3, 2], &[1, 3])
            .unwrap();
        let v = Value::from_tensor(&t).unwrap();
        assert_eq!(v.shape, vec![3, 2]);
        assert_eq!(v.data, Buffer::I32(vec![1, 4, 2, 5, 3, 6]));
    }

    #[test]
    fn take_and_append_keep_the_variant() {
        let mut b = Buffer::Str(vec!["a".into(), "b".into()]);
        b.append(&Buffer::Str(vec!["c".into()])).unwrap();
        assert_eq!(b.take([2, 0]), Buffer::Str(vec!["c".into(), "a".into()]));
        assert!(b.append(&Buffer::I64(vec![1])).is_err());
    }

    #[test]
    fn values_round_trip_through_descriptors() {
        let v = Value::new(vec![2], Buffer::F16(vec![f16::from_f32(0.5), f16::ONE]));
        let t = v.clone().into_tensor().unwrap();
        assert_eq!(t.dtype(), DType::F16);
        assert_eq!(Value::from_tensor(&t).unwrap(), v);
    }
}
