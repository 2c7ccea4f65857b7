use std::fmt;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;

use crate::{DType, Element, Error, Result};

/// Concrete runtime shape. Every dimension is known.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Shape(pub SmallVec<[usize; 6]>);

impl Shape {
    pub fn from_slice(d: &[usize]) -> Self {
        Self(d.iter().copied().collect())
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Element count; a rank-0 shape holds one element.
    pub fn numel(&self) -> usize {
        self.0.iter().product()
    }

    pub fn checked_numel(&self) -> Option<usize> {
        self.0.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    /// Row-major strides, in elements.
    pub fn contiguous_strides(&self) -> SmallVec<[usize; 6]> {
        let mut strides: SmallVec<[usize; 6]> = SmallVec::from_elem(1, self.rank());
        for i in (0..self.rank().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.0[i + 1];
        }
        strides
    }
}

impl From<&[usize]> for Shape {
    fn from(d: &[usize]) -> Self {
        Self::from_slice(d)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(d: Vec<usize>) -> Self {
        Self(SmallVec::from_vec(d))
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(d: [usize; N]) -> Self {
        Self::from_slice(&d)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0.as_slice())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// The descriptor frees its buffer when destroyed.
    Owned,
    /// The caller keeps the buffer alive and frees it.
    Borrowed,
}

/// Backing buffer of a descriptor. Numeric elements are little-endian bytes,
/// strings are stored as owned `String`s.
#[derive(Clone, Debug)]
pub enum TensorStorage<'a> {
    Bytes(Bytes),
    BorrowedBytes(&'a [u8]),
    Strings(Vec<String>),
    BorrowedStrings(&'a [String]),
}

impl TensorStorage<'_> {
    pub fn ownership(&self) -> Ownership {
        match self {
            TensorStorage::Bytes(_) | TensorStorage::Strings(_) => Ownership::Owned,
            TensorStorage::BorrowedBytes(_) | TensorStorage::BorrowedStrings(_) => {
                Ownership::Borrowed
            }
        }
    }

    fn data(&self) -> DataRef<'_> {
        match self {
            TensorStorage::Bytes(b) => DataRef::Bytes(b),
            TensorStorage::BorrowedBytes(b) => DataRef::Bytes(b),
            TensorStorage::Strings(s) => DataRef::Strings(s),
            TensorStorage::BorrowedStrings(s) => DataRef::Strings(s),
        }
    }
}

/// Borrowed projection of the buffer.
#[derive(Clone, Copy, Debug)]
pub enum DataRef<'a> {
    Bytes(&'a [u8]),
    Strings(&'a [String]),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorDesc {
    pub dtype: DType,
    pub shape: Shape,
    /// Per-dimension step, in elements.
    pub strides: SmallVec<[usize; 6]>,
}

/// Read-only view returned by [`RtTensor::view`].
#[derive(Clone, Copy, Debug)]
pub struct TensorView<'a> {
    pub dtype: DType,
    pub shape: &'a [usize],
    pub strides: &'a [usize],
    pub data: DataRef<'a>,
}

/// What [`RtTensor::destroy`] gave back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Released {
    /// The last reference to an owned buffer was dropped and the buffer freed.
    /// `elements` counts what the buffer held, which for broadcast or strided
    /// descriptors differs from `numel`.
    Owned { elements: usize },
    /// Another descriptor still shares the owned buffer, so it stays alive
    /// until that one is destroyed.
    Shared,
    /// Nothing was freed; the buffer belongs to the caller.
    Borrowed,
}

/// Rank- and type-erased tensor handle exchanged with compiled artifacts.
#[derive(Clone, Debug)]
pub struct RtTensor<'a> {
    desc: TensorDesc,
    storage: TensorStorage<'a>,
}

impl RtTensor<'static> {
    /// Allocate a zero-filled (or empty-string) tensor.
    pub fn create(shape: impl Into<Shape>, dtype: DType) -> Result<Self> {
        let shape = shape.into();
        let numel = shape
            .checked_numel()
            .ok_or_else(|| Error::Allocation(format!("element count of {shape} overflows")))?;

        let storage = match dtype.byte_width() {
            Some(width) => {
                let len = numel.checked_mul(width).ok_or_else(|| {
                    Error::Allocation(format!("{numel} elements of {dtype} overflow usize"))
                })?;
                let mut buf: Vec<u8> = Vec::new();
                buf.try_reserve_exact(len)
                    .map_err(|e| Error::Allocation(format!("{len} bytes: {e}")))?;
                buf.resize(len, 0);
                TensorStorage::Bytes(Bytes::from(buf))
            }
            None => {
                let mut buf: Vec<String> = Vec::new();
                buf.try_reserve_exact(numel)
                    .map_err(|e| Error::Allocation(format!("{numel} strings: {e}")))?;
                buf.resize(numel, String::new());
                TensorStorage::Strings(buf)
            }
        };
        Ok(Self::contiguous(dtype, shape, storage))
    }

    pub fn from_slice<T: Element>(shape: impl Into<Shape>, data: &[T]) -> Result<Self> {
        let shape = shape.into();
        check_count(&shape, data.len())?;
        let mut buf = Vec::with_capacity(data.len() * T::WIDTH);
        for &v in data {
            v.write_le(&mut buf);
        }
        Ok(Self::contiguous(
            T::DTYPE,
            shape,
            TensorStorage::Bytes(Bytes::from(buf)),
        ))
    }

    pub fn from_strings(shape: impl Into<Shape>, data: Vec<String>) -> Result<Self> {
        let shape = shape.into();
        check_count(&shape, data.len())?;
        Ok(Self::contiguous(
            DType::String,
            shape,
            TensorStorage::Strings(data),
        ))
    }

    /// Take ownership of an already encoded little-endian buffer.
    pub fn from_cpu_bytes(dtype: DType, shape: impl Into<Shape>, bytes: Bytes) -> Result<Self> {
        let shape = shape.into();
        let width = numeric_width(dtype)?;
        if bytes.len() % width != 0 {
            return Err(Error::Allocation(format!(
                "{} bytes is not a whole number of {dtype} elements",
                bytes.len()
            )));
        }
        check_count(&shape, bytes.len() / width)?;
        Ok(Self::contiguous(dtype, shape, TensorStorage::Bytes(bytes)))
    }

    /// Populate a tensor with pseudo-random values. A seed makes the
    /// contents reproducible.
    pub fn with_generated_data(
        shape: impl Into<Shape>,
        dtype: DType,
        seed: Option<u64>,
    ) -> Result<Self> {
        let shape = shape.into();
        let numel = shape
            .checked_numel()
            .ok_or_else(|| Error::Allocation(format!("element count of {shape} overflows")))?;
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        fn gen<T: Element>(n: usize, mut f: impl FnMut() -> T) -> Vec<T> {
            (0..n).map(|_| f()).collect()
        }

        match dtype {
            DType::Bool => Self::from_slice(shape, &gen(numel, || rng.gen::<bool>())),
            DType::U8 => Self::from_slice(shape, &gen(numel, || rng.gen::<u8>())),
            DType::I32 => Self::from_slice(shape, &gen(numel, || rng.gen_range(-100i32..100))),
            DType::I64 => Self::from_slice(shape, &gen(numel, || rng.gen_range(-100i64..100))),
            DType::F16 => Self::from_slice(
                shape,
                &gen(numel, || half::f16::from_f32(rng.gen_range(-1.0f32..1.0))),
            ),
            DType::F32 => Self::from_slice(shape, &gen(numel, || rng.gen_range(-1.0f32..1.0))),
            DType::F64 => Self::from_slice(shape, &gen(numel, || rng.gen_range(-1.0f64..1.0))),
            DType::String => {
                let data = (0..numel)
                    .map(|_| {
                        let len = rng.gen_range(1..8);
                        (0..len)
                            .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
                            .collect()
                    })
                    .collect();
                Self::from_strings(shape, data)
            }
        }
    }
}

impl<'a> RtTensor<'a> {
    /// Wrap caller memory without copying. The caller keeps `bytes` alive.
    pub fn borrowed(dtype: DType, shape: impl Into<Shape>, bytes: &'a [u8]) -> Result<Self> {
        let shape = shape.into();
        let width = numeric_width(dtype)?;
        if bytes.len() % width != 0 {
            return Err(Error::Allocation(format!(
                "{} bytes is not a whole number of {dtype} elements",
                bytes.len()
            )));
        }
        let tensor = Self::contiguous(dtype, shape, TensorStorage::BorrowedBytes(bytes));
        tensor.check_extent()?;
        Ok(tensor)
    }

    pub fn borrowed_strings(shape: impl Into<Shape>, data: &'a [String]) -> Result<Self> {
        let tensor = Self::contiguous(
            DType::String,
            shape.into(),
            TensorStorage::BorrowedStrings(data),
        );
        tensor.check_extent()?;
        Ok(tensor)
    }

    /// Re-view the same buffer with explicit element strides.
    pub fn with_strides(self, strides: &[usize]) -> Result<Self> {
        let shape = self.desc.shape.clone();
        self.with_layout(shape, strides)
    }

    /// Re-view the same buffer with a new shape and strides. A zero stride
    /// repeats elements along that axis.
    pub fn with_layout(mut self, shape: impl Into<Shape>, strides: &[usize]) -> Result<Self> {
        let shape = shape.into();
        if strides.len() != shape.rank() {
            return Err(Error::StrideRankMismatch {
                rank: shape.rank(),
                strides: strides.len(),
            });
        }
        self.desc.shape = shape;
        self.desc.strides = strides.iter().copied().collect();
        self.check_extent()?;
        Ok(self)
    }

    fn contiguous(dtype: DType, shape: Shape, storage: TensorStorage<'a>) -> Self {
        let strides = shape.contiguous_strides();
        Self {
            desc: TensorDesc {
                dtype,
                shape,
                strides,
            },
            storage,
        }
    }

    pub fn desc(&self) -> &TensorDesc {
        &self.desc
    }

    pub fn dtype(&self) -> DType {
        self.desc.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.desc.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.desc.shape.dims()
    }

    pub fn strides(&self) -> &[usize] {
        &self.desc.strides
    }

    pub fn rank(&self) -> usize {
        self.desc.shape.rank()
    }

    pub fn numel(&self) -> usize {
        self.desc.shape.numel()
    }

    pub fn ownership(&self) -> Ownership {
        self.storage.ownership()
    }

    pub fn storage(&self) -> &TensorStorage<'a> {
        &self.storage
    }

    pub fn is_contiguous(&self) -> bool {
        self.desc.strides == self.desc.shape.contiguous_strides()
    }

    pub fn view(&self) -> TensorView<'_> {
        TensorView {
            dtype: self.desc.dtype,
            shape: self.desc.shape.dims(),
            strides: &self.desc.strides,
            data: self.storage.data(),
        }
    }

    /// Release the descriptor. An owned buffer is freed here unless a clone
    /// still holds it; borrowed buffers are left untouched.
    pub fn destroy(self) -> Released {
        let elements = self.extent();
        match self.storage {
            // Empty buffers are static and never report unique.
            TensorStorage::Bytes(bytes) if bytes.is_empty() || bytes.is_unique() => {
                drop(bytes);
                Released::Owned { elements }
            }
            TensorStorage::Bytes(_) => Released::Shared,
            TensorStorage::Strings(strings) => {
                drop(strings);
                Released::Owned { elements }
            }
            TensorStorage::BorrowedBytes(_) | TensorStorage::BorrowedStrings(_) => {
                Released::Borrowed
            }
        }
    }

    /// Buffer offsets of every logical element, in row-major order.
    pub fn element_offsets(&self) -> StridedIndex<'_> {
        StridedIndex::new(self.desc.shape.dims(), &self.desc.strides)
    }

    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.desc.dtype {
            return Err(Error::DTypeMismatch {
                expected: self.desc.dtype,
                got: T::DTYPE,
            });
        }
        let DataRef::Bytes(bytes) = self.storage.data() else {
            return Err(Error::DTypeMismatch {
                expected: DType::String,
                got: T::DTYPE,
            });
        };
        Ok(self
            .element_offsets()
            .map(|off| T::read_le(&bytes[off * T::WIDTH..(off + 1) * T::WIDTH]))
            .collect())
    }

    pub fn to_strings(&self) -> Result<Vec<String>> {
        match self.storage.data() {
            DataRef::Strings(strings) => Ok(self
                .element_offsets()
                .map(|off| strings[off].clone())
                .collect()),
            DataRef::Bytes(_) => Err(Error::DTypeMismatch {
                expected: self.desc.dtype,
                got: DType::String,
            }),
        }
    }

    /// Contiguous owned copy that no longer borrows caller memory.
    pub fn into_owned(self) -> RtTensor<'static> {
        let storage = match self.storage.data() {
            DataRef::Bytes(bytes) => {
                if let (true, TensorStorage::Bytes(b)) = (self.is_contiguous(), &self.storage) {
                    TensorStorage::Bytes(b.clone())
                } else {
                    // Width is known: byte storage only exists for numeric dtypes.
                    let width = self.desc.dtype.byte_width().unwrap_or(1);
                    let mut buf = Vec::with_capacity(self.numel() * width);
                    for off in self.element_offsets() {
                        buf.extend_from_slice(&bytes[off * width..(off + 1) * width]);
                    }
                    TensorStorage::Bytes(Bytes::from(buf))
                }
            }
            DataRef::Strings(strings) => TensorStorage::Strings(
                self.element_offsets()
                    .map(|off| strings[off].clone())
                    .collect(),
            ),
        };
        RtTensor::contiguous(self.desc.dtype, self.desc.shape, storage)
    }

    /// Number of elements the backing buffer holds.
    fn extent(&self) -> usize {
        match self.storage.data() {
            DataRef::Bytes(b) => b.len() / self.desc.dtype.byte_width().unwrap_or(1),
            DataRef::Strings(s) => s.len(),
        }
    }

    fn check_extent(&self) -> Result<()> {
        let extent = self.extent();
        let dims = self.desc.shape.dims();
        if dims.contains(&0) {
            return Ok(());
        }
        let mut last = 0usize;
        for (&d, &s) in dims.iter().zip(&self.desc.strides) {
            last = (d - 1)
                .checked_mul(s)
                .and_then(|step| last.checked_add(step))
                .ok_or_else(|| Error::Allocation("stride arithmetic overflows".to_string()))?;
        }
        if last >= extent {
            return Err(Error::ExtentOutOfBounds {
                offset: last,
                extent,
            });
        }
        Ok(())
    }
}

fn numeric_width(dtype: DType) -> Result<usize> {
    dtype.byte_width().ok_or(Error::DTypeMismatch {
        expected: DType::U8,
        got: dtype,
    })
}

fn check_count(shape: &Shape, got: usize) -> Result<()> {
    let expected = shape
        .checked_numel()
        .ok_or_else(|| Error::Allocation(format!("element count of {shape} overflows")))?;
    if expected != got {
        return Err(Error::ElementCountMismatch {
            shape: shape.clone(),
            expected,
            got,
        });
    }
    Ok(())
}

/// Walks a strided layout in row-major logical order, yielding buffer
/// offsets.
pub struct StridedIndex<'a> {
    dims: &'a [usize],
    strides: &'a [usize],
    index: SmallVec<[usize; 6]>,
    next: Option<usize>,
}

impl<'a> StridedIndex<'a> {
    pub fn new(dims: &'a [usize], strides: &'a [usize]) -> Self {
        let next = if dims.contains(&0) { None } else { Some(0) };
        Self {
            dims,
            strides,
            index: SmallVec::from_elem(0, dims.len()),
            next,
        }
    }
}

impl Iterator for StridedIndex<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let current = self.next?;
        let mut offset = current;
        let mut axis = self.dims.len();
        loop {
            if axis == 0 {
                self.next = None;
                break;
            }
            axis -= 1;
            if self.index[axis] + 1 < self.dims[axis] {
                self.index[axis] += 1;
                offset += self.strides[axis];
                self.next = Some(offset);
                break;
            }
            offset -= self.index[axis] * self.strides[axis];
            self.index[axis] = 0;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_strides() {
        assert_eq!(Shape::from([2, 3, 4]).contiguous_strides().as_slice(), &[12, 4, 1]);
        assert!(Shape::from([]).contiguous_strides().is_empty());
        assert_eq!(Shape::from([]).numel(), 1);
        assert_eq!(Shape::from([3, 0]).numel(), 0);
    }

    #[test]
    fn create_sizes_buffer_exactly() {
        let t = RtTensor::create([2, 3], DType::I32).unwrap();
        assert_eq!(t.rank(), 2);
        assert_eq!(t.ownership(), Ownership::Owned);
        let DataRef::Bytes(bytes) = t.view().data else {
            panic!("numeric tensor should be byte backed");
        };
        assert_eq!(bytes.len(), 24);

        let s = RtTensor::create([4], DType::String).unwrap();
        assert_eq!(s.to_strings().unwrap(), vec![String::new(); 4]);
    }

    #[test]
    fn create_rejects_overflow() {
        let err = RtTensor::create([usize::MAX, 2], DType::F32).unwrap_err();
        assert!(matches!(err, Error::Allocation(_)));
        let err = RtTensor::create([usize::MAX / 2], DType::F64).unwrap_err();
        assert!(matches!(err, Error::Allocation(_)));
    }

    #[test]
    fn strided_view_reads_transposed() {
        let data: Vec<i64> = (0..6).collect();
        let t = RtTensor::from_slice([2, 3], &data).unwrap();
        // Same buffer read as a 3x2 transpose.
        let bytes = match t.storage() {
            TensorStorage::Bytes(b) => b.clone(),
            _ => unreachable!(),
        };
        let tt = RtTensor::borrowed(DType::I64, [3, 2], &bytes)
            .unwrap()
            .with_strides(&[1, 3])
            .unwrap();
        assert!(!tt.is_contiguous());
        assert_eq!(tt.to_vec::<i64>().unwrap(), vec![0, 3, 1, 4, 2, 5]);
        let owned = tt.into_owned();
        assert!(owned.is_contiguous());
        assert_eq!(owned.to_vec::<i64>().unwrap(), vec![0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn strides_past_extent_are_rejected() {
        let buf = [0u8; 16];
        let err = RtTensor::borrowed(DType::I32, [2, 2], &buf)
            .unwrap()
            .with_strides(&[4, 1])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ExtentOutOfBounds {
                offset: 5,
                extent: 4
            }
        ));
        assert!(RtTensor::borrowed(DType::I32, [5], &buf).is_err());
    }

    #[test]
    fn broadcast_stride_zero_is_allowed() {
        let t = RtTensor::from_slice([3], &[1.0f32, 2.0, 3.0]).unwrap();
        let bytes = match t.storage() {
            TensorStorage::Bytes(b) => b.clone(),
            _ => unreachable!(),
        };
        assert!(RtTensor::borrowed(DType::F32, [2, 3], &bytes[..]).is_err());
        let rows = RtTensor::borrowed(DType::F32, [3], &bytes[..])
            .unwrap()
            .with_layout([2, 3], &[0, 1])
            .unwrap();
        assert_eq!(
            rows.to_vec::<f32>().unwrap(),
            vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]
        );
    }

    #[test]
    fn destroy_owned_and_borrowed() {
        let owned = RtTensor::from_slice([3], &[1i64, 2, 3]).unwrap();
        assert_eq!(owned.destroy(), Released::Owned { elements: 3 });

        let empty = RtTensor::create([0, 4], DType::F32).unwrap();
        assert_eq!(empty.destroy(), Released::Owned { elements: 0 });

        let caller = vec!["a".to_string(), "b".to_string()];
        let borrowed = RtTensor::borrowed_strings([2], &caller).unwrap();
        assert_eq!(borrowed.ownership(), Ownership::Borrowed);
        assert_eq!(borrowed.destroy(), Released::Borrowed);
        assert_eq!(caller, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn shared_buffer_is_released_once() {
        let a = RtTensor::from_slice([3], &[1i64, 2, 3]).unwrap();
        let b = a.clone();
        assert_eq!(a.destroy(), Released::Shared);
        assert_eq!(b.to_vec::<i64>().unwrap(), [1, 2, 3]);
        assert_eq!(b.destroy(), Released::Owned { elements: 3 });

        // Cloned strings are deep copies, each freed by its own descriptor.
        let s = RtTensor::from_strings([1], vec!["x".into()]).unwrap();
        let t = s.clone();
        assert_eq!(s.destroy(), Released::Owned { elements: 1 });
        assert_eq!(t.destroy(), Released::Owned { elements: 1 });
    }

    #[test]
    fn generated_data_is_deterministic_with_seed() {
        let a = RtTensor::with_generated_data([4, 2], DType::F32, Some(7)).unwrap();
        let b = RtTensor::with_generated_data([4, 2], DType::F32, Some(7)).unwrap();
        assert_eq!(a.to_vec::<f32>().unwrap(), b.to_vec::<f32>().unwrap());
        assert!(a.to_vec::<f32>().unwrap().iter().all(|v| (-1.0..1.0).contains(v)));

        let s = RtTensor::with_generated_data([3], DType::String, Some(1)).unwrap();
        assert_eq!(s.to_strings().unwrap().len(), 3);
    }

    #[test]
    fn typed_read_checks_dtype() {
        let t = RtTensor::from_slice([2], &[1i32, 2]).unwrap();
        assert!(matches!(
            t.to_vec::<i64>(),
            Err(Error::DTypeMismatch { .. })
        ));
        assert!(t.to_strings().is_err());
    }

    #[test]
    fn element_count_is_checked() {
        let err = RtTensor::from_slice([2, 2], &[1u8, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            Error::ElementCountMismatch {
                expected: 4,
                got: 3,
                ..
            }
        ));
    }
}
