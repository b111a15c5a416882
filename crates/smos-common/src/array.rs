//! Dense in-memory arrays with a runtime element type.

use num_traits::{NumCast, ToPrimitive};

use crate::dtype::{DType, Scalar};
use crate::error::{CommonError, CommonResult};

/// Flat, row-major element buffer tagged with its element type.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

/// Run `$body` with `$v` bound to the typed vector inside an [`ArrayData`].
#[macro_export]
macro_rules! with_array_data {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            $crate::ArrayData::Int8($v) => $body,
            $crate::ArrayData::Int16($v) => $body,
            $crate::ArrayData::Int32($v) => $body,
            $crate::ArrayData::Int64($v) => $body,
            $crate::ArrayData::UInt8($v) => $body,
            $crate::ArrayData::UInt16($v) => $body,
            $crate::ArrayData::UInt32($v) => $body,
            $crate::ArrayData::UInt64($v) => $body,
            $crate::ArrayData::Float32($v) => $body,
            $crate::ArrayData::Float64($v) => $body,
        }
    };
}

/// Primitive element types that can live in an [`ArrayData`].
pub trait Element: Copy + Send + Sync + NumCast + ToPrimitive + 'static {
    const DTYPE: DType;

    /// Borrow the typed buffer if `data` holds this element type.
    fn slice(data: &ArrayData) -> Option<&[Self]>;

    /// Wrap a typed buffer.
    fn wrap(values: Vec<Self>) -> ArrayData;
}

macro_rules! impl_element {
    ($t:ty, $variant:ident) => {
        impl Element for $t {
            const DTYPE: DType = DType::$variant;

            fn slice(data: &ArrayData) -> Option<&[Self]> {
                match data {
                    ArrayData::$variant(v) => Some(v.as_slice()),
                    _ => None,
                }
            }

            fn wrap(values: Vec<Self>) -> ArrayData {
                ArrayData::$variant(values)
            }
        }

        impl From<Vec<$t>> for ArrayData {
            fn from(values: Vec<$t>) -> Self {
                ArrayData::$variant(values)
            }
        }
    };
}

impl_element!(i8, Int8);
impl_element!(i16, Int16);
impl_element!(i32, Int32);
impl_element!(i64, Int64);
impl_element!(u8, UInt8);
impl_element!(u16, UInt16);
impl_element!(u32, UInt32);
impl_element!(u64, UInt64);
impl_element!(f32, Float32);
impl_element!(f64, Float64);

fn filled_vec<T: Element>(len: usize, fill: Scalar) -> CommonResult<ArrayData> {
    let value: T = fill.cast_to(T::DTYPE)?;
    Ok(T::wrap(vec![value; len]))
}

impl ArrayData {
    /// Element type.
    pub fn dtype(&self) -> DType {
        match self {
            Self::Int8(_) => DType::Int8,
            Self::Int16(_) => DType::Int16,
            Self::Int32(_) => DType::Int32,
            Self::Int64(_) => DType::Int64,
            Self::UInt8(_) => DType::UInt8,
            Self::UInt16(_) => DType::UInt16,
            Self::UInt32(_) => DType::UInt32,
            Self::UInt64(_) => DType::UInt64,
            Self::Float32(_) => DType::Float32,
            Self::Float64(_) => DType::Float64,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        with_array_data!(self, v => v.len())
    }

    /// Check if there are no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty buffer of the given type.
    pub fn empty(dtype: DType) -> Self {
        match dtype {
            DType::Int8 => Self::Int8(Vec::new()),
            DType::Int16 => Self::Int16(Vec::new()),
            DType::Int32 => Self::Int32(Vec::new()),
            DType::Int64 => Self::Int64(Vec::new()),
            DType::UInt8 => Self::UInt8(Vec::new()),
            DType::UInt16 => Self::UInt16(Vec::new()),
            DType::UInt32 => Self::UInt32(Vec::new()),
            DType::UInt64 => Self::UInt64(Vec::new()),
            DType::Float32 => Self::Float32(Vec::new()),
            DType::Float64 => Self::Float64(Vec::new()),
        }
    }

    /// Buffer of `len` copies of `fill`, converted to `dtype`.
    pub fn filled(dtype: DType, len: usize, fill: Scalar) -> CommonResult<Self> {
        match dtype {
            DType::Int8 => filled_vec::<i8>(len, fill),
            DType::Int16 => filled_vec::<i16>(len, fill),
            DType::Int32 => filled_vec::<i32>(len, fill),
            DType::Int64 => filled_vec::<i64>(len, fill),
            DType::UInt8 => filled_vec::<u8>(len, fill),
            DType::UInt16 => filled_vec::<u16>(len, fill),
            DType::UInt32 => filled_vec::<u32>(len, fill),
            DType::UInt64 => filled_vec::<u64>(len, fill),
            DType::Float32 => filled_vec::<f32>(len, fill),
            DType::Float64 => filled_vec::<f64>(len, fill),
        }
    }

    /// Borrow as a typed slice.
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::slice(self)
    }

    /// Element at `index` as f64.
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        with_array_data!(self, v => v.get(index).and_then(|x| x.to_f64()))
    }

}

/// A dense array: element buffer plus shape.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    pub data: ArrayData,
    pub shape: Vec<usize>,
}

impl NdArray {
    /// Create an array, checking that the shape covers all elements.
    pub fn new(data: ArrayData, shape: Vec<usize>) -> CommonResult<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(CommonError::ShapeMismatch {
                len: data.len(),
                shape,
            });
        }
        Ok(Self { data, shape })
    }

    /// Element type.
    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow the elements as a typed slice.
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        self.data.as_slice()
    }
}
