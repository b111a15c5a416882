//! Element types and plain scalar values.

use num_traits::NumCast;
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

/// Element type of a dense array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

impl DType {
    /// Whether this is a floating-point type.
    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Whether this is an unsigned integer type.
    pub fn is_unsigned(&self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    /// Lower-case type name, e.g. "uint32".
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    /// Parse a type name (case-insensitive).
    pub fn parse(s: &str) -> CommonResult<Self> {
        let dtype = match s.to_lowercase().as_str() {
            "int8" => Self::Int8,
            "int16" => Self::Int16,
            "int32" => Self::Int32,
            "int64" => Self::Int64,
            "uint8" => Self::UInt8,
            "uint16" => Self::UInt16,
            "uint32" => Self::UInt32,
            "uint64" => Self::UInt64,
            "float32" => Self::Float32,
            "float64" => Self::Float64,
            other => return Err(CommonError::data_type(format!("unsupported dtype '{other}'"))),
        };
        Ok(dtype)
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A plain numeric or boolean value, e.g. a fill value or an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Scalar {
    /// Default fill value for variables that declare none:
    /// NaN for floating-point types, zero otherwise.
    pub fn default_fill(dtype: DType) -> Self {
        if dtype.is_float() {
            Self::Float(f64::NAN)
        } else {
            Self::Int(0)
        }
    }

    /// Convert into an element of type `T`.
    ///
    /// Returns `None` if the value is not representable, e.g. NaN for an
    /// integer type or a negative value for an unsigned type.
    pub fn cast<T: NumCast>(&self) -> Option<T> {
        match *self {
            Self::Bool(b) => T::from(b as u8),
            Self::Int(v) => T::from(v),
            Self::UInt(v) => T::from(v),
            Self::Float(v) => T::from(v),
        }
    }

    /// Like [`Scalar::cast`], but with a descriptive error.
    pub fn cast_to<T: NumCast>(&self, dtype: DType) -> CommonResult<T> {
        self.cast::<T>().ok_or_else(|| {
            CommonError::data_type(format!("value {self} is not representable as {dtype}"))
        })
    }

    /// Value as f64 (booleans become 0 or 1).
    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Bool(b) => b as u8 as f64,
            Self::Int(v) => v as f64,
            Self::UInt(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    /// Whether this is a floating-point NaN.
    pub fn is_nan(&self) -> bool {
        matches!(self, Self::Float(v) if v.is_nan())
    }

    /// Plain JSON representation.
    ///
    /// Non-finite floats are written as the strings "NaN", "Infinity" and
    /// "-Infinity", which is how Zarr metadata spells them.
    pub fn to_json(&self) -> serde_json::Value {
        match *self {
            Self::Bool(b) => serde_json::Value::Bool(b),
            Self::Int(v) => serde_json::Value::from(v),
            Self::UInt(v) => serde_json::Value::from(v),
            Self::Float(v) if v.is_nan() => serde_json::Value::from("NaN"),
            Self::Float(v) if v == f64::INFINITY => serde_json::Value::from("Infinity"),
            Self::Float(v) if v == f64::NEG_INFINITY => serde_json::Value::from("-Infinity"),
            Self::Float(v) => serde_json::Value::from(v),
        }
    }

    /// Parse from JSON, accepting the spellings produced by [`Scalar::to_json`].
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(v) = n.as_u64() {
                    Some(Self::UInt(v))
                } else if let Some(v) = n.as_i64() {
                    Some(Self::Int(v))
                } else {
                    n.as_f64().map(Self::Float)
                }
            }
            serde_json::Value::String(s) => match s.as_str() {
                "NaN" => Some(Self::Float(f64::NAN)),
                "Infinity" => Some(Self::Float(f64::INFINITY)),
                "-Infinity" => Some(Self::Float(f64::NEG_INFINITY)),
                _ => None,
            },
            _ => None,
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}
