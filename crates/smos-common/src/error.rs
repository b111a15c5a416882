//! Error types for the common crate.

use thiserror::Error;

/// Result type for common operations.
pub type CommonResult<T> = Result<T, CommonError>;

/// Errors raised while handling arrays, scalars and time values.
#[derive(Error, Debug)]
pub enum CommonError {
    /// The element type of an array does not fit the operation.
    #[error("data type error: {0}")]
    DataType(String),

    /// Array length and declared shape disagree.
    #[error("shape mismatch: {len} elements cannot have shape {shape:?}")]
    ShapeMismatch { len: usize, shape: Vec<usize> },

    /// A time string could not be parsed.
    #[error("invalid time format: {0}")]
    InvalidTime(String),

    /// A required attribute is missing.
    #[error("missing attribute '{0}'")]
    MissingAttribute(String),

    /// Unknown dataset identifier.
    #[error("unknown dataset identifier '{0}'")]
    UnknownDataset(String),
}

impl CommonError {
    /// Create a DataType error.
    pub fn data_type(msg: impl Into<String>) -> Self {
        Self::DataType(msg.into())
    }

    /// Create an InvalidTime error.
    pub fn invalid_time(msg: impl Into<String>) -> Self {
        Self::InvalidTime(msg.into())
    }
}
