//! Error types for L2 cube construction and chunk loading.

use smos_common::CommonError;
use thiserror::Error;

/// Errors that can occur while remapping L2 granules onto the DGG.
#[derive(Error, Debug)]
pub enum L2CubeError {
    /// Grid point identifiers outside the valid seqnum range.
    ///
    /// Almost always caused by opening the granule with CF fill-value
    /// decoding enabled, which turns identifier columns into floats.
    #[error(
        "seqnum range [{min}, {max}] outside valid range [{valid_min}, {valid_max}]; \
         open the granule without CF fill-value decoding"
    )]
    OutOfRangeSeqnum {
        min: u64,
        max: u64,
        valid_min: u64,
        valid_max: u64,
    },

    /// A chunk request that the cube layout never produces.
    #[error("chunk contract violation: {0}")]
    ChunkContractViolation(String),

    /// Failure reading a granule or a DGG tile.
    #[error("source I/O error: {0}")]
    SourceIo(String),

    /// Variable not present in the source granule.
    #[error("unknown variable '{name}' in {path}")]
    UnknownVariable { name: String, path: String },

    /// DGG level outside `0..num_levels`.
    #[error("invalid level {level}, must be in range 0..{num_levels}")]
    InvalidLevel { level: usize, num_levels: usize },

    /// DGG tile payload that does not match its declared shape.
    #[error("invalid DGG tile: {0}")]
    InvalidTile(String),

    /// Use of an L2 product after it was disposed.
    #[error("L2 product already disposed: {0}")]
    Disposed(String),

    /// No granules match a cube query.
    #[error("empty dataset: {0}")]
    EmptyDataset(String),

    /// Bounding box that does not select any grid cell.
    #[error("invalid spatial subset: {0}")]
    InvalidSubset(String),

    /// Element type mismatch.
    #[error("data type error: {0}")]
    DataType(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed array or dataset metadata.
    #[error("metadata error: {0}")]
    Metadata(String),

    /// Zarr format error.
    #[error("Zarr format error: {0}")]
    Zarr(String),

    /// Errors from the common types.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl L2CubeError {
    /// Create a SourceIo error.
    pub fn source_io(msg: impl Into<String>) -> Self {
        Self::SourceIo(msg.into())
    }

    /// Create a ChunkContractViolation error.
    pub fn chunk_contract(msg: impl Into<String>) -> Self {
        Self::ChunkContractViolation(msg.into())
    }

    /// Create a Config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a Metadata error.
    pub fn metadata(msg: impl Into<String>) -> Self {
        Self::Metadata(msg.into())
    }

    /// Create a Zarr error.
    pub fn zarr(msg: impl Into<String>) -> Self {
        Self::Zarr(msg.into())
    }

    /// Create an UnknownVariable error.
    pub fn unknown_variable(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::UnknownVariable {
            name: name.into(),
            path: path.into(),
        }
    }
}

impl From<std::io::Error> for L2CubeError {
    fn from(err: std::io::Error) -> Self {
        Self::SourceIo(err.to_string())
    }
}

impl From<zip::result::ZipError> for L2CubeError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::SourceIo(err.to_string())
    }
}

impl From<serde_json::Error> for L2CubeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Metadata(err.to_string())
    }
}

impl From<serde_yaml::Error> for L2CubeError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type for L2 cube operations.
pub type Result<T> = std::result::Result<T, L2CubeError>;
