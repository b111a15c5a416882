//! Opened L2 granules and the openers that produce them.

mod memory;
mod zarr;

pub use memory::{MemoryDataset, MemoryOpener};
pub use zarr::ZarrDatasetOpener;

use smos_common::{AttrValue, Attrs, DType, Scalar};

use crate::error::Result;

/// Name of the variable holding the grid point id of every granule row.
pub const GRID_POINT_ID: &str = "Grid_Point_ID";

/// Keyword arguments of a [`DatasetOpener`].
pub type OpenerKwargs = serde_json::Map<String, serde_json::Value>;

/// Metadata of one granule variable.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableInfo {
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub attrs: Attrs,
}

impl VariableInfo {
    /// The declared `_FillValue`, if any.
    pub fn fill_value(&self) -> Option<Scalar> {
        self.attrs.get("_FillValue").and_then(AttrValue::as_scalar)
    }
}

/// An opened L2 granule.
///
/// Values are read as stored: no fill-value or scale decoding is applied
/// unless the opener was asked for it.
pub trait SourceDataset: Send + Sync {
    /// Location the dataset was opened from.
    fn path(&self) -> &str;

    /// Global attributes.
    fn attrs(&self) -> &Attrs;

    /// Names of all variables.
    fn variable_names(&self) -> Vec<String>;

    /// Metadata of variable `name`.
    fn variable(&self, name: &str) -> Option<VariableInfo>;

    /// Read all values of variable `name`.
    fn read_values(&self, name: &str) -> Result<smos_common::ArrayData>;

    /// Release the resources held by the dataset.
    fn close(&mut self) {}
}

/// Opens granules by path.
pub trait DatasetOpener: Send + Sync {
    fn open(&self, path: &str, kwargs: &OpenerKwargs) -> Result<Box<dyn SourceDataset>>;
}

/// Whether `kwargs` ask for CF mask-and-scale decoding.
pub(crate) fn mask_and_scale(kwargs: &OpenerKwargs) -> bool {
    kwargs
        .get("mask_and_scale")
        .or_else(|| kwargs.get("decode_cf"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}
