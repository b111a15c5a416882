//! Granules stored as Zarr V3 groups on the local filesystem.
//!
//! A granule is a group whose attributes are the granule header and whose
//! child arrays are the granule variables, one row per grid point.

use std::collections::BTreeMap;
use std::sync::Arc;

use num_traits::ToPrimitive;
use smos_common::{with_array_data, ArrayData, AttrValue, Attrs, DType};
use zarrs::array::Array;
use zarrs::array_subset::ArraySubset;
use zarrs::group::Group;
use zarrs_filesystem::FilesystemStore;

use super::{mask_and_scale, DatasetOpener, OpenerKwargs, SourceDataset, VariableInfo};
use crate::error::{L2CubeError, Result};

/// Opens granules written as Zarr V3 groups.
///
/// Values are returned as stored. With the `mask_and_scale` keyword set,
/// variables are decoded the CF way instead: values equal to `_FillValue`
/// become NaN and `scale_factor`/`add_offset` are applied, yielding
/// float64 arrays.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZarrDatasetOpener;

impl DatasetOpener for ZarrDatasetOpener {
    fn open(&self, path: &str, kwargs: &OpenerKwargs) -> Result<Box<dyn SourceDataset>> {
        Ok(Box::new(ZarrDataset::open(path, mask_and_scale(kwargs))?))
    }
}

struct ZarrVariable {
    array: Array<FilesystemStore>,
    info: VariableInfo,
}

struct ZarrDataset {
    path: String,
    attrs: Attrs,
    variables: BTreeMap<String, ZarrVariable>,
    decode: bool,
    closed: bool,
}

fn json_attrs(map: &serde_json::Map<String, serde_json::Value>) -> Attrs {
    map.iter()
        .map(|(k, v)| (k.clone(), AttrValue::from_json(v)))
        .collect()
}

impl ZarrDataset {
    fn open(path: &str, decode: bool) -> Result<Self> {
        let open_error = |e: &dyn std::fmt::Display| L2CubeError::source_io(format!("{path}: {e}"));

        let store = Arc::new(FilesystemStore::new(path).map_err(|e| open_error(&e))?);
        let group = Group::open(store.clone(), "/").map_err(|e| open_error(&e))?;
        let attrs = json_attrs(group.attributes());

        let mut variables = BTreeMap::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let array = match Array::open(store.clone(), &format!("/{name}")) {
                Ok(array) => array,
                Err(e) => {
                    tracing::debug!(path, name = %name, error = %e, "Skipping non-array node");
                    continue;
                }
            };
            let dtype = match DType::parse(array.data_type().identifier()) {
                Ok(dtype) => dtype,
                Err(e) => {
                    tracing::debug!(path, name = %name, error = %e, "Skipping variable");
                    continue;
                }
            };
            let info = VariableInfo {
                dtype,
                shape: array.shape().iter().map(|&n| n as usize).collect(),
                attrs: json_attrs(array.attributes()),
            };
            variables.insert(name, ZarrVariable { array, info });
        }

        tracing::debug!(path, variables = variables.len(), decode, "Opened Zarr granule");

        Ok(Self {
            path: path.to_string(),
            attrs,
            variables,
            decode,
            closed: false,
        })
    }

    fn decoded_info(&self, info: &VariableInfo) -> VariableInfo {
        if !self.decode || !has_cf_encoding(&info.attrs) {
            return info.clone();
        }
        let mut attrs = info.attrs.clone();
        for key in ["_FillValue", "scale_factor", "add_offset"] {
            attrs.remove(key);
        }
        VariableInfo {
            dtype: DType::Float64,
            shape: info.shape.clone(),
            attrs,
        }
    }
}

macro_rules! retrieve_as {
    ($array:expr, $subset:expr, $t:ty) => {
        ArrayData::from(
            $array
                .retrieve_array_subset_elements::<$t>($subset)
                .map_err(|e| L2CubeError::source_io(e.to_string()))?,
        )
    };
}

impl SourceDataset for ZarrDataset {
    fn path(&self) -> &str {
        &self.path
    }

    fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    fn variable_names(&self) -> Vec<String> {
        self.variables.keys().cloned().collect()
    }

    fn variable(&self, name: &str) -> Option<VariableInfo> {
        self.variables.get(name).map(|v| self.decoded_info(&v.info))
    }

    fn read_values(&self, name: &str) -> Result<ArrayData> {
        if self.closed {
            return Err(L2CubeError::source_io(format!("{} is closed", self.path)));
        }
        let variable = self
            .variables
            .get(name)
            .ok_or_else(|| L2CubeError::unknown_variable(name, &self.path))?;

        let array = &variable.array;
        let subset = ArraySubset::new_with_shape(array.shape().to_vec());
        let values = match variable.info.dtype {
            DType::Int8 => retrieve_as!(array, &subset, i8),
            DType::Int16 => retrieve_as!(array, &subset, i16),
            DType::Int32 => retrieve_as!(array, &subset, i32),
            DType::Int64 => retrieve_as!(array, &subset, i64),
            DType::UInt8 => retrieve_as!(array, &subset, u8),
            DType::UInt16 => retrieve_as!(array, &subset, u16),
            DType::UInt32 => retrieve_as!(array, &subset, u32),
            DType::UInt64 => retrieve_as!(array, &subset, u64),
            DType::Float32 => retrieve_as!(array, &subset, f32),
            DType::Float64 => retrieve_as!(array, &subset, f64),
        };
        tracing::trace!(path = %self.path, name, len = values.len(), "Read granule variable");

        if self.decode && has_cf_encoding(&variable.info.attrs) {
            Ok(cf_decode(&values, &variable.info.attrs))
        } else {
            Ok(values)
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.variables.clear();
    }
}

fn has_cf_encoding(attrs: &Attrs) -> bool {
    ["_FillValue", "scale_factor", "add_offset"]
        .iter()
        .any(|key| attrs.contains_key(*key))
}

fn scalar_attr(attrs: &Attrs, name: &str) -> Option<f64> {
    attrs.get(name).and_then(AttrValue::as_scalar).map(|s| s.as_f64())
}

/// Mask fill values as NaN and apply scale and offset.
fn cf_decode(values: &ArrayData, attrs: &Attrs) -> ArrayData {
    let fill = scalar_attr(attrs, "_FillValue");
    let scale = scalar_attr(attrs, "scale_factor").unwrap_or(1.0);
    let offset = scalar_attr(attrs, "add_offset").unwrap_or(0.0);
    let decoded: Vec<f64> = with_array_data!(values, v => v
        .iter()
        .map(|x| {
            let x = x.to_f64().unwrap_or(f64::NAN);
            if fill.is_some_and(|f| f == x) {
                f64::NAN
            } else {
                x * scale + offset
            }
        })
        .collect());
    ArrayData::Float64(decoded)
}
