//! Virtual chunked arrays and the datasets built from them.
//!
//! A [`VirtualArray`] is either a small eager array (coordinates) or a
//! declaration `{shape, chunk_shape, dtype, fill_value}` plus a
//! [`ChunkLoader`] that computes one chunk on request. Declaring an array
//! does no work; bytes are produced only by [`VirtualArray::read_chunk`]
//! and [`VirtualArray::read`].

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use rayon::prelude::*;
use smos_common::{ArrayData, Attrs, BoundingBox, NdArray, Scalar};

use crate::error::{L2CubeError, Result};
use crate::types::{ArrayInfo, ChunkInfo};

/// Computes single chunks of a virtual array.
///
/// Implementations may be called concurrently from several threads, for
/// different chunks of the same array.
pub trait ChunkLoader: Send + Sync {
    /// Compute the chunk described by `chunk` of the array `array`.
    ///
    /// The result must have shape `chunk.shape` and dtype `array.dtype`.
    fn load_chunk(&self, array: &ArrayInfo, chunk: &ChunkInfo) -> Result<NdArray>;
}

/// Where the elements of a [`VirtualArray`] come from.
#[derive(Clone)]
pub enum ArraySource {
    /// Elements held in memory, stored as a single chunk.
    Eager(ArrayData),
    /// Elements computed per chunk.
    Lazy(Arc<dyn ChunkLoader>),
}

/// A named, chunked array whose chunks may be computed on demand.
#[derive(Clone)]
pub struct VirtualArray {
    info: ArrayInfo,
    attrs: Attrs,
    source: ArraySource,
}

impl VirtualArray {
    /// Wrap in-memory data as a single-chunk array.
    pub fn eager(
        name: impl Into<String>,
        dims: &[&str],
        shape: Vec<usize>,
        data: ArrayData,
        attrs: Attrs,
    ) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if dims.len() != shape.len() || expected != data.len() {
            return Err(L2CubeError::metadata(format!(
                "array with dims {dims:?} and shape {shape:?} cannot hold {} elements",
                data.len()
            )));
        }
        let info = ArrayInfo {
            name: name.into(),
            dtype: data.dtype(),
            dims: dims.iter().map(|d| d.to_string()).collect(),
            chunk_shape: shape.clone(),
            shape,
            fill_value: None,
        };
        Ok(Self {
            info,
            attrs,
            source: ArraySource::Eager(data),
        })
    }

    /// Declare an array whose chunks are computed by `loader`.
    pub fn lazy(info: ArrayInfo, attrs: Attrs, loader: Arc<dyn ChunkLoader>) -> Self {
        Self {
            info,
            attrs,
            source: ArraySource::Lazy(loader),
        }
    }

    /// Set the fill value recorded for the array.
    pub fn with_fill_value(mut self, fill_value: Option<Scalar>) -> Self {
        self.info.fill_value = fill_value;
        self
    }

    pub fn info(&self) -> &ArrayInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.info.shape
    }

    pub fn dims(&self) -> &[String] {
        &self.info.dims
    }

    pub fn fill_value(&self) -> Option<Scalar> {
        self.info.fill_value
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    pub fn source(&self) -> &ArraySource {
        &self.source
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self.source, ArraySource::Lazy(_))
    }

    /// Compute or copy the chunk at `index`.
    pub fn read_chunk(&self, index: &[usize]) -> Result<NdArray> {
        let chunk = self.info.chunk(index).ok_or_else(|| {
            L2CubeError::chunk_contract(format!(
                "chunk index {index:?} outside chunk grid {:?} of '{}'",
                self.info.chunk_counts(),
                self.info.name
            ))
        })?;

        match &self.source {
            ArraySource::Eager(data) => Ok(NdArray::new(data.clone(), self.info.shape.clone())?),
            ArraySource::Lazy(loader) => {
                tracing::trace!(array = %self.info.name, chunk = ?chunk.index, "Loading chunk");
                let array = loader.load_chunk(&self.info, &chunk)?;
                if array.shape != chunk.shape {
                    return Err(L2CubeError::chunk_contract(format!(
                        "chunk {:?} of '{}' has shape {:?}, expected {:?}",
                        chunk.index, self.info.name, array.shape, chunk.shape
                    )));
                }
                if array.dtype() != self.info.dtype {
                    return Err(L2CubeError::DataType(format!(
                        "chunk {:?} of '{}' has dtype {}, expected {}",
                        chunk.index,
                        self.info.name,
                        array.dtype(),
                        self.info.dtype
                    )));
                }
                Ok(array)
            }
        }
    }

    /// Materialize the whole array. Chunks are computed in parallel.
    pub fn read(&self) -> Result<NdArray> {
        if let ArraySource::Eager(data) = &self.source {
            return Ok(NdArray::new(data.clone(), self.info.shape.clone())?);
        }

        let chunks = self.info.chunks();
        let loaded: Vec<(ChunkInfo, NdArray)> = chunks
            .into_par_iter()
            .map(|chunk| {
                let array = self.read_chunk(&chunk.index)?;
                Ok((chunk, array))
            })
            .collect::<Result<_>>()?;

        let total: usize = self.info.shape.iter().product();
        let mut data = ArrayData::filled(self.info.dtype, total, Scalar::Int(0))?;
        for (chunk, array) in &loaded {
            let origin: Vec<usize> = chunk
                .index
                .iter()
                .zip(&self.info.chunk_shape)
                .map(|(i, c)| i * c)
                .collect();
            copy_box_data(
                &array.data,
                &array.shape,
                &vec![0; chunk.shape.len()],
                &mut data,
                &self.info.shape,
                &origin,
                &chunk.shape,
            )?;
        }
        Ok(NdArray::new(data, self.info.shape.clone())?)
    }

    /// Restrict the `lat` and `lon` dimensions to the given index ranges.
    ///
    /// Lazy arrays stay lazy: the window is applied when chunks are loaded.
    pub fn select(&self, lat: &Range<usize>, lon: &Range<usize>) -> Result<Self> {
        let ranges: Vec<Range<usize>> = self
            .info
            .dims
            .iter()
            .zip(&self.info.shape)
            .map(|(dim, &size)| match dim.as_str() {
                "lat" => lat.clone(),
                "lon" => lon.clone(),
                _ => 0..size,
            })
            .collect();

        if ranges
            .iter()
            .zip(&self.info.shape)
            .all(|(r, &size)| r.start == 0 && r.end == size)
        {
            return Ok(self.clone());
        }
        if ranges
            .iter()
            .zip(&self.info.shape)
            .any(|(r, &size)| r.start > r.end || r.end > size)
        {
            return Err(L2CubeError::InvalidSubset(format!(
                "window {ranges:?} outside shape {:?} of '{}'",
                self.info.shape, self.info.name
            )));
        }

        let shape: Vec<usize> = ranges.iter().map(|r| r.len()).collect();
        let origin: Vec<usize> = ranges.iter().map(|r| r.start).collect();

        match &self.source {
            ArraySource::Eager(data) => {
                let mut out = ArrayData::filled(data.dtype(), shape.iter().product(), Scalar::Int(0))?;
                copy_box_data(
                    data,
                    &self.info.shape,
                    &origin,
                    &mut out,
                    &shape,
                    &vec![0; shape.len()],
                    &shape,
                )?;
                let mut info = self.info.clone();
                info.chunk_shape = shape.clone();
                info.shape = shape;
                Ok(Self {
                    info,
                    attrs: self.attrs.clone(),
                    source: ArraySource::Eager(out),
                })
            }
            ArraySource::Lazy(inner) => {
                let chunk_shape = self
                    .info
                    .dims
                    .iter()
                    .zip(self.info.chunk_shape.iter().zip(&shape))
                    .map(|(dim, (&chunk, &size))| match dim.as_str() {
                        "lat" | "lon" => size,
                        _ => chunk,
                    })
                    .collect();
                let info = ArrayInfo {
                    shape,
                    chunk_shape,
                    ..self.info.clone()
                };
                let loader = WindowLoader {
                    inner: inner.clone(),
                    inner_info: self.info.clone(),
                    origin,
                };
                Ok(Self::lazy(info, self.attrs.clone(), Arc::new(loader)))
            }
        }
    }
}

impl fmt::Debug for VirtualArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualArray")
            .field("info", &self.info)
            .field("lazy", &self.is_lazy())
            .finish()
    }
}

/// Loads chunks of a window into another array.
struct WindowLoader {
    inner: Arc<dyn ChunkLoader>,
    inner_info: ArrayInfo,
    /// Window start in inner array coordinates.
    origin: Vec<usize>,
}

impl ChunkLoader for WindowLoader {
    fn load_chunk(&self, array: &ArrayInfo, chunk: &ChunkInfo) -> Result<NdArray> {
        let ndim = chunk.shape.len();
        // chunk region in inner coordinates
        let start: Vec<usize> = (0..ndim)
            .map(|d| chunk.index[d] * array.chunk_shape[d] + self.origin[d])
            .collect();
        let first: Vec<usize> = (0..ndim)
            .map(|d| start[d] / self.inner_info.chunk_shape[d])
            .collect();
        let last: Vec<usize> = (0..ndim)
            .map(|d| (start[d] + chunk.shape[d]).saturating_sub(1) / self.inner_info.chunk_shape[d])
            .collect();

        let mut out = ArrayData::filled(array.dtype, chunk.len(), Scalar::Int(0))?;
        let mut index = first.clone();
        loop {
            let inner_chunk = self.inner_info.chunk(&index).ok_or_else(|| {
                L2CubeError::chunk_contract(format!(
                    "window chunk {index:?} outside '{}'",
                    self.inner_info.name
                ))
            })?;
            let inner = self.inner.load_chunk(&self.inner_info, &inner_chunk)?;

            let mut src_origin = Vec::with_capacity(ndim);
            let mut dest_origin = Vec::with_capacity(ndim);
            let mut extent = Vec::with_capacity(ndim);
            for d in 0..ndim {
                let inner_start = index[d] * self.inner_info.chunk_shape[d];
                let lo = start[d].max(inner_start);
                let hi = (start[d] + chunk.shape[d]).min(inner_start + inner_chunk.shape[d]);
                src_origin.push(lo - inner_start);
                dest_origin.push(lo - start[d]);
                extent.push(hi.saturating_sub(lo));
            }
            copy_box_data(
                &inner.data,
                &inner.shape,
                &src_origin,
                &mut out,
                &chunk.shape,
                &dest_origin,
                &extent,
            )?;

            // advance to the next inner chunk, last dimension fastest
            let mut d = ndim;
            loop {
                if d == 0 {
                    return Ok(NdArray::new(out, chunk.shape.clone())?);
                }
                d -= 1;
                if index[d] < last[d] {
                    index[d] += 1;
                    break;
                }
                index[d] = first[d];
            }
        }
    }
}

/// Copy the box `extent` at `src_origin` of `src` to `dest_origin` of `dest`.
fn copy_box<T: Copy>(
    src: &[T],
    src_shape: &[usize],
    src_origin: &[usize],
    dest: &mut [T],
    dest_shape: &[usize],
    dest_origin: &[usize],
    extent: &[usize],
) {
    let n = extent.len();
    if n == 0 || extent.contains(&0) {
        return;
    }
    let row_len = extent[n - 1];
    let outer: usize = extent[..n - 1].iter().product();
    let mut idx = vec![0usize; n - 1];
    for _ in 0..outer {
        let mut s = 0;
        let mut d = 0;
        for k in 0..n {
            let i = if k < n - 1 { idx[k] } else { 0 };
            s = s * src_shape[k] + src_origin[k] + i;
            d = d * dest_shape[k] + dest_origin[k] + i;
        }
        dest[d..d + row_len].copy_from_slice(&src[s..s + row_len]);
        for k in (0..n - 1).rev() {
            idx[k] += 1;
            if idx[k] < extent[k] {
                break;
            }
            idx[k] = 0;
        }
    }
}

macro_rules! copy_box_variants {
    ($src:expr, $dest:expr, |$s:ident, $d:ident| $body:expr, [$($variant:ident),*]) => {
        match ($src, $dest) {
            $((ArrayData::$variant($s), ArrayData::$variant($d)) => {
                $body;
                Ok(())
            })*
            (s, d) => Err(L2CubeError::DataType(format!(
                "cannot copy {} elements into {} array",
                s.dtype(),
                d.dtype()
            ))),
        }
    };
}

fn copy_box_data(
    src: &ArrayData,
    src_shape: &[usize],
    src_origin: &[usize],
    dest: &mut ArrayData,
    dest_shape: &[usize],
    dest_origin: &[usize],
    extent: &[usize],
) -> Result<()> {
    copy_box_variants!(
        src,
        dest,
        |s, d| copy_box(s, src_shape, src_origin, d, dest_shape, dest_origin, extent),
        [Int8, Int16, Int32, Int64, UInt8, UInt16, UInt32, UInt64, Float32, Float64]
    )
}

/// One resolution level of a multi-level dataset.
#[derive(Debug, Clone, Default)]
pub struct LevelDataset {
    pub attrs: Attrs,
    coords: BTreeMap<String, VirtualArray>,
    data_vars: BTreeMap<String, VirtualArray>,
}

impl LevelDataset {
    pub fn new(attrs: Attrs) -> Self {
        Self {
            attrs,
            ..Default::default()
        }
    }

    /// Add or replace a coordinate array.
    pub fn add_coord(&mut self, array: VirtualArray) {
        self.coords.insert(array.name().to_string(), array);
    }

    /// Add or replace a data variable.
    pub fn add_variable(&mut self, array: VirtualArray) {
        self.data_vars.insert(array.name().to_string(), array);
    }

    pub fn coord(&self, name: &str) -> Option<&VirtualArray> {
        self.coords.get(name)
    }

    pub fn variable(&self, name: &str) -> Option<&VirtualArray> {
        self.data_vars.get(name)
    }

    /// Coordinate or variable named `name`.
    pub fn get(&self, name: &str) -> Option<&VirtualArray> {
        self.coord(name).or_else(|| self.variable(name))
    }

    pub fn coord_names(&self) -> Vec<&str> {
        self.coords.keys().map(String::as_str).collect()
    }

    pub fn variable_names(&self) -> Vec<&str> {
        self.data_vars.keys().map(String::as_str).collect()
    }

    /// Coordinates followed by variables.
    pub fn arrays(&self) -> impl Iterator<Item = &VirtualArray> {
        self.coords.values().chain(self.data_vars.values())
    }

    /// Size of dimension `dim`, if any array uses it.
    pub fn dim_size(&self, dim: &str) -> Option<usize> {
        self.arrays().find_map(|a| {
            a.dims()
                .iter()
                .position(|d| d == dim)
                .map(|i| a.shape()[i])
        })
    }

    /// Materialize variable `name`.
    pub fn read_variable(&self, name: &str) -> Result<NdArray> {
        self.get(name)
            .ok_or_else(|| L2CubeError::unknown_variable(name, "level dataset"))?
            .read()
    }

    /// Select the cells whose centers lie inside `bbox`.
    ///
    /// A box covering `global_extent` up to `eps` degrees returns the
    /// dataset unchanged. A box selecting no cell is an error.
    pub fn subset(&self, bbox: &BoundingBox, global_extent: &BoundingBox, eps: f64) -> Result<Self> {
        if bbox.covers(global_extent, eps) {
            return Ok(self.clone());
        }

        let lon = self.coord_values("lon")?;
        let lat = self.coord_values("lat")?;

        // lon ascends, lat descends
        let cols = lon.partition_point(|&x| x < bbox.min_lon)..lon.partition_point(|&x| x <= bbox.max_lon);
        let rows = lat.partition_point(|&y| y > bbox.max_lat)..lat.partition_point(|&y| y >= bbox.min_lat);
        if cols.is_empty() || rows.is_empty() {
            return Err(L2CubeError::InvalidSubset(format!(
                "bounding box {:?} does not intersect the grid",
                bbox.to_array()
            )));
        }

        let mut subset = Self::new(self.attrs.clone());
        for array in self.coords.values() {
            subset.add_coord(array.select(&rows, &cols)?);
        }
        for array in self.data_vars.values() {
            subset.add_variable(array.select(&rows, &cols)?);
        }
        Ok(subset)
    }

    fn coord_values(&self, name: &str) -> Result<Vec<f64>> {
        let array = self
            .coord(name)
            .ok_or_else(|| L2CubeError::metadata(format!("missing coordinate '{name}'")))?
            .read()?;
        (0..array.len())
            .map(|i| array.data.get_f64(i))
            .collect::<Option<Vec<f64>>>()
            .ok_or_else(|| L2CubeError::metadata(format!("invalid coordinate '{name}'")))
    }
}
