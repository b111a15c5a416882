//! Zarr V3 writer for level datasets.

use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smos_common::{sanitize_attrs, with_array_data, DType, Scalar};
use zarrs::array::codec::bytes_to_bytes::blosc::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
};
use zarrs::array::codec::BytesToBytesCodecTraits;
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::group::GroupBuilder;
use zarrs_filesystem::FilesystemStore;

use crate::config::{WriterConfig, ZarrCompression};
use crate::cube::MultiLevelDataset;
use crate::error::{L2CubeError, Result};
use crate::lazy::{LevelDataset, VirtualArray};

/// Summary of one written store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CubeWriteResult {
    /// Number of arrays written, coordinates included.
    pub arrays: usize,
    /// Number of chunks computed and stored.
    pub chunks: usize,
    /// Uncompressed size of all stored chunks.
    pub bytes_written: u64,
}

/// Writes level datasets into Zarr V3 stores.
///
/// Chunks are computed in parallel, every chunk exactly once.
#[derive(Debug, Clone, Default)]
pub struct CubeWriter {
    config: WriterConfig,
}

fn data_type(dtype: DType) -> DataType {
    match dtype {
        DType::Int8 => DataType::Int8,
        DType::Int16 => DataType::Int16,
        DType::Int32 => DataType::Int32,
        DType::Int64 => DataType::Int64,
        DType::UInt8 => DataType::UInt8,
        DType::UInt16 => DataType::UInt16,
        DType::UInt32 => DataType::UInt32,
        DType::UInt64 => DataType::UInt64,
        DType::Float32 => DataType::Float32,
        DType::Float64 => DataType::Float64,
    }
}

fn fill_value(dtype: DType, fill: Option<Scalar>) -> Result<FillValue> {
    let fill = fill.unwrap_or_else(|| Scalar::default_fill(dtype));
    Ok(match dtype {
        DType::Int8 => FillValue::from(fill.cast_to::<i8>(dtype)?),
        DType::Int16 => FillValue::from(fill.cast_to::<i16>(dtype)?),
        DType::Int32 => FillValue::from(fill.cast_to::<i32>(dtype)?),
        DType::Int64 => FillValue::from(fill.cast_to::<i64>(dtype)?),
        DType::UInt8 => FillValue::from(fill.cast_to::<u8>(dtype)?),
        DType::UInt16 => FillValue::from(fill.cast_to::<u16>(dtype)?),
        DType::UInt32 => FillValue::from(fill.cast_to::<u32>(dtype)?),
        DType::UInt64 => FillValue::from(fill.cast_to::<u64>(dtype)?),
        DType::Float32 => FillValue::from(fill.cast_to::<f32>(dtype)?),
        DType::Float64 => FillValue::from(fill.cast_to::<f64>(dtype)?),
    })
}

impl CubeWriter {
    pub fn new(config: WriterConfig) -> Self {
        Self { config }
    }

    /// Write every level of `cube` to `{root}/{level}.zarr`.
    pub fn write_levels(&self, cube: &dyn MultiLevelDataset, root: &Path) -> Result<Vec<CubeWriteResult>> {
        (0..cube.num_levels())
            .map(|level| {
                let dataset = cube.dataset(level)?;
                self.write_level(&dataset, &root.join(format!("{level}.zarr")))
            })
            .collect()
    }

    /// Write `dataset` to a new Zarr store at `path`.
    pub fn write_level(&self, dataset: &LevelDataset, path: &Path) -> Result<CubeWriteResult> {
        std::fs::create_dir_all(path)?;
        let store = Arc::new(
            FilesystemStore::new(path).map_err(|e| L2CubeError::zarr(e.to_string()))?,
        );

        GroupBuilder::new()
            .attributes(sanitize_attrs(&dataset.attrs))
            .build(store.clone(), "/")
            .map_err(|e| L2CubeError::zarr(e.to_string()))?
            .store_metadata()
            .map_err(|e| L2CubeError::zarr(e.to_string()))?;

        let mut result = CubeWriteResult::default();
        for array in dataset.arrays() {
            let (chunks, bytes) = self.write_array(store.clone(), array)?;
            result.arrays += 1;
            result.chunks += chunks;
            result.bytes_written += bytes;
        }

        tracing::info!(
            path = %path.display(),
            arrays = result.arrays,
            chunks = result.chunks,
            bytes = result.bytes_written,
            "Wrote cube level"
        );
        Ok(result)
    }

    /// Compute and store all chunks of `source`.
    fn write_array(&self, store: Arc<FilesystemStore>, source: &VirtualArray) -> Result<(usize, u64)> {
        let info = source.info();
        let array = self.build_array(store, source)?;
        array
            .store_metadata()
            .map_err(|e| L2CubeError::zarr(e.to_string()))?;

        let chunks = info.chunks();
        let bytes: u64 = chunks
            .par_iter()
            .map(|chunk| {
                let data = source.read_chunk(&chunk.index)?;
                let start: Vec<u64> = chunk
                    .index
                    .iter()
                    .zip(&info.chunk_shape)
                    .map(|(&i, &c)| (i * c) as u64)
                    .collect();
                let shape: Vec<u64> = chunk.shape.iter().map(|&n| n as u64).collect();
                let subset = ArraySubset::new_with_start_shape(start, shape)
                    .map_err(|e| L2CubeError::zarr(e.to_string()))?;
                with_array_data!(&data.data, values => array
                    .store_array_subset_elements(&subset, values.as_slice())
                    .map_err(|e| L2CubeError::zarr(e.to_string()))?);
                Ok((data.len() * info.dtype.size()) as u64)
            })
            .sum::<Result<u64>>()?;

        tracing::debug!(array = %info.name, chunks = chunks.len(), bytes, "Wrote array");
        Ok((chunks.len(), bytes))
    }

    fn build_array(&self, store: Arc<FilesystemStore>, source: &VirtualArray) -> Result<Array<FilesystemStore>> {
        let info = source.info();

        let mut attrs = sanitize_attrs(source.attrs());
        attrs.insert("_ARRAY_DIMENSIONS".to_string(), serde_json::json!(info.dims));

        let chunk_grid: zarrs::array::ChunkGrid = info
            .chunk_shape
            .iter()
            .map(|&n| n.max(1) as u64)
            .collect::<Vec<u64>>()
            .try_into()
            .map_err(|e| L2CubeError::config(format!("{e:?}")))?;

        let mut binding = ArrayBuilder::new(
            info.shape.iter().map(|&n| n as u64).collect::<Vec<u64>>(),
            data_type(info.dtype),
            chunk_grid,
            fill_value(info.dtype, info.fill_value)?,
        );
        let mut builder = binding.attributes(attrs);
        if self.config.compression != ZarrCompression::None {
            builder = builder.bytes_to_bytes_codecs(vec![self.compression_codec(info.dtype)?]);
        }

        builder
            .build(store, &format!("/{}", info.name))
            .map_err(|e| L2CubeError::zarr(e.to_string()))
    }

    fn compression_codec(&self, dtype: DType) -> Result<Arc<dyn BytesToBytesCodecTraits>> {
        let level = BloscCompressionLevel::try_from(self.config.compression_level)
            .map_err(|_| L2CubeError::config("invalid compression level"))?;
        let (shuffle, typesize) = if self.config.shuffle {
            (BloscShuffleMode::Shuffle, Some(dtype.size()))
        } else {
            (BloscShuffleMode::NoShuffle, None)
        };
        let compressor = match self.config.compression {
            ZarrCompression::None => {
                return Err(L2CubeError::config("no compression configured"));
            }
            ZarrCompression::BloscLz4 => BloscCompressor::LZ4,
            ZarrCompression::BloscZstd => BloscCompressor::Zstd,
        };
        let codec = BloscCodec::new(compressor, level, None, shuffle, typesize)
            .map_err(|e| L2CubeError::config(e.to_string()))?;
        Ok(Arc::new(codec))
    }
}
