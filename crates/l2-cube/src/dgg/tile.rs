//! Loading of single DGG pyramid tiles.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use smos_common::{ArrayData, NdArray};

use crate::error::{L2CubeError, Result};
use crate::lazy::ChunkLoader;
use crate::types::{ArrayInfo, ChunkInfo};

/// Size of one seqnum in bytes. Tiles store big-endian `u32`.
pub const SEQNUM_SIZE: usize = 4;

/// Loads the seqnum tiles of one pyramid level.
///
/// Holds nothing but the pyramid location and the level, so it can be
/// cloned into worker threads or serialized without dragging the grid
/// along.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileLoader {
    pub base_path: PathBuf,
    /// Absolute pyramid level (grid level plus `level0`).
    pub level: usize,
}

impl TileLoader {
    pub fn new(base_path: impl Into<PathBuf>, level: usize) -> Self {
        Self {
            base_path: base_path.into(),
            level,
        }
    }

    /// Path of the zip archive holding tile (`row`, `col`).
    pub fn tile_path(&self, row: usize, col: usize) -> PathBuf {
        self.base_path
            .join(self.level.to_string())
            .join(format!("{col}-{row}.raw.zip"))
    }

    /// Read the raw bytes of tile (`row`, `col`).
    ///
    /// Tiles are zip archives with a single entry. An uncompressed
    /// `{col}-{row}.raw` next to the archive is accepted too.
    pub fn read_tile_bytes(&self, row: usize, col: usize) -> Result<Bytes> {
        let zip_path = self.tile_path(row, col);
        if zip_path.exists() {
            return read_zip_entry(&zip_path);
        }
        let raw_path = zip_path.with_extension("");
        if raw_path.exists() {
            return Ok(Bytes::from(std::fs::read(&raw_path)?));
        }
        Err(L2CubeError::source_io(format!(
            "DGG tile not found: {}",
            zip_path.display()
        )))
    }

    /// Load tile (`row`, `col`) as a row-major array of `shape` = (height, width).
    pub fn load_tile(&self, row: usize, col: usize, shape: (usize, usize)) -> Result<Vec<u32>> {
        let bytes = self.read_tile_bytes(row, col)?;
        let expected = shape.0 * shape.1 * SEQNUM_SIZE;
        if bytes.len() != expected {
            return Err(L2CubeError::InvalidTile(format!(
                "tile {col}-{row} of level {} has {} bytes, expected {expected} for shape {shape:?}",
                self.level,
                bytes.len()
            )));
        }
        Ok(decode_seqnums(&bytes))
    }
}

impl ChunkLoader for TileLoader {
    fn load_chunk(&self, array: &ArrayInfo, chunk: &ChunkInfo) -> Result<NdArray> {
        let (&[row, col], &[height, width]) = (chunk.index.as_slice(), chunk.shape.as_slice())
        else {
            return Err(L2CubeError::chunk_contract(format!(
                "DGG tiles are 2D, got chunk index {:?} for {}",
                chunk.index, array.name
            )));
        };
        let values = self.load_tile(row, col, (height, width))?;
        Ok(NdArray::new(ArrayData::UInt32(values), vec![height, width])?)
    }
}

fn read_zip_entry(path: &Path) -> Result<Bytes> {
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    if archive.is_empty() {
        return Err(L2CubeError::InvalidTile(format!(
            "empty tile archive: {}",
            path.display()
        )));
    }
    let mut entry = archive.by_index(0)?;
    let mut buffer = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut buffer)?;
    Ok(Bytes::from(buffer))
}

fn decode_seqnums(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(SEQNUM_SIZE)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
