//! Core types shared by the grid, the loaders and the cube.

use serde::{Deserialize, Serialize};
use smos_common::{DType, Scalar};

/// Pixel size and extent of one grid level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelGeometry {
    pub width: usize,
    pub height: usize,
    /// Pixel size in degrees.
    pub pixel_size: f64,
}

impl LevelGeometry {
    /// Grid shape as (height, width).
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Number of pixels.
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest absolute latitude covered by pixel edges.
    pub fn lat_max(&self) -> f64 {
        self.height as f64 * self.pixel_size / 2.0
    }

    /// Longitudes of pixel centers, west to east.
    pub fn lon_centers(&self) -> Vec<f64> {
        linspace(
            -180.0 + self.pixel_size / 2.0,
            180.0 - self.pixel_size / 2.0,
            self.width,
        )
    }

    /// Latitudes of pixel centers, north to south.
    pub fn lat_centers(&self) -> Vec<f64> {
        let half = self.lat_max();
        linspace(
            half - self.pixel_size / 2.0,
            -half + self.pixel_size / 2.0,
            self.height,
        )
    }
}

/// `n` evenly spaced values from `start` to `stop`, both included.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Description of a chunked array as seen by a chunk loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayInfo {
    pub name: String,
    pub dtype: DType,
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
    pub chunk_shape: Vec<usize>,
    pub fill_value: Option<Scalar>,
}

impl ArrayInfo {
    /// Number of chunks along each dimension.
    pub fn chunk_counts(&self) -> Vec<usize> {
        self.shape
            .iter()
            .zip(&self.chunk_shape)
            .map(|(&size, &chunk)| if chunk == 0 { 0 } else { size.div_ceil(chunk) })
            .collect()
    }

    /// Total number of chunks.
    pub fn num_chunks(&self) -> usize {
        self.chunk_counts().iter().product()
    }

    /// Chunk at `index`, with its shape clipped at the array edge.
    ///
    /// Returns `None` if the index lies outside the chunk grid.
    pub fn chunk(&self, index: &[usize]) -> Option<ChunkInfo> {
        if index.len() != self.shape.len() {
            return None;
        }
        let counts = self.chunk_counts();
        let mut shape = Vec::with_capacity(index.len());
        for (d, &i) in index.iter().enumerate() {
            if i >= counts[d] {
                return None;
            }
            let start = i * self.chunk_shape[d];
            shape.push(self.chunk_shape[d].min(self.shape[d] - start));
        }
        Some(ChunkInfo {
            index: index.to_vec(),
            shape,
        })
    }

    /// All chunks in row-major order.
    pub fn chunks(&self) -> Vec<ChunkInfo> {
        let counts = self.chunk_counts();
        let total: usize = counts.iter().product();
        (0..total)
            .filter_map(|mut flat| {
                let mut index = vec![0; counts.len()];
                for d in (0..counts.len()).rev() {
                    index[d] = flat % counts[d];
                    flat /= counts[d];
                }
                self.chunk(&index)
            })
            .collect()
    }
}

/// Position and shape of one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    /// Chunk index along each dimension.
    pub index: Vec<usize>,
    /// Chunk shape, clipped at the array edge.
    pub shape: Vec<usize>,
}

impl ChunkInfo {
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Current number of entries.
    pub entries: usize,
    /// Number of entries disposed by eviction or replacement.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}
