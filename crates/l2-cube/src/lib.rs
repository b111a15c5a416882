//! Remapping of SMOS L2 swath granules onto the discrete global grid
//!
//! SMOS Level-2 granules store their measurements as flat lists indexed by
//! the grid point identifiers of the ISEA 4H9 discrete global grid (DGG).
//! This crate turns a time series of such granules into a lazily evaluated
//! cube `(time, lat, lon)` on a regular plate carrée raster, at several
//! resolution levels:
//!
//! - **Lazy**: nothing is read until a chunk is requested
//! - **Cached**: granules and their per-level index grids stay in LRU caches
//! - **Parallel**: chunks are independent and can be computed concurrently
//!
//! # Architecture
//!
//! ```text
//! open_cube(catalog, dataset_id, time range)
//!      │
//!      ▼
//! L2Cube::dataset(level)  ──►  LevelDataset (lazy variables, coordinates)
//!      │
//!      ▼
//! VirtualArray::read_chunk([t, 0, 0])
//!      │
//!      ├─► TimeStepLoader: granule t from the granule cache
//!      │         │
//!      │         └─► L2Product: Grid_Point_ID ─► SeqnumIndex
//!      │
//!      ├─► MappedL2Product: DGG seqnum raster ─► index raster (cached)
//!      │
//!      └─► map_values: gather variable values into the raster
//! ```
//!
//! # Example
//!
//! ```ignore
//! use l2_cube::{open_cube, CubeConfig, MultiLevelDataset, StaticCatalog, ZarrDatasetOpener};
//!
//! let catalog = StaticCatalog::new().with_paths(DatasetId::SoilMoisture, &paths);
//! let range = TimeRange::parse("2023-04-01", "2023-04-02")?;
//! let cube = open_cube(&catalog, DatasetId::SoilMoisture, &range, None,
//!                      &CubeConfig::from_env(), Arc::new(ZarrDatasetOpener))?;
//!
//! let level0 = cube.dataset(0)?;
//! let first = level0.variable("Soil_Moisture").unwrap().read_chunk(&[0, 0, 0])?;
//! ```

pub mod cache;
pub mod catalog;
pub mod config;
pub mod cube;
pub mod dgg;
pub mod error;
pub mod iter;
pub mod lazy;
pub mod loader;
pub mod product;
pub mod remap;
pub mod seqnum;
pub mod source;
pub mod types;
pub mod writer;

#[cfg(test)]
mod testing;

// Re-export commonly used types at crate root
pub use cache::LruCache;
pub use catalog::{GranuleCatalog, StaticCatalog};
pub use config::{CubeConfig, DggConfig, WriterConfig, ZarrCompression};
pub use cube::{open_cube, L2Cube, MultiLevelDataset};
pub use dgg::{grid_point_ids_to_seqnums, seqnum_from_grid_point_id, DiscreteGlobalGrid};
pub use error::{L2CubeError, Result};
pub use iter::{TimeStepDataset, TimeStepIterator};
pub use lazy::{ChunkLoader, LevelDataset, VirtualArray};
pub use loader::{LevelChunkLoader, LoaderSnapshot, TimeStepLoader};
pub use product::{L2Product, MappedL2Product};
pub use remap::map_values;
pub use seqnum::SeqnumIndex;
pub use source::{
    DatasetOpener, MemoryDataset, MemoryOpener, OpenerKwargs, SourceDataset, ZarrDatasetOpener,
};
pub use types::{ArrayInfo, CacheStats, ChunkInfo, LevelGeometry};
pub use writer::{CubeWriteResult, CubeWriter};

pub use smos_common::{BoundingBox, DatasetId, TimeBounds, TimeRange};
