//! The SMOS discrete global grid (DGG).
//!
//! The DGG is an equirectangular image pyramid whose pixels hold the seqnum
//! of the grid cell they cover. Level `L` of the grid is pyramid level
//! `L + level0`; each pyramid level halves the width and height of the
//! previous one. Pixel values are stored in fixed-size tiles under
//! `{base_path}/{level}/{col}-{row}.raw.zip`.

mod tile;

pub use tile::{TileLoader, SEQNUM_SIZE};

use std::sync::{Arc, Mutex, PoisonError};

use rayon::prelude::*;
use smos_common::{ArrayData, AttrValue, Attrs, DType};

use crate::cache::LruCache;
use crate::config::DggConfig;
use crate::cube::MultiLevelDataset;
use crate::error::{L2CubeError, Result};
use crate::lazy::{LevelDataset, VirtualArray};
use crate::types::{ArrayInfo, LevelGeometry};

/// Grid point identifiers below this value are seqnums already.
const GRID_POINT_ID_BLOCK: u64 = 1_000_000;
/// Gap between consecutive blocks of one million grid point identifiers.
const GRID_POINT_ID_GAP: u64 = 737_856;

/// Number of assembled seqnum levels kept in memory.
const SEQNUM_LEVEL_CACHE_SIZE: usize = 1;

/// Convert a raw `Grid_Point_ID` into a DGG seqnum.
pub fn seqnum_from_grid_point_id(id: u64) -> u64 {
    if id < GRID_POINT_ID_BLOCK {
        id
    } else {
        id - GRID_POINT_ID_GAP * ((id - 1) / GRID_POINT_ID_BLOCK) + 1
    }
}

/// Elementwise [`seqnum_from_grid_point_id`].
pub fn grid_point_ids_to_seqnums(ids: &[u64]) -> Vec<u64> {
    ids.par_iter().map(|&id| seqnum_from_grid_point_id(id)).collect()
}

/// The discrete global grid rooted at one pyramid location.
pub struct DiscreteGlobalGrid {
    config: DggConfig,
    seqnum_levels: Mutex<LruCache<usize, Arc<[u32]>>>,
}

impl DiscreteGlobalGrid {
    /// Create a grid from a validated configuration.
    ///
    /// Tiles are not touched until a level is read.
    pub fn new(config: DggConfig) -> Result<Self> {
        config.validate().map_err(L2CubeError::Config)?;
        Ok(Self {
            config,
            seqnum_levels: Mutex::new(LruCache::new(SEQNUM_LEVEL_CACHE_SIZE)),
        })
    }

    /// Like [`DiscreteGlobalGrid::new`], but also checks that the pyramid
    /// directory exists.
    pub fn open(config: DggConfig) -> Result<Self> {
        if !config.base_path.is_dir() {
            return Err(L2CubeError::source_io(format!(
                "DGG pyramid not found: {}",
                config.base_path.display()
            )));
        }
        Self::new(config)
    }

    pub fn config(&self) -> &DggConfig {
        &self.config
    }

    pub fn num_levels(&self) -> usize {
        self.config.num_levels
    }

    /// Smallest valid seqnum.
    pub fn min_seqnum(&self) -> u64 {
        self.config.min_seqnum
    }

    /// Largest valid seqnum.
    pub fn max_seqnum(&self) -> u64 {
        self.config.max_seqnum
    }

    /// Width, height and pixel size of grid level `level`.
    pub fn level_geometry(&self, level: usize) -> Result<LevelGeometry> {
        if level >= self.config.num_levels {
            return Err(L2CubeError::InvalidLevel {
                level,
                num_levels: self.config.num_levels,
            });
        }
        let abs_level = level + self.config.level0;
        Ok(LevelGeometry {
            width: self.config.max_width >> abs_level,
            height: self.config.max_height >> abs_level,
            pixel_size: self.config.min_pixel_size * (1u64 << abs_level) as f64,
        })
    }

    /// Tile loader for grid level `level`.
    pub fn tile_loader(&self, level: usize) -> Result<TileLoader> {
        self.level_geometry(level)?;
        Ok(TileLoader::new(
            self.config.base_path.clone(),
            level + self.config.level0,
        ))
    }

    /// Chunk layout of the seqnum array of grid level `level`.
    ///
    /// Chunks are tiles. Levels smaller than one tile form a single chunk.
    pub fn seqnum_array_info(&self, level: usize) -> Result<ArrayInfo> {
        let geometry = self.level_geometry(level)?;
        Ok(ArrayInfo {
            name: "seqnum".to_string(),
            dtype: DType::UInt32,
            dims: vec!["lat".to_string(), "lon".to_string()],
            shape: vec![geometry.height, geometry.width],
            chunk_shape: vec![
                self.config.tile_height.min(geometry.height),
                self.config.tile_width.min(geometry.width),
            ],
            fill_value: None,
        })
    }

    /// Lazy seqnum array of grid level `level`.
    pub fn seqnum_array(&self, level: usize) -> Result<VirtualArray> {
        let info = self.seqnum_array_info(level)?;
        let loader = self.tile_loader(level)?;
        Ok(VirtualArray::lazy(info, Attrs::new(), Arc::new(loader)))
    }

    /// Seqnums of every pixel of grid level `level`, row-major.
    ///
    /// Tiles are loaded in parallel. The most recently read level is kept.
    pub fn read_seqnum_level(&self, level: usize) -> Result<Arc<[u32]>> {
        if let Some(cached) = self.lock_levels().get(&level) {
            return Ok(cached.clone());
        }

        let array = self.seqnum_array(level)?.read()?;
        let seqnums: Arc<[u32]> = match array.data {
            ArrayData::UInt32(values) => Arc::from(values),
            other => {
                return Err(L2CubeError::DataType(format!(
                    "DGG seqnums must be uint32, got {}",
                    other.dtype()
                )))
            }
        };
        tracing::debug!(
            level,
            pixels = seqnums.len(),
            base_path = %self.config.base_path.display(),
            "Assembled DGG seqnum level"
        );

        self.lock_levels().put(level, seqnums.clone());
        Ok(seqnums)
    }

    /// Dataset of grid level `level` with `lon`/`lat` coordinates and a
    /// lazy `seqnum` variable.
    pub fn level_dataset(&self, level: usize) -> Result<LevelDataset> {
        let geometry = self.level_geometry(level)?;
        let mut dataset = LevelDataset::new(Attrs::new());
        dataset.add_coord(lon_coord(&geometry)?);
        dataset.add_coord(lat_coord(&geometry)?);
        dataset.add_variable(self.seqnum_array(level)?);
        Ok(dataset)
    }

    fn lock_levels(&self) -> std::sync::MutexGuard<'_, LruCache<usize, Arc<[u32]>>> {
        self.seqnum_levels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for DiscreteGlobalGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscreteGlobalGrid")
            .field("config", &self.config)
            .finish()
    }
}

impl MultiLevelDataset for DiscreteGlobalGrid {
    fn num_levels(&self) -> usize {
        self.config.num_levels
    }

    fn level_geometry(&self, level: usize) -> Result<LevelGeometry> {
        DiscreteGlobalGrid::level_geometry(self, level)
    }

    fn dataset(&self, level: usize) -> Result<Arc<LevelDataset>> {
        self.level_dataset(level).map(Arc::new)
    }
}

/// Pixel-center longitude coordinate of a level.
pub(crate) fn lon_coord(geometry: &LevelGeometry) -> Result<VirtualArray> {
    let mut attrs = Attrs::new();
    attrs.insert("long_name".into(), AttrValue::from("longitude"));
    attrs.insert("standard_name".into(), AttrValue::from("longitude"));
    attrs.insert("units".into(), AttrValue::from("degrees_east"));
    VirtualArray::eager(
        "lon",
        &["lon"],
        vec![geometry.width],
        ArrayData::Float64(geometry.lon_centers()),
        attrs,
    )
}

/// Pixel-center latitude coordinate of a level, north to south.
pub(crate) fn lat_coord(geometry: &LevelGeometry) -> Result<VirtualArray> {
    let mut attrs = Attrs::new();
    attrs.insert("long_name".into(), AttrValue::from("latitude"));
    attrs.insert("standard_name".into(), AttrValue::from("latitude"));
    attrs.insert("units".into(), AttrValue::from("degrees_north"));
    VirtualArray::eager(
        "lat",
        &["lat"],
        vec![geometry.height],
        ArrayData::Float64(geometry.lat_centers()),
        attrs,
    )
}
