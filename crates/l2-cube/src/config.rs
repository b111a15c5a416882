//! Configuration for the DGG, the cube caches and the cube writer.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{L2CubeError, Result};

/// Upper bound of `DggConfig::max_num_levels`; level sizes are computed
/// by shifting with the level number.
pub const MAX_PYRAMID_LEVELS: usize = 32;

/// Geometry and location of the SMOS discrete global grid.
///
/// The defaults describe the SMOS DGG as distributed with its image pyramid:
/// 16384x8064 pixels at the finest level, 512x504 pixel tiles and 7 levels.
/// Cubes skip the finest and the coarsest level, hence `level0 = 1` and
/// `num_levels = 5`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DggConfig {
    /// Root directory of the DGG pyramid (`{level}/{col}-{row}.raw.zip`).
    pub base_path: PathBuf,

    /// Width in pixels of pyramid level 0.
    pub max_width: usize,

    /// Height in pixels of pyramid level 0.
    pub max_height: usize,

    /// Tile width, the same on every level.
    pub tile_width: usize,

    /// Tile height, the same on every level.
    pub tile_height: usize,

    /// Number of levels in the pyramid.
    pub max_num_levels: usize,

    /// Pixel size in degrees of pyramid level 0.
    pub min_pixel_size: f64,

    /// Pyramid level that becomes grid level 0.
    pub level0: usize,

    /// Number of grid levels exposed, starting at `level0`.
    pub num_levels: usize,

    /// Smallest valid seqnum.
    pub min_seqnum: u64,

    /// Largest valid seqnum.
    pub max_seqnum: u64,
}

impl Default for DggConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("smos-dgg.levels"),
            max_width: 16384,
            max_height: 8064,
            tile_width: 512,
            tile_height: 504,
            max_num_levels: 7,
            min_pixel_size: 360.0 / 16384.0,
            level0: 1,
            num_levels: 5,
            min_seqnum: 1,
            max_seqnum: 2_621_442,
        }
    }
}

impl DggConfig {
    /// Default grid rooted at `base_path`.
    pub fn with_base_path(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Default::default()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_width == 0 || self.max_height == 0 {
            return Err("DGG max_width and max_height must be > 0".to_string());
        }

        if self.tile_width == 0 || self.tile_height == 0 {
            return Err("DGG tile_width and tile_height must be > 0".to_string());
        }

        if self.num_levels == 0 {
            return Err("DGG num_levels must be > 0".to_string());
        }

        if self.max_num_levels == 0 || self.max_num_levels > MAX_PYRAMID_LEVELS {
            return Err(format!(
                "DGG max_num_levels must be in 1..={MAX_PYRAMID_LEVELS}, got {}",
                self.max_num_levels
            ));
        }

        if self
            .level0
            .checked_add(self.num_levels)
            .map_or(true, |top| top > self.max_num_levels)
        {
            return Err(format!(
                "DGG level0 + num_levels ({} + {}) exceeds max_num_levels {}",
                self.level0, self.num_levels, self.max_num_levels
            ));
        }

        let coarsest = 1usize << (self.max_num_levels - 1);
        if self.max_width % coarsest != 0 || self.max_height % coarsest != 0 {
            return Err(format!(
                "DGG size {}x{} is not divisible by {coarsest}",
                self.max_width, self.max_height
            ));
        }

        if self.min_pixel_size.is_nan() || self.min_pixel_size <= 0.0 {
            return Err("DGG min_pixel_size must be > 0".to_string());
        }

        if self.min_seqnum > self.max_seqnum {
            return Err("DGG min_seqnum must be <= max_seqnum".to_string());
        }

        Ok(())
    }
}

/// Configuration of a cube and its caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CubeConfig {
    /// Discrete global grid.
    pub dgg: DggConfig,

    /// Number of opened granules kept per loader.
    pub granule_cache_size: usize,

    /// Number of remapped variable arrays kept per granule and level.
    /// Zero disables retention.
    pub mapped_values_cache_size: usize,

    /// Keyword arguments passed to the dataset opener.
    pub opener_kwargs: serde_json::Map<String, serde_json::Value>,

    /// Settings for writing cubes.
    pub writer: WriterConfig,
}

impl Default for CubeConfig {
    fn default() -> Self {
        Self {
            dgg: DggConfig::default(),
            granule_cache_size: 2,
            mapped_values_cache_size: 0,
            opener_kwargs: serde_json::Map::new(),
            writer: WriterConfig::default(),
        }
    }
}

impl CubeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("SMOS_DGG_PATH") {
            config.dgg.base_path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("SMOS_DGG_LEVEL0") {
            if let Ok(level0) = val.parse() {
                config.dgg.level0 = level0;
                config.dgg.num_levels = config.dgg.max_num_levels.saturating_sub(level0 + 1).max(1);
            }
        }

        if let Ok(val) = std::env::var("SMOS_GRANULE_CACHE_SIZE") {
            if let Ok(size) = val.parse() {
                config.granule_cache_size = size;
            }
        }

        if let Ok(val) = std::env::var("SMOS_MAPPED_VALUES_CACHE_SIZE") {
            if let Ok(size) = val.parse() {
                config.mapped_values_cache_size = size;
            }
        }

        config.writer = WriterConfig::from_env();
        config
    }

    /// Parse a YAML document and validate it.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(s)?;
        config.validate().map_err(L2CubeError::Config)?;
        Ok(config)
    }

    /// Read a YAML file and validate it.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            L2CubeError::config(format!("failed to read {:?}: {e}", path.as_ref()))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.dgg.validate()?;
        self.writer.validate()
    }
}

/// Settings for writing cubes as Zarr V3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Compression codec.
    pub compression: ZarrCompression,

    /// Compression level (1-9).
    pub compression_level: u8,

    /// Enable byte shuffle filter for better compression.
    pub shuffle: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            compression: ZarrCompression::BloscZstd,
            compression_level: 1,
            shuffle: true,
        }
    }
}

impl WriterConfig {
    /// Load writer settings from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ZARR_COMPRESSION") {
            config.compression = ZarrCompression::from_str(&val);
        }

        if let Ok(val) = std::env::var("ZARR_COMPRESSION_LEVEL") {
            if let Ok(level) = val.parse() {
                config.compression_level = level;
            }
        }

        if let Ok(val) = std::env::var("ZARR_SHUFFLE") {
            config.shuffle = val.to_lowercase() == "true" || val == "1";
        }

        config
    }

    /// Validate the writer settings.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.compression_level == 0 || self.compression_level > 9 {
            return Err("zarr compression_level must be 1-9".to_string());
        }
        Ok(())
    }
}

/// Compression codec for Zarr output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZarrCompression {
    /// No compression.
    None,
    /// Blosc with LZ4.
    BloscLz4,
    /// Blosc with Zstd.
    #[default]
    BloscZstd,
}

impl ZarrCompression {
    /// Parse from string (case-insensitive). Unknown names select Blosc/Zstd.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "none" => Self::None,
            "lz4" | "blosc_lz4" => Self::BloscLz4,
            _ => Self::BloscZstd,
        }
    }

    /// Get the codec name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::BloscLz4 => "blosc_lz4",
            Self::BloscZstd => "blosc_zstd",
        }
    }
}

impl std::fmt::Display for ZarrCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
