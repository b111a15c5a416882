//! Per-cube chunk loading.
//!
//! The [`TimeStepLoader`] connects the lazy cube arrays with the remapping
//! engine. Every chunk of a cube variable is one time step of one level; the
//! loader opens the granule of that time step (or takes it from its granule
//! cache), maps it onto the level and returns the mapped variable.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use smos_common::NdArray;

use crate::cache::LruCache;
use crate::config::{CubeConfig, DggConfig};
use crate::dgg::DiscreteGlobalGrid;
use crate::error::{L2CubeError, Result};
use crate::lazy::ChunkLoader;
use crate::product::L2Product;
use crate::source::{DatasetOpener, OpenerKwargs};
use crate::types::{ArrayInfo, CacheStats, ChunkInfo};

/// Loads time steps of a cube from its granules.
///
/// Safe to share between threads. Two threads missing the cache for the
/// same time step may both open the granule; only the first product to
/// reach the cache is kept.
///
/// Evicting a product only releases the cache's handle. The granule is
/// closed once the last thread reading from it lets go.
pub struct TimeStepLoader {
    dgg: Arc<DiscreteGlobalGrid>,
    dataset_paths: Vec<String>,
    opener: Arc<dyn DatasetOpener>,
    opener_kwargs: OpenerKwargs,
    granule_cache_size: usize,
    mapped_values_cache_size: usize,
    granule_cache: Mutex<LruCache<usize, Arc<L2Product>>>,
}

impl TimeStepLoader {
    /// Create a loader for the granules at `dataset_paths`, in time order.
    pub fn new(
        dgg: Arc<DiscreteGlobalGrid>,
        dataset_paths: Vec<String>,
        opener: Arc<dyn DatasetOpener>,
        config: &CubeConfig,
    ) -> Self {
        Self::with_cache_sizes(
            dgg,
            dataset_paths,
            opener,
            config.opener_kwargs.clone(),
            config.granule_cache_size,
            config.mapped_values_cache_size,
        )
    }

    fn with_cache_sizes(
        dgg: Arc<DiscreteGlobalGrid>,
        dataset_paths: Vec<String>,
        opener: Arc<dyn DatasetOpener>,
        opener_kwargs: OpenerKwargs,
        granule_cache_size: usize,
        mapped_values_cache_size: usize,
    ) -> Self {
        Self {
            dgg,
            dataset_paths,
            opener,
            opener_kwargs,
            granule_cache_size,
            mapped_values_cache_size,
            granule_cache: Mutex::new(LruCache::with_disposer(
                granule_cache_size,
                |product: Arc<L2Product>| {
                    tracing::debug!(path = %product.path(), "Evicting L2 product");
                },
            )),
        }
    }

    pub fn dgg(&self) -> &Arc<DiscreteGlobalGrid> {
        &self.dgg
    }

    pub fn dataset_paths(&self) -> &[String] {
        &self.dataset_paths
    }

    pub fn opener(&self) -> &Arc<dyn DatasetOpener> {
        &self.opener
    }

    pub fn opener_kwargs(&self) -> &OpenerKwargs {
        &self.opener_kwargs
    }

    pub fn num_time_steps(&self) -> usize {
        self.dataset_paths.len()
    }

    pub fn mapped_values_cache_size(&self) -> usize {
        self.mapped_values_cache_size
    }

    /// The L2 product of time step `time_index`, opened on first use.
    ///
    /// A product enters the granule cache only after it was fully created.
    pub fn load_l2_product(&self, time_index: usize) -> Result<Arc<L2Product>> {
        let path = self.dataset_paths.get(time_index).ok_or_else(|| {
            L2CubeError::chunk_contract(format!(
                "time index {time_index} out of range for {} time steps",
                self.dataset_paths.len()
            ))
        })?;

        if let Some(product) = self.lock_cache().get(&time_index) {
            return Ok(product.clone());
        }

        tracing::debug!(time_index, path = %path, "Opening L2 granule");
        let dataset = self.opener.open(path, &self.opener_kwargs)?;
        let product = L2Product::create(self.dgg.clone(), dataset, self.mapped_values_cache_size)?;

        let mut cache = self.lock_cache();
        if let Some(existing) = cache.get(&time_index) {
            let existing = existing.clone();
            drop(cache);
            product.dispose();
            return Ok(existing);
        }
        cache.put(time_index, product.clone());
        Ok(product)
    }

    /// Variable `name` of time step `time_index` mapped onto `level`,
    /// shaped `(1, height, width)`.
    pub fn load_time_step(&self, level: usize, name: &str, time_index: usize) -> Result<Arc<NdArray>> {
        let product = self.load_l2_product(time_index)?;
        product.mapped_product(level)?.map_variable(name)
    }

    /// Load one chunk of a cube variable on grid level `level`.
    ///
    /// The chunk index is `(time, lat, lon)`; variables are never split
    /// spatially, so both spatial indices must be zero.
    pub fn load_chunk(&self, level: usize, array: &ArrayInfo, chunk: &ChunkInfo) -> Result<NdArray> {
        let &[time_index, lat_index, lon_index] = chunk.index.as_slice() else {
            return Err(L2CubeError::chunk_contract(format!(
                "expected a (time, lat, lon) chunk index for '{}', got {:?}",
                array.name, chunk.index
            )));
        };
        if lat_index != 0 || lon_index != 0 {
            return Err(L2CubeError::chunk_contract(format!(
                "spatial chunk ({lat_index}, {lon_index}) of '{}' requested, \
                 variables are chunked by time only",
                array.name
            )));
        }

        tracing::trace!(level, time_index, variable = %array.name, "Loading time step");
        let mapped = self.load_time_step(level, &array.name, time_index)?;
        Ok(Arc::try_unwrap(mapped).unwrap_or_else(|shared| (*shared).clone()))
    }

    /// Chunk loader of the cube variables on grid level `level`.
    pub fn level_loader(self: &Arc<Self>, level: usize) -> LevelChunkLoader {
        LevelChunkLoader {
            loader: self.clone(),
            level,
        }
    }

    /// Time indices of the cached products, most recently used first.
    pub fn cached_time_indices(&self) -> Vec<usize> {
        self.lock_cache().keys()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.lock_cache().stats()
    }

    /// Release all cached products.
    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    /// The transferable part of this loader.
    pub fn to_snapshot(&self) -> LoaderSnapshot {
        LoaderSnapshot {
            dgg: self.dgg.config().clone(),
            dataset_paths: self.dataset_paths.clone(),
            opener_kwargs: self.opener_kwargs.clone(),
            granule_cache_size: self.granule_cache_size,
            mapped_values_cache_size: self.mapped_values_cache_size,
        }
    }

    /// Rebuild a loader from a snapshot, with a fresh DGG handle and empty
    /// caches.
    pub fn from_snapshot(snapshot: LoaderSnapshot, opener: Arc<dyn DatasetOpener>) -> Result<Self> {
        let dgg = Arc::new(DiscreteGlobalGrid::new(snapshot.dgg)?);
        Ok(Self::with_cache_sizes(
            dgg,
            snapshot.dataset_paths,
            opener,
            snapshot.opener_kwargs,
            snapshot.granule_cache_size,
            snapshot.mapped_values_cache_size,
        ))
    }

    fn lock_cache(&self) -> MutexGuard<'_, LruCache<usize, Arc<L2Product>>> {
        self.granule_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for TimeStepLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeStepLoader")
            .field("dgg", &self.dgg)
            .field("time_steps", &self.dataset_paths.len())
            .field("granule_cache_size", &self.granule_cache_size)
            .finish()
    }
}

/// Plain-data form of a [`TimeStepLoader`]: no open granules, no caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderSnapshot {
    pub dgg: DggConfig,
    pub dataset_paths: Vec<String>,
    #[serde(default)]
    pub opener_kwargs: OpenerKwargs,
    pub granule_cache_size: usize,
    #[serde(default)]
    pub mapped_values_cache_size: usize,
}

impl LoaderSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

/// [`ChunkLoader`] of the variables of one grid level.
#[derive(Debug, Clone)]
pub struct LevelChunkLoader {
    loader: Arc<TimeStepLoader>,
    level: usize,
}

impl LevelChunkLoader {
    pub fn level(&self) -> usize {
        self.level
    }
}

impl ChunkLoader for LevelChunkLoader {
    fn load_chunk(&self, array: &ArrayInfo, chunk: &ChunkInfo) -> Result<NdArray> {
        self.loader.load_chunk(self.level, array, chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryOpener;
    use crate::testing::{sm_granule, small_config, small_dgg};
    use smos_common::DType;

    fn opener() -> Arc<MemoryOpener> {
        Arc::new(
            MemoryOpener::new()
                .with_dataset(sm_granule("g0", &[1, 2], &[0.1, 0.2], "20230401000000", "20230401010000"))
                .with_dataset(sm_granule("g1", &[3, 4], &[0.3, 0.4], "20230401020000", "20230401030000"))
                .with_dataset(sm_granule("g2", &[5, 6], &[0.5, 0.6], "20230401040000", "20230401050000")),
        )
    }

    fn loader(dir: &std::path::Path, opener: Arc<MemoryOpener>) -> TimeStepLoader {
        TimeStepLoader::new(
            small_dgg(dir),
            vec!["g0".into(), "g1".into(), "g2".into()],
            opener,
            &CubeConfig::default(),
        )
    }

    fn sm_info(level_shape: [usize; 2]) -> ArrayInfo {
        ArrayInfo {
            name: "Soil_Moisture".into(),
            dtype: DType::Float32,
            dims: vec!["time".into(), "lat".into(), "lon".into()],
            shape: vec![3, level_shape[0], level_shape[1]],
            chunk_shape: vec![1, level_shape[0], level_shape[1]],
            fill_value: None,
        }
    }

    #[test]
    fn test_granule_cache_reuses_products() {
        let dir = tempfile::tempdir().unwrap();
        let opener = opener();
        let loader = loader(dir.path(), opener.clone());

        let a = loader.load_l2_product(1).unwrap();
        let b = loader.load_l2_product(1).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(opener.opens(), 1);
        assert_eq!(loader.cache_stats().hits, 1);
    }

    #[test]
    fn test_granule_cache_evicts_least_recently_used() {
        let dir = tempfile::tempdir().unwrap();
        let opener = opener();
        let loader = loader(dir.path(), opener.clone());

        let p0 = loader.load_l2_product(0).unwrap();
        let p1 = loader.load_l2_product(1).unwrap();
        loader.load_l2_product(0).unwrap();
        let p2 = loader.load_l2_product(2).unwrap();

        assert_eq!(loader.cached_time_indices(), vec![2, 0]);
        assert!(!p0.is_disposed());
        assert!(!p2.is_disposed());

        // an evicted product stays usable while someone holds it
        assert!(!p1.is_disposed());
        assert_eq!(opener.closes(), 0);
        let values = p1.mapped_product(0).unwrap().map_variable("Soil_Moisture").unwrap();
        assert_eq!(values.as_slice::<f32>().unwrap()[2], 0.3);
        drop(p1);
        assert_eq!(opener.closes(), 1);

        loader.clear_cache();
        assert!(!p0.is_disposed());
        assert_eq!(opener.closes(), 1);
        drop(p0);
        drop(p2);
        assert_eq!(opener.closes(), 3);
    }

    #[test]
    fn test_load_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader(dir.path(), opener());

        let info = sm_info([4, 8]);
        let chunk = info.chunk(&[1, 0, 0]).unwrap();
        let array = loader.load_chunk(0, &info, &chunk).unwrap();
        assert_eq!(array.shape, vec![1, 4, 8]);
        let values = array.as_slice::<f32>().unwrap();
        assert_eq!(values[2], 0.3);
        assert_eq!(values[3], 0.4);
        assert_eq!(values[0], -999.0);
    }

    #[test]
    fn test_spatial_chunk_is_contract_violation() {
        let dir = tempfile::tempdir().unwrap();
        let opener = opener();
        let loader = loader(dir.path(), opener.clone());
        let info = sm_info([4, 8]);

        for index in [[0, 1, 0], [0, 0, 1]] {
            let chunk = ChunkInfo {
                index: index.to_vec(),
                shape: vec![1, 4, 8],
            };
            assert!(matches!(
                loader.load_chunk(0, &info, &chunk),
                Err(L2CubeError::ChunkContractViolation(_))
            ));
        }
        let chunk = ChunkInfo {
            index: vec![0, 0],
            shape: vec![4, 8],
        };
        assert!(matches!(
            loader.load_chunk(0, &info, &chunk),
            Err(L2CubeError::ChunkContractViolation(_))
        ));
        assert_eq!(opener.opens(), 0);
    }

    #[test]
    fn test_open_failure_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let loader = TimeStepLoader::new(
            small_dgg(dir.path()),
            vec!["g0".into(), "missing".into()],
            opener(),
            &CubeConfig::default(),
        );
        assert!(matches!(loader.load_l2_product(1), Err(L2CubeError::SourceIo(_))));
        assert!(loader.cached_time_indices().is_empty());
        assert!(matches!(
            loader.load_l2_product(2),
            Err(L2CubeError::ChunkContractViolation(_))
        ));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let opener = opener();
        let mut config = CubeConfig {
            dgg: small_config(dir.path()),
            granule_cache_size: 1,
            mapped_values_cache_size: 3,
            ..Default::default()
        };
        config
            .opener_kwargs
            .insert("mask_and_scale".into(), serde_json::Value::Bool(false));
        let loader = TimeStepLoader::new(small_dgg(dir.path()), vec!["g0".into(), "g2".into()], opener.clone(), &config);
        loader.load_l2_product(0).unwrap();

        let json = loader.to_snapshot().to_json().unwrap();
        let snapshot = LoaderSnapshot::from_json(&json).unwrap();
        assert_eq!(snapshot, loader.to_snapshot());
        assert_eq!(snapshot.dgg, config.dgg);

        let restored = TimeStepLoader::from_snapshot(snapshot, opener).unwrap();
        assert!(restored.cached_time_indices().is_empty());
        assert_eq!(restored.dataset_paths(), loader.dataset_paths());
        assert_eq!(restored.mapped_values_cache_size(), 3);

        let info = sm_info([2, 4]);
        let chunk = info.chunk(&[1, 0, 0]).unwrap();
        let a = loader.load_chunk(1, &info, &chunk).unwrap();
        let b = restored.load_chunk(1, &info, &chunk).unwrap();
        assert_eq!(a, b);
    }
}
