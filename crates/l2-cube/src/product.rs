//! Per-granule remapping state.
//!
//! An [`L2Product`] wraps one opened granule together with its seqnum index
//! and fill values. For every grid level it builds at most one
//! [`MappedL2Product`], which maps variables of the granule onto that level.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use smos_common::{ArrayData, Attrs, NdArray, Scalar, TimeBounds};

use crate::cache::LruCache;
use crate::dgg::DiscreteGlobalGrid;
use crate::error::{L2CubeError, Result};
use crate::remap::map_values;
use crate::seqnum::SeqnumIndex;
use crate::source::{SourceDataset, VariableInfo, GRID_POINT_ID};
use crate::types::{CacheStats, LevelGeometry};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One opened granule, ready to be mapped onto any grid level.
pub struct L2Product {
    path: String,
    dgg: Arc<DiscreteGlobalGrid>,
    dataset: RwLock<Option<Box<dyn SourceDataset>>>,
    attrs: Attrs,
    variables: BTreeMap<String, VariableInfo>,
    fill_values: BTreeMap<String, Scalar>,
    index: SeqnumIndex,
    time_bounds: Option<TimeBounds>,
    mapped_values_cache_size: usize,
    mapped_products: Mutex<LruCache<usize, Arc<MappedL2Product>>>,
    disposed: AtomicBool,
}

impl L2Product {
    /// Wrap an opened granule.
    ///
    /// Reads `Grid_Point_ID` and builds the seqnum index. On failure the
    /// dataset is closed before the error is returned.
    pub fn create(
        dgg: Arc<DiscreteGlobalGrid>,
        mut dataset: Box<dyn SourceDataset>,
        mapped_values_cache_size: usize,
    ) -> Result<Arc<Self>> {
        let path = dataset.path().to_string();
        let (variables, fill_values, index) = match Self::inspect(&*dataset, &dgg) {
            Ok(parts) => parts,
            Err(e) => {
                dataset.close();
                return Err(e);
            }
        };
        let attrs = dataset.attrs().clone();
        let time_bounds = TimeBounds::from_attrs(&attrs).ok();

        tracing::debug!(
            path = %path,
            rows = index.num_rows(),
            variables = variables.len(),
            "Created L2 product"
        );

        Ok(Arc::new(Self {
            path,
            mapped_products: Mutex::new(LruCache::with_disposer(
                dgg.num_levels(),
                |mapped: Arc<MappedL2Product>| mapped.dispose(),
            )),
            dgg,
            dataset: RwLock::new(Some(dataset)),
            attrs,
            variables,
            fill_values,
            index,
            time_bounds,
            mapped_values_cache_size,
            disposed: AtomicBool::new(false),
        }))
    }

    #[allow(clippy::type_complexity)]
    fn inspect(
        dataset: &dyn SourceDataset,
        dgg: &DiscreteGlobalGrid,
    ) -> Result<(BTreeMap<String, VariableInfo>, BTreeMap<String, Scalar>, SeqnumIndex)> {
        let mut variables = BTreeMap::new();
        let mut fill_values = BTreeMap::new();
        for name in dataset.variable_names() {
            let Some(info) = dataset.variable(&name) else {
                continue;
            };
            let fill_value = match info.fill_value() {
                Some(fill_value) => fill_value,
                None => {
                    let fill_value = Scalar::default_fill(info.dtype);
                    tracing::warn!(
                        path = %dataset.path(),
                        variable = %name,
                        fill_value = %fill_value,
                        "Variable is missing a fill value, using default"
                    );
                    fill_value
                }
            };
            fill_values.insert(name.clone(), fill_value);
            variables.insert(name, info);
        }

        if !variables.contains_key(GRID_POINT_ID) {
            return Err(L2CubeError::unknown_variable(GRID_POINT_ID, dataset.path()));
        }
        let grid_point_ids = dataset.read_values(GRID_POINT_ID)?;
        let index = SeqnumIndex::from_array(&grid_point_ids, dgg.config())?;

        Ok((variables, fill_values, index))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Global attributes of the granule.
    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    /// Validity period from the granule header, if present.
    pub fn time_bounds(&self) -> Option<TimeBounds> {
        self.time_bounds
    }

    pub fn variable_names(&self) -> Vec<&str> {
        self.variables.keys().map(String::as_str).collect()
    }

    pub fn variable(&self, name: &str) -> Option<&VariableInfo> {
        self.variables.get(name)
    }

    /// Fill value of variable `name`: its `_FillValue`, or the default for
    /// its element type.
    pub fn fill_value(&self, name: &str) -> Option<Scalar> {
        self.fill_values.get(name).copied()
    }

    pub fn index(&self) -> &SeqnumIndex {
        &self.index
    }

    pub fn missing_index(&self) -> u32 {
        self.index.missing_index()
    }

    pub fn dgg(&self) -> &Arc<DiscreteGlobalGrid> {
        &self.dgg
    }

    /// Read all values of variable `name` from the granule.
    pub fn read_values(&self, name: &str) -> Result<ArrayData> {
        let dataset = self.dataset.read().unwrap_or_else(PoisonError::into_inner);
        match dataset.as_ref() {
            Some(dataset) => dataset.read_values(name),
            None => Err(L2CubeError::Disposed(self.path.clone())),
        }
    }

    /// The granule mapped onto grid level `level`.
    ///
    /// Built on first request from the DGG seqnums of that level and kept
    /// for later requests.
    pub fn mapped_product(self: &Arc<Self>, level: usize) -> Result<Arc<MappedL2Product>> {
        if self.is_disposed() {
            return Err(L2CubeError::Disposed(self.path.clone()));
        }
        if let Some(mapped) = lock(&self.mapped_products).get(&level) {
            return Ok(mapped.clone());
        }

        let geometry = self.dgg.level_geometry(level)?;
        let seqnums = self.dgg.read_seqnum_level(level)?;
        let mapped_index = self.index.map_seqnum_block(&seqnums);
        let mapped = Arc::new(MappedL2Product {
            product: Arc::downgrade(self),
            path: self.path.clone(),
            level,
            geometry,
            mapped_index,
            missing_index: self.index.missing_index(),
            values_cache: Mutex::new(LruCache::new(self.mapped_values_cache_size)),
        });
        tracing::debug!(path = %self.path, level, "Mapped L2 product onto DGG level");

        let mut cache = lock(&self.mapped_products);
        if let Some(existing) = cache.get(&level) {
            return Ok(existing.clone());
        }
        cache.put(level, mapped.clone());
        Ok(mapped)
    }

    /// Levels with a cached mapped product, most recently used first.
    pub fn mapped_levels(&self) -> Vec<usize> {
        lock(&self.mapped_products).keys()
    }

    pub fn mapped_cache_stats(&self) -> CacheStats {
        lock(&self.mapped_products).stats()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Close the granule and dispose all mapped products.
    ///
    /// Only the first call has an effect.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let dataset = self
            .dataset
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut dataset) = dataset {
            dataset.close();
        }
        lock(&self.mapped_products).clear();
        tracing::debug!(path = %self.path, "Disposed L2 product");
    }
}

impl Drop for L2Product {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for L2Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("L2Product")
            .field("path", &self.path)
            .field("rows", &self.index.num_rows())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// One granule mapped onto one grid level.
pub struct MappedL2Product {
    product: Weak<L2Product>,
    path: String,
    level: usize,
    geometry: LevelGeometry,
    /// Granule row of every pixel, row-major, or `missing_index`.
    mapped_index: Vec<u32>,
    missing_index: u32,
    values_cache: Mutex<LruCache<String, Arc<NdArray>>>,
}

impl MappedL2Product {
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn geometry(&self) -> LevelGeometry {
        self.geometry
    }

    pub fn mapped_index(&self) -> &[u32] {
        &self.mapped_index
    }

    pub fn missing_index(&self) -> u32 {
        self.missing_index
    }

    /// Variable `name` on this level, shaped `(1, height, width)`.
    ///
    /// Reads the variable from the granule, so every call that misses the
    /// values cache performs source I/O.
    pub fn map_variable(&self, name: &str) -> Result<Arc<NdArray>> {
        if let Some(cached) = lock(&self.values_cache).get(&name.to_string()) {
            return Ok(cached.clone());
        }

        let product = self
            .product
            .upgrade()
            .ok_or_else(|| L2CubeError::Disposed(self.path.clone()))?;
        let fill_value = product
            .fill_value(name)
            .ok_or_else(|| L2CubeError::unknown_variable(name, &self.path))?;
        let values = product.read_values(name)?;
        let mapped = map_values(&self.mapped_index, &values, self.missing_index, fill_value)?;
        let array = Arc::new(NdArray::new(
            mapped,
            vec![1, self.geometry.height, self.geometry.width],
        )?);
        tracing::trace!(path = %self.path, level = self.level, variable = name, "Mapped variable");

        lock(&self.values_cache).put(name.to_string(), array.clone());
        Ok(array)
    }

    /// Drop all cached variable arrays.
    pub fn dispose(&self) {
        lock(&self.values_cache).clear();
    }

    pub fn cached_variables(&self) -> usize {
        lock(&self.values_cache).len()
    }
}

impl fmt::Debug for MappedL2Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedL2Product")
            .field("path", &self.path)
            .field("level", &self.level)
            .field("geometry", &self.geometry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{DatasetOpener, MemoryDataset, MemoryOpener, OpenerKwargs};
    use crate::testing::{fill_attrs, small_dgg};
    use smos_common::DType;

    fn granule() -> MemoryDataset {
        MemoryDataset::new("g0")
            .with_variable(GRID_POINT_ID, ArrayData::UInt32(vec![3, 1, 8]), Attrs::new())
            .with_variable(
                "Soil_Moisture",
                ArrayData::Float32(vec![0.3, 0.1, 0.8]),
                fill_attrs(Scalar::Float(-999.0)),
            )
            .with_variable("Chi_2", ArrayData::UInt8(vec![30, 10, 80]), Attrs::new())
    }

    fn open(opener: &MemoryOpener) -> Box<dyn SourceDataset> {
        opener.open("g0", &OpenerKwargs::new()).unwrap()
    }

    #[test]
    fn test_fill_values() {
        let dir = tempfile::tempdir().unwrap();
        let opener = MemoryOpener::new().with_dataset(granule());
        let product = L2Product::create(small_dgg(dir.path()), open(&opener), 0).unwrap();

        assert_eq!(product.fill_value("Soil_Moisture"), Some(Scalar::Float(-999.0)));
        assert_eq!(product.fill_value("Chi_2"), Some(Scalar::Int(0)));
        assert_eq!(product.fill_value("Missing"), None);
        assert_eq!(product.missing_index(), 3);
        assert_eq!(product.variable("Chi_2").unwrap().dtype, DType::UInt8);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            lock(&self.0).extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_missing_fill_value_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let opener = MemoryOpener::new().with_dataset(granule());
        let dgg = small_dgg(dir.path());

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            L2Product::create(dgg, open(&opener), 0).unwrap();
        });

        let output = String::from_utf8(lock(&logs.0).clone()).unwrap();
        let warnings: Vec<&str> = output
            .lines()
            .filter(|l| l.contains("WARN") && l.contains("missing a fill value"))
            .collect();
        // Chi_2 and Grid_Point_ID declare no _FillValue, Soil_Moisture does
        assert_eq!(warnings.len(), 2, "{output}");
        let chi = warnings
            .iter()
            .find(|l| l.contains("variable=Chi_2"))
            .unwrap();
        assert!(chi.contains("fill_value=0"));
        assert!(chi.contains("path=g0"));
        assert!(warnings.iter().any(|l| l.contains("variable=Grid_Point_ID")));
        assert!(!output.contains("Soil_Moisture"));
    }

    #[test]
    fn test_map_variable() {
        let dir = tempfile::tempdir().unwrap();
        let opener = MemoryOpener::new().with_dataset(granule());
        let product = L2Product::create(small_dgg(dir.path()), open(&opener), 0).unwrap();

        let mapped = product.mapped_product(0).unwrap();
        assert_eq!(mapped.mapped_index().len(), 32);

        let sm = mapped.map_variable("Soil_Moisture").unwrap();
        assert_eq!(sm.shape, vec![1, 4, 8]);
        let values = sm.as_slice::<f32>().unwrap();
        // level 0 pixel i holds seqnum i + 1
        assert_eq!(values[0], 0.1);
        assert_eq!(values[2], 0.3);
        assert_eq!(values[7], 0.8);
        assert_eq!(values[1], -999.0);
        assert_eq!(values.iter().filter(|&&v| v == -999.0).count(), 29);

        let chi = product.mapped_product(1).unwrap().map_variable("Chi_2").unwrap();
        assert_eq!(chi.shape, vec![1, 2, 4]);
        assert_eq!(chi.as_slice::<u8>().unwrap(), &[10, 0, 30, 0, 0, 0, 0, 80]);

        assert!(matches!(
            mapped.map_variable("Unknown"),
            Err(L2CubeError::UnknownVariable { .. })
        ));
    }

    #[test]
    fn test_mapped_products_are_cached_per_level() {
        let dir = tempfile::tempdir().unwrap();
        let opener = MemoryOpener::new().with_dataset(granule());
        let product = L2Product::create(small_dgg(dir.path()), open(&opener), 0).unwrap();

        let a = product.mapped_product(1).unwrap();
        let b = product.mapped_product(1).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        product.mapped_product(0).unwrap();
        assert_eq!(product.mapped_levels(), vec![0, 1]);
        assert!(matches!(
            product.mapped_product(2),
            Err(L2CubeError::InvalidLevel { .. })
        ));
    }

    #[test]
    fn test_values_cache_size() {
        let dir = tempfile::tempdir().unwrap();
        let opener = MemoryOpener::new().with_dataset(granule());
        let dgg = small_dgg(dir.path());

        // Grid_Point_ID is read once on creation
        let product = L2Product::create(dgg.clone(), open(&opener), 0).unwrap();
        let mapped = product.mapped_product(0).unwrap();
        mapped.map_variable("Chi_2").unwrap();
        mapped.map_variable("Chi_2").unwrap();
        assert_eq!(opener.reads(), 3);
        assert_eq!(mapped.cached_variables(), 0);

        let product = L2Product::create(dgg, open(&opener), 4).unwrap();
        let mapped = product.mapped_product(0).unwrap();
        let a = mapped.map_variable("Chi_2").unwrap();
        let b = mapped.map_variable("Chi_2").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(opener.reads(), 5);
        assert_eq!(mapped.cached_variables(), 1);
    }

    #[test]
    fn test_dispose() {
        let dir = tempfile::tempdir().unwrap();
        let opener = MemoryOpener::new().with_dataset(granule());
        let product = L2Product::create(small_dgg(dir.path()), open(&opener), 2).unwrap();
        let mapped = product.mapped_product(0).unwrap();
        mapped.map_variable("Soil_Moisture").unwrap();
        assert_eq!(mapped.cached_variables(), 1);

        product.dispose();
        product.dispose();
        assert_eq!(opener.closes(), 1);
        assert_eq!(mapped.cached_variables(), 0);
        assert!(product.mapped_levels().is_empty());
        assert!(matches!(
            product.read_values("Soil_Moisture"),
            Err(L2CubeError::Disposed(_))
        ));
        assert!(matches!(
            mapped.map_variable("Soil_Moisture"),
            Err(L2CubeError::Disposed(_))
        ));
        assert!(matches!(
            product.mapped_product(1),
            Err(L2CubeError::Disposed(_))
        ));
    }

    #[test]
    fn test_drop_closes_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let opener = MemoryOpener::new().with_dataset(granule());
        let product = L2Product::create(small_dgg(dir.path()), open(&opener), 0).unwrap();
        drop(product);
        assert_eq!(opener.open_datasets(), 0);
    }

    #[test]
    fn test_invalid_granule_is_closed() {
        let dir = tempfile::tempdir().unwrap();
        let opener = MemoryOpener::new()
            .with_dataset(
                MemoryDataset::new("bad")
                    .with_variable(GRID_POINT_ID, ArrayData::UInt32(vec![0, 1]), Attrs::new()),
            )
            .with_dataset(MemoryDataset::new("no-ids"));
        let dgg = small_dgg(dir.path());

        let bad = opener.open("bad", &OpenerKwargs::new()).unwrap();
        assert!(matches!(
            L2Product::create(dgg.clone(), bad, 0),
            Err(L2CubeError::OutOfRangeSeqnum { .. })
        ));
        let no_ids = opener.open("no-ids", &OpenerKwargs::new()).unwrap();
        assert!(matches!(
            L2Product::create(dgg, no_ids, 0),
            Err(L2CubeError::UnknownVariable { .. })
        ));
        assert_eq!(opener.open_datasets(), 0);
    }
}
