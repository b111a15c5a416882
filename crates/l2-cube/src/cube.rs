//! Multi-level L2 cubes.
//!
//! An [`L2Cube`] declares, per grid level, a [`LevelDataset`] with the
//! coordinates `time`, `time_bnds`, `lon` and `lat` and one lazy array per
//! variable of its dataset identifier. Variable chunks are whole level
//! slices of one time step and are computed by the cube's
//! [`TimeStepLoader`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use smos_common::time::{TIME_CALENDAR, TIME_UNITS};
use smos_common::{
    encode_time, ArrayData, AttrValue, Attrs, BoundingBox, DatasetId, TimeBounds, TimeRange,
};

use crate::catalog::GranuleCatalog;
use crate::config::CubeConfig;
use crate::dgg::{lat_coord, lon_coord, DiscreteGlobalGrid};
use crate::error::{L2CubeError, Result};
use crate::iter::TimeStepIterator;
use crate::lazy::{LevelDataset, VirtualArray};
use crate::loader::TimeStepLoader;
use crate::source::DatasetOpener;
use crate::types::{ArrayInfo, LevelGeometry};

/// A dataset available at several resolution levels.
pub trait MultiLevelDataset: Send + Sync {
    /// Number of levels; level 0 has the highest resolution.
    fn num_levels(&self) -> usize;

    fn level_geometry(&self, level: usize) -> Result<LevelGeometry>;

    /// Dataset of level `level`.
    fn dataset(&self, level: usize) -> Result<Arc<LevelDataset>>;
}

/// A time-indexed cube of L2 granules remapped onto the DGG.
pub struct L2Cube {
    dataset_id: DatasetId,
    loader: Arc<TimeStepLoader>,
    time_bounds: Vec<TimeBounds>,
    bbox: Option<BoundingBox>,
    datasets: Mutex<BTreeMap<usize, Arc<LevelDataset>>>,
}

impl L2Cube {
    /// Create a cube with one time step per granule of `loader`.
    ///
    /// `time_bounds` holds the validity period of every granule, in the
    /// loader's order. See [`open_cube`] for how `bbox` applies.
    pub fn new(
        dataset_id: DatasetId,
        loader: Arc<TimeStepLoader>,
        time_bounds: Vec<TimeBounds>,
        bbox: Option<BoundingBox>,
    ) -> Result<Self> {
        if time_bounds.is_empty() {
            return Err(L2CubeError::EmptyDataset(format!(
                "no granules for {dataset_id}"
            )));
        }
        if time_bounds.len() != loader.num_time_steps() {
            return Err(L2CubeError::metadata(format!(
                "{} time bounds for {} granules",
                time_bounds.len(),
                loader.num_time_steps()
            )));
        }
        Ok(Self {
            dataset_id,
            loader,
            time_bounds,
            bbox,
            datasets: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn dataset_id(&self) -> DatasetId {
        self.dataset_id
    }

    pub fn loader(&self) -> &Arc<TimeStepLoader> {
        &self.loader
    }

    pub fn dgg(&self) -> &Arc<DiscreteGlobalGrid> {
        self.loader.dgg()
    }

    pub fn time_bounds(&self) -> &[TimeBounds] {
        &self.time_bounds
    }

    pub fn num_time_steps(&self) -> usize {
        self.time_bounds.len()
    }

    pub fn bbox(&self) -> Option<&BoundingBox> {
        self.bbox.as_ref()
    }

    /// Iterate the time steps of grid level `level`, mapping every granule
    /// eagerly and without caching.
    pub fn time_steps(&self, level: usize) -> Result<TimeStepIterator> {
        TimeStepIterator::new(
            self.dataset_id,
            self.loader.clone(),
            self.time_bounds.clone(),
            level,
        )
    }

    /// Declare the dataset of grid level `level`.
    ///
    /// Opens the first granule to learn the variables' element types,
    /// fill values and attributes. No variable data is mapped.
    pub fn build_level_dataset(&self, level: usize) -> Result<LevelDataset> {
        let dgg = self.loader.dgg();
        let geometry = dgg.level_geometry(level)?;
        let (height, width) = geometry.shape();
        let num_times = self.time_bounds.len();

        let prototype = self.loader.load_l2_product(0)?;
        let chunk_loader = Arc::new(self.loader.level_loader(level));

        let mut dataset = LevelDataset::new(
            self.dataset_id
                .attributes(geometry.lat_max(), geometry.pixel_size),
        );

        for &name in self.dataset_id.variable_names() {
            let Some(variable) = prototype.variable(name) else {
                tracing::debug!(
                    variable = name,
                    path = %prototype.path(),
                    "Variable not found in prototype granule"
                );
                continue;
            };
            let mut attrs = variable.attrs.clone();
            attrs.remove("_FillValue");
            let info = ArrayInfo {
                name: name.to_string(),
                dtype: variable.dtype,
                dims: vec!["time".into(), "lat".into(), "lon".into()],
                shape: vec![num_times, height, width],
                chunk_shape: vec![1, height, width],
                fill_value: prototype.fill_value(name),
            };
            dataset.add_variable(VirtualArray::lazy(info, attrs, chunk_loader.clone()));
        }

        dataset.add_coord(time_coord(&self.time_bounds)?);
        dataset.add_coord(time_bnds_coord(&self.time_bounds)?);
        dataset.add_coord(lon_coord(&geometry)?);
        dataset.add_coord(lat_coord(&geometry)?);

        tracing::debug!(
            dataset_id = %self.dataset_id,
            level,
            width,
            height,
            time_steps = num_times,
            variables = dataset.variable_names().len(),
            "Declared cube level"
        );

        match &self.bbox {
            Some(bbox) => {
                let extent = global_extent(&dgg.level_geometry(0)?);
                dataset.subset(bbox, &extent, dgg.config().min_pixel_size)
            }
            None => Ok(dataset),
        }
    }

    fn lock_datasets(&self) -> MutexGuard<'_, BTreeMap<usize, Arc<LevelDataset>>> {
        self.datasets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MultiLevelDataset for L2Cube {
    fn num_levels(&self) -> usize {
        self.loader.dgg().num_levels()
    }

    fn level_geometry(&self, level: usize) -> Result<LevelGeometry> {
        self.loader.dgg().level_geometry(level)
    }

    fn dataset(&self, level: usize) -> Result<Arc<LevelDataset>> {
        self.level_geometry(level)?;
        if let Some(dataset) = self.lock_datasets().get(&level) {
            return Ok(dataset.clone());
        }
        let dataset = Arc::new(self.build_level_dataset(level)?);
        Ok(self
            .lock_datasets()
            .entry(level)
            .or_insert(dataset)
            .clone())
    }
}

impl fmt::Debug for L2Cube {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("L2Cube")
            .field("dataset_id", &self.dataset_id)
            .field("time_steps", &self.time_bounds.len())
            .field("bbox", &self.bbox)
            .finish()
    }
}

/// Open the cube of `dataset_id` over the granules `catalog` finds in
/// `time_range`.
///
/// With a `bbox`, every level dataset holds only the pixels whose centers
/// lie inside it. The cube still opens when the box contains no pixel
/// center; requesting a level dataset then fails with
/// [`L2CubeError::InvalidSubset`].
pub fn open_cube(
    catalog: &dyn GranuleCatalog,
    dataset_id: DatasetId,
    time_range: &TimeRange,
    bbox: Option<BoundingBox>,
    config: &CubeConfig,
    opener: Arc<dyn DatasetOpener>,
) -> Result<L2Cube> {
    config.validate().map_err(L2CubeError::Config)?;

    let records = catalog.find_granules(dataset_id.product_type(), time_range, bbox.as_ref())?;
    if records.is_empty() {
        return Err(L2CubeError::EmptyDataset(format!(
            "no {} granules between {} and {}",
            dataset_id, time_range.start, time_range.end
        )));
    }
    tracing::info!(
        dataset_id = %dataset_id,
        granules = records.len(),
        start = %time_range.start,
        end = %time_range.end,
        "Opening L2 cube"
    );

    let dataset_paths = records
        .iter()
        .map(|record| catalog.resolve_path(&record.path))
        .collect();
    let time_bounds = records.iter().map(|record| record.time_bounds()).collect();

    let dgg = Arc::new(DiscreteGlobalGrid::open(config.dgg.clone())?);
    let loader = Arc::new(TimeStepLoader::new(dgg, dataset_paths, opener, config));
    L2Cube::new(dataset_id, loader, time_bounds, bbox)
}

/// Extent of a level: all longitudes, latitudes up to the grid edge.
fn global_extent(geometry: &LevelGeometry) -> BoundingBox {
    let lat_max = geometry.lat_max();
    BoundingBox::new(-180.0, -lat_max, 180.0, lat_max)
}

/// Midpoints of `time_bounds`, encoded as milliseconds since 2010.
pub(crate) fn time_coord(time_bounds: &[TimeBounds]) -> Result<VirtualArray> {
    let values: Vec<i64> = time_bounds
        .iter()
        .map(|b| encode_time(&b.midpoint()))
        .collect();
    let mut attrs = Attrs::new();
    attrs.insert("long_name".into(), AttrValue::from("time"));
    attrs.insert("standard_name".into(), AttrValue::from("time"));
    attrs.insert("bounds".into(), AttrValue::from("time_bnds"));
    attrs.insert("units".into(), AttrValue::from(TIME_UNITS));
    attrs.insert("calendar".into(), AttrValue::from(TIME_CALENDAR));
    VirtualArray::eager(
        "time",
        &["time"],
        vec![values.len()],
        ArrayData::Int64(values),
        attrs,
    )
}

/// Start and stop of every time step.
pub(crate) fn time_bnds_coord(time_bounds: &[TimeBounds]) -> Result<VirtualArray> {
    let values: Vec<i64> = time_bounds
        .iter()
        .flat_map(|b| [encode_time(&b.start), encode_time(&b.stop)])
        .collect();
    let mut attrs = Attrs::new();
    attrs.insert("units".into(), AttrValue::from(TIME_UNITS));
    attrs.insert("calendar".into(), AttrValue::from(TIME_CALENDAR));
    VirtualArray::eager(
        "time_bnds",
        &["time", "bnds"],
        vec![time_bounds.len(), 2],
        ArrayData::Int64(values),
        attrs,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::source::MemoryOpener;
    use crate::testing::{sm_granule, small_config, small_dgg};
    use smos_common::{parse_raw_time, GranuleRecord, Scalar};

    fn opener() -> Arc<MemoryOpener> {
        Arc::new(
            MemoryOpener::new()
                .with_dataset(sm_granule("g0", &[1, 2, 9], &[0.1, 0.2, 0.9], "20230401000000", "20230401010000"))
                .with_dataset(sm_granule("g1", &[9, 10], &[0.5, 0.6], "20230401020000", "20230401030000")),
        )
    }

    fn bounds(start: &str, stop: &str) -> TimeBounds {
        TimeBounds::new(parse_raw_time(start).unwrap(), parse_raw_time(stop).unwrap())
    }

    fn test_cube(dir: &std::path::Path, bbox: Option<BoundingBox>) -> (L2Cube, Arc<MemoryOpener>) {
        let opener = opener();
        let loader = Arc::new(TimeStepLoader::new(
            small_dgg(dir),
            vec!["g0".into(), "g1".into()],
            opener.clone(),
            &CubeConfig::default(),
        ));
        let cube = L2Cube::new(
            DatasetId::SoilMoisture,
            loader,
            vec![
                bounds("20230401000000", "20230401010000"),
                bounds("20230401020000", "20230401030000"),
            ],
            bbox,
        )
        .unwrap();
        (cube, opener)
    }

    #[test]
    fn test_level_dataset_declaration() {
        let dir = tempfile::tempdir().unwrap();
        let (cube, opener) = test_cube(dir.path(), None);
        assert_eq!(cube.num_levels(), 2);

        let dataset = cube.dataset(0).unwrap();
        assert_eq!(dataset.variable_names(), vec!["Chi_2", "Soil_Moisture"]);
        assert_eq!(dataset.coord_names(), vec!["lat", "lon", "time", "time_bnds"]);
        assert_eq!(opener.reads(), 1);

        let sm = dataset.variable("Soil_Moisture").unwrap();
        assert!(sm.is_lazy());
        assert_eq!(sm.shape(), &[2, 4, 8]);
        assert_eq!(sm.info().chunk_shape, vec![1, 4, 8]);
        assert_eq!(sm.fill_value(), Some(Scalar::Float(-999.0)));
        assert!(!sm.attrs().contains_key("_FillValue"));
        assert_eq!(dataset.variable("Chi_2").unwrap().fill_value(), Some(Scalar::Int(0)));

        let time = dataset.read_variable("time").unwrap();
        let expected = encode_time(&parse_raw_time("20230401003000").unwrap());
        assert_eq!(time.as_slice::<i64>().unwrap()[0], expected);
        assert_eq!(dataset.read_variable("time_bnds").unwrap().shape, vec![2, 2]);
        assert_eq!(
            dataset.coord("time").unwrap().attrs()["bounds"].as_str(),
            Some("time_bnds")
        );
        assert_eq!(
            dataset.attrs["coordinates"].as_str(),
            Some("lon lat time time_bnds")
        );

        let bounds = AttrValue::List(vec![
            Scalar::Float(-180.0),
            Scalar::Float(-90.0),
            Scalar::Float(180.0),
            Scalar::Float(90.0),
        ]);
        assert_eq!(dataset.attrs["geospatial_bounds"], bounds);
        assert_eq!(
            dataset.attrs["spatial_resolution"].as_scalar(),
            Some(Scalar::Float(45.0))
        );
        let level1 = cube.dataset(1).unwrap();
        assert_eq!(level1.attrs["geospatial_bounds"], bounds);
        assert_eq!(
            level1.attrs["spatial_resolution"].as_scalar(),
            Some(Scalar::Float(90.0))
        );

        // declared once per level
        assert!(Arc::ptr_eq(&dataset, &cube.dataset(0).unwrap()));
        assert!(matches!(cube.dataset(2), Err(L2CubeError::InvalidLevel { .. })));
    }

    #[test]
    fn test_time_slices_come_from_their_own_granule() {
        let dir = tempfile::tempdir().unwrap();
        let (cube, _) = test_cube(dir.path(), None);
        let sm = cube.dataset(0).unwrap().variable("Soil_Moisture").unwrap().clone();

        let t0 = sm.read_chunk(&[0, 0, 0]).unwrap();
        let t0 = t0.as_slice::<f32>().unwrap();
        assert_eq!(&t0[..2], &[0.1, 0.2]);
        assert_eq!(t0[8], 0.9);
        assert_eq!(t0[9], -999.0);

        let t1 = sm.read_chunk(&[1, 0, 0]).unwrap();
        let t1 = t1.as_slice::<f32>().unwrap();
        assert_eq!(&t1[..2], &[-999.0, -999.0]);
        assert_eq!(t1[8], 0.5);
        assert_eq!(t1[9], 0.6);

        let full = sm.read().unwrap();
        assert_eq!(full.shape, vec![2, 4, 8]);
        assert_eq!(full.as_slice::<f32>().unwrap()[32 + 8], 0.5);
    }

    #[test]
    fn test_bbox_subset() {
        let dir = tempfile::tempdir().unwrap();

        // level 0 cells are 45 degrees wide; centers at -157.5, -112.5, ...
        let bbox = BoundingBox::new(-180.0, 0.0, -90.0, 90.0);
        let (cube, _) = test_cube(dir.path(), Some(bbox));
        let dataset = cube.dataset(0).unwrap();
        assert_eq!(dataset.dim_size("lon"), Some(2));
        assert_eq!(dataset.dim_size("lat"), Some(2));
        let sm = dataset.read_variable("Soil_Moisture").unwrap();
        assert_eq!(sm.shape, vec![2, 2, 2]);
        assert_eq!(sm.as_slice::<f32>().unwrap()[..4], [0.1, 0.2, 0.9, -999.0]);

        let (cube, _) = test_cube(dir.path(), Some(BoundingBox::default()));
        assert_eq!(cube.dataset(1).unwrap().dim_size("lon"), Some(4));

        let (cube, _) = test_cube(dir.path(), Some(BoundingBox::new(10.0, 80.0, 20.0, 85.0)));
        assert!(matches!(cube.dataset(0), Err(L2CubeError::InvalidSubset(_))));
    }

    #[test]
    fn test_open_cube() {
        let dir = tempfile::tempdir().unwrap();
        small_dgg(dir.path());
        let config = CubeConfig {
            dgg: small_config(dir.path()),
            ..Default::default()
        };
        let catalog = StaticCatalog::new().with_records(
            DatasetId::SoilMoisture,
            vec![
                GranuleRecord::new(
                    "g1",
                    parse_raw_time("20230401020000").unwrap(),
                    parse_raw_time("20230401030000").unwrap(),
                ),
                GranuleRecord::new(
                    "g0",
                    parse_raw_time("20230401000000").unwrap(),
                    parse_raw_time("20230401010000").unwrap(),
                ),
            ],
        );

        let range = TimeRange::parse("2023-04-01", "2023-04-02").unwrap();
        let cube = open_cube(&catalog, DatasetId::SoilMoisture, &range, None, &config, opener()).unwrap();
        assert_eq!(cube.loader().dataset_paths(), &["g0".to_string(), "g1".to_string()]);
        assert_eq!(cube.num_time_steps(), 2);

        assert!(matches!(
            open_cube(&catalog, DatasetId::OceanSalinity, &range, None, &config, opener()),
            Err(L2CubeError::EmptyDataset(_))
        ));
        let range = TimeRange::parse("2024-01-01", "2024-01-02").unwrap();
        assert!(matches!(
            open_cube(&catalog, DatasetId::SoilMoisture, &range, None, &config, opener()),
            Err(L2CubeError::EmptyDataset(_))
        ));
    }
}
