//! Granule discovery.
//!
//! Cubes are opened over the granules a [`GranuleCatalog`] finds for a
//! product type and time range. Only a simple in-memory catalog lives here;
//! remote catalogs implement the same trait.

use std::collections::BTreeMap;
use std::path::PathBuf;

use smos_common::{BoundingBox, DatasetId, GranuleRecord, TimeRange};

use crate::error::Result;

/// Finds granules by product type and time.
pub trait GranuleCatalog: Send + Sync {
    /// Granules of `product_type` ("SM" or "OS") overlapping `time_range`,
    /// ordered by start time.
    ///
    /// Catalogs without footprints ignore `bbox`.
    fn find_granules(
        &self,
        product_type: &str,
        time_range: &TimeRange,
        bbox: Option<&BoundingBox>,
    ) -> Result<Vec<GranuleRecord>>;

    /// Turn a path returned by [`find_granules`](Self::find_granules) into
    /// one a dataset opener understands.
    fn resolve_path(&self, path: &str) -> String {
        path.to_string()
    }
}

/// Catalog over a fixed list of granules.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    records: BTreeMap<&'static str, Vec<GranuleRecord>>,
    base_dir: Option<PathBuf>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add granules of `dataset_id`.
    pub fn with_records(mut self, dataset_id: DatasetId, records: Vec<GranuleRecord>) -> Self {
        self.records
            .entry(dataset_id.product_type())
            .or_default()
            .extend(records);
        self
    }

    /// Add granules of `dataset_id` by file path, taking their time bounds
    /// from the standard file names. Paths that do not follow the naming
    /// scheme are skipped.
    pub fn with_paths<S: AsRef<str>>(self, dataset_id: DatasetId, paths: &[S]) -> Self {
        let records = paths
            .iter()
            .filter_map(|path| match GranuleRecord::from_path(dataset_id, path.as_ref()) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(path = path.as_ref(), error = %e, "Skipping granule");
                    None
                }
            })
            .collect();
        self.with_records(dataset_id, records)
    }

    /// Resolve relative granule paths against `base_dir`.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    /// Number of granules of `product_type`.
    pub fn num_granules(&self, product_type: &str) -> usize {
        self.records.get(product_type).map_or(0, Vec::len)
    }
}

impl GranuleCatalog for StaticCatalog {
    fn find_granules(
        &self,
        product_type: &str,
        time_range: &TimeRange,
        _bbox: Option<&BoundingBox>,
    ) -> Result<Vec<GranuleRecord>> {
        let mut found: Vec<GranuleRecord> = self
            .records
            .get(product_type)
            .into_iter()
            .flatten()
            .filter(|record| time_range.overlaps(&record.time_bounds()))
            .cloned()
            .collect();
        found.sort_by_key(|record| record.start);
        tracing::debug!(product_type, granules = found.len(), "Catalog query");
        Ok(found)
    }

    fn resolve_path(&self, path: &str) -> String {
        match &self.base_dir {
            Some(base_dir) if !path.starts_with('/') => {
                base_dir.join(path).to_string_lossy().into_owned()
            }
            _ => path.to_string(),
        }
    }
}
