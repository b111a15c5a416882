//! Eager iteration over the time steps of a cube.

use std::sync::Arc;

use smos_common::{DatasetId, TimeBounds};

use crate::cube::{time_bnds_coord, time_coord};
use crate::dgg::{lat_coord, lon_coord};
use crate::error::Result;
use crate::lazy::{LevelDataset, VirtualArray};
use crate::loader::TimeStepLoader;
use crate::product::L2Product;

/// One granule mapped onto one grid level.
#[derive(Debug, Clone)]
pub struct TimeStepDataset {
    /// Position of the granule in the cube.
    pub index: usize,
    pub path: String,
    pub time_bounds: TimeBounds,
    /// Variables shaped `(1, height, width)` plus coordinates.
    pub dataset: LevelDataset,
}

/// Yields one [`TimeStepDataset`] per granule, in time order.
///
/// Granules are opened one at a time and closed as soon as their variables
/// are mapped; the loader's granule cache is not used.
pub struct TimeStepIterator {
    dataset_id: DatasetId,
    loader: Arc<TimeStepLoader>,
    time_bounds: Vec<TimeBounds>,
    level: usize,
    next_index: usize,
}

impl TimeStepIterator {
    pub fn new(
        dataset_id: DatasetId,
        loader: Arc<TimeStepLoader>,
        time_bounds: Vec<TimeBounds>,
        level: usize,
    ) -> Result<Self> {
        loader.dgg().level_geometry(level)?;
        Ok(Self {
            dataset_id,
            loader,
            time_bounds,
            level,
            next_index: 0,
        })
    }

    pub fn level(&self) -> usize {
        self.level
    }

    fn map_time_step(&self, index: usize) -> Result<TimeStepDataset> {
        let path = &self.loader.dataset_paths()[index];
        let time_bounds = self.time_bounds[index];
        let geometry = self.loader.dgg().level_geometry(self.level)?;
        let (height, width) = geometry.shape();

        let source = self.loader.opener().open(path, self.loader.opener_kwargs())?;
        let product = L2Product::create(self.loader.dgg().clone(), source, 0)?;
        let mapped = product.mapped_product(self.level)?;

        let mut dataset = LevelDataset::new(
            self.dataset_id
                .attributes(geometry.lat_max(), geometry.pixel_size),
        );
        for &name in self.dataset_id.variable_names() {
            let Some(variable) = product.variable(name) else {
                continue;
            };
            let values = mapped.map_variable(name)?;
            let mut attrs = variable.attrs.clone();
            attrs.remove("_FillValue");
            let array = VirtualArray::eager(
                name,
                &["time", "lat", "lon"],
                vec![1, height, width],
                values.data.clone(),
                attrs,
            )?
            .with_fill_value(product.fill_value(name));
            dataset.add_variable(array);
        }
        product.dispose();

        dataset.add_coord(time_coord(&[time_bounds])?);
        dataset.add_coord(time_bnds_coord(&[time_bounds])?);
        dataset.add_coord(lon_coord(&geometry)?);
        dataset.add_coord(lat_coord(&geometry)?);

        tracing::debug!(index, path = %path, level = self.level, "Mapped time step");
        Ok(TimeStepDataset {
            index,
            path: path.clone(),
            time_bounds,
            dataset,
        })
    }
}

impl Iterator for TimeStepIterator {
    type Item = Result<TimeStepDataset>;

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.time_bounds.len().min(self.loader.num_time_steps());
        if self.next_index >= len {
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;
        Some(self.map_time_step(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.time_bounds.len().min(self.loader.num_time_steps());
        let remaining = len.saturating_sub(self.next_index);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TimeStepIterator {}
