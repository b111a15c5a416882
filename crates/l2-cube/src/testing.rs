//! Small grids and granules shared by the unit tests.

use std::path::Path;
use std::sync::Arc;

use smos_common::{ArrayData, AttrValue, Attrs, Scalar};
use test_utils::fixtures::{write_dgg_pyramid, PyramidLayout};

use crate::config::DggConfig;
use crate::dgg::DiscreteGlobalGrid;
use crate::source::{MemoryDataset, GRID_POINT_ID};

/// 16x8 pyramid of 4x2 tiles; pyramid levels 1 and 2 exist on disk.
pub(crate) fn small_layout() -> PyramidLayout {
    PyramidLayout {
        max_width: 16,
        max_height: 8,
        tile_width: 4,
        tile_height: 2,
        levels: 1..3,
    }
}

/// Grid level 0 is 8x4 with seqnums 1..=32, level 1 is 4x2 with 1..=8.
pub(crate) fn small_config(base_path: &Path) -> DggConfig {
    DggConfig {
        base_path: base_path.to_path_buf(),
        max_width: 16,
        max_height: 8,
        tile_width: 4,
        tile_height: 2,
        max_num_levels: 3,
        min_pixel_size: 22.5,
        level0: 1,
        num_levels: 2,
        min_seqnum: 1,
        max_seqnum: 32,
    }
}

pub(crate) fn small_dgg(dir: &Path) -> Arc<DiscreteGlobalGrid> {
    write_dgg_pyramid(dir, &small_layout()).unwrap();
    Arc::new(DiscreteGlobalGrid::new(small_config(dir)).unwrap())
}

pub(crate) fn fill_attrs(fill: Scalar) -> Attrs {
    let mut attrs = Attrs::new();
    attrs.insert("_FillValue".into(), AttrValue::Scalar(fill));
    attrs
}

/// Soil moisture granule with one row per seqnum and a validity period
/// starting at `start` (compact form).
pub(crate) fn sm_granule(path: &str, seqnums: &[u32], values: &[f32], start: &str, stop: &str) -> MemoryDataset {
    MemoryDataset::new(path)
        .with_attr(smos_common::time::VALIDITY_START_ATTR, AttrValue::from(format!("UTC={start}").as_str()))
        .with_attr(smos_common::time::VALIDITY_STOP_ATTR, AttrValue::from(format!("UTC={stop}").as_str()))
        .with_variable(GRID_POINT_ID, ArrayData::UInt32(seqnums.to_vec()), Attrs::new())
        .with_variable(
            "Soil_Moisture",
            ArrayData::Float32(values.to_vec()),
            fill_attrs(Scalar::Float(-999.0)),
        )
        .with_variable(
            "Chi_2",
            ArrayData::UInt8(values.iter().map(|v| (v * 100.0) as u8).collect()),
            Attrs::new(),
        )
}
