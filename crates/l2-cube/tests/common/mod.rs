//! Shared setup for the integration tests.

#![allow(dead_code)]

use std::path::Path;

use l2_cube::{CubeConfig, DggConfig, MemoryDataset, WriterConfig, ZarrCompression};
use smos_common::time::{VALIDITY_START_ATTR, VALIDITY_STOP_ATTR};
use smos_common::{parse_raw_time, ArrayData, AttrValue, Attrs, Scalar, TimeBounds};
use test_utils::fixtures::PyramidLayout;

pub const SM_FILL: f32 = -999.0;

/// Route `tracing` output to the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// 16x8 pyramid of 4x2 tiles with pyramid levels 1 and 2 on disk.
pub fn small_layout() -> PyramidLayout {
    PyramidLayout {
        max_width: 16,
        max_height: 8,
        tile_width: 4,
        tile_height: 2,
        levels: 1..3,
    }
}

/// Grid level 0 is 8x4 (45 degree pixels, seqnums 1..=32), level 1 is 4x2.
pub fn small_config(dgg_root: &Path) -> CubeConfig {
    CubeConfig {
        dgg: DggConfig {
            base_path: dgg_root.to_path_buf(),
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
        },
        granule_cache_size: 2,
        mapped_values_cache_size: 0,
        opener_kwargs: serde_json::Map::new(),
        writer: WriterConfig {
            compression: ZarrCompression::None,
            ..Default::default()
        },
    }
}

pub fn bounds(start: &str, stop: &str) -> TimeBounds {
    TimeBounds::new(parse_raw_time(start).unwrap(), parse_raw_time(stop).unwrap())
}

/// In-memory soil moisture granule, one row per grid point id.
pub fn sm_dataset(path: &str, ids: &[u32], values: &[f32], start: &str, stop: &str) -> MemoryDataset {
    let mut fill = Attrs::new();
    fill.insert("_FillValue".into(), AttrValue::Scalar(Scalar::Float(SM_FILL as f64)));
    MemoryDataset::new(path)
        .with_attr(VALIDITY_START_ATTR, AttrValue::from(format!("UTC={start}").as_str()))
        .with_attr(VALIDITY_STOP_ATTR, AttrValue::from(format!("UTC={stop}").as_str()))
        .with_variable("Grid_Point_ID", ArrayData::UInt32(ids.to_vec()), Attrs::new())
        .with_variable("Soil_Moisture", ArrayData::Float32(values.to_vec()), fill)
}
