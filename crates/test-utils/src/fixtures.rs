//! On-disk fixtures: DGG pyramids and Zarr granules.
//!
//! Both are written in the layouts the cube reads in production, only
//! much smaller.

use std::fs::File;
use std::io::Write;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use zarrs::array::{ArrayBuilder, ChunkGrid, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::group::GroupBuilder;
use zarrs_filesystem::FilesystemStore;
use zip::write::SimpleFileOptions;

use crate::generators::seqnum_grid;

/// Shape of a synthetic DGG pyramid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyramidLayout {
    /// Width of pyramid level 0.
    pub max_width: usize,
    /// Height of pyramid level 0.
    pub max_height: usize,
    pub tile_width: usize,
    pub tile_height: usize,
    /// Absolute pyramid levels to write.
    pub levels: Range<usize>,
}

impl PyramidLayout {
    /// (width, height) of pyramid level `level`.
    pub fn level_size(&self, level: usize) -> (usize, usize) {
        (self.max_width >> level, self.max_height >> level)
    }
}

/// Write a pyramid whose every level is a [`seqnum_grid`] of its size.
///
/// Tiles go to `{root}/{level}/{col}-{row}.raw.zip` as big-endian `u32`.
/// Levels smaller than a tile are a single clipped tile.
pub fn write_dgg_pyramid(root: &Path, layout: &PyramidLayout) -> anyhow::Result<()> {
    for level in layout.levels.clone() {
        let (width, height) = layout.level_size(level);
        let grid = seqnum_grid(width, height);
        let tile_width = layout.tile_width.min(width);
        let tile_height = layout.tile_height.min(height);

        let level_dir = root.join(level.to_string());
        std::fs::create_dir_all(&level_dir)?;

        for row in 0..height.div_ceil(tile_height) {
            for col in 0..width.div_ceil(tile_width) {
                let rows = row * tile_height..((row + 1) * tile_height).min(height);
                let cols = col * tile_width..((col + 1) * tile_width).min(width);
                let mut bytes = Vec::with_capacity(rows.len() * cols.len() * 4);
                for y in rows {
                    for &seqnum in &grid[y * width + cols.start..y * width + cols.end] {
                        bytes.extend_from_slice(&seqnum.to_be_bytes());
                    }
                }
                write_zip(&level_dir.join(format!("{col}-{row}.raw.zip")), &format!("{col}-{row}.raw"), &bytes)?;
            }
        }
    }
    Ok(())
}

fn write_zip(path: &Path, entry: &str, bytes: &[u8]) -> anyhow::Result<()> {
    let mut zip = zip::ZipWriter::new(File::create(path)?);
    zip.start_file(entry, SimpleFileOptions::default())?;
    zip.write_all(bytes)?;
    zip.finish()?;
    Ok(())
}

fn chunk_grid(len: u64) -> anyhow::Result<ChunkGrid> {
    vec![len.max(1)]
        .try_into()
        .map_err(|e| anyhow::anyhow!("invalid chunk grid: {e:?}"))
}

/// A float variable of a granule: name, values, `_FillValue`.
pub type GranuleVariable<'a> = (&'a str, &'a [f32], Option<f64>);

/// Write an L2 granule as a Zarr V3 group.
///
/// `attrs` become group attributes, `ids` the `Grid_Point_ID` array
/// (uint32), and each variable a float32 array carrying its `_FillValue`
/// attribute.
pub fn write_zarr_granule(
    path: &Path,
    attrs: &[(&str, &str)],
    ids: &[u32],
    variables: &[GranuleVariable<'_>],
) -> anyhow::Result<()> {
    std::fs::create_dir_all(path)?;
    let store = Arc::new(FilesystemStore::new(path)?);

    let mut group_attrs = serde_json::Map::new();
    for (key, value) in attrs {
        group_attrs.insert(key.to_string(), serde_json::json!(value));
    }
    GroupBuilder::new()
        .attributes(group_attrs)
        .build(store.clone(), "/")?
        .store_metadata()?;

    let n = ids.len() as u64;
    let subset = ArraySubset::new_with_shape(vec![n]);

    let array = ArrayBuilder::new(vec![n], DataType::UInt32, chunk_grid(n)?, FillValue::from(0u32))
        .build(store.clone(), "/Grid_Point_ID")?;
    array.store_metadata()?;
    array.store_array_subset_elements(&subset, ids)?;

    for &(name, values, fill) in variables {
        anyhow::ensure!(
            values.len() == ids.len(),
            "variable {name} has {} values for {} grid points",
            values.len(),
            ids.len()
        );
        let mut var_attrs = serde_json::Map::new();
        if let Some(fill) = fill {
            var_attrs.insert("_FillValue".to_string(), serde_json::json!(fill));
        }
        let fill_value = FillValue::from(fill.map_or(f32::NAN, |f| f as f32));
        let array = ArrayBuilder::new(vec![n], DataType::Float32, chunk_grid(n)?, fill_value)
            .attributes(var_attrs)
            .build(store.clone(), &format!("/{name}"))?;
        array.store_metadata()?;
        array.store_array_subset_elements(&subset, values)?;
    }
    Ok(())
}

/// Standard soil moisture granule file name for compact times
/// `YYYYMMDDTHHMMSS`.
pub fn sm_granule_name(start: &str, stop: &str) -> String {
    format!("SM_OPER_MIR_SMUDP2_{start}_{stop}_700_001_1.zarr")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_dgg_pyramid_clips_tiles() {
        let dir = tempfile::tempdir().unwrap();
        let layout = PyramidLayout {
            max_width: 12,
            max_height: 6,
            tile_width: 4,
            tile_height: 4,
            levels: 0..2,
        };
        write_dgg_pyramid(dir.path(), &layout).unwrap();

        // level 0: 12x6 in 3x2 tiles, bottom row clipped to 2 rows
        assert!(dir.path().join("0/2-1.raw.zip").exists());
        assert!(!dir.path().join("0/3-0.raw.zip").exists());
        // level 1: 6x3 in 2x1 tiles
        assert!(dir.path().join("1/1-0.raw.zip").exists());
        assert!(!dir.path().join("1/0-1.raw.zip").exists());

        let file = File::open(dir.path().join("0/2-1.raw.zip")).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let mut entry = archive.by_index(0).unwrap();
        let mut bytes = Vec::new();
        std::io::Read::read_to_end(&mut entry, &mut bytes).unwrap();
        assert_eq!(bytes.len(), 2 * 4 * 4);
        // first pixel is row 4, col 8
        assert_eq!(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), 4 * 12 + 8 + 1);
    }

    #[test]
    fn test_write_zarr_granule_rejects_ragged_variables() {
        let dir = tempfile::tempdir().unwrap();
        let result = write_zarr_granule(
            &dir.path().join("g.zarr"),
            &[],
            &[1, 2, 3],
            &[("Soil_Moisture", &[0.1, 0.2], None)],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_sm_granule_name() {
        assert_eq!(
            sm_granule_name("20230401T000000", "20230401T013000"),
            "SM_OPER_MIR_SMUDP2_20230401T000000_20230401T013000_700_001_1.zarr"
        );
    }
}
