//! Inverse index from DGG seqnums to granule rows.

use num_traits::ToPrimitive;
use rayon::prelude::*;
use smos_common::{with_array_data, ArrayData};

use crate::config::DggConfig;
use crate::dgg::grid_point_ids_to_seqnums;
use crate::error::{L2CubeError, Result};

/// Smallest slice handed to one rayon task by the lookup kernels.
pub(crate) const PARALLEL_MIN_LEN: usize = 1 << 16;

/// Maps every possible seqnum to the granule row holding it.
///
/// Seqnums that do not occur in the granule map to `missing_index`, which
/// equals the number of rows.
#[derive(Debug, Clone)]
pub struct SeqnumIndex {
    seqnum_to_index: Vec<u32>,
    missing_index: u32,
    duplicates: usize,
}

impl SeqnumIndex {
    /// Build the index of a granule from its `Grid_Point_ID` values.
    ///
    /// If several rows carry the same seqnum the last one wins.
    pub fn build(grid_point_ids: &[u64], config: &DggConfig) -> Result<Self> {
        let missing_index = u32::try_from(grid_point_ids.len()).map_err(|_| {
            L2CubeError::metadata(format!(
                "granule has {} rows, more than a seqnum index can address",
                grid_point_ids.len()
            ))
        })?;
        let table_len = usize::try_from(config.max_seqnum)
            .ok()
            .and_then(|n| n.checked_add(1))
            .ok_or_else(|| L2CubeError::config("max_seqnum too large"))?;

        let seqnums = grid_point_ids_to_seqnums(grid_point_ids);
        if let (Some(&min), Some(&max)) = (
            seqnums.par_iter().min(),
            seqnums.par_iter().max(),
        ) {
            if min < config.min_seqnum || max > config.max_seqnum {
                return Err(L2CubeError::OutOfRangeSeqnum {
                    min,
                    max,
                    valid_min: config.min_seqnum,
                    valid_max: config.max_seqnum,
                });
            }
        }

        let mut seqnum_to_index = vec![missing_index; table_len];
        let mut duplicates = 0;
        for (row, &seqnum) in seqnums.iter().enumerate() {
            let slot = &mut seqnum_to_index[seqnum as usize];
            if *slot != missing_index {
                duplicates += 1;
            }
            *slot = row as u32;
        }
        if duplicates > 0 {
            tracing::warn!(
                duplicates,
                rows = seqnums.len(),
                "Granule contains duplicate grid point ids, keeping the last row"
            );
        }

        Ok(Self {
            seqnum_to_index,
            missing_index,
            duplicates,
        })
    }

    /// Build the index from a `Grid_Point_ID` array of any element type.
    ///
    /// Values that are not non-negative integers (NaN from CF fill-value
    /// decoding, negative numbers) become 0 and fail the range check.
    pub fn from_array(grid_point_ids: &ArrayData, config: &DggConfig) -> Result<Self> {
        let ids: Vec<u64> =
            with_array_data!(grid_point_ids, v => v.iter().map(|x| x.to_u64().unwrap_or(0)).collect());
        Self::build(&ids, config)
    }

    /// Sentinel for seqnums without a row. Equals the number of rows.
    pub fn missing_index(&self) -> u32 {
        self.missing_index
    }

    /// Number of granule rows.
    pub fn num_rows(&self) -> usize {
        self.missing_index as usize
    }

    /// Number of rows that overwrote an earlier row with the same seqnum.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Row holding `seqnum`, if any.
    pub fn index_of(&self, seqnum: u64) -> Option<usize> {
        let row = *self.seqnum_to_index.get(usize::try_from(seqnum).ok()?)?;
        (row != self.missing_index).then_some(row as usize)
    }

    /// The dense seqnum to row table.
    pub fn as_slice(&self) -> &[u32] {
        &self.seqnum_to_index
    }

    /// Look up the row of every seqnum in `seqnums`.
    pub fn map_seqnum_block(&self, seqnums: &[u32]) -> Vec<u32> {
        map_seqnum_block(seqnums, &self.seqnum_to_index, self.missing_index)
    }
}

/// Elementwise `seqnum_to_index[seqnum]`.
///
/// Seqnums beyond the end of the table map to `missing_index`.
pub fn map_seqnum_block(seqnums: &[u32], seqnum_to_index: &[u32], missing_index: u32) -> Vec<u32> {
    seqnums
        .par_iter()
        .with_min_len(PARALLEL_MIN_LEN)
        .map(|&s| seqnum_to_index.get(s as usize).copied().unwrap_or(missing_index))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DggConfig {
        DggConfig::default()
    }

    #[test]
    fn test_index_round_trip() {
        // 2_621_442 is a wrapped grid point id
        let ids = [17u64, 5, 2_621_442, 1, 900_000];
        let index = SeqnumIndex::build(&ids, &config()).unwrap();
        let n = ids.len();

        assert_eq!(index.missing_index() as usize, n);
        assert_eq!(index.as_slice().len(), 2_621_443);
        for (row, &id) in ids.iter().enumerate() {
            let seqnum = crate::dgg::seqnum_from_grid_point_id(id);
            assert_eq!(index.as_slice()[seqnum as usize], row as u32);
            assert_eq!(index.index_of(seqnum), Some(row));
        }
        assert_eq!(index.index_of(1_145_731), Some(2));
        assert_eq!(index.index_of(2_621_442), None);
        let mapped = index
            .as_slice()
            .iter()
            .filter(|&&row| row != n as u32)
            .count();
        assert_eq!(mapped, n);
        assert_eq!(index.index_of(2), None);
        assert_eq!(index.index_of(10_000_000), None);
    }

    #[test]
    fn test_wraparound_ids_are_indexed_by_seqnum() {
        let index = SeqnumIndex::build(&[1_000_001, 3], &config()).unwrap();
        assert_eq!(index.index_of(262_146), Some(0));
        assert_eq!(index.index_of(3), Some(1));
    }

    #[test]
    fn test_out_of_range() {
        let err = SeqnumIndex::build(&[0, 5], &config()).unwrap_err();
        assert!(matches!(
            err,
            L2CubeError::OutOfRangeSeqnum { min: 0, max: 5, .. }
        ));
        assert!(err.to_string().contains("CF fill-value decoding"));

        // 4_999_999 -> 4_999_999 - 4 * 737_856 + 1 = 2_048_576
        assert!(SeqnumIndex::build(&[4_999_999], &config()).is_ok());
        let small = DggConfig {
            max_seqnum: 100,
            ..config()
        };
        assert!(matches!(
            SeqnumIndex::build(&[101], &small),
            Err(L2CubeError::OutOfRangeSeqnum { max: 101, .. })
        ));
    }

    #[test]
    fn test_decoded_float_ids_are_rejected() {
        let ids = ArrayData::Float64(vec![1.0, f64::NAN, 3.0]);
        assert!(matches!(
            SeqnumIndex::from_array(&ids, &config()),
            Err(L2CubeError::OutOfRangeSeqnum { min: 0, .. })
        ));

        let ids = ArrayData::UInt32(vec![4, 2]);
        let index = SeqnumIndex::from_array(&ids, &config()).unwrap();
        assert_eq!(index.index_of(2), Some(1));
    }

    #[test]
    fn test_duplicates_last_write_wins() {
        let index = SeqnumIndex::build(&[7, 8, 7], &config()).unwrap();
        assert_eq!(index.index_of(7), Some(2));
        assert_eq!(index.duplicates(), 1);
    }

    #[test]
    fn test_empty_granule() {
        let index = SeqnumIndex::build(&[], &config()).unwrap();
        assert_eq!(index.missing_index(), 0);
        assert!(index.as_slice().iter().all(|&row| row == 0));
        assert_eq!(index.map_seqnum_block(&[1, 2, 3]), vec![0, 0, 0]);
    }

    #[test]
    fn test_map_seqnum_block() {
        let index = SeqnumIndex::build(&[10, 20, 30], &config()).unwrap();
        let block = [0u32, 10, 11, 30, 20, u32::MAX];
        assert_eq!(index.map_seqnum_block(&block), vec![3, 0, 3, 2, 1, 3]);

        let large: Vec<u32> = (0..200_000u32).map(|i| i % 40).collect();
        let mapped = index.map_seqnum_block(&large);
        let expected: Vec<u32> = large
            .iter()
            .map(|&s| match s {
                10 => 0,
                20 => 1,
                30 => 2,
                _ => 3,
            })
            .collect();
        assert_eq!(mapped, expected);
    }
}
