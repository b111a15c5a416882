//! The value remapping kernel.
//!
//! Projects the sparse values of one granule variable onto a dense grid
//! given, per grid cell, the granule row to take the value from.

use rayon::prelude::*;
use smos_common::{with_array_data, ArrayData, Element, Scalar};

use crate::error::{L2CubeError, Result};
use crate::seqnum::PARALLEL_MIN_LEN;

/// Gather `source[index[i]]` for every cell, or `fill` where
/// `index[i] == missing_index`.
///
/// The result has the length of `index` and the element type of `source`.
/// Every non-missing index must address a source element.
pub fn map_values(
    index: &[u32],
    source: &ArrayData,
    missing_index: u32,
    fill: Scalar,
) -> Result<ArrayData> {
    with_array_data!(source, values => remap_typed(index, values, missing_index, fill))
}

fn remap_typed<T: Element>(
    index: &[u32],
    values: &[T],
    missing_index: u32,
    fill: Scalar,
) -> Result<ArrayData> {
    let fill: T = fill.cast_to(T::DTYPE)?;
    if index.is_empty() {
        return Ok(T::wrap(Vec::new()));
    }

    let max_index = index
        .par_iter()
        .with_min_len(PARALLEL_MIN_LEN)
        .copied()
        .filter(|&i| i != missing_index)
        .max();
    if let Some(max_index) = max_index {
        if max_index as usize >= values.len() {
            return Err(L2CubeError::metadata(format!(
                "remap index {max_index} out of bounds for {} source values",
                values.len()
            )));
        }
    }
    if values.is_empty() {
        return Ok(T::wrap(vec![fill; index.len()]));
    }

    // the sentinel is redirected to row 0 before the gather
    let mapped: Vec<T> = index
        .par_iter()
        .with_min_len(PARALLEL_MIN_LEN)
        .map(|&i| {
            let missing = i == missing_index;
            let value = values[if missing { 0 } else { i as usize }];
            if missing {
                fill
            } else {
                value
            }
        })
        .collect();
    Ok(T::wrap(mapped))
}
