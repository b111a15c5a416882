//! Test data generators for synthetic grids and granules.
//!
//! These generators create predictable, verifiable patterns that can be
//! used across the test suite.

/// Creates a seqnum raster numbering the pixels row by row.
///
/// Pixel (`row`, `col`) holds `row * width + col + 1`, so every seqnum in
/// `1..=width * height` occurs exactly once.
///
/// # Example
///
/// ```
/// use test_utils::seqnum_grid;
///
/// let grid = seqnum_grid(4, 2);
/// assert_eq!(grid, vec![1, 2, 3, 4, 5, 6, 7, 8]);
/// ```
pub fn seqnum_grid(width: usize, height: usize) -> Vec<u32> {
    (1..=(width * height) as u32).collect()
}

/// Creates soil-moisture-like values in `[0, 0.6)`, one per seqnum.
///
/// Uses a simple hash-based approach for reproducibility.
pub fn soil_moisture_values(seqnums: &[u32], seed: u32) -> Vec<f32> {
    seqnums
        .iter()
        .map(|&s| (simple_hash(s, seed) % 600) as f32 / 1000.0)
        .collect()
}

/// Replaces every `nan_interval`-th value with `fill`, starting at index 0.
pub fn with_fill_values(values: &[f32], nan_interval: usize, fill: f32) -> Vec<f32> {
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| if nan_interval > 0 && i % nan_interval == 0 { fill } else { v })
        .collect()
}

/// Simple deterministic hash for reproducible test data.
fn simple_hash(x: u32, seed: u32) -> u32 {
    let mut h = seed;
    h = h.wrapping_mul(31).wrapping_add(x);
    h ^= h >> 16;
    h = h.wrapping_mul(0x85ebca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2ae35);
    h ^= h >> 16;
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seqnum_grid() {
        let grid = seqnum_grid(8, 4);
        assert_eq!(grid.len(), 32);
        assert_eq!(grid[0], 1);
        assert_eq!(grid[8], 9); // row 1, col 0
        assert_eq!(grid[31], 32);
    }

    #[test]
    fn test_soil_moisture_values_deterministic() {
        let seqnums = seqnum_grid(4, 4);
        let a = soil_moisture_values(&seqnums, 7);
        let b = soil_moisture_values(&seqnums, 7);
        assert_eq!(a, b);
        assert!(a.iter().all(|v| (0.0..0.6).contains(v)));
        assert_ne!(a, soil_moisture_values(&seqnums, 8));
    }

    #[test]
    fn test_with_fill_values() {
        let values = with_fill_values(&[0.1, 0.2, 0.3, 0.4], 2, -999.0);
        assert_eq!(values, vec![-999.0, 0.2, -999.0, 0.4]);
        assert_eq!(with_fill_values(&[0.1], 0, -999.0), vec![0.1]);
    }
}
