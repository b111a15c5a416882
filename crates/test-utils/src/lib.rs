//! Test fixtures for the L2 cube crates.
//!
//! Writes small DGG pyramids and Zarr granules into temporary directories,
//! generates seqnum rasters and granule values, and locates the real DGG
//! pyramid when one is installed.
//!
//! ```ignore
//! use test_utils::fixtures::{write_dgg_pyramid, PyramidLayout};
//! ```

pub mod fixtures;
pub mod generators;
pub mod paths;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;
pub use paths::*;

/// Macro to skip a test if the real DGG pyramid is not available.
///
/// # Usage
///
/// ```ignore
/// use test_utils::require_dgg_pyramid;
///
/// #[test]
/// fn test_real_grid() {
///     let root = require_dgg_pyramid!();
///     // Test code using root...
/// }
/// ```
///
/// If no pyramid is found, the test will print a skip message and return early.
#[macro_export]
macro_rules! require_dgg_pyramid {
    () => {{
        match $crate::find_dgg_pyramid() {
            Some(path) => path,
            None => {
                eprintln!("SKIPPED: DGG pyramid not found. Set SMOS_DGG_DIR or TEST_DATA_DIR.");
                return;
            }
        }
    }};
}

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Asserts that a pixel center `(lon, lat)` lies within `epsilon` degrees
/// of the expected one, naming the axis that is off.
///
/// ```ignore
/// use test_utils::assert_lon_lat_approx_eq;
///
/// assert_lon_lat_approx_eq!((lon[0], lat[0]), (-157.5, 67.5), 1e-9);
/// ```
#[macro_export]
macro_rules! assert_lon_lat_approx_eq {
    (($lon:expr, $lat:expr), ($expected_lon:expr, $expected_lat:expr), $epsilon:expr) => {{
        let (lon, lat): (f64, f64) = ($lon as f64, $lat as f64);
        let (expected_lon, expected_lat): (f64, f64) = ($expected_lon as f64, $expected_lat as f64);
        let epsilon: f64 = $epsilon as f64;
        if (lon - expected_lon).abs() > epsilon || (lat - expected_lat).abs() > epsilon {
            panic!(
                "pixel center ({}, {}) is not within {} of ({}, {})",
                lon, lat, epsilon, expected_lon, expected_lat
            );
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assert_approx_eq_passes() {
        assert_approx_eq!(1.0001, 1.0, 0.001);
        assert_approx_eq!(0.0, 0.0, 0.0001);
        assert_approx_eq!(-5.5, -5.500001, 0.0001);
    }

    #[test]
    #[should_panic(expected = "assertion failed")]
    fn test_assert_approx_eq_fails() {
        assert_approx_eq!(1.1, 1.0, 0.001);
    }

    #[test]
    fn test_lon_lat_within_epsilon() {
        assert_lon_lat_approx_eq!((-157.5000001_f32, 67.5), (-157.5, 67.5), 1e-4);
    }

    #[test]
    #[should_panic(expected = "pixel center (22.5, 67.5)")]
    fn test_lon_lat_off_in_latitude_only() {
        assert_lon_lat_approx_eq!((22.5, 67.5), (22.5, 22.5), 1e-9);
    }
}
