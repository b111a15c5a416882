//! Path utilities for locating test data.
//!
//! Real DGG pyramids and granules are too large for the repository. Tests
//! that need them look them up here and are skipped when absent.

use std::path::PathBuf;

/// Returns the workspace root directory.
pub fn workspace_root() -> PathBuf {
    // Start from the test-utils crate manifest dir
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    PathBuf::from(manifest_dir)
        .parent() // crates/
        .and_then(|p| p.parent()) // workspace root
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from(manifest_dir))
}

/// Searches for a test file or directory in multiple locations.
///
/// This function checks the following locations in order:
/// 1. Environment variable `TEST_DATA_DIR` (if set)
/// 2. `testdata/` at the workspace root
/// 3. `crates/l2-cube/testdata/`
pub fn find_test_file(name: &str) -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(test_data_dir) = std::env::var("TEST_DATA_DIR") {
        candidates.push(PathBuf::from(test_data_dir).join(name));
    }

    let root = workspace_root();
    candidates.extend([
        root.join("testdata").join(name),
        root.join("crates/l2-cube/testdata").join(name),
    ]);

    candidates.into_iter().find(|path| path.exists())
}

/// Location of a real DGG pyramid: `SMOS_DGG_DIR`, or `dgg` in the test
/// data directories.
pub fn find_dgg_pyramid() -> Option<PathBuf> {
    match std::env::var("SMOS_DGG_DIR") {
        Ok(dir) => Some(PathBuf::from(dir)).filter(|p| p.is_dir()),
        Err(_) => find_test_file("dgg").filter(|p| p.is_dir()),
    }
}
