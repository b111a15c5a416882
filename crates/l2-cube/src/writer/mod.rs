//! Writing cubes as Zarr V3.
//!
//! Materializes the lazy level datasets of a cube into Zarr stores on the
//! local filesystem, one store per level.

mod zarr_writer;

pub use zarr_writer::{CubeWriteResult, CubeWriter};
