//! Common types shared by the SMOS L2 cube crates.
//!
//! Everything in here is plain data: element types and scalar values,
//! dense in-memory arrays, geographic bounding boxes, granule time bounds
//! and the identifiers of the supported L2C datasets.

pub mod array;
pub mod attrs;
pub mod bbox;
pub mod dtype;
pub mod error;
pub mod product;
pub mod time;

pub use array::{ArrayData, Element, NdArray};
pub use attrs::{sanitize_attrs, AttrValue, Attrs};
pub use bbox::BoundingBox;
pub use dtype::{DType, Scalar};
pub use error::{CommonError, CommonResult};
pub use product::{DatasetId, GranuleRecord};
pub use time::{decode_time, encode_time, parse_raw_time, to_compact_time, TimeBounds, TimeRange};
