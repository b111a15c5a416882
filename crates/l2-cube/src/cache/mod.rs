//! Cache implementations for granules and remapped arrays.

mod lru_cache;

pub use lru_cache::{Disposer, LruCache};
