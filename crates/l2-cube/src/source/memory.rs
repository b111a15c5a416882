//! In-memory granules, used for tests and synthetic cubes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use smos_common::{ArrayData, AttrValue, Attrs};

use super::{DatasetOpener, OpenerKwargs, SourceDataset, VariableInfo};
use crate::error::{L2CubeError, Result};

#[derive(Debug, Default)]
struct Counters {
    opens: AtomicUsize,
    closes: AtomicUsize,
    reads: AtomicUsize,
}

/// A granule held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryDataset {
    path: String,
    attrs: Attrs,
    variables: BTreeMap<String, (Attrs, ArrayData)>,
    closed: bool,
    counters: Arc<Counters>,
}

impl MemoryDataset {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Add a global attribute.
    pub fn with_attr(mut self, name: impl Into<String>, value: AttrValue) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    /// Add a one-dimensional variable.
    pub fn with_variable(mut self, name: impl Into<String>, values: ArrayData, attrs: Attrs) -> Self {
        self.variables.insert(name.into(), (attrs, values));
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl SourceDataset for MemoryDataset {
    fn path(&self) -> &str {
        &self.path
    }

    fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    fn variable_names(&self) -> Vec<String> {
        self.variables.keys().cloned().collect()
    }

    fn variable(&self, name: &str) -> Option<VariableInfo> {
        self.variables.get(name).map(|(attrs, values)| VariableInfo {
            dtype: values.dtype(),
            shape: vec![values.len()],
            attrs: attrs.clone(),
        })
    }

    fn read_values(&self, name: &str) -> Result<ArrayData> {
        if self.closed {
            return Err(L2CubeError::source_io(format!("{} is closed", self.path)));
        }
        let (_, values) = self
            .variables
            .get(name)
            .ok_or_else(|| L2CubeError::unknown_variable(name, &self.path))?;
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        Ok(values.clone())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Opens [`MemoryDataset`]s registered by path and counts what happens to
/// them.
#[derive(Debug, Default)]
pub struct MemoryOpener {
    datasets: BTreeMap<String, MemoryDataset>,
    counters: Arc<Counters>,
}

impl MemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `dataset` under its path.
    pub fn with_dataset(mut self, dataset: MemoryDataset) -> Self {
        self.insert(dataset);
        self
    }

    pub fn insert(&mut self, dataset: MemoryDataset) {
        self.datasets.insert(dataset.path.clone(), dataset);
    }

    /// Paths of all registered datasets.
    pub fn paths(&self) -> Vec<String> {
        self.datasets.keys().cloned().collect()
    }

    /// Number of successful opens.
    pub fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    /// Number of datasets closed.
    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    /// Number of variable reads.
    pub fn reads(&self) -> usize {
        self.counters.reads.load(Ordering::SeqCst)
    }

    /// Datasets opened and not yet closed.
    pub fn open_datasets(&self) -> usize {
        self.opens().saturating_sub(self.closes())
    }
}

impl DatasetOpener for MemoryOpener {
    fn open(&self, path: &str, _kwargs: &OpenerKwargs) -> Result<Box<dyn SourceDataset>> {
        let dataset = self
            .datasets
            .get(path)
            .ok_or_else(|| L2CubeError::source_io(format!("no such granule: {path}")))?;
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryDataset {
            closed: false,
            counters: self.counters.clone(),
            ..dataset.clone()
        }))
    }
}
