//! Kernel timing stores.
//!
//! [`KStat`] maps `kernel name → { per-arg layout tuple → nanoseconds }`,
//! populated by the profiler and consumed by the analyzer. [`IOStat`] maps
//! `kernel name → nanoseconds` and records the cost of just moving buffers;
//! [`KStat::reduce`] subtracts it, clamping at zero.
//!
//! Both persist as JSON. The inner `KStat` keys are the tuple-repr strings
//! produced by [`crate::layout::format_layouts`] and read back by the safe
//! parser; round-tripping a store through `dump`/`load` is the identity.

pub mod schedule;

pub use schedule::{Schedule, ScheduleGroup};

use std::collections::BTreeMap;

use crate::layout::{format_layouts, parse_layouts, KeyParseError, Layout};

/// Errors raised by the stat containers.
#[derive(Debug, thiserror::Error)]
pub enum StatError {
    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed layout-tuple key
    #[error(transparent)]
    Key(#[from] KeyParseError),
}

/// Measured kernel execution times, one cell per (kernel, layout tuple).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KStat {
    table: BTreeMap<String, BTreeMap<Vec<Layout>, f64>>,
}

impl KStat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one measured cell. Later insertions overwrite.
    pub fn insert(&mut self, kernel: &str, layouts: Vec<Layout>, time_ns: f64) {
        self.table
            .entry(kernel.to_string())
            .or_default()
            .insert(layouts, time_ns);
    }

    /// The full per-layout table for one kernel.
    pub fn kernel(&self, name: &str) -> Option<&BTreeMap<Vec<Layout>, f64>> {
        self.table.get(name)
    }

    /// One cell, if measured.
    pub fn cell(&self, kernel: &str, layouts: &[Layout]) -> Option<f64> {
        self.table.get(kernel)?.get(layouts).copied()
    }

    pub fn contains_kernel(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    pub fn kernels(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Number of measured cells across all kernels.
    pub fn len(&self) -> usize {
        self.table.values().map(BTreeMap::len).sum()
    }

    /// Subtract the per-kernel buffer-movement cost, clamping every cell at
    /// zero. Kernels absent from `iostat` are copied unchanged.
    pub fn reduce(&self, iostat: &IOStat) -> KStat {
        let mut out = KStat::new();
        for (kernel, cells) in &self.table {
            let io = iostat.get(kernel).unwrap_or(0.0);
            for (layouts, time) in cells {
                out.insert(kernel, layouts.clone(), (time - io).max(0.0));
            }
        }
        out
    }

    /// Serialize to JSON with canonical key order.
    pub fn dump(&self) -> Result<String, StatError> {
        let mut outer: BTreeMap<&str, BTreeMap<String, f64>> = BTreeMap::new();
        for (kernel, cells) in &self.table {
            let inner = cells
                .iter()
                .map(|(layouts, time)| (format_layouts(layouts), *time))
                .collect();
            outer.insert(kernel, inner);
        }
        Ok(serde_json::to_string(&outer)?)
    }

    /// Parse the JSON form produced by [`KStat::dump`].
    pub fn load(text: &str) -> Result<KStat, StatError> {
        let outer: BTreeMap<String, BTreeMap<String, f64>> = serde_json::from_str(text)?;
        let mut kstat = KStat::new();
        for (kernel, cells) in outer {
            for (key, time) in cells {
                kstat.insert(&kernel, parse_layouts(&key)?, time);
            }
        }
        Ok(kstat)
    }
}

/// Measured cost of buffer movement per kernel.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct IOStat {
    table: BTreeMap<String, f64>,
}

impl IOStat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kernel: &str, time_ns: f64) {
        self.table.insert(kernel.to_string(), time_ns);
    }

    pub fn get(&self, kernel: &str) -> Option<f64> {
        self.table.get(kernel).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn dump(&self) -> Result<String, StatError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn load(text: &str) -> Result<IOStat, StatError> {
        Ok(serde_json::from_str(text)?)
    }
}
