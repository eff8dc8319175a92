//! Expander topology: region registry plus the Newick-subset tree that
//! describes how traffic is split across the hierarchy (§4.2).

#![forbid(unsafe_code)]

mod token;
mod tree;

pub use tree::{SampleRatio, TopologyNode};

use cxlmem_model::Region;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TopologyError {
    #[error("malformed topology: {0}")]
    Malformed(String),
    #[error("topology references undefined region label {0}")]
    UndefinedLabel(u32),
}

/// The region registry plus the parsed tree over it.
///
/// Regions are appended via [`Topology::insert_end_point`] and are the
/// authoritative indexing source for PEBS's `sample[region_index]` array
/// (§4.2): region `i` in this vector is exactly PEBS region index `i`.
#[derive(Debug, Default)]
pub struct Topology {
    regions: Vec<Region>,
    root: Option<TopologyNode>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a region. Newick labels are 1-based and index in insertion
    /// order, so the first call here becomes Newick label `1`.
    pub fn insert_end_point(&mut self, region: Region) {
        self.regions.push(region);
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Parses `newick` against the currently-inserted regions and stores the
    /// resulting tree. Must be called after all `insert_end_point` calls.
    pub fn construct_topo(&mut self, newick: &str) -> Result<(), TopologyError> {
        let root = tree::parse(newick, self.regions.len())?;
        self.root = Some(root);
        Ok(())
    }

    /// Returns the aggregated traversal latency in nanoseconds for traffic
    /// crossing `weight` fraction of the whole topology with the given
    /// read/write split. `weight` is normally `1.0` at epoch level.
    pub fn calculate_latency(&self, weight: f64, ratio: SampleRatio) -> f64 {
        match &self.root {
            Some(root) => tree::calculate_latency(root, &self.regions, weight, ratio),
            None => 0.0,
        }
    }

    pub fn calculate_bandwidth(&self, weight: f64, ratio: SampleRatio) -> f64 {
        match &self.root {
            Some(root) => tree::calculate_bandwidth(root, &self.regions, weight, ratio),
            None => 0.0,
        }
    }
}
