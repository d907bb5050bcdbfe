use crate::core::avoid_mask::{IntermediateGrid, RegionGrids};
use crate::core::region_driver::{RegionGridSink, RegionGridSource};
use crate::types::{AvoidError, AvoidResult, AvoidanceScore};
use std::collections::{BTreeMap, HashMap};

/// In-memory region inputs and outputs
#[derive(Debug, Clone, Default)]
pub struct MemoryGridStore {
    regions: HashMap<String, RegionGrids>,
    scores: BTreeMap<String, AvoidanceScore>,
    intermediates: BTreeMap<(String, String), IntermediateGrid>,
}

impl MemoryGridStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_region(&mut self, region_id: impl Into<String>, grids: RegionGrids) {
        self.regions.insert(region_id.into(), grids);
    }

    pub fn score(&self, region_id: &str) -> Option<&AvoidanceScore> {
        self.scores.get(region_id)
    }

    pub fn intermediate(&self, region_id: &str, name: &str) -> Option<&IntermediateGrid> {
        self.intermediates
            .get(&(region_id.to_string(), name.to_string()))
    }

    /// Names of the intermediates stored for a region, sorted
    pub fn intermediate_names(&self, region_id: &str) -> Vec<&str> {
        self.intermediates
            .keys()
            .filter(|(id, _)| id == region_id)
            .map(|(_, name)| name.as_str())
            .collect()
    }

    /// Region IDs with a stored score, sorted
    pub fn stored_regions(&self) -> Vec<&str> {
        self.scores.keys().map(String::as_str).collect()
    }
}

impl RegionGridSource for MemoryGridStore {
    fn load_region(&self, region_id: &str) -> AvoidResult<RegionGrids> {
        self.regions
            .get(region_id)
            .cloned()
            .ok_or_else(|| AvoidError::MissingInput(format!("No grids for region {}", region_id)))
    }
}

impl RegionGridSink for MemoryGridStore {
    fn store_score(&mut self, region_id: &str, score: &AvoidanceScore) -> AvoidResult<()> {
        self.scores.insert(region_id.to_string(), score.clone());
        Ok(())
    }

    fn store_intermediate(
        &mut self,
        region_id: &str,
        name: &str,
        grid: &IntermediateGrid,
    ) -> AvoidResult<()> {
        self.intermediates
            .insert((region_id.to_string(), name.to_string()), grid.clone());
        Ok(())
    }

    fn discard_region(&mut self, region_id: &str) -> AvoidResult<()> {
        self.scores.remove(region_id);
        self.intermediates.retain(|(id, _), _| id != region_id);
        Ok(())
    }
}
