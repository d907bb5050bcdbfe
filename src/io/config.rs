//! JSON run configuration

use crate::core::avoid_mask::AvoidMaskParams;
use crate::types::{AvoidError, AvoidResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Input rasters of one region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    pub id: String,
    pub landcover: PathBuf,
    pub density: PathBuf,
    /// Region mask raster; defines the processing frame when present
    #[serde(default)]
    pub boundary: Option<PathBuf>,
}

/// Avoidance-mask run over a list of regions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub regions: Vec<RegionConfig>,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub params: AvoidMaskParams,
}

impl RunConfig {
    /// Load from a JSON file; relative paths resolve against its directory
    pub fn from_file<P: AsRef<Path>>(path: P) -> AvoidResult<Self> {
        let path = path.as_ref();
        log::info!("Loading run configuration from: {}", path.display());

        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_json_str(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> AvoidResult<Self> {
        let config: RunConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AvoidResult<()> {
        if self.regions.is_empty() {
            return Err(AvoidError::MissingInput(
                "Run configuration lists no regions".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for region in &self.regions {
            if !seen.insert(region.id.as_str()) {
                return Err(AvoidError::InvalidFormat(format!(
                    "Region {} is listed more than once",
                    region.id
                )));
            }
        }

        self.params.validate()
    }

    pub fn region_ids(&self) -> Vec<&str> {
        self.regions.iter().map(|r| r.id.as_str()).collect()
    }

    pub fn region(&self, region_id: &str) -> Option<&RegionConfig> {
        self.regions.iter().find(|r| r.id == region_id)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for region in &mut self.regions {
            resolve(base, &mut region.landcover);
            resolve(base, &mut region.density);
            if let Some(boundary) = region.boundary.as_mut() {
                resolve(base, boundary);
            }
        }
        resolve(base, &mut self.output_dir);
    }
}

/// One sub-unit (HUC) line-density raster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubunitConfig {
    pub id: String,
    pub path: PathBuf,
}

/// Density mosaic of sub-units into one regional raster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MosaicConfig {
    /// Raster whose extent and cell grid the mosaic takes
    pub frame: PathBuf,
    /// Cells where this raster is nodata become nodata in the mosaic
    #[serde(default)]
    pub mask: Option<PathBuf>,
    pub subunits: Vec<SubunitConfig>,
    pub output: PathBuf,
}

impl MosaicConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> AvoidResult<Self> {
        let path = path.as_ref();
        log::info!("Loading mosaic configuration from: {}", path.display());

        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_json_str(&text)?;
        if let Some(base) = path.parent() {
            resolve(base, &mut config.frame);
            if let Some(mask) = config.mask.as_mut() {
                resolve(base, mask);
            }
            for subunit in &mut config.subunits {
                resolve(base, &mut subunit.path);
            }
            resolve(base, &mut config.output);
        }
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> AvoidResult<Self> {
        let config: MosaicConfig = serde_json::from_str(text)?;
        if config.subunits.is_empty() {
            return Err(AvoidError::MissingInput(
                "Mosaic configuration lists no sub-units".to_string(),
            ));
        }
        Ok(config)
    }
}

fn resolve(base: &Path, path: &mut PathBuf) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}
