//! avoidmask: regional avoidance masks for habitat modeling
//!
//! Combines road density with buffered clusters of developed land cover into
//! a 0-3 avoidance score per cell, and builds the regional road-density
//! raster from per-watershed line-density grids.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    AvoidError, AvoidResult, AvoidanceScore, BooleanMask, CellValue, DensityGrid,
    DistanceField, ErrorKind, GeoTransform, Grid, GridFrame, LabeledRegions, ValueGrid,
};

pub use crate::core::{
    AvoidMaskParams, AvoidMaskPipeline, AvoidMaskProducts, DensityMosaicBuilder, RegionDriver,
    RegionGrids, RunSummary,
};
pub use crate::io::{MemoryGridStore, MosaicConfig, RunConfig};
