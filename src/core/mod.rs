//! Core avoidance-mask processing modules

pub mod raster_algebra;
pub mod connected_components;
pub mod distance_buffer;
pub mod density_mosaic;
pub mod avoid_mask;
pub mod region_driver;

// Re-export main types
pub use raster_algebra::{NodataRule, Predicate};
pub use connected_components::{
    label_components, size_filter, ComponentFilter, ComponentFilterParams, Connectivity,
    EmptyMaskPolicy, GroupSizeTable,
};
pub use distance_buffer::{buffer_within, distance_field, BufferParams, DistanceBufferer};
pub use density_mosaic::{
    mosaic_max, round_and_fill_zero, round_and_fill_zero_in, DensityMosaicBuilder, MosaicReport,
};
pub use avoid_mask::{
    AvoidMaskParams, AvoidMaskPipeline, AvoidMaskProducts, AvoidMaskStats, DensityThresholds,
    IntermediateGrid, RegionGrids,
};
pub use region_driver::{
    RegionDriver, RegionGridSink, RegionGridSource, RegionReport, RegionStatus, RunSummary,
};
