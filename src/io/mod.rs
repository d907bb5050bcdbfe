//! I/O modules for region grids, GeoTIFF rasters and run configuration

pub mod config;
pub mod grid_store;
#[cfg(feature = "gdal")]
pub mod gdal_store;

pub use config::{MosaicConfig, RegionConfig, RunConfig, SubunitConfig};
pub use grid_store::MemoryGridStore;
#[cfg(feature = "gdal")]
pub use gdal_store::{build_density_mosaic, read_grid, read_grid_in, write_grid, GeoTiffStore};
