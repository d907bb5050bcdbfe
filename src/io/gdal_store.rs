//! GeoTIFF reading and writing through GDAL

use crate::core::avoid_mask::{IntermediateGrid, RegionGrids};
use crate::core::density_mosaic::{DensityMosaicBuilder, MosaicReport};
use crate::core::region_driver::{RegionGridSink, RegionGridSource};
use crate::io::config::{MosaicConfig, RegionConfig, RunConfig};
use crate::types::{
    AvoidError, AvoidResult, AvoidanceScore, CellValue, GeoTransform, Grid, GridFrame, ValueGrid,
};
use gdal::raster::{Buffer, GdalType};
use gdal::{Dataset, DriverManager};
use ndarray::{s, Array2};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Frame and projection of a single-band raster without reading pixels
pub fn read_frame<P: AsRef<Path>>(path: P) -> AvoidResult<(GridFrame, String)> {
    let dataset = Dataset::open(path.as_ref())?;
    let (width, height) = dataset.raster_size();
    let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let frame = GridFrame::new(transform, height, width)?;
    Ok((frame, dataset.projection()))
}

/// Read band 1 of a raster in its own frame
pub fn read_grid<P: AsRef<Path>>(path: P) -> AvoidResult<ValueGrid> {
    let (frame, _) = read_frame(path.as_ref())?;
    read_grid_in(path, &frame)
}

/// Read band 1 of a raster into `frame`.
///
/// The raster must share the cell size and snap onto the frame; it may be
/// larger (e.g. national land cover) or smaller than the frame. Frame cells
/// the raster does not cover are nodata.
pub fn read_grid_in<P: AsRef<Path>>(path: P, frame: &GridFrame) -> AvoidResult<ValueGrid> {
    let path = path.as_ref();
    log::debug!("Reading raster: {}", path.display());

    let dataset = Dataset::open(path)?;
    let (width, height) = dataset.raster_size();
    let source = GridFrame::new(GeoTransform::from_gdal(dataset.geo_transform()?), height, width)?;
    let (row_off, col_off) = source.snap_offset(frame)?;

    let rasterband = dataset.rasterband(1)?;
    let nodata = rasterband.no_data_value().map(|v| v as f32);
    let fill = nodata.unwrap_or(f32::NAN);
    let mut data = Array2::from_elem(frame.dim(), fill);

    let r0 = row_off.max(0);
    let c0 = col_off.max(0);
    let r1 = (row_off + frame.rows as isize).min(height as isize);
    let c1 = (col_off + frame.cols as isize).min(width as isize);

    if r1 > r0 && c1 > c0 {
        let (h, w) = ((r1 - r0) as usize, (c1 - c0) as usize);
        let buffer = rasterband.read_as::<f32>((c0, r0), (w, h), (w, h), None)?;
        let block = Array2::from_shape_vec((h, w), buffer.data)
            .map_err(|e| AvoidError::InvalidFormat(format!("Failed to reshape raster data: {}", e)))?;

        let (dr, dc) = ((r0 - row_off) as usize, (c0 - col_off) as usize);
        data.slice_mut(s![dr..dr + h, dc..dc + w]).assign(&block);
    } else {
        log::warn!("{} does not overlap the processing frame", path.display());
    }

    Grid::new(*frame, data, nodata)
}

/// Write a grid as a single-band GeoTIFF
pub fn write_grid<T, P>(path: P, grid: &Grid<T>, projection: &str) -> AvoidResult<()>
where
    T: CellValue + GdalType,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    log::debug!("Writing GeoTIFF: {}", path.display());

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (height, width) = grid.dim();

    let mut dataset = driver.create_with_band_type::<T, _>(path, width as isize, height as isize, 1)?;
    dataset.set_geo_transform(&grid.frame().transform.to_gdal())?;
    if !projection.is_empty() {
        dataset.set_projection(projection)?;
    }

    let mut rasterband = dataset.rasterband(1)?;
    let flat_data: Vec<T> = grid.data().iter().copied().collect();
    let buffer = Buffer::new((width, height), flat_data);
    rasterband.write((0, 0), (width, height), &buffer)?;

    if let Some(nodata) = grid.nodata() {
        rasterband.set_no_data_value(Some(nodata.as_f64()))?;
    }
    Ok(())
}

/// Region rasters on disk, outputs written as `<output_dir>/<region>_<name>.tif`
#[derive(Debug, Clone)]
pub struct GeoTiffStore {
    regions: HashMap<String, RegionConfig>,
    output_dir: PathBuf,
    /// Files created per region since the store was opened
    written: HashMap<String, Vec<PathBuf>>,
}

impl GeoTiffStore {
    pub fn new(config: &RunConfig) -> AvoidResult<Self> {
        std::fs::create_dir_all(&config.output_dir)?;
        Ok(Self {
            regions: config
                .regions
                .iter()
                .map(|r| (r.id.clone(), r.clone()))
                .collect(),
            output_dir: config.output_dir.clone(),
            written: HashMap::new(),
        })
    }

    pub fn output_path(&self, region_id: &str, name: &str) -> PathBuf {
        self.output_dir.join(format!("{}_{}.tif", region_id, name))
    }

    fn region(&self, region_id: &str) -> AvoidResult<&RegionConfig> {
        self.regions
            .get(region_id)
            .ok_or_else(|| AvoidError::MissingInput(format!("Region {} is not configured", region_id)))
    }

    /// The boundary raster's frame, or the density raster's without one
    fn reference(&self, region: &RegionConfig) -> AvoidResult<(GridFrame, String)> {
        read_frame(region.boundary.as_ref().unwrap_or(&region.density))
    }

    /// Output path for `name`, recorded before anything is written to it
    fn claim_output(&mut self, region_id: &str, name: &str) -> PathBuf {
        let path = self.output_path(region_id, name);
        self.written
            .entry(region_id.to_string())
            .or_default()
            .push(path.clone());
        path
    }
}

impl RegionGridSource for GeoTiffStore {
    fn load_region(&self, region_id: &str) -> AvoidResult<RegionGrids> {
        let region = self.region(region_id)?;
        let (frame, _) = self.reference(region)?;

        let landcover = read_grid_in(&region.landcover, &frame)?;
        let density = read_grid_in(&region.density, &frame)?;
        let grids = RegionGrids::new(landcover, density);

        match &region.boundary {
            Some(path) => Ok(grids.with_boundary(read_grid(path)?)),
            None => Ok(grids),
        }
    }
}

impl RegionGridSink for GeoTiffStore {
    fn store_score(&mut self, region_id: &str, score: &AvoidanceScore) -> AvoidResult<()> {
        let (_, projection) = self.reference(self.region(region_id)?)?;
        let path = self.claim_output(region_id, "avoid");
        write_grid(&path, score, &projection)?;
        log::info!("Wrote {}", path.display());
        Ok(())
    }

    fn store_intermediate(
        &mut self,
        region_id: &str,
        name: &str,
        grid: &IntermediateGrid,
    ) -> AvoidResult<()> {
        let (_, projection) = self.reference(self.region(region_id)?)?;
        let path = self.claim_output(region_id, name);
        match grid {
            IntermediateGrid::Mask(g) => write_grid(&path, g, &projection),
            IntermediateGrid::Labels(g) => write_grid(&path, g, &projection),
            IntermediateGrid::Distance(g) => write_grid(&path, g, &projection),
        }
    }

    fn discard_region(&mut self, region_id: &str) -> AvoidResult<()> {
        for path in self.written.remove(region_id).unwrap_or_default() {
            match std::fs::remove_file(&path) {
                Ok(()) => log::info!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Build and write the regional density mosaic described by `config`
pub fn build_density_mosaic(config: &MosaicConfig) -> AvoidResult<MosaicReport> {
    let (frame, projection) = read_frame(&config.frame)?;

    let mut builder = DensityMosaicBuilder::new(frame);
    if let Some(mask) = &config.mask {
        builder = builder.with_mask(read_grid_in(mask, &frame)?);
    }

    for subunit in &config.subunits {
        match read_grid(&subunit.path) {
            Ok(grid) => builder.add_subunit(subunit.id.clone(), grid),
            Err(e) => builder.skip_subunit(subunit.id.clone(), &e),
        }
    }

    let (mosaic, report) = builder.build()?;
    write_grid(&config.output, &mosaic, &projection)?;
    log::info!("Wrote {}", config.output.display());
    Ok(report)
}
