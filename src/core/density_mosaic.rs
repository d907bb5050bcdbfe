//! Regional road-density mosaic from per-HUC line-density grids

use crate::core::raster_algebra::{apply_boundary, round_to_int};
use crate::types::{
    AvoidError, AvoidResult, CellValue, DensityGrid, ErrorKind, Grid, GridFrame, ValueGrid,
};
use ndarray::Zip;
use serde::{Deserialize, Serialize};

/// Round every defined cell half-up to an integer; nodata becomes 0
pub fn round_and_fill_zero<T: CellValue>(grid: &Grid<T>) -> DensityGrid {
    grid.map(None, |cell| match cell {
        Some(v) => round_to_int(v.as_f64()).clamp(i32::MIN as i64 + 1, i32::MAX as i64) as i32,
        None => 0,
    })
}

/// Snap a sub-unit grid into the regional frame, then round and zero-fill.
///
/// Cells of the region outside the sub-unit's footprint get density 0.
pub fn round_and_fill_zero_in<T: CellValue>(
    grid: &Grid<T>,
    frame: &GridFrame,
) -> AvoidResult<DensityGrid> {
    let snapped = grid.snap_to(frame)?;
    Ok(round_and_fill_zero(&snapped))
}

/// Cellwise maximum over aligned grids, ignoring nodata
pub fn mosaic_max<T: CellValue>(grids: &[Grid<T>]) -> AvoidResult<Grid<T>> {
    let (first, rest) = grids
        .split_first()
        .ok_or_else(|| AvoidError::MissingInput("No grids to mosaic".to_string()))?;

    for (i, grid) in rest.iter().enumerate() {
        first.ensure_aligned(grid, &format!("mosaic input {}", i + 1))?;
    }

    let nodata = grids
        .iter()
        .find_map(|g| g.nodata())
        .unwrap_or_else(T::default_nodata);

    let mut data = first.map(Some(nodata), |cell| cell.unwrap_or(nodata)).into_data();
    for grid in rest {
        let grid_nodata = grid.nodata();
        Zip::from(&mut data).and(grid.data()).for_each(|acc, &v| {
            if v.is_nodata(grid_nodata) {
                return;
            }
            if acc.is_nodata(Some(nodata)) || v > *acc {
                *acc = v;
            }
        });
    }

    let has_nodata = data.iter().any(|v| v.is_nodata(Some(nodata)));
    Grid::new(*first.frame(), data, if has_nodata { Some(nodata) } else { None })
}

/// A sub-unit that could not be placed into the regional mosaic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedSubunit {
    pub id: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Summary of a mosaic build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MosaicReport {
    pub subunits_used: Vec<String>,
    pub subunits_skipped: Vec<SkippedSubunit>,
    pub max_density: i32,
    pub nonzero_cells: usize,
}

/// Builds one regional density grid from per-sub-unit raw density grids
#[derive(Debug, Clone)]
pub struct DensityMosaicBuilder {
    frame: GridFrame,
    mask: Option<ValueGrid>,
    subunits: Vec<(String, ValueGrid)>,
    skipped: Vec<SkippedSubunit>,
}

impl DensityMosaicBuilder {
    /// Start a mosaic over the regional (usually buffered) frame
    pub fn new(frame: GridFrame) -> Self {
        Self {
            frame,
            mask: None,
            subunits: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Cells where `mask` is nodata become nodata in the mosaic
    pub fn with_mask(mut self, mask: ValueGrid) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn add_subunit(&mut self, id: impl Into<String>, density: ValueGrid) {
        self.subunits.push((id.into(), density));
    }

    /// Record a sub-unit whose grid could not be obtained
    pub fn skip_subunit(&mut self, id: impl Into<String>, error: &AvoidError) {
        let id = id.into();
        log::warn!("{} failed: {}", id, error);
        self.skipped.push(SkippedSubunit {
            id,
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    /// Round, zero-fill and take the cellwise maximum.
    ///
    /// A sub-unit that does not snap onto the regional frame is skipped and
    /// reported; the build fails only when no sub-unit is usable.
    pub fn build(self) -> AvoidResult<(DensityGrid, MosaicReport)> {
        log::info!(
            "Building density mosaic from {} sub-units ({}x{} cells)",
            self.subunits.len() + self.skipped.len(),
            self.frame.rows,
            self.frame.cols
        );

        let mut rounded = Vec::with_capacity(self.subunits.len());
        let mut used = Vec::new();
        let mut skipped = self.skipped;

        for (index, (id, grid)) in self.subunits.iter().enumerate() {
            log::debug!("{} {} / {}", id, index + 1, self.subunits.len());
            match round_and_fill_zero_in(grid, &self.frame) {
                Ok(g) => {
                    rounded.push(g);
                    used.push(id.clone());
                }
                Err(e) => {
                    log::warn!("{} failed: {}", id, e);
                    skipped.push(SkippedSubunit {
                        id: id.clone(),
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let mut mosaic = mosaic_max(&rounded)?;
        if let Some(mask) = &self.mask {
            mosaic = apply_boundary(&mosaic, mask)?;
        }

        let max_density = mosaic.data().iter().copied()
            .filter(|v| !v.is_nodata(mosaic.nodata()))
            .max()
            .unwrap_or(0);
        let nonzero_cells = mosaic.count_where(|v| v > 0);

        log::info!(
            "Density mosaic complete: {} sub-units used, {} skipped, max density {}",
            used.len(),
            skipped.len(),
            max_density
        );

        Ok((
            mosaic,
            MosaicReport {
                subunits_used: used,
                subunits_skipped: skipped,
                max_density,
                nonzero_cells,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use ndarray::Array2;

    fn frame_at(x: f64, y: f64, rows: usize, cols: usize) -> GridFrame {
        GridFrame::new(GeoTransform::north_up(x, y, 30.0), rows, cols).unwrap()
    }

    fn value_grid(frame: GridFrame, values: Vec<f32>) -> ValueGrid {
        Grid::new(frame, Array2::from_shape_vec(frame.dim(), values).unwrap(), None).unwrap()
    }

    #[test]
    fn test_round_and_fill_zero() {
        let g = value_grid(frame_at(0.0, 30.0, 1, 4), vec![24.5, 24.49, f32::NAN, 129.5]);
        let rounded = round_and_fill_zero(&g);
        assert_eq!(rounded.data().as_slice().unwrap(), &[25, 24, 0, 130]);
        assert_eq!(rounded.nodata(), None);
    }

    #[test]
    fn test_round_and_fill_zero_in_region_frame() {
        let region = frame_at(0.0, 90.0, 3, 3);
        let sub = value_grid(frame_at(30.0, 60.0, 2, 2), vec![1.4, 2.6, 3.5, f32::NAN]);
        let rounded = round_and_fill_zero_in(&sub, &region).unwrap();
        assert_eq!(
            rounded.data(),
            &Array2::from_shape_vec((3, 3), vec![0, 0, 0, 0, 1, 3, 0, 4, 0]).unwrap()
        );
    }

    #[test]
    fn test_mosaic_max_takes_higher_estimate() {
        let f = frame_at(0.0, 30.0, 1, 3);
        let a = round_and_fill_zero(&value_grid(f, vec![10.0, 50.0, f32::NAN]));
        let b = round_and_fill_zero(&value_grid(f, vec![20.0, 40.0, f32::NAN]));
        let m = mosaic_max(&[a, b]).unwrap();
        assert_eq!(m.data().as_slice().unwrap(), &[20, 50, 0]);
    }

    #[test]
    fn test_mosaic_max_single_input() {
        let g = value_grid(frame_at(0.0, 30.0, 1, 3), vec![0.5, f32::NAN, 7.2]);
        let single = mosaic_max(&[round_and_fill_zero(&g)]).unwrap();
        assert_eq!(single, round_and_fill_zero(&g));
    }

    #[test]
    fn test_mosaic_max_requires_input() {
        let empty: Vec<DensityGrid> = Vec::new();
        assert!(matches!(mosaic_max(&empty), Err(AvoidError::MissingInput(_))));
    }

    #[test]
    fn test_mosaic_max_rejects_misaligned() {
        let a = round_and_fill_zero(&value_grid(frame_at(0.0, 30.0, 1, 2), vec![1.0, 2.0]));
        let b = round_and_fill_zero(&value_grid(frame_at(30.0, 30.0, 1, 2), vec![1.0, 2.0]));
        assert!(matches!(mosaic_max(&[a, b]), Err(AvoidError::ShapeMismatch(_))));
    }

    #[test]
    fn test_builder_skips_unsnapped_subunit() {
        let region = frame_at(0.0, 60.0, 2, 4);
        let mut builder = DensityMosaicBuilder::new(region);
        builder.add_subunit("020403", value_grid(frame_at(0.0, 60.0, 2, 2), vec![30.2; 4]));
        builder.add_subunit("050100", value_grid(frame_at(60.0, 60.0, 2, 2), vec![70.6; 4]));
        builder.add_subunit("bad", value_grid(frame_at(15.0, 60.0, 2, 2), vec![999.0; 4]));

        let (mosaic, report) = builder.build().unwrap();
        assert_eq!(report.subunits_used, vec!["020403", "050100"]);
        assert_eq!(report.subunits_skipped.len(), 1);
        assert_eq!(report.subunits_skipped[0].kind, ErrorKind::ShapeMismatch);
        assert_eq!(report.max_density, 71);
        assert_eq!(mosaic.data()[[0, 0]], 30);
        assert_eq!(mosaic.data()[[1, 3]], 71);
    }

    #[test]
    fn test_builder_applies_mask() {
        let region = frame_at(0.0, 30.0, 1, 3);
        let mask = value_grid(region, vec![1.0, 1.0, f32::NAN]);
        let mut builder = DensityMosaicBuilder::new(region).with_mask(mask);
        builder.add_subunit("a", value_grid(region, vec![5.0, f32::NAN, 9.0]));

        let (mosaic, report) = builder.build().unwrap();
        assert_eq!(mosaic.value(0, 0), Some(5));
        assert_eq!(mosaic.value(0, 1), Some(0));
        assert_eq!(mosaic.value(0, 2), None);
        assert_eq!(report.nonzero_cells, 1);
    }

    #[test]
    fn test_builder_fails_without_usable_subunit() {
        let mut builder = DensityMosaicBuilder::new(frame_at(0.0, 30.0, 1, 3));
        builder.skip_subunit("170900", &AvoidError::MissingInput("no raster".to_string()));
        assert!(matches!(builder.build(), Err(AvoidError::MissingInput(_))));
    }
}
