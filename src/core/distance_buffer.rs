use crate::types::{
    AvoidError, AvoidResult, BooleanMask, CellValue, DistanceField, Grid, ALIGN_TOLERANCE,
};
use crate::core::raster_algebra::defined_mask;
use ndarray::{Array2, ArrayViewMut1, Axis};
use serde::{Deserialize, Serialize};

/// Euclidean buffer parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BufferParams {
    /// Maximum distance (map units) a cell may be from a seed to be inside
    pub max_radius: f64,
    /// Output sample distance; must equal the mask's cell size
    pub sample_distance: f64,
}

impl Default for BufferParams {
    fn default() -> Self {
        Self {
            max_radius: 120.0,   // Low-intensity urban buffer
            sample_distance: 30.0, // NLCD cell size
        }
    }
}

/// Euclidean distance transform capped at a maximum radius
#[derive(Debug, Clone)]
pub struct DistanceBufferer {
    params: BufferParams,
}

impl DistanceBufferer {
    pub fn new(params: BufferParams) -> Self {
        Self { params }
    }

    pub fn with_radius(max_radius: f64, sample_distance: f64) -> Self {
        Self::new(BufferParams {
            max_radius,
            sample_distance,
        })
    }

    pub fn params(&self) -> &BufferParams {
        &self.params
    }

    fn validate(&self, mask: &BooleanMask) -> AvoidResult<()> {
        let BufferParams {
            max_radius,
            sample_distance,
        } = self.params;

        if !max_radius.is_finite() || max_radius < 0.0 {
            return Err(AvoidError::InvalidThreshold(format!(
                "Buffer radius must be finite and non-negative, got {}",
                max_radius
            )));
        }

        let frame = mask.frame();
        let tol = ALIGN_TOLERANCE * frame.cell_width();
        if !sample_distance.is_finite() || (sample_distance - frame.cell_width()).abs() > tol {
            return Err(AvoidError::InvalidThreshold(format!(
                "Sample distance {} does not match the mask cell size {}",
                sample_distance,
                frame.cell_width()
            )));
        }
        Ok(())
    }

    /// Distance from every cell centre to the nearest true cell centre.
    ///
    /// Cells further than `max_radius` are NaN (nodata). A mask without any
    /// true cell yields an all-nodata field.
    pub fn distance_field(&self, mask: &BooleanMask) -> AvoidResult<DistanceField> {
        self.validate(mask)?;

        let frame = *mask.frame();
        let mask_nodata = mask.nodata();
        let seeds = mask.count_where(|v| v > 0);
        log::debug!(
            "Euclidean distance from {} seed cells, max radius {}",
            seeds,
            self.params.max_radius
        );

        let mut squared = mask.data().mapv(|v| {
            if v > 0 && !v.is_nodata(mask_nodata) {
                0.0f64
            } else {
                f64::INFINITY
            }
        });

        if seeds > 0 {
            // Columns first (spacing = cell height), then rows (spacing = cell width)
            transform_lanes(&mut squared, Axis(1), frame.cell_height());
            transform_lanes(&mut squared, Axis(0), frame.cell_width());
        }

        let max_sq = self.params.max_radius * self.params.max_radius;
        let tol = ALIGN_TOLERANCE * frame.cell_width() * frame.cell_width();
        let distances = squared.mapv(|d2| {
            if d2 <= max_sq + tol {
                d2.sqrt() as f32
            } else {
                f32::NAN
            }
        });

        Grid::new(frame, distances, Some(f32::NAN))
    }

    /// 1 within `max_radius` of a true cell, 0 elsewhere
    pub fn buffer_within(&self, mask: &BooleanMask) -> AvoidResult<BooleanMask> {
        let field = self.distance_field(mask)?;
        let buffered = defined_mask(&field);
        log::debug!(
            "Buffer of {} map units covers {} cells",
            self.params.max_radius,
            buffered.count_where(|v| v > 0)
        );
        Ok(buffered)
    }
}

/// Distance field for `mask`, nodata beyond `max_radius`
pub fn distance_field(
    mask: &BooleanMask,
    max_radius: f64,
    sample_distance: f64,
) -> AvoidResult<DistanceField> {
    DistanceBufferer::with_radius(max_radius, sample_distance).distance_field(mask)
}

/// Boolean within-buffer grid for `mask`
pub fn buffer_within(
    mask: &BooleanMask,
    max_radius: f64,
    sample_distance: f64,
) -> AvoidResult<BooleanMask> {
    DistanceBufferer::with_radius(max_radius, sample_distance).buffer_within(mask)
}

/// Apply the 1D squared-distance transform along every lane of `axis`.
///
/// `Axis(1)` iterates columns (each lane runs down the rows).
fn transform_lanes(squared: &mut Array2<f64>, axis: Axis, spacing: f64) {
    #[cfg(feature = "parallel")]
    {
        use ndarray::parallel::prelude::*;
        squared
            .axis_iter_mut(axis)
            .into_par_iter()
            .for_each_init(LaneScratch::default, |scratch, lane| {
                scratch.transform(lane, spacing)
            });
    }

    #[cfg(not(feature = "parallel"))]
    {
        let mut scratch = LaneScratch::default();
        for lane in squared.axis_iter_mut(axis) {
            scratch.transform(lane, spacing);
        }
    }
}

/// Reusable buffers for the lower-envelope transform
#[derive(Default)]
struct LaneScratch {
    input: Vec<f64>,
    sites: Vec<usize>,
    bounds: Vec<f64>,
}

impl LaneScratch {
    /// Exact 1D squared Euclidean distance transform (lower envelope of
    /// parabolas rooted at finite samples), in place.
    fn transform(&mut self, mut lane: ArrayViewMut1<f64>, spacing: f64) {
        let n = lane.len();
        let s2 = spacing * spacing;

        self.input.clear();
        self.input.extend(lane.iter().copied());
        self.sites.clear();
        self.bounds.clear();

        let f = &self.input;
        for q in 0..n {
            if !f[q].is_finite() {
                continue;
            }
            let qf = q as f64;
            loop {
                match (self.sites.last(), self.bounds.last()) {
                    (Some(&p), Some(&left)) => {
                        let pf = p as f64;
                        let cross = ((f[q] + s2 * qf * qf) - (f[p] + s2 * pf * pf))
                            / (2.0 * s2 * (qf - pf));
                        if cross <= left {
                            self.sites.pop();
                            self.bounds.pop();
                            continue;
                        }
                        self.sites.push(q);
                        self.bounds.push(cross);
                    }
                    _ => {
                        self.sites.push(q);
                        self.bounds.push(f64::NEG_INFINITY);
                    }
                }
                break;
            }
        }

        if self.sites.is_empty() {
            lane.fill(f64::INFINITY);
            return;
        }

        let mut k = 0;
        for (p, out) in lane.iter_mut().enumerate() {
            let pf = p as f64;
            while k + 1 < self.sites.len() && self.bounds[k + 1] < pf {
                k += 1;
            }
            let site = self.sites[k];
            let d = pf - site as f64;
            *out = s2 * d * d + f[site];
        }
    }
}
