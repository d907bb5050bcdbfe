use crate::core::connected_components::{
    ComponentFilter, ComponentFilterParams, Connectivity, EmptyMaskPolicy,
};
use crate::core::distance_buffer::DistanceBufferer;
use crate::core::raster_algebra::{
    add, apply_boundary, defined_mask, greater_than, threshold, NodataRule, Predicate,
};
use crate::types::{
    AvoidError, AvoidResult, AvoidanceScore, BooleanMask, DistanceField, GridFrame,
    LabeledRegions, ValueGrid,
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Road density cut-offs (meters of road per 10,000 square meters)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DensityThresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl Default for DensityThresholds {
    fn default() -> Self {
        Self {
            low: 25.0,
            medium: 65.0,
            high: 130.0,
        }
    }
}

/// Parameters for the avoidance-mask computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvoidMaskParams {
    /// Land-cover classes buffered by the wide radius
    pub low_urban_classes: Vec<i64>,
    /// Land-cover classes buffered by the narrow radius
    pub high_urban_classes: Vec<i64>,
    /// Urban groups need strictly more cells than this
    pub min_group_size: usize,
    pub connectivity: Connectivity,
    /// Map units
    pub low_buffer_radius: f64,
    /// Map units
    pub high_buffer_radius: f64,
    /// Distance output cell size; must match the grids
    pub sample_distance: f64,
    pub density_thresholds: DensityThresholds,
    pub empty_mask_policy: EmptyMaskPolicy,
    /// Retain every stage grid in the products
    pub keep_intermediates: bool,
}

impl Default for AvoidMaskParams {
    fn default() -> Self {
        Self {
            low_urban_classes: vec![22, 23, 24], // Developed: low, medium, high intensity
            high_urban_classes: vec![23, 24],    // Developed: medium, high intensity
            min_group_size: 5,
            connectivity: Connectivity::Eight,
            low_buffer_radius: 120.0,
            high_buffer_radius: 90.0,
            sample_distance: 30.0, // NLCD cell size
            density_thresholds: DensityThresholds::default(),
            empty_mask_policy: EmptyMaskPolicy::AllFalse,
            keep_intermediates: false,
        }
    }
}

impl AvoidMaskParams {
    pub fn validate(&self) -> AvoidResult<()> {
        Predicate::InSet(self.low_urban_classes.clone()).validate()?;
        Predicate::InSet(self.high_urban_classes.clone()).validate()?;

        let DensityThresholds { low, medium, high } = self.density_thresholds;
        if !(low.is_finite() && medium.is_finite() && high.is_finite()) {
            return Err(AvoidError::InvalidThreshold(format!(
                "Density thresholds must be finite, got {}/{}/{}",
                low, medium, high
            )));
        }
        if low > medium || medium > high {
            return Err(AvoidError::InvalidThreshold(format!(
                "Density thresholds must be ordered low <= medium <= high, got {}/{}/{}",
                low, medium, high
            )));
        }
        Ok(())
    }
}

/// Input grids for one region
#[derive(Debug, Clone)]
pub struct RegionGrids {
    pub landcover: ValueGrid,
    pub density: ValueGrid,
    /// Analysis mask; nodata cells lie outside the region
    pub boundary: Option<ValueGrid>,
}

impl RegionGrids {
    pub fn new(landcover: ValueGrid, density: ValueGrid) -> Self {
        Self {
            landcover,
            density,
            boundary: None,
        }
    }

    pub fn with_boundary(mut self, boundary: ValueGrid) -> Self {
        self.boundary = Some(boundary);
        self
    }

    /// The boundary's frame, or the land cover's without a boundary
    pub fn frame(&self) -> &GridFrame {
        match &self.boundary {
            Some(b) => b.frame(),
            None => self.landcover.frame(),
        }
    }
}

/// A retained stage grid
#[derive(Debug, Clone)]
pub enum IntermediateGrid {
    Mask(BooleanMask),
    Labels(LabeledRegions),
    Distance(DistanceField),
}

impl IntermediateGrid {
    pub fn frame(&self) -> &GridFrame {
        match self {
            IntermediateGrid::Mask(g) => g.frame(),
            IntermediateGrid::Labels(g) => g.frame(),
            IntermediateGrid::Distance(g) => g.frame(),
        }
    }
}

/// Summary counts for one region
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvoidMaskStats {
    /// Cells inside the region
    pub valid_cells: usize,
    /// Cells per score 0..=3
    pub score_counts: [usize; 4],
    pub low_urban_groups: usize,
    pub low_urban_groups_kept: usize,
    pub high_urban_groups: usize,
    pub high_urban_groups_kept: usize,
    pub low_buffer_cells: usize,
    pub high_buffer_cells: usize,
}

/// Output of [`AvoidMaskPipeline::process`]
#[derive(Debug, Clone)]
pub struct AvoidMaskProducts {
    pub score: AvoidanceScore,
    pub stats: AvoidMaskStats,
    /// Empty unless `keep_intermediates` is set
    pub intermediates: BTreeMap<String, IntermediateGrid>,
}

struct UrbanBuffer {
    buffer: BooleanMask,
    groups: usize,
    groups_kept: usize,
}

/// Per-region avoidance-mask processor
#[derive(Debug, Clone)]
pub struct AvoidMaskPipeline {
    params: AvoidMaskParams,
}

impl AvoidMaskPipeline {
    pub fn new(params: AvoidMaskParams) -> Self {
        Self { params }
    }

    /// Processor with the NLCD defaults
    pub fn standard() -> Self {
        Self::new(AvoidMaskParams::default())
    }

    pub fn params(&self) -> &AvoidMaskParams {
        &self.params
    }

    /// Compute the 0-3 avoidance score for one region
    pub fn process(&self, grids: &RegionGrids) -> AvoidResult<AvoidMaskProducts> {
        self.params.validate()?;

        let frame = *grids.frame();
        frame.ensure_aligned(grids.landcover.frame(), "land cover")?;
        frame.ensure_aligned(grids.density.frame(), "road density")?;

        log::info!(
            "Computing avoidance mask for {}x{} cells",
            frame.rows,
            frame.cols
        );

        let mut intermediates = BTreeMap::new();
        let thresholds = self.params.density_thresholds;

        // Cells outside the boundary neither join clusters nor seed buffers
        let boundary = grids.boundary.as_ref();
        let landcover = within_boundary(&grids.landcover, boundary)?;
        let density = within_boundary(&grids.density, boundary)?;

        // Step 1: wide buffer around clusters of any developed class
        let low = self.urban_buffer(
            "urban_low",
            &landcover,
            &self.params.low_urban_classes,
            self.params.low_buffer_radius,
            &mut intermediates,
        )?;

        // Step 2: narrow buffer around medium/high intensity clusters
        let high = self.urban_buffer(
            "urban_high",
            &landcover,
            &self.params.high_urban_classes,
            self.params.high_buffer_radius,
            &mut intermediates,
        )?;

        // Step 3: road density classes; nodata density counts as no roads
        log::debug!(
            "Thresholding road density at {}/{}/{}",
            thresholds.low,
            thresholds.medium,
            thresholds.high
        );
        let density: &ValueGrid = &density;
        let density_low = threshold(density, &Predicate::AtLeast(thresholds.low), NodataRule::False)?;
        let density_medium =
            threshold(density, &Predicate::AtLeast(thresholds.medium), NodataRule::False)?;
        let density_high =
            threshold(density, &Predicate::AtLeast(thresholds.high), NodataRule::False)?;

        // Step 4: criteria; medium and high both use the narrow buffer
        let criterion_low = greater_than(&add(&low.buffer, &density_low)?, 0.0, NodataRule::False)?;
        let criterion_medium =
            greater_than(&add(&high.buffer, &density_medium)?, 0.0, NodataRule::False)?;
        let criterion_high =
            greater_than(&add(&high.buffer, &density_high)?, 0.0, NodataRule::False)?;

        // Step 5: score and boundary
        let mut score = add(&add(&criterion_low, &criterion_medium)?, &criterion_high)?;
        if let Some(boundary) = boundary {
            score = apply_boundary(&score, boundary)?;
        }

        let mut score_counts = [0usize; 4];
        for (k, count) in score_counts.iter_mut().enumerate() {
            *count = score.count_where(|v| v as usize == k);
        }

        let stats = AvoidMaskStats {
            valid_cells: score.valid_count(),
            score_counts,
            low_urban_groups: low.groups,
            low_urban_groups_kept: low.groups_kept,
            high_urban_groups: high.groups,
            high_urban_groups_kept: high.groups_kept,
            low_buffer_cells: low.buffer.count_where(|v| v > 0),
            high_buffer_cells: high.buffer.count_where(|v| v > 0),
        };

        if self.params.keep_intermediates {
            for (name, grid) in [
                ("density_low", density_low),
                ("density_medium", density_medium),
                ("density_high", density_high),
                ("criterion_low", criterion_low),
                ("criterion_medium", criterion_medium),
                ("criterion_high", criterion_high),
            ] {
                intermediates.insert(name.to_string(), IntermediateGrid::Mask(grid));
            }
        }

        log::info!(
            "Avoidance mask complete: {} cells, score counts {:?}",
            stats.valid_cells,
            stats.score_counts
        );

        Ok(AvoidMaskProducts {
            score,
            stats,
            intermediates,
        })
    }

    fn urban_buffer(
        &self,
        prefix: &str,
        landcover: &ValueGrid,
        classes: &[i64],
        radius: f64,
        intermediates: &mut BTreeMap<String, IntermediateGrid>,
    ) -> AvoidResult<UrbanBuffer> {
        log::debug!("{}: classes {:?}, buffer {}", prefix, classes, radius);

        let candidates = threshold(landcover, &Predicate::InSet(classes.to_vec()), NodataRule::False)?;

        let filter = ComponentFilter::new(ComponentFilterParams {
            connectivity: self.params.connectivity,
            min_size: self.params.min_group_size,
            empty_policy: self.params.empty_mask_policy,
        });
        let filtered = filter.filter(&candidates)?;
        let groups = filtered.sizes.group_count();
        let groups_kept = filtered.groups_kept(self.params.min_group_size);

        let distance = DistanceBufferer::with_radius(radius, self.params.sample_distance)
            .distance_field(&filtered.mask)?;
        let buffer = defined_mask(&distance);

        log::debug!(
            "{}: {} of {} groups kept, buffer covers {} cells",
            prefix,
            groups_kept,
            groups,
            buffer.count_where(|v| v > 0)
        );

        if self.params.keep_intermediates {
            let mut keep = |stage: &str, grid: IntermediateGrid| {
                intermediates.insert(format!("{}_{}", prefix, stage), grid);
            };
            keep("candidates", IntermediateGrid::Mask(candidates));
            keep("groups", IntermediateGrid::Labels(filtered.labels));
            keep("clusters", IntermediateGrid::Mask(filtered.mask));
            keep("distance", IntermediateGrid::Distance(distance));
            keep("buffer", IntermediateGrid::Mask(buffer.clone()));
        }

        Ok(UrbanBuffer {
            buffer,
            groups,
            groups_kept,
        })
    }
}

/// Input grid with nodata wherever the boundary is nodata
fn within_boundary<'a>(
    grid: &'a ValueGrid,
    boundary: Option<&ValueGrid>,
) -> AvoidResult<Cow<'a, ValueGrid>> {
    match boundary {
        Some(b) => Ok(Cow::Owned(apply_boundary(grid, b)?)),
        None => Ok(Cow::Borrowed(grid)),
    }
}
