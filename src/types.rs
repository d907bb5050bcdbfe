use ndarray::Array2;
use num_traits::{NumCast, Zero};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Fraction of a cell tolerated when comparing origins and cell sizes
pub const ALIGN_TOLERANCE: f64 = 1e-6;

/// Nodata sentinel for boolean masks and score grids
pub const MASK_NODATA: u8 = 255;

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square cells
    pub fn north_up(top_left_x: f64, top_left_y: f64, cell_size: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: cell_size,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -cell_size,
        }
    }

    pub fn from_gdal(coeffs: [f64; 6]) -> Self {
        Self {
            top_left_x: coeffs[0],
            pixel_width: coeffs[1],
            rotation_x: coeffs[2],
            top_left_y: coeffs[3],
            rotation_y: coeffs[4],
            pixel_height: coeffs[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }
}

/// Extent, resolution and snap alignment shared by every grid of a region
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridFrame {
    pub transform: GeoTransform,
    pub rows: usize,
    pub cols: usize,
}

impl GridFrame {
    /// Create a frame, rejecting rotated or degenerate transforms
    pub fn new(transform: GeoTransform, rows: usize, cols: usize) -> AvoidResult<Self> {
        if transform.rotation_x != 0.0 || transform.rotation_y != 0.0 {
            return Err(AvoidError::ShapeMismatch(
                "Rotated grids are not supported".to_string(),
            ));
        }
        let finite = transform.to_gdal().iter().all(|v| v.is_finite());
        if !finite || transform.pixel_width == 0.0 || transform.pixel_height == 0.0 {
            return Err(AvoidError::ShapeMismatch(format!(
                "Invalid cell size {}x{}",
                transform.pixel_width, transform.pixel_height
            )));
        }
        Ok(Self { transform, rows, cols })
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Cell width in map units
    pub fn cell_width(&self) -> f64 {
        self.transform.pixel_width.abs()
    }

    /// Cell height in map units
    pub fn cell_height(&self) -> f64 {
        self.transform.pixel_height.abs()
    }

    fn same_resolution(&self, other: &GridFrame) -> bool {
        let tol = ALIGN_TOLERANCE * self.cell_width().min(self.cell_height());
        (self.transform.pixel_width - other.transform.pixel_width).abs() <= tol
            && (self.transform.pixel_height - other.transform.pixel_height).abs() <= tol
    }

    /// Identical extent, resolution and alignment
    pub fn is_aligned_with(&self, other: &GridFrame) -> bool {
        let tol_x = ALIGN_TOLERANCE * self.cell_width();
        let tol_y = ALIGN_TOLERANCE * self.cell_height();
        self.dim() == other.dim()
            && self.same_resolution(other)
            && (self.transform.top_left_x - other.transform.top_left_x).abs() <= tol_x
            && (self.transform.top_left_y - other.transform.top_left_y).abs() <= tol_y
    }

    pub fn ensure_aligned(&self, other: &GridFrame, what: &str) -> AvoidResult<()> {
        if self.is_aligned_with(other) {
            return Ok(());
        }
        Err(AvoidError::ShapeMismatch(format!(
            "{}: {}x{} grid at ({}, {}) cell {}x{} vs {}x{} grid at ({}, {}) cell {}x{}",
            what,
            self.rows,
            self.cols,
            self.transform.top_left_x,
            self.transform.top_left_y,
            self.transform.pixel_width,
            self.transform.pixel_height,
            other.rows,
            other.cols,
            other.transform.top_left_x,
            other.transform.top_left_y,
            other.transform.pixel_width,
            other.transform.pixel_height,
        )))
    }

    /// Whole-cell (row, col) offset of `other`'s origin inside this frame.
    ///
    /// Fails unless both frames share the cell size and `other` snaps onto
    /// this frame's lattice.
    pub fn snap_offset(&self, other: &GridFrame) -> AvoidResult<(isize, isize)> {
        if !self.same_resolution(other) {
            return Err(AvoidError::ShapeMismatch(format!(
                "Cell size {}x{} does not match {}x{}",
                other.transform.pixel_width,
                other.transform.pixel_height,
                self.transform.pixel_width,
                self.transform.pixel_height
            )));
        }

        let col_shift =
            (other.transform.top_left_x - self.transform.top_left_x) / self.transform.pixel_width;
        let row_shift =
            (other.transform.top_left_y - self.transform.top_left_y) / self.transform.pixel_height;

        let col_off = col_shift.round();
        let row_off = row_shift.round();
        if (col_shift - col_off).abs() > ALIGN_TOLERANCE || (row_shift - row_off).abs() > ALIGN_TOLERANCE {
            return Err(AvoidError::ShapeMismatch(format!(
                "Grid origin ({}, {}) is not snapped to ({}, {})",
                other.transform.top_left_x,
                other.transform.top_left_y,
                self.transform.top_left_x,
                self.transform.top_left_y
            )));
        }

        Ok((row_off as isize, col_off as isize))
    }
}

/// Types that can be stored in a grid cell
pub trait CellValue:
    Copy + Debug + PartialOrd + PartialEq + NumCast + Zero + Send + Sync + 'static
{
    /// Sentinel used when a grid of this type needs a nodata value
    fn default_nodata() -> Self;

    /// Check if this value represents nodata
    fn is_nodata(&self, nodata: Option<Self>) -> bool;

    fn as_f64(self) -> f64 {
        num_traits::cast::<Self, f64>(self).unwrap_or(f64::NAN)
    }

    fn try_from_f64(value: f64) -> Option<Self> {
        num_traits::cast(value)
    }
}

macro_rules! impl_cell_value_int {
    ($t:ty, $nodata:expr) => {
        impl CellValue for $t {
            fn default_nodata() -> Self {
                $nodata
            }

            fn is_nodata(&self, nodata: Option<Self>) -> bool {
                nodata == Some(*self)
            }
        }
    };
}

macro_rules! impl_cell_value_float {
    ($t:ty) => {
        impl CellValue for $t {
            fn default_nodata() -> Self {
                <$t>::NAN
            }

            fn is_nodata(&self, nodata: Option<Self>) -> bool {
                self.is_nan() || nodata == Some(*self)
            }
        }
    };
}

impl_cell_value_int!(u8, MASK_NODATA);
impl_cell_value_int!(u16, u16::MAX);
impl_cell_value_int!(u32, u32::MAX);
impl_cell_value_int!(i16, i16::MIN);
impl_cell_value_int!(i32, i32::MIN);
impl_cell_value_int!(i64, i64::MIN);
impl_cell_value_float!(f32);
impl_cell_value_float!(f64);

/// A 2D raster over a [`GridFrame`] with an optional nodata sentinel
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T: CellValue> {
    frame: GridFrame,
    data: Array2<T>,
    nodata: Option<T>,
}

/// Land-cover, density and distance values
pub type ValueGrid = Grid<f32>;

/// Cells satisfying a predicate (1) or not (0); 255 when nodata
pub type BooleanMask = Grid<u8>;

/// Connected group IDs, 0 = background
pub type LabeledRegions = Grid<u32>;

/// Distance in map units to the nearest seed, NaN beyond the radius
pub type DistanceField = Grid<f32>;

/// Integer road density (meters per 10,000 square meters)
pub type DensityGrid = Grid<i32>;

/// Number of avoidance criteria met per cell (0-3), 255 outside the region
pub type AvoidanceScore = Grid<u8>;

impl<T: CellValue> Grid<T> {
    pub fn new(frame: GridFrame, data: Array2<T>, nodata: Option<T>) -> AvoidResult<Self> {
        if data.dim() != frame.dim() {
            return Err(AvoidError::ShapeMismatch(format!(
                "Data is {}x{} but frame is {}x{}",
                data.nrows(),
                data.ncols(),
                frame.rows,
                frame.cols
            )));
        }
        Ok(Self { frame, data, nodata })
    }

    /// Grid with every cell set to `value`
    pub fn filled(frame: GridFrame, value: T, nodata: Option<T>) -> Self {
        Self {
            frame,
            data: Array2::from_elem(frame.dim(), value),
            nodata,
        }
    }

    pub fn frame(&self) -> &GridFrame {
        &self.frame
    }

    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array2<T> {
        &mut self.data
    }

    pub fn into_data(self) -> Array2<T> {
        self.data
    }

    pub fn nodata(&self) -> Option<T> {
        self.nodata
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Cell value, or `None` for nodata and out-of-range indices
    pub fn value(&self, row: usize, col: usize) -> Option<T> {
        self.data
            .get((row, col))
            .copied()
            .filter(|v| !v.is_nodata(self.nodata))
    }

    pub fn is_nodata_at(&self, row: usize, col: usize) -> bool {
        self.value(row, col).is_none()
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| !v.is_nodata(self.nodata)).count()
    }

    pub fn count_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(T) -> bool,
    {
        self.data
            .iter()
            .filter(|v| !v.is_nodata(self.nodata) && predicate(**v))
            .count()
    }

    pub fn ensure_aligned<U: CellValue>(&self, other: &Grid<U>, what: &str) -> AvoidResult<()> {
        self.frame.ensure_aligned(&other.frame, what)
    }

    /// Cellwise map; `f` receives `None` for nodata cells
    pub fn map<U, F>(&self, nodata: Option<U>, f: F) -> Grid<U>
    where
        U: CellValue,
        F: Fn(Option<T>) -> U,
    {
        let own_nodata = self.nodata;
        let data = self.data.mapv(|v| {
            if v.is_nodata(own_nodata) {
                f(None)
            } else {
                f(Some(v))
            }
        });
        Grid {
            frame: self.frame,
            data,
            nodata,
        }
    }

    /// Re-express this grid in `target`'s frame.
    ///
    /// The source must share the cell size and snap onto the target lattice.
    /// Target cells outside the source footprint become nodata.
    pub fn snap_to(&self, target: &GridFrame) -> AvoidResult<Grid<T>> {
        if self.frame.is_aligned_with(target) {
            return Ok(self.clone());
        }

        let (row_off, col_off) = target.snap_offset(&self.frame)?;
        let nodata = self.nodata.unwrap_or_else(T::default_nodata);
        let mut out = Array2::from_elem(target.dim(), nodata);
        let (src_rows, src_cols) = self.dim();

        for ((r, c), v) in self.data.indexed_iter() {
            let tr = r as isize + row_off;
            let tc = c as isize + col_off;
            if tr < 0 || tc < 0 || tr as usize >= target.rows || tc as usize >= target.cols {
                continue;
            }
            out[[tr as usize, tc as usize]] = *v;
        }

        log::debug!(
            "Snapped {}x{} grid into {}x{} frame at offset ({}, {})",
            src_rows,
            src_cols,
            target.rows,
            target.cols,
            row_off,
            col_off
        );

        Ok(Grid {
            frame: *target,
            data: out,
            nodata: Some(nodata),
        })
    }
}

/// Serializable classification of [`AvoidError`], used in run reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ShapeMismatch,
    EmptyInput,
    MissingInput,
    InvalidThreshold,
    Io,
    InvalidFormat,
    Config,
    Gdal,
}

/// Error types for avoidance-mask processing
#[derive(Debug, thiserror::Error)]
pub enum AvoidError {
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

impl AvoidError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AvoidError::ShapeMismatch(_) => ErrorKind::ShapeMismatch,
            AvoidError::EmptyInput(_) => ErrorKind::EmptyInput,
            AvoidError::MissingInput(_) => ErrorKind::MissingInput,
            AvoidError::InvalidThreshold(_) => ErrorKind::InvalidThreshold,
            AvoidError::Io(_) => ErrorKind::Io,
            AvoidError::InvalidFormat(_) => ErrorKind::InvalidFormat,
            AvoidError::Config(_) => ErrorKind::Config,
            #[cfg(feature = "gdal")]
            AvoidError::Gdal(_) => ErrorKind::Gdal,
        }
    }
}

/// Result type for avoidance-mask operations
pub type AvoidResult<T> = Result<T, AvoidError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(x: f64, y: f64, rows: usize, cols: usize) -> GridFrame {
        GridFrame::new(GeoTransform::north_up(x, y, 30.0), rows, cols).unwrap()
    }

    #[test]
    fn test_frame_alignment() {
        let a = frame(0.0, 300.0, 10, 10);
        let b = frame(0.0, 300.0, 10, 10);
        let shifted = frame(30.0, 300.0, 10, 10);

        assert!(a.is_aligned_with(&b));
        assert!(!a.is_aligned_with(&shifted));
        assert!(matches!(
            a.ensure_aligned(&shifted, "test"),
            Err(AvoidError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_rotated_frame_rejected() {
        let mut transform = GeoTransform::north_up(0.0, 0.0, 30.0);
        transform.rotation_x = 0.5;
        assert!(GridFrame::new(transform, 2, 2).is_err());
    }

    #[test]
    fn test_snap_offset() {
        let region = frame(0.0, 300.0, 10, 10);
        let sub = frame(60.0, 210.0, 3, 3);
        assert_eq!(region.snap_offset(&sub).unwrap(), (3, 2));

        let off_lattice = frame(45.0, 210.0, 3, 3);
        assert!(region.snap_offset(&off_lattice).is_err());
    }

    #[test]
    fn test_snap_to_fills_nodata_outside_footprint() {
        let region = frame(0.0, 120.0, 4, 4);
        let sub_frame = frame(30.0, 90.0, 2, 2);
        let sub = Grid::new(sub_frame, Array2::from_elem((2, 2), 7.0f32), None).unwrap();

        let snapped = sub.snap_to(&region).unwrap();
        assert_eq!(snapped.dim(), (4, 4));
        assert_eq!(snapped.value(1, 1), Some(7.0));
        assert_eq!(snapped.value(2, 2), Some(7.0));
        assert_eq!(snapped.value(0, 0), None);
        assert_eq!(snapped.valid_count(), 4);
    }

    #[test]
    fn test_nodata_detection() {
        let f = frame(0.0, 60.0, 2, 2);
        let grid = Grid::new(
            f,
            Array2::from_shape_vec((2, 2), vec![1i32, -9999, 3, 4]).unwrap(),
            Some(-9999),
        )
        .unwrap();

        assert!(grid.is_nodata_at(0, 1));
        assert_eq!(grid.value(1, 0), Some(3));
        assert_eq!(grid.valid_count(), 3);
        assert_eq!(grid.count_where(|v| v > 2), 2);
        assert!(f32::NAN.is_nodata(None));
    }

    #[test]
    fn test_error_kind() {
        let err = AvoidError::MissingInput("density".to_string());
        assert_eq!(err.kind(), ErrorKind::MissingInput);
        assert!(err.to_string().contains("density"));
    }
}
