use crate::types::{AvoidError, AvoidResult, BooleanMask, CellValue, Grid, MASK_NODATA};
use ndarray::Zip;
use serde::{Deserialize, Serialize};

/// Cellwise predicate used to build boolean masks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Value equals one of the listed class codes
    InSet(Vec<i64>),
    /// `min <= value <= max`
    Between { min: f64, max: f64 },
    /// `value >= threshold`
    AtLeast(f64),
    /// `value > threshold`
    GreaterThan(f64),
}

impl Predicate {
    pub fn validate(&self) -> AvoidResult<()> {
        match self {
            Predicate::InSet(classes) if classes.is_empty() => Err(AvoidError::InvalidThreshold(
                "Class set must not be empty".to_string(),
            )),
            Predicate::Between { min, max } => {
                if !min.is_finite() || !max.is_finite() {
                    return Err(AvoidError::InvalidThreshold(format!(
                        "Range bounds must be finite, got [{}, {}]",
                        min, max
                    )));
                }
                if min > max {
                    return Err(AvoidError::InvalidThreshold(format!(
                        "Range minimum {} exceeds maximum {}",
                        min, max
                    )));
                }
                Ok(())
            }
            Predicate::AtLeast(v) | Predicate::GreaterThan(v) if !v.is_finite() => Err(
                AvoidError::InvalidThreshold(format!("Threshold must be finite, got {}", v)),
            ),
            _ => Ok(()),
        }
    }

    pub fn matches(&self, value: f64) -> bool {
        match self {
            // Class codes are integral; a fractional value never matches
            Predicate::InSet(classes) => {
                value.fract() == 0.0 && classes.iter().any(|&c| c as f64 == value)
            }
            Predicate::Between { min, max } => value >= *min && value <= *max,
            Predicate::AtLeast(t) => value >= *t,
            Predicate::GreaterThan(t) => value > *t,
        }
    }
}

/// How nodata input cells resolve in a predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodataRule {
    /// Failed comparison: nodata becomes 0
    False,
    /// Nodata stays nodata in the mask
    Propagate,
}

/// Build a mask that is 1 where `predicate` holds and 0 elsewhere
pub fn threshold<T: CellValue>(
    grid: &Grid<T>,
    predicate: &Predicate,
    nodata_rule: NodataRule,
) -> AvoidResult<BooleanMask> {
    predicate.validate()?;

    let mask_nodata = match nodata_rule {
        NodataRule::False => None,
        NodataRule::Propagate => Some(MASK_NODATA),
    };

    Ok(grid.map(mask_nodata, |cell| match cell {
        Some(v) => predicate.matches(v.as_f64()) as u8,
        None => mask_nodata.unwrap_or(0),
    }))
}

/// `grid > value` as a mask
pub fn greater_than<T: CellValue>(
    grid: &Grid<T>,
    value: f64,
    nodata_rule: NodataRule,
) -> AvoidResult<BooleanMask> {
    threshold(grid, &Predicate::GreaterThan(value), nodata_rule)
}

/// Replace nodata cells with `value`; the result carries no nodata sentinel
pub fn substitute_null<T: CellValue>(grid: &Grid<T>, value: T) -> Grid<T> {
    grid.map(None, |cell| cell.unwrap_or(value))
}

/// 1 where the grid has a value, 0 where it is nodata
pub fn defined_mask<T: CellValue>(grid: &Grid<T>) -> BooleanMask {
    grid.map(None, |cell| cell.is_some() as u8)
}

/// Cellwise sum, nodata-propagating.
///
/// Sums that cannot be represented in `T` become nodata.
pub fn add<T: CellValue>(a: &Grid<T>, b: &Grid<T>) -> AvoidResult<Grid<T>> {
    a.ensure_aligned(b, "add")?;

    let a_nodata = a.nodata();
    let b_nodata = b.nodata();
    let nodata = a_nodata.or(b_nodata).unwrap_or_else(T::default_nodata);

    let data = Zip::from(a.data())
        .and(b.data())
        .map_collect(|&x, &y| {
            if x.is_nodata(a_nodata) || y.is_nodata(b_nodata) {
                return nodata;
            }
            T::try_from_f64(x.as_f64() + y.as_f64())
                .filter(|v| !v.is_nodata(Some(nodata)))
                .unwrap_or(nodata)
        });

    let has_nodata = a_nodata.is_some()
        || b_nodata.is_some()
        || data.iter().any(|v| v.is_nodata(Some(nodata)));
    Grid::new(*a.frame(), data, if has_nodata { Some(nodata) } else { None })
}

/// Set nodata wherever `boundary` is nodata (analysis mask)
pub fn apply_boundary<T: CellValue, B: CellValue>(
    grid: &Grid<T>,
    boundary: &Grid<B>,
) -> AvoidResult<Grid<T>> {
    grid.ensure_aligned(boundary, "boundary mask")?;

    let nodata = grid.nodata().unwrap_or_else(T::default_nodata);
    let boundary_nodata = boundary.nodata();
    let data = Zip::from(grid.data())
        .and(boundary.data())
        .map_collect(|&v, &b| if b.is_nodata(boundary_nodata) { nodata } else { v });

    Grid::new(*grid.frame(), data, Some(nodata))
}

/// Round half up: `floor(value + 0.5)`
pub fn round_to_int(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}
