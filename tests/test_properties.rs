use avoidmask::core::{
    buffer_within, mosaic_max, round_and_fill_zero, size_filter, AvoidMaskParams,
    AvoidMaskPipeline, IntermediateGrid, RegionGrids,
};
use avoidmask::{BooleanMask, DensityGrid, GeoTransform, Grid, GridFrame, ValueGrid};
use ndarray::Array2;
use proptest::prelude::*;
use std::collections::VecDeque;

const ROWS: usize = 8;
const COLS: usize = 8;

fn frame() -> GridFrame {
    GridFrame::new(GeoTransform::north_up(0.0, ROWS as f64 * 30.0, 30.0), ROWS, COLS).unwrap()
}

fn mask_from(bits: &[bool]) -> BooleanMask {
    let values = bits.iter().map(|&b| b as u8).collect();
    Grid::new(frame(), Array2::from_shape_vec((ROWS, COLS), values).unwrap(), None).unwrap()
}

fn density_from(values: &[i32]) -> DensityGrid {
    Grid::new(frame(), Array2::from_shape_vec((ROWS, COLS), values.to_vec()).unwrap(), None).unwrap()
}

/// Size of the 8-connected group containing each true cell, by flood fill
fn group_sizes(mask: &BooleanMask) -> Array2<usize> {
    let data = mask.data();
    let mut sizes = Array2::zeros((ROWS, COLS));
    let mut seen = Array2::from_elem((ROWS, COLS), false);

    for start in data.indexed_iter().filter(|(_, &v)| v > 0).map(|(idx, _)| idx) {
        if seen[start] {
            continue;
        }
        let mut members = Vec::new();
        let mut queue = VecDeque::from([start]);
        seen[start] = true;
        while let Some((r, c)) = queue.pop_front() {
            members.push((r, c));
            for dr in -1isize..=1 {
                for dc in -1isize..=1 {
                    let (nr, nc) = (r as isize + dr, c as isize + dc);
                    if nr < 0 || nc < 0 || nr >= ROWS as isize || nc >= COLS as isize {
                        continue;
                    }
                    let next = (nr as usize, nc as usize);
                    if data[next] > 0 && !seen[next] {
                        seen[next] = true;
                        queue.push_back(next);
                    }
                }
            }
        }
        for &cell in &members {
            sizes[cell] = members.len();
        }
    }
    sizes
}

proptest! {
    #[test]
    fn size_filter_keeps_exactly_large_groups(bits in prop::collection::vec(any::<bool>(), ROWS * COLS)) {
        let mask = mask_from(&bits);
        let filtered = size_filter(&mask, 5).unwrap();
        let sizes = group_sizes(&mask);

        for ((r, c), &kept) in filtered.data().indexed_iter() {
            prop_assert_eq!(kept == 1, sizes[[r, c]] > 5);
        }

        let again = size_filter(&filtered, 5).unwrap();
        prop_assert_eq!(again.data(), filtered.data());
    }

    #[test]
    fn buffer_grows_with_radius(
        bits in prop::collection::vec(prop::bool::weighted(0.1), ROWS * COLS),
        r1 in 0.0f64..200.0,
        extra in 0.0f64..100.0,
    ) {
        let mask = mask_from(&bits);
        let small = buffer_within(&mask, r1, 30.0).unwrap();
        let large = buffer_within(&mask, r1 + extra, 30.0).unwrap();

        for (&s, &l) in small.data().iter().zip(large.data().iter()) {
            prop_assert!(s <= l);
        }
        for (&s, &b) in small.data().iter().zip(mask.data().iter()) {
            prop_assert!(s >= b);
        }
    }

    #[test]
    fn mosaic_is_commutative_and_associative(
        a in prop::collection::vec(0i32..200, ROWS * COLS),
        b in prop::collection::vec(0i32..200, ROWS * COLS),
        c in prop::collection::vec(0i32..200, ROWS * COLS),
    ) {
        let (a, b, c) = (density_from(&a), density_from(&b), density_from(&c));

        let ab = mosaic_max(&[a.clone(), b.clone()]).unwrap();
        let ba = mosaic_max(&[b.clone(), a.clone()]).unwrap();
        prop_assert_eq!(&ab, &ba);

        let ab_c = mosaic_max(&[ab, c.clone()]).unwrap();
        let bc = mosaic_max(&[b.clone(), c.clone()]).unwrap();
        let a_bc = mosaic_max(&[a.clone(), bc]).unwrap();
        prop_assert_eq!(&ab_c, &a_bc);

        let all = mosaic_max(&[a, b, c]).unwrap();
        prop_assert_eq!(all, ab_c);
    }

    #[test]
    fn single_mosaic_is_rounded_input(values in prop::collection::vec(prop::option::of(0.0f32..500.0), ROWS * COLS)) {
        let raw: Vec<f32> = values.iter().map(|v| v.unwrap_or(f32::NAN)).collect();
        let grid: ValueGrid =
            Grid::new(frame(), Array2::from_shape_vec((ROWS, COLS), raw).unwrap(), None).unwrap();
        let rounded = round_and_fill_zero(&grid);
        prop_assert_eq!(mosaic_max(&[rounded.clone()]).unwrap(), rounded);
    }

    #[test]
    fn score_counts_met_criteria(
        classes in prop::collection::vec(prop::sample::select(vec![11.0f32, 21.0, 22.0, 23.0, 24.0, 41.0]), ROWS * COLS),
        density in prop::collection::vec(0.0f32..200.0, ROWS * COLS),
    ) {
        let landcover: ValueGrid =
            Grid::new(frame(), Array2::from_shape_vec((ROWS, COLS), classes).unwrap(), None).unwrap();
        let density: ValueGrid =
            Grid::new(frame(), Array2::from_shape_vec((ROWS, COLS), density).unwrap(), None).unwrap();

        let params = AvoidMaskParams { keep_intermediates: true, ..AvoidMaskParams::default() };
        let products = AvoidMaskPipeline::new(params)
            .process(&RegionGrids::new(landcover, density))
            .unwrap();

        let criteria: Vec<BooleanMask> = ["criterion_low", "criterion_medium", "criterion_high"]
            .iter()
            .map(|name| match &products.intermediates[*name] {
                IntermediateGrid::Mask(m) => m.clone(),
                _ => unreachable!(),
            })
            .collect();

        for ((r, c), &score) in products.score.data().indexed_iter() {
            prop_assert!(score <= 3);
            let met: u8 = criteria.iter().map(|m| m.data()[[r, c]]).sum();
            prop_assert_eq!(score, met);
        }
        // A cell meeting the high criterion also meets the medium one
        for ((r, c), &high) in criteria[2].data().indexed_iter() {
            prop_assert!(high <= criteria[1].data()[[r, c]]);
        }
    }
}
