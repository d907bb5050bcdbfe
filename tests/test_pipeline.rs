use avoidmask::core::raster_algebra::{threshold, NodataRule, Predicate};
use avoidmask::core::{
    mosaic_max, round_and_fill_zero, round_and_fill_zero_in, size_filter, AvoidMaskParams,
    AvoidMaskPipeline, DensityMosaicBuilder, IntermediateGrid, RegionDriver, RegionGrids,
    RegionStatus,
};
use avoidmask::{ErrorKind, GeoTransform, Grid, GridFrame, MemoryGridStore, ValueGrid};
use ndarray::Array2;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn frame_at(x: f64, y: f64, rows: usize, cols: usize) -> GridFrame {
    GridFrame::new(GeoTransform::north_up(x, y, 30.0), rows, cols).unwrap()
}

fn grid(frame: GridFrame, values: Vec<f32>) -> ValueGrid {
    Grid::new(frame, Array2::from_shape_vec(frame.dim(), values).unwrap(), None).unwrap()
}

#[test]
fn test_six_cell_blob_is_kept_exactly() {
    init_logger();

    let n = f32::NAN;
    #[rustfmt::skip]
    let landcover = grid(frame_at(0.0, 150.0, 5, 5), vec![
        n,    n,    n,    n, n,
        n, 23.0, 23.0,    n, n,
        n,    n, 23.0, 23.0, n,
        n,    n,    n, 23.0, n,
        n,    n,    n, 23.0, n,
    ]);

    let urban = threshold(&landcover, &Predicate::InSet(vec![22, 23, 24]), NodataRule::False).unwrap();
    let filtered = size_filter(&urban, 5).unwrap();

    assert_eq!(filtered.data(), urban.data());
    assert_eq!(filtered.count_where(|v| v > 0), 6);
    assert_eq!(filtered.value(0, 0), Some(0));
}

#[test]
fn test_density_only_landscape() {
    init_logger();

    let frame = frame_at(0.0, 120.0, 4, 4);
    let params = AvoidMaskParams {
        keep_intermediates: true,
        ..AvoidMaskParams::default()
    };
    let grids = RegionGrids::new(grid(frame, vec![42.0; 16]), grid(frame, vec![30.0; 16]));
    let products = AvoidMaskPipeline::new(params).process(&grids).unwrap();

    let criterion = |name: &str| match &products.intermediates[name] {
        IntermediateGrid::Mask(m) => m.count_where(|v| v > 0),
        _ => panic!("{} should be a mask", name),
    };
    assert_eq!(criterion("criterion_low"), 16);
    assert_eq!(criterion("criterion_medium"), 0);
    assert_eq!(criterion("criterion_high"), 0);
    assert_eq!(products.stats.score_counts, [0, 16, 0, 0]);
}

#[test]
fn test_urban_buffer_reaches_120_and_90_meters() {
    init_logger();

    // Six developed cells in the first column of a 6x10 region
    let frame = frame_at(0.0, 180.0, 6, 10);
    let mut values = vec![71.0f32; 60];
    for r in 0..6 {
        values[r * 10] = 24.0;
    }
    let grids = RegionGrids::new(grid(frame, values), grid(frame, vec![0.0; 60]));
    let products = AvoidMaskPipeline::standard().process(&grids).unwrap();

    let row: Vec<u8> = (0..10).map(|c| products.score.value(2, c).unwrap()).collect();
    // 0-90 m: all criteria; 120 m: wide buffer only
    assert_eq!(row, vec![3, 3, 3, 3, 1, 0, 0, 0, 0, 0]);
}

#[test]
fn test_disjoint_subunits_reconstruct_union() {
    init_logger();

    let region = frame_at(0.0, 60.0, 2, 4);
    let west = grid(frame_at(0.0, 60.0, 2, 2), vec![10.4, 20.5, 30.0, 40.6]);
    let east = grid(frame_at(60.0, 60.0, 2, 2), vec![1.0, 2.0, 3.0, 4.0]);

    let parts = vec![
        round_and_fill_zero_in(&west, &region).unwrap(),
        round_and_fill_zero_in(&east, &region).unwrap(),
    ];
    let mosaic = mosaic_max(&parts).unwrap();
    assert_eq!(
        mosaic.data(),
        &Array2::from_shape_vec((2, 4), vec![10, 21, 1, 2, 30, 41, 3, 4]).unwrap()
    );

    let mut builder = DensityMosaicBuilder::new(region);
    builder.add_subunit("west", west);
    builder.add_subunit("east", east);
    let (built, report) = builder.build().unwrap();
    assert_eq!(built, mosaic);
    assert_eq!(report.max_density, 41);
    assert!(report.subunits_skipped.is_empty());
}

#[test]
fn test_rounding_edge_values() {
    let g = grid(frame_at(0.0, 30.0, 1, 3), vec![24.5, f32::NAN, 0.49]);
    let rounded = round_and_fill_zero(&g);
    assert_eq!(rounded.data().as_slice().unwrap(), &[25, 0, 0]);
}

#[test]
fn test_driver_isolates_misaligned_region() {
    init_logger();

    let good = frame_at(0.0, 120.0, 4, 4);
    let shifted = frame_at(30.0, 120.0, 4, 4);

    let mut source = MemoryGridStore::new();
    source.insert_region(
        "r01",
        RegionGrids::new(grid(good, vec![42.0; 16]), grid(good, vec![140.0; 16])),
    );
    source.insert_region(
        "r02",
        RegionGrids::new(grid(good, vec![42.0; 16]), grid(good, vec![0.0; 16]))
            .with_boundary(grid(shifted, vec![1.0; 16])),
    );
    source.insert_region(
        "r03",
        RegionGrids::new(grid(good, vec![42.0; 16]), grid(good, vec![70.0; 16])),
    );

    let mut sink = MemoryGridStore::new();
    let summary = RegionDriver::standard().run(&["r01", "r02", "r03"], &source, &mut sink);

    assert_eq!(summary.succeeded(), 2);
    match &summary.report("r02").unwrap().status {
        RegionStatus::Failed { kind, .. } => assert_eq!(*kind, ErrorKind::ShapeMismatch),
        other => panic!("r02 should have failed, got {:?}", other),
    }
    assert_eq!(sink.stored_regions(), vec!["r01", "r03"]);
    assert_eq!(sink.score("r01").unwrap().value(3, 3), Some(3));
    assert_eq!(sink.score("r03").unwrap().value(3, 3), Some(2));
}

#[test]
fn test_driver_hands_intermediates_to_sink() {
    init_logger();

    let frame = frame_at(0.0, 90.0, 3, 3);
    let mut source = MemoryGridStore::new();
    source.insert_region(
        "r01",
        RegionGrids::new(grid(frame, vec![42.0; 9]), grid(frame, vec![0.0; 9])),
    );

    let params = AvoidMaskParams {
        keep_intermediates: true,
        ..AvoidMaskParams::default()
    };
    let mut sink = MemoryGridStore::new();
    RegionDriver::new(AvoidMaskPipeline::new(params)).run(&["r01"], &source, &mut sink);

    let names = sink.intermediate_names("r01");
    assert_eq!(names.len(), 16);
    assert!(names.contains(&"urban_high_groups"));
    assert!(matches!(
        sink.intermediate("r01", "urban_low_distance"),
        Some(IntermediateGrid::Distance(_))
    ));
}
