//! Persistence round trips: point files in all three schemas, horizon
//! masks, and analysis JSON.

use mountctl::analyse::AnalysisData;
use mountctl::points::ModelPoints;
use mountctl::types::{BuildBatch, ModelingPoint};

#[test]
fn point_file_round_trip_survives_sort_and_clip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("grid.txt");

    let mut points = ModelPoints::new();
    points.generate_rect_grid(4, 6, 25.0, 70.0);
    let generated = points.points().to_vec();
    points.save_points(&path).expect("save");

    let mut reloaded = ModelPoints::new();
    reloaded.load_points(&path).expect("load");
    assert_eq!(reloaded.points(), generated.as_slice());

    // Sorting and clipping operate on the reloaded set like the original
    reloaded.set_horizon(vec![(0.0, 30.0), (360.0, 30.0)]);
    reloaded.delete_below_horizon_line();
    assert!(reloaded.points().iter().all(|(_, alt)| *alt > 30.0));
    reloaded.sort_points();
    let side = |az: f64| az >= 180.0;
    let crossings = reloaded
        .points()
        .windows(2)
        .filter(|pair| side(pair[0].0) != side(pair[1].0))
        .count();
    assert!(crossings <= 1);
}

#[test]
fn legacy_and_grid_files_load() {
    let dir = tempfile::tempdir().expect("tempdir");

    let legacy = dir.path().join("legacy.txt");
    std::fs::write(&legacy, "010.0:30.0:1\n120.0:45.0:2\n240.0:50.0:2\n").expect("write");
    let mut points = ModelPoints::new();
    points.load_points(&legacy).expect("load legacy");
    assert_eq!(points.points().len(), 2);
    assert_eq!(points.initial_points().len(), 1);

    let grid = dir.path().join("external.txt");
    std::fs::write(
        &grid,
        "GRID 12:30:00 +45:00:00 120.50 45.25\nGRID 01:10:00 -05:30:00 301.00 28.75\n",
    )
    .expect("write");
    let mut points = ModelPoints::new();
    points.load_points(&grid).expect("load grid");
    assert_eq!(points.points(), &[(120.50, 45.25), (301.00, 28.75)]);
}

#[test]
fn horizon_file_with_floor() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("horizon.txt");
    std::fs::write(&path, "0:5\n90:20\n180:8\n270:15\n360:5\n").expect("write");

    let mut points = ModelPoints::new();
    points.load_horizon(&path, 10.0).expect("load");
    // The floor raises every node below 10°
    assert!((points.horizon_altitude_at(0.0) - 10.0).abs() < 1e-9);
    assert!((points.horizon_altitude_at(90.0) - 20.0).abs() < 1e-9);
    assert!((points.horizon_altitude_at(180.0) - 10.0).abs() < 1e-9);
}

#[test]
fn analysis_json_round_trip_from_batch() {
    let mut point = ModelingPoint {
        index: 0,
        azimuth: 120.0,
        altitude: 45.0,
        ra_j_now: 12.0,
        dec_j_now: 30.0,
        ra_j2000: 11.99,
        dec_j2000: 29.99,
        local_sidereal_time: "13:00:00.00".to_string(),
        local_sidereal_time_float: 13.0,
        ..ModelingPoint::default()
    };
    point.ra_j_now_solved = Some(12.001);
    point.dec_j_now_solved = Some(30.001);
    point.ra_j2000_solved = Some(11.991);
    point.dec_j2000_solved = Some(29.991);
    point.ra_error = Some(3.6);
    point.dec_error = Some(3.6);
    point.model_error = Some(5.09);

    let data = AnalysisData::from_batch(&BuildBatch::new(vec![point]));
    let dir = tempfile::tempdir().expect("tempdir");
    let at = chrono::Utc::now();
    let path = data.save(dir.path(), &at, "build").expect("save");
    let loaded = AnalysisData::load(&path).expect("load");
    assert_eq!(loaded, data);
    assert_eq!(loaded.len(), 1);
}
