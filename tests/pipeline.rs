use geo::{line_string, polygon, Geometry, Point};
use ward_resilience::config::{EngineConfig, NormalizationMethod};
use ward_resilience::crs::Crs;
use ward_resilience::error::{EngineError, RunStatus, Warning};
use ward_resilience::loader::{parse_feature_layer, parse_ward_layer};
use ward_resilience::pipeline::{run, Inputs};
use ward_resilience::reports::{generate_summary, ward_table};
use ward_resilience::types::{
    Category, FeatureKind, GridRiskLevel, RainfallRecord, RawLayer, RawWard, RawWardLayer,
};

fn local() -> Crs {
    Crs::Local("test".into())
}

fn config() -> EngineConfig {
    EngineConfig {
        target_crs: local(),
        ..EngineConfig::default()
    }
}

fn square(x: f64, y: f64, w: f64, h: f64) -> Geometry<f64> {
    Geometry::Polygon(polygon![
        (x: x, y: y),
        (x: x + w, y: y),
        (x: x + w, y: y + h),
        (x: x, y: y + h),
    ])
}

fn line(x0: f64, y0: f64, x1: f64, y1: f64) -> Geometry<f64> {
    Geometry::LineString(line_string![(x: x0, y: y0), (x: x1, y: y1)])
}

fn pt(x: f64, y: f64) -> Geometry<f64> {
    Geometry::Point(Point::new(x, y))
}

fn layer(kind: FeatureKind, geometries: Vec<Geometry<f64>>) -> RawLayer {
    RawLayer {
        name: kind.label().to_string(),
        kind,
        crs: local(),
        geometries,
    }
}

/// Four 1 km wards in a row along x. Ward 1 has nothing in it, ward 4 has
/// the most of everything; the flood-prone point at x = 3000 sits on the
/// border between wards 3 and 4.
fn inputs() -> Inputs {
    let wards = (1..=4)
        .map(|i| RawWard {
            id: i,
            name: format!("Ward {}", i),
            boundary: square((i - 1) as f64 * 1000.0, 0.0, 1000.0, 1000.0),
        })
        .collect();

    let drains = layer(
        FeatureKind::Drain,
        vec![
            line(1100.0, 100.0, 1900.0, 100.0),
            line(2100.0, 100.0, 2900.0, 100.0),
            line(2100.0, 900.0, 2900.0, 900.0),
            line(3100.0, 100.0, 3900.0, 100.0),
            line(3100.0, 500.0, 3900.0, 500.0),
            line(3100.0, 900.0, 3900.0, 900.0),
        ],
    );
    let flood_prone = layer(
        FeatureKind::FloodProne,
        vec![
            pt(1200.0, 500.0),
            pt(1800.0, 500.0),
            pt(2200.0, 300.0),
            pt(2400.0, 300.0),
            pt(2600.0, 300.0),
            pt(3000.0, 500.0),
            pt(3200.0, 200.0),
            pt(3400.0, 200.0),
            pt(3600.0, 200.0),
            pt(3800.0, 200.0),
            pt(3200.0, 800.0),
            pt(3400.0, 800.0),
        ],
    );
    let vulnerable = layer(FeatureKind::VulnerableLocation, vec![pt(3500.0, 450.0)]);
    let lowlying = layer(
        FeatureKind::LowLying,
        vec![
            square(1400.0, 700.0, 100.0, 100.0),
            square(2100.0, 600.0, 200.0, 200.0),
            square(3100.0, 300.0, 500.0, 300.0),
        ],
    );

    let rainfall = (1990..2020)
        .map(|year| RainfallRecord {
            year,
            month: None,
            value: 800.0 + (year - 1990) as f64 * 10.0,
            ward_id: None,
        })
        .collect();

    Inputs {
        wards: RawWardLayer { crs: local(), wards },
        layers: vec![drains, flood_prone, vulnerable, lowlying],
        rainfall,
    }
}

fn with_degenerate_ward(mut inputs: Inputs) -> Inputs {
    inputs.wards.wards.push(RawWard {
        id: 5,
        name: "Sliver".into(),
        boundary: Geometry::Polygon(polygon![
            (x: 5000.0, y: 0.0),
            (x: 5500.0, y: 0.0),
            (x: 6000.0, y: 0.0),
        ]),
    });
    inputs
}

fn score_of(out: &ward_resilience::RunOutput, id: u32) -> f64 {
    out.scores
        .iter()
        .find(|s| s.ward_id == id)
        .and_then(|s| s.composite_score)
        .unwrap_or(f64::NAN)
}

#[test]
fn clean_run_scores_every_ward_within_range() {
    let out = run(&inputs(), &config()).unwrap();
    assert_eq!(out.report.status(), RunStatus::Complete, "{:?}", out.report.warnings);
    assert_eq!(out.scores.len(), 4);
    for s in &out.scores {
        let score = s.composite_score.unwrap();
        assert!((0.0..=100.0).contains(&score), "ward {} scored {}", s.ward_id, score);
        assert!(s.category.is_some());
    }
    assert_eq!(out.report.features_unassigned, 0);
}

#[test]
fn factors_reflect_the_joined_layers() {
    let out = run(&inputs(), &config()).unwrap();
    let w3 = &out.scores[2].factors;
    assert!((w3.drain_length_km - 1.6).abs() < 1e-9);
    assert!((w3.drain_density - 1.6).abs() < 1e-9);
    assert_eq!(w3.incident_count, 4);
    assert!((w3.lowlying_fraction - 0.04).abs() < 1e-9);
    assert!(out.rainfall.city_anomaly > 0.0);
    assert_eq!(w3.rainfall_anomaly, out.rainfall.city_anomaly);
}

#[test]
fn border_point_is_assigned_exactly_once() {
    let out = run(&inputs(), &config()).unwrap();
    let border = out
        .features
        .iter()
        .position(|f| f.kind == FeatureKind::FloodProne && f.source_index == 5)
        .unwrap();
    let holders: Vec<usize> = (0..out.wards.len())
        .filter(|&w| out.join.features_of(w, FeatureKind::FloodProne).contains(&border))
        .collect();
    assert_eq!(holders, vec![2], "lowest ward id wins the tie");
    assert_eq!(out.join.assigned_count(), out.features.len());
}

#[test]
fn empty_ward_scores_below_busier_wards() {
    let out = run(&inputs(), &config()).unwrap();
    let empty = score_of(&out, 1);
    assert_eq!(empty, 0.0);
    for id in 2..=4 {
        assert!(empty < score_of(&out, id), "ward {} should outscore ward 1", id);
    }
    // Ward 4 is the maximum on every factor that varies, so it sets the top
    // of the scale.
    assert_eq!(score_of(&out, 4), 100.0);
    assert_eq!(out.scores[3].category, Some(Category::ExtremeVulnerability));
    assert_eq!(out.scores[0].category, Some(Category::HighResilience));
}

#[test]
fn feature_outside_the_city_keeps_the_run_complete() {
    let mut wider = inputs();
    wider.layers[1].geometries.push(pt(9000.0, 9000.0));
    let out = run(&wider, &config()).unwrap();
    assert_eq!(out.report.features_unassigned, 1);
    assert!(out.report.warnings.contains(&Warning::UnassignedFeatures {
        kind: FeatureKind::FloodProne,
        count: 1,
    }));
    assert_eq!(out.report.status(), RunStatus::Complete);
    assert_eq!(generate_summary(&out).status, RunStatus::Complete);
}

#[test]
fn more_incidents_never_lower_a_score() {
    let base = run(&inputs(), &config()).unwrap();
    let mut busier = inputs();
    busier.layers[1].geometries.push(pt(1500.0, 300.0));
    let after = run(&busier, &config()).unwrap();
    assert!(score_of(&after, 2) >= score_of(&base, 2));
}

#[test]
fn identical_inputs_give_identical_outputs() {
    let a = run(&inputs(), &config()).unwrap();
    let b = run(&inputs(), &config()).unwrap();
    assert_eq!(a.scores, b.scores);
    assert_eq!(a.hotspots, b.hotspots);
    assert_eq!(ward_table(&a.scores).len(), ward_table(&b.scores).len());
}

#[test]
fn percentile_normalization_stays_in_range() {
    let cfg = EngineConfig {
        normalization: NormalizationMethod::Percentile,
        ..config()
    };
    let out = run(&inputs(), &cfg).unwrap();
    assert_eq!(score_of(&out, 1), 0.0);
    for s in &out.scores {
        assert!((0.0..=100.0).contains(&s.composite_score.unwrap()));
    }
}

#[test]
fn whole_ward_cell_scores_the_ward_density() {
    let mut cfg = config();
    cfg.grid.cell_size_m = 1000.0;
    let out = run(&inputs(), &cfg).unwrap();
    assert_eq!(out.hotspots.len(), 4);

    let cell = out.hotspots.iter().find(|c| c.ward_id == 3).unwrap();
    // Four flood-prone points (border point included) and one low-lying area.
    assert!((cell.score - 5.0).abs() < 1e-9);
    assert_eq!(cell.incident_count, 5);
    assert_eq!(cell.level, GridRiskLevel::Moderate);
}

#[test]
fn default_grid_tiles_each_ward() {
    let out = run(&inputs(), &config()).unwrap();
    for id in 1..=4 {
        let cells: Vec<_> = out.hotspots.iter().filter(|c| c.ward_id == id).collect();
        assert_eq!(cells.len(), 16);
        let area: f64 = cells.iter().map(|c| c.area_sqkm).sum();
        assert!((area - 1.0).abs() < 1e-9);
    }
    assert!(out
        .hotspots
        .iter()
        .filter(|c| c.ward_id == 1)
        .all(|c| c.score == 0.0));
}

#[test]
fn degenerate_ward_is_reported_not_scored() {
    let out = run(&with_degenerate_ward(inputs()), &config()).unwrap();
    assert_eq!(out.report.status(), RunStatus::Degraded);
    assert_eq!(out.report.degenerate_wards, 1);
    let sliver = out.scores.iter().find(|s| s.ward_id == 5).unwrap();
    assert_eq!(sliver.composite_score, None);
    assert_eq!(sliver.category_label(), "Insufficient Data");
    assert!(out.hotspots.iter().all(|c| c.ward_id != 5));
    // The other wards score exactly as before.
    let clean = run(&inputs(), &config()).unwrap();
    for id in 1..=4 {
        assert_eq!(score_of(&out, id), score_of(&clean, id));
    }
    let rows = ward_table(&out.scores);
    assert_eq!(rows[4].composite_score, "Insufficient Data");
}

#[test]
fn missing_layer_degrades_the_run() {
    let mut partial = inputs();
    partial.layers.retain(|l| l.kind != FeatureKind::LowLying);
    let out = run(&partial, &config()).unwrap();
    assert_eq!(out.report.status(), RunStatus::Degraded);
    assert!(out.report.warnings.contains(&Warning::MissingDataset {
        layer: "lowlying_areas".into()
    }));
    assert!(out.scores.iter().all(|s| s.factors.lowlying_fraction == 0.0));
    assert_eq!(generate_summary(&out).status, RunStatus::Degraded);
}

#[test]
fn irreconcilable_crs_aborts_before_scoring() {
    let mut bad = inputs();
    bad.layers[0].crs = Crs::Utm { zone: 43, north: true };
    assert!(matches!(run(&bad, &config()), Err(EngineError::CrsMismatch(_))));

    let mut unknown = inputs();
    unknown.layers[0].crs = Crs::Unspecified;
    assert!(matches!(run(&unknown, &config()), Err(EngineError::CrsMismatch(_))));
}

#[test]
fn duplicate_ward_ids_abort() {
    let mut dup = inputs();
    dup.wards.wards[1].id = 1;
    assert!(matches!(run(&dup, &config()), Err(EngineError::DuplicateWard(1))));
}

#[test]
fn geojson_layers_feed_the_pipeline() {
    let wards = parse_ward_layer(
        r#"{"type": "FeatureCollection",
            "crs": {"type": "name", "properties": {"name": "LOCAL:test"}},
            "features": [
              {"type": "Feature", "properties": {"KGISWardNo": 2, "KGISWardName": "East"},
               "geometry": {"type": "Polygon", "coordinates": [[[1000,0],[2000,0],[2000,1000],[1000,1000],[1000,0]]]}},
              {"type": "Feature", "properties": {"KGISWardNo": 1, "KGISWardName": "West"},
               "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1000,0],[1000,1000],[0,1000],[0,0]]]}}
            ]}"#,
    )
    .unwrap();
    let incidents = parse_feature_layer(
        r#"{"type": "FeatureCollection",
            "crs": {"type": "name", "properties": {"name": "LOCAL:test"}},
            "features": [
              {"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [1500, 500]}},
              {"type": "Feature", "properties": {}, "geometry": null}
            ]}"#,
        "flood_prone",
        FeatureKind::FloodProne,
    )
    .unwrap();

    let out = run(
        &Inputs {
            wards,
            layers: vec![incidents],
            rainfall: Vec::new(),
        },
        &config(),
    )
    .unwrap();
    // Wards come back in id order regardless of file order.
    assert_eq!(out.scores[0].name, "West");
    assert_eq!(out.scores[1].factors.incident_count, 1);
    assert!(score_of(&out, 2) > score_of(&out, 1));
    assert_eq!(out.report.geometries_dropped, 1);
    assert_eq!(out.report.status(), RunStatus::Degraded);
}
