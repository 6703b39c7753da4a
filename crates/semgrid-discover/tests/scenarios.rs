use std::collections::{BTreeSet, HashMap};

use nalgebra::Vector2;
use semgrid_core::{GrayImage, ImageRecord};
use semgrid_discover::{
    band_magnifications, Collection, CollectionKind, CrossSessionGrouper, Discovery,
    DiscoveryConfig, DiscoveryReport, ModeClassifier, PairConfirmer, PoolSpec, PyramidBuilder,
    RegistrarConfirmer, SceneClusterer, SessionPool,
};
use semgrid_register::{Alignment, RegisterError, Registrar};

fn world(x_um: f64, y_um: f64) -> f64 {
    128.0
        + 35.0 * (x_um / 23.0).sin()
        + 30.0 * (y_um / 17.0).cos()
        + 25.0 * ((x_um + y_um) / 31.0).sin()
        + 20.0 * (x_um / 7.0).sin() * (y_um / 9.0).cos()
}

fn render(rec: &ImageRecord) -> GrayImage {
    let frame = rec.frame().expect("renderable record");
    let (w, h) = (rec.width_px as f64, rec.height_px as f64);
    GrayImage::from_fn(rec.width_px, rec.height_px, |x, y| {
        let mut acc = 0.0;
        for sy in 0..3 {
            for sx in 0..3 {
                let px = x as f64 + (sx as f64 + 0.5) / 3.0 - w / 2.0;
                let py = y as f64 + (sy as f64 + 0.5) / 3.0 - h / 2.0;
                let p = frame.from_pixels(Vector2::new(px, py));
                acc += world(p.x, p.y);
            }
        }
        (acc / 9.0).round().clamp(0.0, 255.0) as u8
    })
}

/// 120x90 BSD frame, 600 µm wide at 100x.
fn level(id: &str, mag: f64, x_um: f64, y_um: f64) -> ImageRecord {
    let width = 60_000.0 / mag;
    ImageRecord::new(id, 120, 90)
        .with_center(x_um, y_um)
        .with_field_of_view(width, width * 0.75)
        .with_magnification(mag)
        .with_detector("BSD", 15.0)
}

fn scene(id: &str, detector: &str, x_um: f64, y_um: f64) -> ImageRecord {
    ImageRecord::new(id, 1024, 768)
        .with_center(x_um, y_um)
        .with_field_of_view(50.0, 50.0)
        .with_magnification(2000.0)
        .with_detector(detector, 15.0)
}

fn accept_all(_: &ImageRecord, _: &ImageRecord) -> Result<Alignment, RegisterError> {
    Ok(Alignment {
        x: 0,
        y: 0,
        width: 1,
        height: 1,
        confidence: 0.95,
        scale_x: 0.4,
        scale_y: 0.4,
    })
}

fn ids(c: &Collection) -> Vec<&str> {
    c.record_ids().collect()
}

fn membership(records: &[ImageRecord]) -> BTreeSet<BTreeSet<String>> {
    SceneClusterer::default()
        .cluster(records)
        .into_iter()
        .map(|c| c.members.into_iter().collect())
        .collect()
}

#[test]
fn scenario_a_identical_centers_share_a_cluster() {
    let records = vec![
        scene("a.tif", "SED", 100.0, 200.0),
        scene("b.tif", "SED", 100.0, 200.0),
    ];
    let clusters = SceneClusterer::default().cluster(&records);
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].members, vec!["a.tif", "b.tif"]);
    assert_eq!(clusters[0].key, "100_200");
}

#[test]
fn scenario_b_three_modes_one_scene() {
    let topo = scene("topo.tif", "MIX", 5.0, 5.0).with_mix_factors([0.1, 0.9, 0.8, 0.2]);
    let records = vec![
        scene("sed.tif", "SED", 5.0, 5.0),
        scene("bsd.tif", "BSD", 5.0, 5.0),
        topo,
    ];
    let classifier = ModeClassifier::default();
    let keys: BTreeSet<String> = records.iter().map(|r| classifier.classify(r).key).collect();
    let expected: BTreeSet<String> = ["sed_15kv", "bsd_15kv", "topo-h_15kv"]
        .map(String::from)
        .into();
    assert_eq!(keys, expected);

    let clusters = SceneClusterer::default().cluster(&records);
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].len(), 3);
}

#[test]
fn scenario_c_nested_levels_form_one_full_chain() {
    let records = vec![
        level("m2000.tif", 2000.0, 80.0, -30.0),
        level("m100.tif", 100.0, 0.0, 0.0),
        level("m500.tif", 500.0, 60.0, -40.0),
    ];
    let pyramids = PyramidBuilder::default().build(&records, &ModeClassifier::default(), &accept_all);
    let full: Vec<&Collection> = pyramids.iter().filter(|p| p.len() == 3).collect();
    assert_eq!(full.len(), 1);
    assert_eq!(ids(full[0]), ["m100.tif", "m500.tif", "m2000.tif"]);
    assert_eq!(full[0].provenance.magnifications, vec![100.0, 500.0, 2000.0]);
    assert!(pyramids.iter().all(|p| p.kind == CollectionKind::Pyramid));
}

#[test]
fn scenario_c_broken_nesting_caps_chains_at_two() {
    let records = vec![
        level("m100.tif", 100.0, 0.0, 0.0),
        // Far outside the 100x frame.
        level("m500.tif", 500.0, 900.0, 0.0),
        level("m2000.tif", 2000.0, 80.0, -30.0),
    ];
    let pyramids = PyramidBuilder::default().build(&records, &ModeClassifier::default(), &accept_all);
    assert!(pyramids.iter().all(|p| p.len() <= 2));
    assert!(pyramids
        .iter()
        .any(|p| ids(p) == ["m100.tif", "m2000.tif"]));
    assert!(pyramids.iter().all(|p| !ids(p).contains(&"m500.tif")));
}

#[test]
fn scenario_d_magnification_bands() {
    assert_eq!(
        band_magnifications(&[98.0, 102.0, 205.0], 0.12),
        vec![vec![98.0, 102.0], vec![205.0]]
    );
}

#[test]
fn clustering_ignores_input_order() {
    let mut records = Vec::new();
    for (i, (x, y)) in [(0.0, 0.0), (3.0, -2.0), (400.0, 0.0), (402.0, 1.0), (0.0, 0.0)]
        .into_iter()
        .enumerate()
    {
        records.push(scene(&format!("r{i}.tif"), "SED", x, y));
    }
    records.push(scene("tagged.tif", "BSD", 900.0, 900.0).with_collection_tag("t"));
    records.push(scene("tagged2.tif", "BSD", -900.0, 900.0).with_collection_tag("t"));
    let expected = membership(&records);
    assert_eq!(expected.len(), 3);

    // Deterministic shuffles.
    let mut state = 0x2545_f491_u64;
    for _ in 0..20 {
        let mut shuffled = records.clone();
        for i in (1..shuffled.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            shuffled.swap(i, (state % (i as u64 + 1)) as usize);
        }
        assert_eq!(membership(&shuffled), expected);
    }
}

#[test]
fn pyramid_confirmed_by_real_correlation() {
    let records = vec![
        level("m100.tif", 100.0, 0.0, 0.0),
        level("m250.tif", 250.0, 60.0, -40.0),
        level("m700.tif", 700.0, 80.0, -30.0),
    ];
    let pixels: HashMap<String, GrayImage> =
        records.iter().map(|r| (r.id.clone(), render(r))).collect();
    let registrar = Registrar::default();
    let confirmer = RegistrarConfirmer::new(&registrar, &pixels);

    let pyramids = PyramidBuilder::default().build(&records, &ModeClassifier::default(), &confirmer);
    let full = pyramids
        .iter()
        .find(|p| p.len() == 3)
        .expect("three-level pyramid");
    assert_eq!(ids(full), ["m100.tif", "m250.tif", "m700.tif"]);
    assert_eq!(full.id, "mag_grid_bsd_15kv_m100");

    // Metadata puts the 250x center at (48, 53) px in the 100x frame.
    let a = full.entries[1].alignment.expect("alignment");
    assert!(a.confidence > 0.5);
    let c = a.center();
    assert!(
        (c.x - 48.0).abs() < 1.5 && (c.y - 53.0).abs() < 1.5,
        "matched center {c:?}"
    );
}

#[test]
fn cross_session_alternates_can_be_swapped() {
    let pools = vec![
        SessionPool::new(
            "monday",
            vec![
                scene("mon_1.tif", "SED", 0.0, 0.0).with_magnification(1000.0),
                scene("mon_2.tif", "SED", 10.0, 0.0).with_magnification(1050.0),
            ],
        ),
        SessionPool::new(
            "friday",
            vec![scene("fri_1.tif", "SED", 0.0, 0.0).with_magnification(1020.0)],
        ),
    ];
    let sets = CrossSessionGrouper::default().group(&pools, &ModeClassifier::default());
    assert_eq!(sets.len(), 1);
    let set = &sets[0];
    assert_eq!(set.id, "compare_sed_1020_15");
    assert_eq!(ids(set), ["mon_1.tif", "fri_1.tif"]);
    assert_eq!(set.entries[0].alternates, vec!["mon_2.tif"]);

    let swapped = set
        .swap_alternate(0, "mon_2.tif", &pools[0].records)
        .expect("swap");
    assert_eq!(ids(&swapped), ["mon_2.tif", "fri_1.tif"]);
    assert_eq!(swapped.entries[0].alternates, vec!["mon_1.tif"]);
    assert_eq!(ids(set), ["mon_1.tif", "fri_1.tif"]);
}

#[test]
fn discovery_runs_from_config_and_round_trips_report() {
    let dir = tempfile::tempdir().expect("tempdir");
    let monday = vec![
        scene("sed.tif", "SED", 0.0, 0.0),
        scene("bsd.tif", "BSD", 0.0, 0.0),
        ImageRecord::new("lost.tif", 64, 64).with_detector("SED", 15.0),
    ];
    let friday = vec![scene("fri.tif", "SED", 500.0, 500.0)];
    semgrid_discover::write_records(dir.path().join("monday.json"), &monday).expect("write");
    semgrid_discover::write_records(dir.path().join("friday.json"), &friday).expect("write");

    let mut cfg = DiscoveryConfig::new(vec![
        PoolSpec {
            session_id: "monday".into(),
            records_path: "monday.json".into(),
        },
        PoolSpec {
            session_id: "friday".into(),
            records_path: "friday.json".into(),
        },
    ]);
    cfg.output_path = Some(dir.path().join("report.json").to_string_lossy().into_owned());
    let cfg_path = dir.path().join("run.json");
    cfg.write_json(&cfg_path).expect("write config");

    let cfg = DiscoveryConfig::load_json(&cfg_path).expect("load config");
    let pools = cfg.load_pools(dir.path()).expect("pools");
    let discovery = Discovery::from_config(&cfg);
    let confirmer: &(dyn PairConfirmer + Sync) = &accept_all;
    let report = discovery.run(&pools, Some(confirmer));

    assert_eq!(report.sessions.len(), 2);
    assert_eq!(report.sessions[0].skipped, vec!["lost.tif"]);
    let kinds: Vec<CollectionKind> = report.collections.iter().map(|c| c.kind).collect();
    assert_eq!(
        kinds,
        [CollectionKind::ModeSet, CollectionKind::CrossSessionSet]
    );

    report.write_json(cfg.output_path()).expect("write report");
    let back = DiscoveryReport::load_json(cfg.output_path()).expect("load report");
    assert_eq!(back, report);
}
