//! Brute-force checks of the index and culler against randomly generated documents

use geo::Coord;
use large_document_lib::{
    BasicElement, Config, CoordinateTransform, CullingResult, CullingStrategy, DocumentView,
    IndexConfig, SpatialBounds, SpatialIndexManager, ViewportBounds,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn random_bounds<R: Rng>(rng: &mut R, extent: f64, max_size: f64) -> SpatialBounds {
    SpatialBounds::new(
        rng.random_range(-50.0..extent),
        rng.random_range(-50.0..extent),
        rng.random_range(0.0..max_size),
        rng.random_range(0.0..max_size),
    )
}

fn populate<R: Rng>(rng: &mut R, count: usize) -> (SpatialIndexManager, Vec<BasicElement>) {
    let manager = SpatialIndexManager::new(IndexConfig {
        bounds: SpatialBounds::new(0.0, 0.0, 1000.0, 1000.0),
        max_objects: 4,
        ..IndexConfig::default()
    });
    let elements: Vec<BasicElement> = (0..count)
        .map(|i| {
            BasicElement::new(format!("e{i}"), random_bounds(rng, 1000.0, 120.0))
                .with_layer(if i % 3 == 0 { "text" } else { "shapes" })
                .with_type(if i % 2 == 0 { "box" } else { "line" })
        })
        .collect();
    for element in &elements {
        assert!(manager.add_element(element.clone().into_ref()));
    }
    (manager, elements)
}

#[test]
fn query_point_matches_brute_force() {
    init_tracing();
    let mut rng = StdRng::seed_from_u64(42);
    let (manager, elements) = populate(&mut rng, 400);

    for _ in 0..300 {
        let p = Coord {
            x: rng.random_range(-60.0..1100.0),
            y: rng.random_range(-60.0..1100.0),
        };
        let expected: BTreeSet<String> = elements
            .iter()
            .filter(|e| e.bounds.contains_point(p))
            .map(|e| e.id.clone())
            .collect();
        let actual: BTreeSet<String> = manager
            .query_point(p)
            .iter()
            .map(|e| e.element_id.clone())
            .collect();
        assert_eq!(actual, expected, "point {p:?}");
    }
}

#[test]
fn query_region_matches_brute_force() {
    init_tracing();
    let mut rng = StdRng::seed_from_u64(7);
    let (manager, elements) = populate(&mut rng, 400);

    for _ in 0..100 {
        let area = random_bounds(&mut rng, 1000.0, 300.0);
        let expected: BTreeSet<String> = elements
            .iter()
            .filter(|e| e.bounds.intersects(&area))
            .map(|e| e.id.clone())
            .collect();
        let actual: BTreeSet<String> = manager
            .query_region(&area)
            .iter()
            .map(|e| e.element_id.clone())
            .collect();
        assert_eq!(actual, expected, "area {area:?}");
    }
}

#[test]
fn insert_then_remove_restores_membership() {
    init_tracing();
    let mut rng = StdRng::seed_from_u64(1234);
    let (manager, _) = populate(&mut rng, 200);

    let count = manager.get_element_count();
    let text = manager.layer_size("text");
    let boxes = manager.type_size("box");

    for i in 0..50 {
        let id = format!("temp{i}");
        manager.add_element(
            BasicElement::new(id.as_str(), random_bounds(&mut rng, 1000.0, 50.0))
                .with_layer("text")
                .with_type("box")
                .into_ref(),
        );
        assert!(manager.remove_element(&id));
        assert_eq!(manager.get_element_count(), count);
        assert_eq!(manager.layer_size("text"), text);
        assert_eq!(manager.type_size("box"), boxes);
        assert!(manager.get(&id).is_none());
    }
}

#[test]
fn straddling_elements_stay_queryable_after_churn() {
    init_tracing();
    let manager = SpatialIndexManager::new(IndexConfig {
        bounds: SpatialBounds::new(0.0, 0.0, 1000.0, 1000.0),
        max_objects: 2,
        auto_rebuild_threshold: 16,
        ..IndexConfig::default()
    });
    // Crosses both root split lines
    manager.add_element(
        BasicElement::new("cross", SpatialBounds::new(490.0, 490.0, 20.0, 20.0)).into_ref(),
    );
    for i in 0..40 {
        manager.add_element(
            BasicElement::new(
                format!("fill{i}"),
                SpatialBounds::new((i % 8) as f64 * 60.0 + 5.0, (i / 8) as f64 * 60.0 + 5.0, 10.0, 10.0),
            )
            .into_ref(),
        );
    }

    for (x, y) in [(495.0, 495.0), (505.0, 495.0), (495.0, 505.0), (505.0, 505.0), (500.0, 500.0)] {
        let hits = manager.query_point(Coord { x, y });
        assert!(hits.iter().any(|e| e.element_id == "cross"), "({x}, {y})");
    }
    for area in [
        SpatialBounds::new(480.0, 480.0, 15.0, 15.0),
        SpatialBounds::new(505.0, 505.0, 100.0, 100.0),
    ] {
        assert!(manager.query_region(&area).iter().any(|e| e.element_id == "cross"));
    }
}

#[test]
fn culling_is_idempotent_between_mutations() {
    init_tracing();
    let mut rng = StdRng::seed_from_u64(99);
    let mut view = DocumentView::new(Config::default());
    for i in 0..2000 {
        view.add_element(
            BasicElement::new(format!("e{i}"), random_bounds(&mut rng, 10_000.0, 80.0))
                .with_z_index(rng.random_range(0..200))
                .into_ref(),
        );
    }

    let viewport = ViewportBounds::new(SpatialBounds::new(3000.0, 3000.0, 1600.0, 900.0), 0.8);
    let ids = |r: &CullingResult| -> Vec<String> {
        r.visible_elements.iter().map(|e| e.element_id.clone()).collect()
    };

    for strategy in [
        CullingStrategy::Basic,
        CullingStrategy::Hierarchical,
        CullingStrategy::Frustum,
        CullingStrategy::Occlusion,
    ] {
        view.set_strategy(strategy);
        let first = view.cull_elements(&viewport);
        let second = view.cull_elements(&viewport);
        assert!(!first.cache_hit, "{strategy:?}");
        assert!(second.cache_hit, "{strategy:?}");
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(first.total_elements, 2000);
        assert_eq!(first.visible_elements.len() + first.culled_count, 2000);

        // Paint order: z ascending, then id
        assert!(first.visible_elements.windows(2).all(|w| {
            (w[0].z_index, &w[0].element_id) <= (w[1].z_index, &w[1].element_id)
        }));
    }

    // Any mutation invalidates the cached result
    view.remove_element("e0");
    assert!(!view.cull_elements(&viewport).cache_hit);
}

#[test]
fn transform_round_trip_for_random_parameters() {
    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..50 {
        let mut transform = CoordinateTransform::new(
            SpatialBounds::new(0.0, 0.0, 20_000.0, 12_000.0),
            SpatialBounds::new(0.0, 0.0, 1920.0, 1080.0),
        )
        .unwrap();
        transform.set_zoom(rng.random_range(0.01..50.0)).unwrap();
        transform
            .set_pan(Coord {
                x: rng.random_range(-2000.0..2000.0),
                y: rng.random_range(-2000.0..2000.0),
            })
            .unwrap();
        transform
            .set_rotation(rng.random_range(-std::f64::consts::PI..std::f64::consts::PI))
            .unwrap();
        assert!(transform.validate_transformation().is_ok());

        for _ in 0..20 {
            let p = Coord {
                x: rng.random_range(-20_000.0..40_000.0),
                y: rng.random_range(-20_000.0..40_000.0),
            };
            let back = transform.screen_to_document(transform.document_to_screen(p));
            assert!((back.x - p.x).abs() < 1e-9 && (back.y - p.y).abs() < 1e-9, "{p:?}");
        }
    }
}
