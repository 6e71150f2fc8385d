//! Performance benchmarks for large-document-lib
//!
//! Run with: cargo bench --package large-document-lib
//!
//! Reduced benchmark suite for faster iteration during optimization.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use geo::Coord;
use large_document_lib::{
    BasicElement, Config, CullingConfig, CullingStrategy, DocumentView, ElementRef,
    SpatialBounds, ViewportBounds,
};

/// Generate a page-like layout: rows of text blocks with occasional large figures.
fn generate_elements(count: usize) -> Vec<ElementRef> {
    (0..count)
        .map(|i| {
            let col = (i % 100) as f64;
            let row = (i / 100) as f64;
            let (width, height, layer, kind) = match i % 20 {
                0 => (180.0, 120.0, "figures", "image"),
                1 => (90.0, 14.0, "text", "heading"),
                2 => (2.0, 2.0, "default", "marker"),
                _ => (85.0, 10.0, "text", "text"),
            };
            BasicElement::new(
                format!("e{i}"),
                SpatialBounds::new(col * 100.0, row * 30.0, width, height),
            )
            .with_z_index((i % 7) as i32)
            .with_layer(layer)
            .with_type(kind)
            .into_ref()
        })
        .collect()
}

fn create_view(count: usize, culling: CullingConfig) -> DocumentView {
    let rows = count.div_ceil(100) as f64;
    let mut config = Config {
        culling,
        ..Config::default()
    };
    config.index.bounds = SpatialBounds::new(0.0, 0.0, 10_000.0, (rows * 30.0).max(10_000.0));
    let view = DocumentView::new(config);
    view.add_elements(generate_elements(count));
    view
}

// ============================================================================
// Core Benchmarks - Key performance indicators
// ============================================================================

fn bench_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");

    let view = create_view(50_000, CullingConfig::default());

    let small = SpatialBounds::new(4000.0, 4000.0, 400.0, 300.0);
    group.bench_function("region_small_50k", |b| {
        b.iter(|| view.query_region(&small));
    });

    let large = SpatialBounds::new(0.0, 0.0, 10_000.0, 10_000.0);
    group.bench_function("region_large_50k", |b| {
        b.iter(|| view.query_region(&large));
    });

    group.bench_function("point_50k", |b| {
        b.iter(|| view.query_point(Coord { x: 5010.0, y: 3005.0 }));
    });

    group.bench_function("nearest_50k", |b| {
        b.iter(|| view.query_nearest(Coord { x: 5000.0, y: 5000.0 }, 250.0, 10));
    });

    group.finish();
}

fn bench_culling(c: &mut Criterion) {
    let mut group = c.benchmark_group("culling");
    group.sample_size(20);

    let viewport = ViewportBounds::new(SpatialBounds::new(2000.0, 2000.0, 1920.0, 1080.0), 0.75);

    for strategy in [
        CullingStrategy::Basic,
        CullingStrategy::Hierarchical,
        CullingStrategy::Frustum,
        CullingStrategy::Occlusion,
    ] {
        // A zero TTL forces recomputation on every iteration
        let view = create_view(
            50_000,
            CullingConfig {
                strategy,
                cache_ttl: std::time::Duration::ZERO,
                ..CullingConfig::default()
            },
        );
        group.bench_with_input(
            BenchmarkId::new("uncached", format!("{strategy:?}")),
            &viewport,
            |b, viewport| b.iter(|| view.cull_elements(viewport)),
        );
    }

    let cached = create_view(50_000, CullingConfig::default());
    group.bench_function("cached_hierarchical", |b| {
        b.iter(|| cached.cull_elements(&viewport));
    });

    group.finish();
}

fn bench_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("construction");
    group.sample_size(20);

    let elements = generate_elements(20_000);
    group.throughput(Throughput::Elements(elements.len() as u64));
    group.bench_function("add_elements_20k", |b| {
        b.iter(|| {
            let view = DocumentView::new(Config::default());
            view.add_elements(elements.clone());
        });
    });

    group.finish();
}

fn bench_clustering(c: &mut Criterion) {
    let mut group = c.benchmark_group("clustering");

    let view = create_view(10_000, CullingConfig::default());
    let zoomed_out = ViewportBounds::new(SpatialBounds::new(0.0, 0.0, 10_000.0, 3000.0), 0.6);
    let visible = view.cull_elements(&zoomed_out).visible_elements;

    group.throughput(Throughput::Elements(visible.len() as u64));
    group.bench_function("single_cluster", |b| {
        b.iter(|| view.cluster_elements(&visible, 0.6));
    });

    group.finish();
}

// ============================================================================
// Criterion Configuration
// ============================================================================

criterion_group!(
    benches,
    bench_queries,
    bench_culling,
    bench_construction,
    bench_clustering,
);

criterion_main!(benches);
