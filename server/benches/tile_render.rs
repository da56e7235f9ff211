//! Micro-benchmarks for tile rendering
//!
//! These benchmarks isolate the CPU-intensive parts of producing a tile:
//! - compositing status dots onto a tile raster
//! - PNG encoding of sparse and dense tiles
//! - a full render through the in-memory case source
//!
//! Run with: cargo bench --bench tile_render

use std::sync::Arc;

use casemap_server::config::Config;
use casemap_server::demo::{DemoData, InMemoryCaseSource};
use casemap_server::tiles::{DotIconProvider, StatusDotIcons, TileCanvas};
use casemap_server::{TileCoordinates, TileRenderer};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Normalized dot positions scattered over a tile
fn dot_positions(count: usize) -> Vec<(f64, f64)> {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    (0..count)
        .map(|_| (rng.random_range(0.0..1.0), rng.random_range(0.0..1.0)))
        .collect()
}

fn bench_compose(c: &mut Criterion) {
    let icons = StatusDotIcons::new(24);
    let Some(dot) = icons.dot_bitmap("open_unassigned") else {
        return;
    };

    let mut group = c.benchmark_group("compose_dots");
    for count in [100usize, 1_000, 10_000] {
        let positions = dot_positions(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &positions, |b, positions| {
            b.iter(|| {
                let mut canvas = TileCanvas::new(512);
                for &(x, y) in positions {
                    canvas.draw_dot(&dot, x, y);
                }
                black_box(canvas)
            })
        });
    }
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let icons = StatusDotIcons::new(24);
    let Some(dot) = icons.dot_bitmap("closed_completed") else {
        return;
    };

    let mut group = c.benchmark_group("encode_png");
    for count in [10usize, 1_000] {
        let mut canvas = TileCanvas::new(512);
        for (x, y) in dot_positions(count) {
            canvas.draw_dot(&dot, x, y);
        }
        let image = canvas.image().clone();

        group.bench_with_input(BenchmarkId::from_parameter(count), &image, |b, image| {
            b.iter(|| {
                let mut canvas = TileCanvas::new(image.width());
                canvas.draw_dot(image, 0.5, 0.5);
                black_box(canvas.encode())
            })
        });
    }
    group.finish();
}

fn bench_render_tile(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    let tile = TileCoordinates::new(7, 13, 5);
    let source = Arc::new(InMemoryCaseSource::new());
    source.set_cases(1, DemoData::new(42).cases(&tile.bounds(), 5_000));

    let config = Config::default();
    let renderer = runtime.block_on(async {
        TileRenderer::new(
            config.tiles,
            config.dedup,
            source,
            Arc::new(StatusDotIcons::new(24)),
        )
    });

    c.bench_function("render_tile_5000_cases", |b| {
        b.iter(|| {
            // A fresh scope each time so the cache never short-circuits
            renderer.set_incident(0);
            renderer.set_incident(1);
            black_box(runtime.block_on(renderer.render_tile(tile)))
        })
    });
}

criterion_group!(benches, bench_compose, bench_encode, bench_render_tile);
criterion_main!(benches);
