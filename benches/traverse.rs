use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use geo::{polygon, Geometry, Polygon};
use geo_extract::{
    Feature, MemLayer, MemRaster, Observer, RasterizeObserver, TraversalEvent, Traverser,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

const SIZE: usize = 256;

fn random_triangle(rng: &mut StdRng) -> Polygon<f64> {
    let x = rng.random_range(0.0..SIZE as f64 - 32.);
    let y = rng.random_range(0.0..SIZE as f64 - 32.);
    let mut corner = || (x + rng.random_range(0.0..32.), y + rng.random_range(0.0..32.));
    let (a, b, c) = (corner(), corner(), corner());
    polygon![(x: a.0, y: a.1), (x: b.0, y: b.1), (x: c.0, y: c.1), (x: a.0, y: a.1)]
}

fn features(count: usize) -> Vec<Feature> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count)
        .map(|fid| Feature::new(fid as i64, Some(Geometry::Polygon(random_triangle(&mut rng)))))
        .collect()
}

#[derive(Default)]
struct Sum(f64);

impl Observer for Sum {
    fn add_pixel(&mut self, event: &TraversalEvent<'_>) {
        self.0 += event.band_values.map_or(0., |v| v.iter().sum());
    }
}

fn traverse(c: &mut Criterion) {
    let raster = MemRaster::new("bench", (SIZE, SIZE, 3), (0., SIZE as f64), (1., -1.), 1u16);
    let mut group = c.benchmark_group("traverse");
    for count in [10, 100] {
        let features = features(count);
        group.bench_with_input(BenchmarkId::new("rasterize", count), &features, |b, features| {
            b.iter(|| {
                let mut layer = MemLayer::from_features("bench", features.clone());
                let mut burn = RasterizeObserver::new(1u8, 0u8);
                let mut traverser = Traverser::new();
                traverser.set_layer(&mut layer);
                traverser.add_raster(&raster).ok();
                traverser.add_observer(&mut burn);
                black_box(traverser.traverse().ok());
            })
        });
        group.bench_with_input(BenchmarkId::new("band_values", count), &features, |b, features| {
            b.iter(|| {
                let mut layer = MemLayer::from_features("bench", features.clone());
                let mut sum = Sum::default();
                {
                    let mut traverser = Traverser::new();
                    traverser.set_layer(&mut layer);
                    traverser.add_raster(&raster).ok();
                    traverser.add_observer(&mut sum);
                    traverser.traverse().ok();
                }
                black_box(sum.0)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, traverse);
criterion_main!(benches);
