use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::{Vec2, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use reyes_hider::rendering::{Bound, OcclusionTree};

/// Subsample positions of a square region, `spp` per pixel.
fn samples(size: usize, spp: usize) -> Vec<(u32, Vec2)> {
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let mut out = Vec::with_capacity(size * size * spp);
    for y in 0..size {
        for x in 0..size {
            for _ in 0..spp {
                let id = out.len() as u32;
                out.push((
                    id,
                    Vec2::new(x as f32 + rng.gen::<f32>(), y as f32 + rng.gen::<f32>()),
                ));
            }
        }
    }
    out
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("occlusion_build");
    for size in [8usize, 16, 32] {
        let pts = samples(size, 16);
        group.bench_with_input(BenchmarkId::from_parameter(size), &pts, |b, pts| {
            let mut tree = OcclusionTree::new();
            b.iter(|| {
                tree.build(black_box(pts), pts.len());
                black_box(tree.node_count());
            });
        });
    }
    group.finish();
}

fn bench_update(c: &mut Criterion) {
    c.bench_function("occlusion_update", |b| {
        let pts = samples(16, 16);
        let mut tree = OcclusionTree::new();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let updates: Vec<(u32, f32)> = (0..4096)
            .map(|_| (rng.gen_range(0..pts.len() as u32), rng.gen_range(1.0..100.0)))
            .collect();
        b.iter(|| {
            tree.build(&pts, pts.len());
            for &(id, depth) in &updates {
                tree.set_sample_depth(id, depth);
            }
            black_box(tree.max_opaque_depth());
        });
    });
}

fn bench_query(c: &mut Criterion) {
    c.bench_function("occlusion_query", |b| {
        let pts = samples(16, 16);
        let mut tree = OcclusionTree::new();
        tree.build(&pts, pts.len());
        for &(id, _) in &pts {
            tree.set_sample_depth(id, 10.0);
        }
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let queries: Vec<Bound> = (0..1024)
            .map(|_| {
                let x = rng.gen_range(0.0..14.0);
                let y = rng.gen_range(0.0..14.0);
                let z = rng.gen_range(5.0..15.0);
                Bound::new(Vec3::new(x, y, z), Vec3::new(x + 2.0, y + 2.0, z + 1.0))
            })
            .collect();
        b.iter(|| {
            let culled = queries.iter().filter(|q| tree.can_cull(q)).count();
            black_box(culled);
        });
    });
}

criterion_group!(benches, bench_build, bench_update, bench_query);
criterion_main!(benches);
