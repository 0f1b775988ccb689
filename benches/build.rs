use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use sahbvh::prelude::*;

fn random_prims(n: usize, seed: u64) -> Vec<PrimRef> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let c = Vec3A::new(rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>());
            let h = Vec3A::splat(rng.gen_range(0.001..0.01f32));
            PrimRef::new(BBox3a::new(c - h, c + h), i as u32)
        })
        .collect()
}

/// Build with a counting host: leaves and nodes are tallied, not encoded.
/// Keeps the benchmark on the builder, not on host-side node layout.
fn build_counting(prims: &mut [PrimRef], settings: &BuildSettings, arena: &Arena) -> u32 {
    let pinfo = PrimInfo::from_prims(prims);
    build(
        prims,
        pinfo,
        settings,
        arena,
        |children: &[u32], _: &ThreadArena| Ok(children.iter().sum::<u32>() + 1),
        |range: std::ops::Range<usize>, _: &[PrimRef], _: &ThreadArena| Ok(range.len() as u32),
        |_: usize| BuildProgress::Continue,
    )
    .expect("build failed")
}

fn bench_build_random(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_random");
    for &n in &[10_000usize, 100_000, 1_000_000] {
        let prims = random_prims(n, 1);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &prims, |b, prims| {
            let settings = BuildSettings::default();
            b.iter(|| {
                let mut prims = prims.clone();
                let arena = Arena::new();
                black_box(build_counting(&mut prims, &settings, &arena))
            })
        });
    }
    group.finish();
}

fn bench_find_split(c: &mut Criterion) {
    let prims = random_prims(100_000, 2);
    let pinfo = PrimInfo::from_prims(&prims);
    c.bench_function("find_split_100k", |b| {
        b.iter(|| black_box(sahbvh::builder::find_parallel(&prims, &pinfo, 2)))
    });
}

criterion_group!(benches, bench_build_random, bench_find_split);
criterion_main!(benches);
