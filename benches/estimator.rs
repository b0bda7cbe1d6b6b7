//! Benchmarks for the CAQ estimator hot path.
//!
//! Measures the per-block fast scan, the per-vector accurate refinement,
//! and query preparation across typical padded dimensions.

use caqscan::encoder::encode_cluster;
use caqscan::{ClusterEstimator, QuantizerMeta, SearcherConfig};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::prelude::*;

const BLOCK: usize = 32;

fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n * dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect()
}

fn bench_comp_fast_dist(c: &mut Criterion) {
    let mut group = c.benchmark_group("comp_fast_dist");

    for &dim in &[128usize, 256, 512] {
        let meta = QuantizerMeta::new(dim, 4, true, None).unwrap();
        let centroid = vec![0.0f32; dim];
        let n = 8 * BLOCK;
        let vectors = random_vectors(n, dim, 1);
        let cluster = encode_cluster(&meta, &centroid, &vectors, n).unwrap();
        let query = random_vectors(1, dim, 2);

        let mut est = ClusterEstimator::new_l2(&meta, SearcherConfig::l2(), &query).unwrap();
        est.prepare(&cluster);

        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(dim), &dim, |b, _| {
            let mut out = [0.0f32; BLOCK];
            b.iter(|| {
                for block in 0..n / BLOCK {
                    est.comp_fast_dist(black_box(block), Some(&mut out));
                }
                black_box(out[0])
            });
        });
    }

    group.finish();
}

fn bench_comp_accurate_dist(c: &mut Criterion) {
    let mut group = c.benchmark_group("comp_accurate_dist");

    for &bits in &[2u8, 4, 8] {
        let dim = 256;
        let meta = QuantizerMeta::new(dim, bits, true, None).unwrap();
        let centroid = vec![0.0f32; dim];
        let vectors = random_vectors(BLOCK, dim, 3);
        let cluster = encode_cluster(&meta, &centroid, &vectors, BLOCK).unwrap();
        let query = random_vectors(1, dim, 4);

        let mut est = ClusterEstimator::new_l2(&meta, SearcherConfig::l2(), &query).unwrap();
        est.prepare(&cluster);
        est.comp_fast_dist(0, None);

        group.throughput(Throughput::Elements(BLOCK as u64));
        group.bench_with_input(BenchmarkId::new("bits", bits), &bits, |b, _| {
            b.iter(|| {
                let mut acc = 0.0f32;
                for j in 0..BLOCK {
                    acc += est.comp_accurate_dist(black_box(j));
                }
                black_box(acc)
            });
        });
    }

    group.finish();
}

fn bench_prepare(c: &mut Criterion) {
    let mut group = c.benchmark_group("prepare");

    for &dim in &[128usize, 512] {
        let meta = QuantizerMeta::new(dim, 4, true, None).unwrap();
        let centroid = random_vectors(1, dim, 5);
        let vectors = random_vectors(BLOCK, dim, 6);
        let cluster = encode_cluster(&meta, &centroid, &vectors, BLOCK).unwrap();
        let query = random_vectors(1, dim, 7);

        let mut est = ClusterEstimator::new_l2(&meta, SearcherConfig::l2(), &query).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(dim), &dim, |b, _| {
            b.iter(|| est.prepare(black_box(&cluster)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_comp_fast_dist,
    bench_comp_accurate_dist,
    bench_prepare
);
criterion_main!(benches);
