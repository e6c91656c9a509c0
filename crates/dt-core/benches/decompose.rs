//! Criterion benchmarks for the ALS solver and run comparison.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dt_config::{DecompositionParams, InitScheme};
use dt_core::cp::decompose;
use dt_core::similarity::match_factors;
use dt_core::tensor::DeviceTensor;
use ndarray::{Array2, Array3};

fn pseudo_random_tensor(n: usize, m: usize, t: usize) -> DeviceTensor {
    DeviceTensor::from_array(Array3::from_shape_fn((n, m, t), |(i, j, k)| {
        (((i * 31 + j * 17 + k * 7) % 97) as f64 + 1.0) / 97.0
    }))
}

fn bench_decompose(c: &mut Criterion) {
    let mut group = c.benchmark_group("decompose");
    group.sample_size(20);
    // Roughly one layer: devices x categories x days.
    let tensor = pseudo_random_tensor(40, 12, 30);
    for rank in [2usize, 4, 8] {
        let params = DecompositionParams {
            init: InitScheme::Random,
            max_iterations: 25,
            tolerance: 0.0,
            seed: 42,
            restarts: 1,
        };
        group.bench_with_input(BenchmarkId::new("als_25_sweeps", rank), &rank, |b, &rank| {
            b.iter(|| black_box(decompose(black_box(&tensor), rank, &params)));
        });
    }
    group.finish();
}

fn bench_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("match_factors");
    for rank in [4usize, 8, 16] {
        let a = Array2::from_shape_fn((40, rank), |(i, j)| ((i * 13 + j * 5) % 23) as f64 + 1.0);
        let b = Array2::from_shape_fn((40, rank), |(i, j)| ((i * 7 + j * 11) % 19) as f64 + 1.0);
        group.bench_with_input(BenchmarkId::new("device_factor", rank), &(a, b), |bch, (a, b)| {
            bch.iter(|| black_box(match_factors(a.view(), b.view())));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_decompose, bench_match);
criterion_main!(benches);
