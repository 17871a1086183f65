use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hetero_core::{args, Device, Properties};

const ADD_VECTORS: &str = include_str!("../kernels/addVectors.okl");

fn benchmark_build_cache_hit(c: &mut Criterion) {
    let device = Device::serial().unwrap();
    // Warm the artifact cache
    device.build_kernel(ADD_VECTORS, "addVectors", &Properties::new()).unwrap();

    c.bench_function("build_kernel_cache_hit", |b| {
        b.iter(|| {
            let kernel = device
                .build_kernel(black_box(ADD_VECTORS), "addVectors", &Properties::new())
                .unwrap();
            black_box(kernel.name().len());
        });
    });
}

fn benchmark_vector_add_launch(c: &mut Criterion) {
    let mut group = c.benchmark_group("vector_add_launch");

    for mode in ["Serial", "OpenMP"] {
        for size in [1_000usize, 10_000, 100_000] {
            let id = BenchmarkId::new(mode, size);
            group.bench_with_input(id, &size, |b, &n| {
                let device = Device::new(mode).unwrap();
                let data_a: Vec<f32> = (0..n).map(|i| i as f32).collect();
                let data_b: Vec<f32> = (0..n).map(|i| (i as f32) * 2.0).collect();
                let o_a = device.allocate_from(&data_a, &Properties::new()).unwrap();
                let o_b = device.allocate_from(&data_b, &Properties::new()).unwrap();
                let o_ab = device.allocate::<f32>(n, &Properties::new()).unwrap();
                let kernel = device.build_kernel(ADD_VECTORS, "addVectors", &Properties::new()).unwrap();

                b.iter(|| {
                    kernel.call(&args![n as i32, &o_a, &o_b, &o_ab]).unwrap();
                    device.finish().unwrap();
                    black_box(o_ab.len());
                });
            });
        }
    }

    group.finish();
}

fn benchmark_host_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("host_round_trip");

    for size in [1_024usize, 65_536, 1_048_576] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &n| {
            let device = Device::serial().unwrap();
            let memory = device.allocate::<u8>(n, &Properties::new()).unwrap();
            let host = vec![7u8; n];
            let mut out = vec![0u8; n];

            b.iter(|| {
                memory.copy_from_slice(&host).unwrap();
                memory.copy_to_slice(&mut out).unwrap();
                black_box(out[n - 1]);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_build_cache_hit,
    benchmark_vector_add_launch,
    benchmark_host_round_trip
);
criterion_main!(benches);
