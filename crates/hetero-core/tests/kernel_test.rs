//! Kernel builds, the artifact cache and numerical results

mod common;

use common::{kernel_path, CountingTranslator};
use hetero_core::{args, BlockDim, Device, Error, GridDim, Properties, Translator};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

fn uniform_f32(rng: &mut StdRng, n: usize) -> Vec<f32> {
    (0..n).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

#[test]
fn test_translator_runs_once_per_identity() {
    let translator = Arc::new(CountingTranslator::default());
    let device = Device::builder()
        .mode("Serial")
        .translator(Arc::clone(&translator) as Arc<dyn Translator>)
        .build()
        .unwrap();
    let path = kernel_path("addVectors.okl");

    for _ in 0..5 {
        device.build_kernel_from_file(&path, "addVectors", &Properties::new()).unwrap();
    }
    assert_eq!(translator.calls(), 1);

    let flags = Properties::new().with("compiler_flags", "-O3");
    device.build_kernel_from_file(&path, "addVectors", &flags).unwrap();
    device.build_kernel_from_file(&path, "addVectors", &flags).unwrap();
    assert_eq!(translator.calls(), 2);

    let stats = device.cache_stats();
    assert_eq!(stats.hits, 5);
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.translations, 2);
    assert_eq!(stats.entries, 2);
}

#[test]
fn test_cache_is_per_device() {
    let translator = Arc::new(CountingTranslator::default());
    let build = |mode: &str| {
        Device::builder()
            .mode(mode)
            .translator(Arc::clone(&translator) as Arc<dyn Translator>)
            .build()
            .unwrap()
    };
    let path = kernel_path("addVectors.okl");
    for device in [build("Serial"), build("Serial"), build("OpenMP")] {
        device.build_kernel_from_file(&path, "addVectors", &Properties::new()).unwrap();
    }
    assert_eq!(translator.calls(), 3);
}

#[test]
fn test_disk_cache_spares_later_devices() {
    let dir = tempfile::tempdir().unwrap();
    let path = kernel_path("addVectors.okl");

    let first = Arc::new(CountingTranslator::default());
    let device = Device::builder()
        .translator(Arc::clone(&first) as Arc<dyn Translator>)
        .cache_dir(dir.path())
        .build()
        .unwrap();
    device.build_kernel_from_file(&path, "addVectors", &Properties::new()).unwrap();
    assert_eq!(first.calls(), 1);

    let second = Arc::new(CountingTranslator::default());
    let device = Device::builder()
        .translator(Arc::clone(&second) as Arc<dyn Translator>)
        .cache_dir(dir.path())
        .build()
        .unwrap();
    let kernel = device.build_kernel_from_file(&path, "addVectors", &Properties::new()).unwrap();
    assert_eq!(second.calls(), 0);
    assert_eq!(device.cache_stats().disk_hits, 1);

    let a = device.allocate_from(&[1.0f32, 2.0], &Properties::new()).unwrap();
    let ab = device.allocate::<f32>(2, &Properties::new()).unwrap();
    kernel.call(&args![2, &a, &a, &ab]).unwrap();
    assert_eq!(ab.to_vec::<f32>().unwrap(), vec![2.0, 4.0]);
}

#[test]
fn test_vector_add_is_bitwise_exact() {
    common::init_tracing();
    let mut rng = StdRng::seed_from_u64(0);
    let entries = 1000;
    let a = uniform_f32(&mut rng, entries);
    let b = uniform_f32(&mut rng, entries);
    let expected: Vec<f32> = a.iter().zip(&b).map(|(a, b)| a + b).collect();

    for mode in ["Serial", "OpenMP"] {
        let device = Device::new(mode).unwrap();
        let o_a = device.allocate_from(&a, &Properties::new()).unwrap();
        let o_b = device.allocate_from(&b, &Properties::new()).unwrap();
        let o_ab = device.allocate::<f32>(entries, &Properties::new()).unwrap();

        let add = device
            .build_kernel_from_file(kernel_path("addVectors.okl"), "addVectors", &Properties::new())
            .unwrap();
        add.call(&args![entries as i32, &o_a, &o_b, &o_ab]).unwrap();
        device.finish().unwrap();

        let ab = o_ab.to_vec::<f32>().unwrap();
        let bits = |v: &[f32]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&ab), bits(&expected), "{mode}");
    }
}

#[test]
fn test_reduction_of_100k_doubles() {
    const MAX_BLOCKS: usize = 64;
    let mut rng = StdRng::seed_from_u64(0);
    let values: Vec<f64> = (0..100_000).map(|_| rng.gen_range(0.0..1.0)).collect();
    let expected: f64 = values.iter().sum();

    let props = Properties::new()
        .define("MAX_BLOCKS", MAX_BLOCKS)
        .define("BLOCK_SIZE", 128);

    for mode in ["Serial", "OpenMP"] {
        let device = Device::new(mode).unwrap();
        let vec = device.allocate_from(&values, &Properties::new()).unwrap();
        let block_sum = device.allocate::<f64>(MAX_BLOCKS, &Properties::new()).unwrap();

        let sum = device.build_kernel_from_file(kernel_path("sum.okl"), "sum", &props).unwrap();
        sum.call(&args![values.len() as i32, &vec, &block_sum]).unwrap();
        device.finish().unwrap();

        let total: f64 = block_sum.to_vec::<f64>().unwrap().iter().sum();
        assert!((total - expected).abs() < 1e-5, "{mode}: {total} vs {expected}");
    }
}

#[test]
fn test_matrix_multiply_with_partial_tiles() {
    let (rows, inner, cols) = (7usize, 5usize, 6usize);
    let mut rng = StdRng::seed_from_u64(0);
    let a: Vec<f64> = (0..rows * inner).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let b: Vec<f64> = (0..inner * cols).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let mut expected = vec![0.0f64; rows * cols];
    for r in 0..rows {
        for c in 0..cols {
            let mut acc = 0.0;
            for k in 0..inner {
                acc += a[r * inner + k] * b[k * cols + c];
            }
            expected[r * cols + c] = acc;
        }
    }

    let device = Device::new("OpenMP").unwrap();
    let o_a = device.allocate_from(&a, &Properties::new()).unwrap();
    let o_b = device.allocate_from(&b, &Properties::new()).unwrap();
    let o_c = device.allocate::<f64>(rows * cols, &Properties::new()).unwrap();
    let multiply = device
        .build_kernel_from_file(
            kernel_path("matrixMultiply.okl"),
            "matrixMultiply",
            &Properties::new().define("TILE", 4),
        )
        .unwrap();
    multiply
        .call(&args![rows as i32, inner as i32, cols as i32, &o_a, &o_b, &o_c])
        .unwrap();

    assert_eq!(o_c.to_vec::<f64>().unwrap(), expected);
}

#[test]
fn test_native_kernel_requires_run_dims() {
    let entries = 1000usize;
    let mut rng = StdRng::seed_from_u64(0);
    let a = uniform_f32(&mut rng, entries);
    let b = uniform_f32(&mut rng, entries);

    let device = Device::serial().unwrap();
    let native = Properties::parse("{okl: {enabled: false}}").unwrap();
    let add = device
        .build_kernel_from_file(kernel_path("addVectors.cpp"), "addVectors", &native)
        .unwrap();
    assert!(add.is_native());

    let o_a = device.allocate_from(&a, &Properties::new()).unwrap();
    let o_b = device.allocate_from(&b, &Properties::new()).unwrap();
    let o_ab = device.allocate::<f32>(entries, &Properties::new()).unwrap();

    let err = add.call(&args![entries as i32, &o_a, &o_b, &o_ab]).unwrap_err();
    assert!(matches!(err, Error::LaunchConfiguration { .. }), "{err}");

    let block = 256;
    add.set_run_dims(GridDim::linear(entries.div_ceil(block) as u32), BlockDim::linear(block as u32))
        .unwrap();
    add.call(&args![entries as i32, &o_a, &o_b, &o_ab]).unwrap();

    let expected: Vec<f32> = a.iter().zip(&b).map(|(a, b)| a + b).collect();
    assert_eq!(o_ab.to_vec::<f32>().unwrap(), expected);
}

#[test]
fn test_native_defines_reach_the_compiler() {
    let device = Device::serial().unwrap();
    let source = "extern \"C\" void fill(int *x) {\n  x[threadIdx.x] = VALUE;\n}";
    let props = Properties::new().with("okl/enabled", false).define("VALUE", 42);
    let fill = device.build_kernel(source, "fill", &props).unwrap();
    fill.set_run_dims(GridDim::linear(1), BlockDim::linear(3)).unwrap();

    let x = device.allocate::<i32>(3, &Properties::new()).unwrap();
    fill.call(&args![&x]).unwrap();
    assert_eq!(x.to_vec::<i32>().unwrap(), vec![42; 3]);
}

#[test]
fn test_build_errors_are_not_cached() {
    let translator = Arc::new(CountingTranslator::default());
    let device = Device::builder()
        .translator(Arc::clone(&translator) as Arc<dyn Translator>)
        .build()
        .unwrap();
    let no_outer = "@kernel void k(const int n, float *x) { for (int i = 0; i < n; ++i) { x[i] = 0; } }";
    for _ in 0..2 {
        let err = device.build_kernel(no_outer, "k", &Properties::new()).unwrap_err();
        assert!(matches!(err, Error::Build { .. }), "{err}");
    }
    assert_eq!(translator.calls(), 2);
    assert_eq!(device.cache_stats().entries, 0);
}

#[test]
fn test_inline_tiled_add_is_bitwise_exact() {
    let mut rng = StdRng::seed_from_u64(0);
    let a = uniform_f32(&mut rng, 1000);
    let b = uniform_f32(&mut rng, 1000);

    for mode in ["Serial", "OpenMP"] {
        let device = Device::new(mode).unwrap();
        let o_a = device.allocate_from(&a, &Properties::new()).unwrap();
        let o_b = device.allocate_from(&b, &Properties::new()).unwrap();
        let o_ab = device.allocate::<f32>(1000, &Properties::new()).unwrap();

        hetero_core::Scope::new()
            .arg("entries", 1000)
            .arg("a", &o_a)
            .arg("b", &o_b)
            .arg("ab", &o_ab)
            .define("TILE_SIZE", 256)
            .run("for (int i = 0; i < entries; ++i; @tile(TILE_SIZE, @outer, @inner)) {\n  ab[i] = a[i] + b[i];\n}")
            .unwrap();

        let ab = o_ab.to_vec::<f32>().unwrap();
        for i in 0..1000 {
            assert_eq!(ab[i].to_bits(), (a[i] + b[i]).to_bits(), "{mode} entry {i}");
        }
    }
}
