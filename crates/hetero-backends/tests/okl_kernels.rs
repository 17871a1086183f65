//! Portable kernels translated to each CPU dialect and executed.

use hetero_backends::{
    Backend, BufferHandle, CompileRequest, CpuBackend, LaunchArg, ModuleHandle, ScalarValue, StreamHandle,
    TransferMode,
};
use hetero_lang::{translate, LaunchModel};
use proptest::prelude::*;

const SAXPY: &str = r#"
@kernel void saxpy(const int n, const float a, const float *x, float *y) {
  for (int i = 0; i < n; ++i; @tile(16, @outer, @inner)) {
    y[i] = a * x[i] + y[i];
  }
}
"#;

const REDUCE: &str = r#"
@kernel void reduce(const int entries, const double *x, double *partial) {
  for (int b = 0; b < BLOCKS; ++b; @outer) {
    @shared double cache[BLOCK];
    for (int t = 0; t < BLOCK; ++t; @inner) {
      double acc = 0.0;
      for (int i = b * BLOCK + t; i < entries; i += BLOCKS * BLOCK) {
        acc += x[i];
      }
      cache[t] = acc;
    }
    @barrier;
    for (int alive = BLOCK / 2; alive > 0; alive /= 2) {
      for (int t = 0; t < BLOCK; ++t; @inner) {
        if (t < alive) cache[t] += cache[t + alive];
      }
      @barrier;
    }
    for (int t = 0; t < BLOCK; ++t; @inner) {
      if (t == 0) partial[b] = cache[0];
    }
  }
}
"#;

struct Harness {
    backend: CpuBackend,
    stream: StreamHandle,
}

impl Harness {
    fn new(mut backend: CpuBackend) -> Self {
        let stream = backend.create_stream().unwrap();
        Self { backend, stream }
    }

    fn upload<T: bytemuck::Pod>(&mut self, data: &[T]) -> BufferHandle {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let handle = self.backend.allocate(bytes.len(), false).unwrap();
        self.backend
            .write(self.stream, handle, 0, bytes, TransferMode::Blocking)
            .unwrap();
        handle
    }

    fn download<T: bytemuck::Pod + Default + Clone>(&mut self, handle: BufferHandle, len: usize) -> Vec<T> {
        let mut out = vec![T::default(); len];
        self.backend
            .read(self.stream, handle, 0, bytemuck::cast_slice_mut(&mut out))
            .unwrap();
        out
    }

    fn build(&mut self, source: &str, entry: &str, defines: &[(String, String)]) -> ModuleHandle {
        let translation = translate(source, entry, self.backend.dialect(), defines).unwrap();
        self.backend
            .compile(&CompileRequest::new(translation.source, entry, LaunchModel::Loops))
            .unwrap()
            .handle
    }
}

fn saxpy_on(backend: CpuBackend, a: f32, x: &[f32], y: &[f32]) -> Vec<f32> {
    let mut h = Harness::new(backend);
    let hx = h.upload(x);
    let hy = h.upload(y);
    let module = h.build(SAXPY, "saxpy", &[]);
    h.backend
        .launch(
            h.stream,
            module,
            &[
                LaunchArg::Scalar(ScalarValue::I32(x.len() as i32)),
                LaunchArg::Scalar(ScalarValue::F32(a)),
                LaunchArg::Buffer(hx),
                LaunchArg::Buffer(hy),
            ],
            None,
        )
        .unwrap();
    h.backend.finish(h.stream).unwrap();
    h.download(hy, y.len())
}

#[test]
fn test_saxpy_matches_host_on_both_dialects() {
    let x: Vec<f32> = (0..1000).map(|i| i as f32 * 0.25).collect();
    let y: Vec<f32> = (0..1000).map(|i| 3.0 - i as f32).collect();
    let expected: Vec<f32> = x.iter().zip(&y).map(|(x, y)| 1.5 * x + y).collect();

    assert_eq!(saxpy_on(CpuBackend::serial(), 1.5, &x, &y), expected);
    assert_eq!(saxpy_on(CpuBackend::openmp(), 1.5, &x, &y), expected);
}

#[test]
fn test_shared_memory_reduction() {
    let defines = vec![
        ("BLOCKS".to_string(), "8".to_string()),
        ("BLOCK".to_string(), "16".to_string()),
    ];
    let x: Vec<f64> = (0..10_000).map(|i| (i % 97) as f64 * 0.5).collect();
    let expected: f64 = x.iter().sum();

    for backend in [CpuBackend::serial(), CpuBackend::openmp()] {
        let mut h = Harness::new(backend);
        let hx = h.upload(&x);
        let hpartial = h.upload(&[0.0f64; 8][..]);
        let module = h.build(REDUCE, "reduce", &defines);
        h.backend
            .launch(
                h.stream,
                module,
                &[
                    LaunchArg::Scalar(ScalarValue::I32(x.len() as i32)),
                    LaunchArg::Buffer(hx),
                    LaunchArg::Buffer(hpartial),
                ],
                None,
            )
            .unwrap();
        let partial: Vec<f64> = h.download(hpartial, 8);
        let total: f64 = partial.iter().sum();
        assert!((total - expected).abs() < 1e-6, "{total} vs {expected}");
    }
}

#[test]
fn test_openmp_translation_runs_outer_loop_in_parallel() {
    let translation = translate(SAXPY, "saxpy", hetero_lang::Dialect::OpenMp, &[]).unwrap();
    let program = hetero_backends::Program::compile(&translation.source, "saxpy", &[], LaunchModel::Loops, true).unwrap();
    assert_eq!(program.parallel_loops(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_saxpy_is_bitwise_equal_to_host(
        a in -4.0f32..4.0,
        pairs in proptest::collection::vec((-1.0e3f32..1.0e3, -1.0e3f32..1.0e3), 1..200),
    ) {
        let (x, y): (Vec<f32>, Vec<f32>) = pairs.into_iter().unzip();
        let expected: Vec<f32> = x.iter().zip(&y).map(|(x, y)| a * x + y).collect();
        prop_assert_eq!(saxpy_on(CpuBackend::openmp(), a, &x, &y), expected);
    }
}
