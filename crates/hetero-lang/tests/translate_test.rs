//! Front-end behaviour seen through the public API only

use hetero_lang::{parse, translate, Dialect, LangError, LaunchModel, ScalarKind};
use proptest::prelude::*;

const REDUCTION: &str = r#"
@kernel void sum(const int entries, const double *vec, double *blockSum) {
  for (int group = 0; group < MAX_BLOCKS; ++group; @outer) {
    @shared double s_vec[BLOCK_SIZE];
    for (int item = 0; item < BLOCK_SIZE; ++item; @inner) {
      s_vec[item] = 0;
      for (int i = group * BLOCK_SIZE + item; i < entries; i += MAX_BLOCKS * BLOCK_SIZE) {
        s_vec[item] += vec[i];
      }
    }
    for (int alive = BLOCK_SIZE / 2; alive > 0; alive /= 2) {
      @barrier;
      for (int item = 0; item < BLOCK_SIZE; ++item; @inner) {
        if (item < alive) {
          s_vec[item] += s_vec[item + alive];
        }
      }
    }
    for (int item = 0; item < 1; ++item; @inner) {
      blockSum[group] = s_vec[0];
    }
  }
}
"#;

fn reduction_defines() -> Vec<(String, String)> {
    vec![
        ("MAX_BLOCKS".to_string(), "8".to_string()),
        ("BLOCK_SIZE".to_string(), "32".to_string()),
    ]
}

#[test]
fn test_reduction_translates_for_both_dialects() {
    for dialect in [Dialect::Serial, Dialect::OpenMp] {
        let translation = translate(REDUCTION, "sum", dialect, &reduction_defines()).unwrap();
        let src = &translation.source;
        assert!(src.contains("#define MAX_BLOCKS 8"), "{src}");
        assert!(src.contains("double s_vec[32];"), "{src}");
        assert!(!src.contains("@barrier"), "{src}");
        assert_eq!(src.contains("#pragma omp parallel for"), dialect == Dialect::OpenMp, "{src}");

        let unit = parse(src).unwrap();
        assert!(unit.function("sum").unwrap().is_native_entry);
    }
}

#[test]
fn test_metadata_describes_the_signature() {
    let translation = translate(REDUCTION, "sum", Dialect::Serial, &reduction_defines()).unwrap();
    let metadata = &translation.metadata;
    assert_eq!(metadata.name, "sum");
    assert_eq!(metadata.launch, LaunchModel::Loops);

    let names: Vec<&str> = metadata.params.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["entries", "vec", "blockSum"]);
    assert!(!metadata.params[0].ty.pointer);
    assert_eq!(metadata.params[0].ty.scalar, ScalarKind::I32);
    assert!(metadata.params[2].ty.pointer);
    assert_eq!(metadata.params[2].ty.scalar, ScalarKind::F64);

    let json = serde_json::to_value(metadata).unwrap();
    assert_eq!(json["launch"], "loops");
    assert_eq!(json["params"][1]["ty"]["scalar"], "f64");
    let back: hetero_lang::KernelMetadata = serde_json::from_value(json).unwrap();
    assert_eq!(&back, metadata);
}

#[test]
fn test_translation_is_deterministic() {
    let first = translate(REDUCTION, "sum", Dialect::OpenMp, &reduction_defines()).unwrap();
    let second = translate(REDUCTION, "sum", Dialect::OpenMp, &reduction_defines()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_selects_one_kernel_from_many() {
    let src = r#"
        @kernel void first(int n, int *x) {
          for (int i = 0; i < n; ++i; @tile(4, @outer, @inner)) { x[i] = 1; }
        }
        @kernel void second(int n, int *x) {
          for (int i = 0; i < n; ++i; @tile(4, @outer, @inner)) { x[i] = 2; }
        }
    "#;
    let translation = translate(src, "second", Dialect::Serial, &[]).unwrap();
    assert!(translation.source.contains("x[i] = 2;"));
    assert!(!translation.source.contains("x[i] = 1;"));
    assert!(!translation.source.contains("first"));
}

#[test]
fn test_native_source_is_not_a_portable_kernel() {
    let native = r#"
        extern "C" __global__ __launch_bounds__(256) void scale(const int n, float *__restrict__ x) {
          const int i = threadIdx.x + blockIdx.x * blockDim.x;
          if (i < n) { x[i] = 2 * x[i]; }
        }
    "#;
    let unit = parse(native).unwrap();
    let function = unit.function("scale").unwrap();
    assert!(function.is_native_entry);
    assert!(!function.is_kernel);

    let err = translate(native, "scale", Dialect::Serial, &[]).unwrap_err();
    assert!(matches!(err, LangError::Semantic { .. }), "{err}");
}

#[test]
fn test_errors_carry_source_locations() {
    let src = "@kernel void k(int n, int *x) {\n  for (int i = 0; i < n; ++i; @outer) {\n    x[i] = ;\n  }\n}";
    let err = translate(src, "k", Dialect::Serial, &[]).unwrap_err();
    assert!(err.to_string().starts_with("3:"), "{err}");
}

proptest! {
    #[test]
    fn prop_tile_size_is_respected(size in 1u32..512) {
        let src = format!(
            "@kernel void k(const int n, float *x) {{\n  for (int i = 0; i < n; ++i; @tile({size}, @outer, @inner)) {{ x[i] = 0; }}\n}}"
        );
        let translation = translate(&src, "k", Dialect::OpenMp, &[]).unwrap();
        let step = format!("_tile_i += {size})");
        prop_assert!(translation.source.contains(&step), "{}", translation.source);
        prop_assert!(parse(&translation.source).is_ok());
    }
}
