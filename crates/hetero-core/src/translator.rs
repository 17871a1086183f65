//! Source-to-backend translation seam
//!
//! A device hands portable kernel source to its [`Translator`] exactly once
//! per distinct build identity; the returned backend-native source is then
//! compiled by the backend. [`OklTranslator`] is the default and lowers OKL
//! to the CPU dialects.

use crate::error::{Error, Result};
use crate::properties::Properties;
use hetero_lang::{Dialect, KernelMetadata};
use serde::{Deserialize, Serialize};

/// Everything a translator may look at
#[derive(Debug, Clone, Copy)]
pub struct TranslationRequest<'a> {
    /// Canonicalized portable source
    pub source: &'a str,
    pub entry: &'a str,
    /// Source flavour the bound backend compiles
    pub dialect: Dialect,
    /// `defines/*` from the build properties, sorted by name
    pub defines: &'a [(String, String)],
    pub properties: &'a Properties,
}

/// Backend-native source plus the entry point's signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatedSource {
    pub source: String,
    pub metadata: KernelMetadata,
}

/// Portable kernel language to backend-native source
pub trait Translator: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Translate `request.entry`. Failures become [`Error::Build`].
    fn translate(&self, request: &TranslationRequest<'_>) -> Result<TranslatedSource>;
}

/// OKL front-end from `hetero-lang`
#[derive(Debug, Clone, Copy, Default)]
pub struct OklTranslator;

impl Translator for OklTranslator {
    fn name(&self) -> &str {
        "okl"
    }

    fn translate(&self, request: &TranslationRequest<'_>) -> Result<TranslatedSource> {
        let translation = hetero_lang::translate(request.source, request.entry, request.dialect, request.defines)
            .map_err(|e| Error::build(request.entry, e))?;
        Ok(TranslatedSource {
            source: translation.source,
            metadata: translation.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hetero_lang::LaunchModel;

    const ADD: &str = "@kernel void add(const int n, const float *a, float *b) {\n\
  for (int i = 0; i < n; ++i; @tile(TILE, @outer, @inner)) {\n\
    b[i] += a[i];\n\
  }\n\
}";

    fn request<'a>(source: &'a str, defines: &'a [(String, String)], props: &'a Properties) -> TranslationRequest<'a> {
        TranslationRequest {
            source,
            entry: "add",
            dialect: Dialect::OpenMp,
            defines,
            properties: props,
        }
    }

    #[test]
    fn test_okl_translation_reports_signature() {
        let props = Properties::new().define("TILE", 8);
        let defines = props.defines();
        let out = OklTranslator.translate(&request(ADD, &defines, &props)).unwrap();
        assert_eq!(out.metadata.name, "add");
        assert_eq!(out.metadata.params.len(), 3);
        assert_eq!(out.metadata.launch, LaunchModel::Loops);
        assert!(out.source.contains("omp parallel for"));
    }

    #[test]
    fn test_translation_failure_is_a_build_error() {
        let props = Properties::new();
        let serial_loop = "@kernel void add(const int n, const float *a, float *b) {\n\
  for (int i = 0; i < n; ++i) { b[i] += a[i]; }\n\
}";
        let err = OklTranslator.translate(&request(serial_loop, &[], &props)).unwrap_err();
        assert!(matches!(err, Error::Build { ref entry, .. } if entry == "add"), "{err}");
    }
}
