//! Process-wide cache of compiled CPU programs
//!
//! Compiling dialect source (lex, parse, resolve) is pure, so two backends
//! asked to compile the same request share one [`Program`]. Entries are
//! keyed by a SHA-256 digest of everything that influences the result.
//! Failed compilations are never cached.

use crate::backend::CompileRequest;
use crate::backends::cpu::Program;
use crate::error::Result;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// A cache key for compiled programs
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramKey([u8; 32]);

impl ProgramKey {
    /// Digest of source, entry, defines, flags, launch model and threading
    pub fn new(request: &CompileRequest, threaded: bool) -> Self {
        let mut hasher = Sha256::new();
        let mut field = |bytes: &[u8]| {
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        };
        field(request.source.as_bytes());
        field(request.entry.as_bytes());
        for (name, value) in &request.defines {
            field(name.as_bytes());
            field(value.as_bytes());
        }
        field(request.compiler_flags.as_bytes());
        field(format!("{:?}", request.launch).as_bytes());
        field(&[threaded as u8]);
        Self(hasher.finalize().into())
    }
}

impl fmt::Debug for ProgramKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProgramKey(")?;
        for byte in &self.0[..6] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

/// Thread-safe program cache using OnceLock
pub struct ProgramCache {
    cache: OnceLock<parking_lot::RwLock<HashMap<ProgramKey, Arc<Program>>>>,
}

impl ProgramCache {
    /// Create a new empty program cache
    pub const fn new() -> Self {
        Self { cache: OnceLock::new() }
    }

    /// The cache shared by every CPU backend in the process
    pub fn global() -> &'static ProgramCache {
        static GLOBAL: ProgramCache = ProgramCache::new();
        &GLOBAL
    }

    /// Get a program from the cache, or compile it if not present
    ///
    /// `compile` runs only on a miss. Two threads racing on the same key may
    /// both compile, but only the first result is kept.
    pub fn get_or_try_create<F>(&self, key: ProgramKey, compile: F) -> Result<Arc<Program>>
    where
        F: FnOnce() -> Result<Program>,
    {
        let cache = self.cache.get_or_init(|| parking_lot::RwLock::new(HashMap::new()));

        if let Some(program) = cache.read().get(&key) {
            tracing::trace!(?key, "program_cache_hit");
            return Ok(Arc::clone(program));
        }

        let program = Arc::new(compile()?);
        let mut guard = cache.write();
        Ok(Arc::clone(guard.entry(key).or_insert(program)))
    }

    /// Keyed convenience wrapper over [`Self::get_or_try_create`]
    pub fn get_or_compile<F>(&self, request: &CompileRequest, threaded: bool, compile: F) -> Result<Arc<Program>>
    where
        F: FnOnce() -> Result<Program>,
    {
        self.get_or_try_create(ProgramKey::new(request, threaded), compile)
    }

    /// Clear the cache
    #[cfg(test)]
    pub fn clear(&self) {
        if let Some(cache) = self.cache.get() {
            cache.write().clear();
        }
    }

    /// Get the number of cached programs
    pub fn len(&self) -> usize {
        self.cache.get().map(|c| c.read().len()).unwrap_or(0)
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProgramCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use hetero_lang::LaunchModel;

    const SOURCE: &str = "extern \"C\" void k(float *y) { y[0] = 1.0f; }";

    fn compile(request: &CompileRequest) -> Result<Program> {
        Program::compile(&request.source, &request.entry, &request.defines, request.launch, false)
    }

    #[test]
    fn test_cache_reuses_programs() {
        let cache = ProgramCache::new();
        let request = CompileRequest::new(SOURCE, "k", LaunchModel::Loops);

        let first = cache.get_or_compile(&request, false, || compile(&request)).unwrap();
        let second = cache
            .get_or_compile(&request, false, || panic!("must not recompile"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_key_covers_defines_and_threading() {
        let plain = CompileRequest::new(SOURCE, "k", LaunchModel::Loops);
        let defined = plain
            .clone()
            .with_defines(vec![("N".to_string(), "4".to_string())]);
        assert_ne!(ProgramKey::new(&plain, false), ProgramKey::new(&defined, false));
        assert_ne!(ProgramKey::new(&plain, false), ProgramKey::new(&plain, true));
        assert_eq!(ProgramKey::new(&plain, true), ProgramKey::new(&plain.clone(), true));
    }

    #[test]
    fn test_failures_are_not_cached() {
        let cache = ProgramCache::new();
        let request = CompileRequest::new(SOURCE, "k", LaunchModel::Loops);
        let err = cache
            .get_or_compile(&request, false, || Err(BackendError::compile("k", "boom")))
            .unwrap_err();
        assert!(matches!(err, BackendError::Compile { .. }));
        assert!(cache.is_empty());

        cache.get_or_compile(&request, false, || compile(&request)).unwrap();
        cache.clear();
        assert!(cache.is_empty());
    }
}
