//! Registry of backend factories and the binding logic built on it.

use crate::backend::Backend;
use crate::backends::CpuBackend;
use crate::error::{BackendError, Result};
use crate::kind::{select_backend, BackendKind};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Backend-specific placement parameters from a mode descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceSelector {
    pub platform_id: Option<u32>,
    pub device_id: Option<u32>,
}

/// Produces a ready backend instance for a selector.
pub type BackendFactory = Arc<dyn Fn(&DeviceSelector) -> Result<Box<dyn Backend>> + Send + Sync>;

/// The outcome of binding a requested kind.
pub struct BoundBackend {
    pub backend: Box<dyn Backend>,
    pub requested: BackendKind,
    pub bound: BackendKind,
}

impl BoundBackend {
    pub fn fell_back(&self) -> bool {
        self.requested != self.bound
    }
}

impl fmt::Debug for BoundBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundBackend")
            .field("requested", &self.requested)
            .field("bound", &self.bound)
            .finish_non_exhaustive()
    }
}

/// Which backend kinds can be instantiated in this process.
#[derive(Clone)]
pub struct BackendRegistry {
    factories: BTreeMap<BackendKind, BackendFactory>,
}

impl BackendRegistry {
    /// A registry with no backends at all.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Serial and OpenMP, the backends compiled into this crate.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(BackendKind::Serial, |_| Ok(Box::new(CpuBackend::serial())));
        registry.register(BackendKind::OpenMp, |_| Ok(Box::new(CpuBackend::openmp())));
        registry
    }

    /// Add or replace the factory for `kind`.
    pub fn register<F>(&mut self, kind: BackendKind, factory: F)
    where
        F: Fn(&DeviceSelector) -> Result<Box<dyn Backend>> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
    }

    pub fn unregister(&mut self, kind: BackendKind) -> bool {
        self.factories.remove(&kind).is_some()
    }

    pub fn contains(&self, kind: BackendKind) -> bool {
        self.factories.contains_key(&kind)
    }

    pub fn available(&self) -> Vec<BackendKind> {
        self.factories.keys().copied().collect()
    }

    /// Bind `requested`, falling back to Serial when it is missing or its
    /// factory fails.
    #[tracing::instrument(skip(self), fields(requested = %requested))]
    pub fn instantiate(&self, requested: BackendKind, selector: &DeviceSelector) -> Result<BoundBackend> {
        let available = self.available();
        let chosen = select_backend(requested, &available).ok_or_else(|| BackendError::Unavailable {
            kind: BackendKind::FALLBACK,
            reason: "no fallback backend registered".to_string(),
        })?;

        let first = self.create(chosen, selector);
        let (backend, bound) = match first {
            Ok(backend) => (backend, chosen),
            Err(e) if chosen != BackendKind::FALLBACK => {
                tracing::warn!(kind = %chosen, error = %e, "backend_init_failed");
                let fallback = self.create(BackendKind::FALLBACK, &DeviceSelector::default())?;
                (fallback, BackendKind::FALLBACK)
            }
            Err(e) => return Err(e),
        };

        if bound != requested {
            tracing::info!(requested = %requested, bound = %bound, "backend_fallback");
        }
        Ok(BoundBackend {
            backend,
            requested,
            bound,
        })
    }

    fn create(&self, kind: BackendKind, selector: &DeviceSelector) -> Result<Box<dyn Backend>> {
        let factory = self.factories.get(&kind).ok_or_else(|| BackendError::Unavailable {
            kind,
            reason: "not registered".to_string(),
        })?;
        factory(selector)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("available", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_bind_cpu_kinds() {
        let registry = BackendRegistry::with_defaults();
        let bound = registry
            .instantiate(BackendKind::OpenMp, &DeviceSelector::default())
            .unwrap();
        assert_eq!(bound.bound, BackendKind::OpenMp);
        assert_eq!(bound.backend.kind(), BackendKind::OpenMp);
        assert!(!bound.fell_back());
    }

    #[test]
    fn test_unregistered_kind_falls_back() {
        let registry = BackendRegistry::with_defaults();
        let bound = registry.instantiate(BackendKind::Cuda, &DeviceSelector::default()).unwrap();
        assert_eq!(bound.requested, BackendKind::Cuda);
        assert_eq!(bound.bound, BackendKind::Serial);
        assert!(bound.fell_back());
    }

    #[test]
    fn test_failing_factory_falls_back() {
        let mut registry = BackendRegistry::with_defaults();
        registry.register(BackendKind::Hip, |_| {
            Err(BackendError::Unavailable {
                kind: BackendKind::Hip,
                reason: "no device".to_string(),
            })
        });
        let bound = registry.instantiate(BackendKind::Hip, &DeviceSelector::default()).unwrap();
        assert_eq!(bound.bound, BackendKind::Serial);
    }

    #[test]
    fn test_missing_fallback_is_an_error() {
        let mut registry = BackendRegistry::with_defaults();
        registry.unregister(BackendKind::Serial);
        assert!(registry.instantiate(BackendKind::Cuda, &DeviceSelector::default()).is_err());
        // the requested kind still binds without the fallback
        assert!(registry.instantiate(BackendKind::OpenMp, &DeviceSelector::default()).is_ok());
    }
}
