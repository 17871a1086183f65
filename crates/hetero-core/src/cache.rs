//! Compiled artifact cache
//!
//! Each device keeps the artifacts it has built, keyed by a SHA-256 digest
//! of the build identity:
//!
//! ```text
//! ArtifactKey = sha256(canonical source, entry, serialized properties, backend identity)
//! ```
//!
//! A hit never reaches the translator or the backend compiler. Optionally a
//! [`DiskCache`] persists translations under the same key so a fresh device
//! in a later process skips the translator too.

use crate::error::{Error, Result};
use crate::properties::Properties;
use crate::translator::TranslatedSource;
use hetero_backends::ModuleHandle;
use hetero_lang::KernelMetadata;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Line endings normalized, trailing whitespace and blank edge lines dropped.
pub fn canonical_source(source: &str) -> String {
    let lines: Vec<&str> = source.lines().map(str::trim_end).collect();
    let first = lines.iter().position(|l| !l.is_empty()).unwrap_or(lines.len());
    let last = lines.iter().rposition(|l| !l.is_empty()).map_or(first, |i| i + 1);
    lines[first..last].join("\n")
}

/// Digest of everything that determines a compiled artifact
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactKey([u8; 32]);

impl ArtifactKey {
    /// `source` must already be canonical.
    pub fn new(source: &str, entry: &str, properties: &Properties, backend_identity: &str) -> Self {
        let mut hasher = Sha256::new();
        for field in [
            source,
            entry,
            properties.to_canonical_string().as_str(),
            backend_identity,
        ] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        Self(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArtifactKey({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A kernel compiled by one device's backend
#[derive(Debug)]
pub struct Artifact {
    pub key: ArtifactKey,
    pub module: ModuleHandle,
    pub metadata: KernelMetadata,
    /// Built from backend-native source (`okl/enabled: false`)
    pub native: bool,
}

/// Counters reported by [`Device::cache_stats`](crate::Device::cache_stats)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Builds answered from memory
    pub hits: u64,
    /// Builds that compiled
    pub misses: u64,
    /// Misses whose translation came from the disk cache
    pub disk_hits: u64,
    /// Translator invocations
    pub translations: u64,
    /// Artifacts currently cached
    pub entries: usize,
}

/// Per-device artifact map
#[derive(Debug, Default)]
pub struct ArtifactCache {
    entries: RwLock<HashMap<ArtifactKey, Arc<Artifact>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    disk_hits: AtomicU64,
    translations: AtomicU64,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `key`, counting a hit or a miss.
    pub fn lookup(&self, key: &ArtifactKey) -> Option<Arc<Artifact>> {
        let found = self.entries.read().get(key).cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Insert unless another build got there first; returns the cached entry.
    pub fn insert(&self, artifact: Artifact) -> Arc<Artifact> {
        let mut entries = self.entries.write();
        Arc::clone(entries.entry(artifact.key).or_insert_with(|| Arc::new(artifact)))
    }

    pub(crate) fn record_translation(&self) {
        self.translations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_disk_hit(&self) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            translations: self.translations.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

/// Translations persisted as `<key>.json` files
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &ArtifactKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.to_hex()))
    }

    /// A missing entry is `None`; an unreadable one is logged and ignored.
    pub fn load(&self, key: &ArtifactKey) -> Option<TranslatedSource> {
        let path = self.path(key);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "disk_cache_read_failed");
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(translated) => Some(translated),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "disk_cache_entry_corrupt");
                None
            }
        }
    }

    /// Write through a temporary file so readers never see partial entries.
    pub fn store(&self, key: &ArtifactKey, translated: &TranslatedSource) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| Error::io(&self.dir, e))?;
        let path = self.path(key);
        let tmp = self
            .dir
            .join(format!("{}.json.{}.tmp", key.to_hex(), std::process::id()));
        let text = serde_json::to_string(translated).map_err(|e| Error::Properties(e.to_string()))?;
        std::fs::write(&tmp, text).map_err(|e| Error::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| Error::io(&path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hetero_lang::LaunchModel;

    fn translated() -> TranslatedSource {
        TranslatedSource {
            source: "extern \"C\" void k(float *y) { y[0] = 1.0f; }".to_string(),
            metadata: KernelMetadata {
                name: "k".to_string(),
                params: Vec::new(),
                launch: LaunchModel::Loops,
            },
        }
    }

    #[test]
    fn test_canonical_source() {
        assert_eq!(canonical_source("\r\n\nint a;  \r\n  int b;\t\n\n"), "int a;\n  int b;");
        assert_eq!(canonical_source("  \n \n"), "");
        assert_eq!(canonical_source("x"), "x");
    }

    #[test]
    fn test_key_covers_every_field() {
        let props = Properties::new().define("N", 4);
        let base = ArtifactKey::new("src", "k", &props, "Serial:host");
        assert_eq!(base, ArtifactKey::new("src", "k", &props, "Serial:host"));
        assert_ne!(base, ArtifactKey::new("src2", "k", &props, "Serial:host"));
        assert_ne!(base, ArtifactKey::new("src", "k2", &props, "Serial:host"));
        assert_ne!(base, ArtifactKey::new("src", "k", &Properties::new(), "Serial:host"));
        assert_ne!(base, ArtifactKey::new("src", "k", &props, "OpenMP:host"));
        // length prefixes keep field boundaries apart
        assert_ne!(
            ArtifactKey::new("ab", "c", &props, "x"),
            ArtifactKey::new("a", "bc", &props, "x")
        );
        assert_eq!(base.to_hex().len(), 64);
    }

    #[test]
    fn test_cache_counts_hits_and_misses() {
        let cache = ArtifactCache::new();
        let key = ArtifactKey::new("src", "k", &Properties::new(), "Serial:host");
        assert!(cache.lookup(&key).is_none());

        let first = cache.insert(Artifact {
            key,
            module: ModuleHandle::new(1),
            metadata: translated().metadata,
            native: false,
        });
        let raced = cache.insert(Artifact {
            key,
            module: ModuleHandle::new(2),
            metadata: translated().metadata,
            native: false,
        });
        assert!(Arc::ptr_eq(&first, &raced));
        assert!(cache.lookup(&key).is_some());

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[test]
    fn test_disk_cache_round_trip_and_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskCache::new(dir.path().join("nested"));
        let key = ArtifactKey::new("src", "k", &Properties::new(), "Serial:host");

        assert!(disk.load(&key).is_none());
        disk.store(&key, &translated()).unwrap();
        assert_eq!(disk.load(&key), Some(translated()));

        std::fs::write(disk.dir().join(format!("{}.json", key.to_hex())), "not json").unwrap();
        assert!(disk.load(&key).is_none());
    }
}
