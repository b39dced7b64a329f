//! Incremental module cache.
//!
//! Entries hold a module's transform output keyed by
//! `hash(source fingerprint, matched-rule fingerprints, pipeline settings)`.
//! The backing [`CacheStore`] additionally records a build-dependency
//! fingerprint (packline version, canonical config, `buildDependencies`
//! contents). When that changes, the whole store is cleared on first access
//! instead of letting stale entries expire one by one.

mod fs;
mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

use crate::error::BuildError;
use crate::transform::{Artifact, EmittedFile};
use packline_util::hash::{fingerprint_parts, Fingerprinter};
use serde::Serialize;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Bumped whenever the on-disk entry format changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Cache key for one module build.
#[must_use]
pub fn cache_key(source_fingerprint: &str, rules_fingerprint: &str, settings_fingerprint: &str) -> String {
    fingerprint_parts([source_fingerprint, rules_fingerprint, settings_fingerprint])
}

/// Fingerprint of everything that defines transform semantics outside the
/// individual module: the tool version, the config and extra files the user
/// lists. Unreadable files hash as their path plus a marker.
#[must_use]
pub fn build_dependency_fingerprint(config_json: &str, dependencies: &[PathBuf]) -> String {
    let mut fp = Fingerprinter::new();
    fp.part(crate::VERSION).part(config_json);
    for path in dependencies {
        fp.part(path.to_string_lossy().as_bytes());
        match std::fs::read(path) {
            Ok(bytes) => fp.part(bytes),
            Err(_) => fp.part(b"<missing>"),
        };
    }
    fp.finish()
}

/// Current wall-clock time in unix milliseconds.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// What the pipeline produced for a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedModule {
    pub artifact: Artifact,
    /// Specifiers reported by transforms.
    pub dependencies: Vec<String>,
    pub emitted: Vec<EmittedFile>,
    pub diagnostics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub value: CachedModule,
    /// Unix ms of the last time this entry was served or written.
    pub last_validated_at: u64,
}

/// Storage behind [`IncrementalCache`].
pub trait CacheStore: Send + Sync + fmt::Debug {
    /// Fetch an entry.
    ///
    /// # Errors
    /// I/O failures, including read timeouts.
    fn load(&self, key: &str) -> io::Result<Option<CacheEntry>>;

    /// Insert or replace an entry.
    ///
    /// # Errors
    /// I/O failures.
    fn store(&self, entry: &CacheEntry) -> io::Result<()>;

    /// Refresh `last_validated_at` of an entry.
    ///
    /// # Errors
    /// I/O failures.
    fn touch(&self, key: &str, at: u64) -> io::Result<()>;

    /// The build-dependency fingerprint the store was filled under.
    ///
    /// # Errors
    /// I/O failures.
    fn fingerprint(&self) -> io::Result<Option<String>>;

    /// Drop every entry and adopt `fingerprint`, as one step.
    ///
    /// # Errors
    /// I/O failures.
    fn reset(&self, fingerprint: &str) -> io::Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Counters for one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub invalidations: u64,
}

/// Validating front end over a [`CacheStore`].
#[derive(Debug)]
pub struct IncrementalCache {
    store: Arc<dyn CacheStore>,
    build_fingerprint: String,
    validated: AtomicBool,
    validate_lock: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    invalidations: AtomicU64,
}

impl IncrementalCache {
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, build_fingerprint: impl Into<String>) -> Self {
        Self {
            store,
            build_fingerprint: build_fingerprint.into(),
            validated: AtomicBool::new(false),
            validate_lock: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// In-memory cache.
    #[must_use]
    pub fn in_memory(build_fingerprint: impl Into<String>) -> Self {
        Self::new(Arc::new(MemoryStore::new()), build_fingerprint)
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    #[must_use]
    pub fn build_fingerprint(&self) -> &str {
        &self.build_fingerprint
    }

    /// Check the store's fingerprint once; clear it on mismatch.
    fn ensure_valid(&self) {
        if self.validated.load(Ordering::Acquire) {
            return;
        }
        let _guard = self.validate_lock.lock().unwrap();
        if self.validated.load(Ordering::Acquire) {
            return;
        }

        match self.store.fingerprint() {
            Ok(Some(fp)) if fp == self.build_fingerprint => {}
            Ok(None) => {
                if let Err(e) = self.store.reset(&self.build_fingerprint) {
                    tracing::warn!(error = %e, "failed to initialise cache store");
                }
            }
            Ok(Some(_)) => self.invalidate_all("build dependencies changed"),
            Err(e) => self.invalidate_all(&format!("cache manifest unreadable: {e}")),
        }
        self.validated.store(true, Ordering::Release);
    }

    /// Drop every entry.
    pub fn invalidate_all(&self, reason: &str) {
        let err = BuildError::CacheInvalidation {
            reason: reason.to_string(),
        };
        tracing::info!(code = err.code(), entries = self.store.len(), "{err}");
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.store.reset(&self.build_fingerprint) {
            tracing::warn!(error = %e, "failed to reset cache store");
        }
    }

    /// Look up `key`. Store errors and timeouts count as misses.
    pub fn get(&self, key: &str) -> Option<CachedModule> {
        self.ensure_valid();
        match self.store.load(key) {
            Ok(Some(entry)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.store.touch(key, now_ms()) {
                    tracing::debug!(error = %e, "cache touch failed");
                }
                tracing::trace!(key, "cache hit");
                Some(entry.value)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "cache read failed, treating as miss");
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, key: &str, value: CachedModule) {
        self.ensure_valid();
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            last_validated_at: now_ms(),
        };
        match self.store.store(&entry) {
            Ok(()) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => tracing::warn!(key, error = %e, "cache write failed"),
        }
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::ArtifactKind;

    fn module(code: &str) -> CachedModule {
        CachedModule {
            artifact: Artifact {
                kind: ArtifactKind::Script,
                code: code.as_bytes().to_vec(),
                map: None,
            },
            dependencies: vec!["./dep".to_string()],
            emitted: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    #[test]
    fn test_key_depends_on_every_part() {
        let base = cache_key("src", "rules", "settings");
        assert_ne!(base, cache_key("src2", "rules", "settings"));
        assert_ne!(base, cache_key("src", "rules2", "settings"));
        assert_ne!(base, cache_key("src", "rules", "settings2"));
        assert_eq!(base, cache_key("src", "rules", "settings"));
    }

    #[test]
    fn test_hit_miss_and_stats() {
        let cache = IncrementalCache::in_memory("fp");
        assert!(cache.get("k").is_none());
        cache.put("k", module("a"));
        assert_eq!(cache.get("k"), Some(module("a")));
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                writes: 1,
                invalidations: 0
            }
        );
    }

    #[test]
    fn test_fingerprint_change_clears_everything() {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        let first = IncrementalCache::new(Arc::clone(&store), "v1");
        first.put("a", module("a"));
        first.put("b", module("b"));
        assert_eq!(store.len(), 2);

        let same = IncrementalCache::new(Arc::clone(&store), "v1");
        assert!(same.get("a").is_some());
        assert_eq!(same.stats().invalidations, 0);

        let second = IncrementalCache::new(Arc::clone(&store), "v2");
        assert!(second.get("a").is_none());
        assert!(second.get("b").is_none());
        assert_eq!(second.stats().invalidations, 1);
        assert!(store.is_empty());
        assert_eq!(store.fingerprint().unwrap().as_deref(), Some("v2"));
    }

    #[test]
    fn test_build_dependency_fingerprint_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let dep = dir.path().join("babel.config.json");
        std::fs::write(&dep, "{}").unwrap();
        let a = build_dependency_fingerprint("{}", std::slice::from_ref(&dep));
        std::fs::write(&dep, "{\"x\":1}").unwrap();
        let b = build_dependency_fingerprint("{}", std::slice::from_ref(&dep));
        assert_ne!(a, b);
        assert_ne!(b, build_dependency_fingerprint("{\"mode\":1}", &[dep]));
    }
}
