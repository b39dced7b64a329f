//! On-disk cache store.
//!
//! ```text
//! <cacheDirectory>/
//!   manifest.json            {"schemaVersion": 1, "fingerprint": "<hex>"}
//!   entries/ab/abcdef….bin   header line (JSON) + code + emitted blobs
//! ```
//!
//! Every file is written through a temp file and rename, so a crash never
//! leaves a torn entry. `last_validated_at` is the entry file's mtime.

use super::{CacheEntry, CacheStore, CachedModule, SCHEMA_VERSION};
use crate::transform::{Artifact, ArtifactKind, EmittedFile};
use packline_util::fs::{atomic_write, read_with_timeout, swap_remove_dir};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    schema_version: u32,
    fingerprint: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmittedHeader {
    name: String,
    len: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryHeader {
    key: String,
    kind: ArtifactKind,
    code_len: usize,
    map: Option<String>,
    dependencies: Vec<String>,
    diagnostics: Vec<String>,
    emitted: Vec<EmittedHeader>,
}

/// Persistent store under a cache directory.
#[derive(Debug)]
pub struct FsStore {
    dir: PathBuf,
    timeout: Duration,
}

impl FsStore {
    /// Store rooted at `dir` (created lazily). Reads taking longer than
    /// `timeout` fail.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            timeout,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join("manifest.json")
    }

    fn entries_dir(&self) -> PathBuf {
        self.dir.join("entries")
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let shard = key.get(..2).unwrap_or("__");
        self.entries_dir().join(shard).join(format!("{key}.bin"))
    }

    fn encode(entry: &CacheEntry) -> io::Result<Vec<u8>> {
        let value = &entry.value;
        let header = EntryHeader {
            key: entry.key.clone(),
            kind: value.artifact.kind,
            code_len: value.artifact.code.len(),
            map: value.artifact.map.clone(),
            dependencies: value.dependencies.clone(),
            diagnostics: value.diagnostics.clone(),
            emitted: value
                .emitted
                .iter()
                .map(|f| EmittedHeader {
                    name: f.name.clone(),
                    len: f.content.len(),
                })
                .collect(),
        };
        let mut bytes = serde_json::to_vec(&header).map_err(io::Error::other)?;
        bytes.push(b'\n');
        bytes.extend_from_slice(&value.artifact.code);
        for file in &value.emitted {
            bytes.extend_from_slice(&file.content);
        }
        Ok(bytes)
    }

    fn decode(bytes: &[u8], last_validated_at: u64) -> io::Result<CacheEntry> {
        let corrupt = |what: &str| io::Error::new(io::ErrorKind::InvalidData, format!("corrupt cache entry: {what}"));

        let newline = bytes
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| corrupt("missing header"))?;
        let header: EntryHeader =
            serde_json::from_slice(&bytes[..newline]).map_err(|e| corrupt(&e.to_string()))?;

        let mut rest = &bytes[newline + 1..];
        let mut take = |len: usize| -> io::Result<Vec<u8>> {
            if rest.len() < len {
                return Err(corrupt("truncated body"));
            }
            let (head, tail) = rest.split_at(len);
            rest = tail;
            Ok(head.to_vec())
        };

        let code = take(header.code_len)?;
        let mut emitted = Vec::with_capacity(header.emitted.len());
        for file in header.emitted {
            emitted.push(EmittedFile {
                name: file.name,
                content: take(file.len)?,
            });
        }

        Ok(CacheEntry {
            key: header.key,
            value: CachedModule {
                artifact: Artifact {
                    kind: header.kind,
                    code,
                    map: header.map,
                },
                dependencies: header.dependencies,
                emitted,
                diagnostics: header.diagnostics,
            },
            last_validated_at,
        })
    }
}

fn mtime_ms(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

impl CacheStore for FsStore {
    fn load(&self, key: &str) -> io::Result<Option<CacheEntry>> {
        let path = self.entry_path(key);
        let bytes = match read_with_timeout(&path, self.timeout) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let entry = Self::decode(&bytes, mtime_ms(&path))?;
        if entry.key != key {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    fn store(&self, entry: &CacheEntry) -> io::Result<()> {
        atomic_write(&self.entry_path(&entry.key), &Self::encode(entry)?)
    }

    fn touch(&self, key: &str, at: u64) -> io::Result<()> {
        let file = std::fs::File::options()
            .write(true)
            .open(self.entry_path(key))?;
        file.set_modified(UNIX_EPOCH + Duration::from_millis(at))
    }

    fn fingerprint(&self) -> io::Result<Option<String>> {
        let bytes = match read_with_timeout(&self.manifest_path(), self.timeout) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let manifest: Manifest = serde_json::from_slice(&bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if manifest.schema_version != SCHEMA_VERSION {
            // Different layout: never matches.
            return Ok(Some(format!("schema-{}", manifest.schema_version)));
        }
        Ok(Some(manifest.fingerprint))
    }

    fn reset(&self, fingerprint: &str) -> io::Result<()> {
        swap_remove_dir(&self.entries_dir())?;
        let manifest = Manifest {
            schema_version: SCHEMA_VERSION,
            fingerprint: fingerprint.to_string(),
        };
        let json = serde_json::to_vec_pretty(&manifest).map_err(io::Error::other)?;
        atomic_write(&self.manifest_path(), &json)
    }

    fn len(&self) -> usize {
        let Ok(shards) = std::fs::read_dir(self.entries_dir()) else {
            return 0;
        };
        shards
            .filter_map(Result::ok)
            .filter_map(|shard| std::fs::read_dir(shard.path()).ok())
            .flat_map(|files| files.filter_map(Result::ok))
            .filter(|f| f.path().extension().is_some_and(|e| e == "bin"))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::IncrementalCache;
    use std::sync::Arc;

    fn entry(key: &str) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            value: CachedModule {
                artifact: Artifact {
                    kind: ArtifactKind::Script,
                    code: b"module.exports = \"/assets/logo.png\";\n".to_vec(),
                    map: Some("{\"version\":3}".to_string()),
                },
                dependencies: vec!["./x.css".to_string()],
                emitted: vec![
                    EmittedFile {
                        name: "assets/logo.png".to_string(),
                        content: vec![0x89, b'P', b'N', b'G', b'\n', 0],
                    },
                    EmittedFile {
                        name: "assets/empty.txt".to_string(),
                        content: Vec::new(),
                    },
                ],
                diagnostics: vec!["note".to_string()],
            },
            last_validated_at: 0,
        }
    }

    #[test]
    fn test_entries_survive_a_new_store_instance() {
        let dir = tempfile::tempdir().unwrap();
        let key = "ab".repeat(32);
        {
            let store = FsStore::new(dir.path(), Duration::from_secs(5));
            store.reset("fp").unwrap();
            store.store(&entry(&key)).unwrap();
        }
        let store = FsStore::new(dir.path(), Duration::from_secs(5));
        assert_eq!(store.fingerprint().unwrap().as_deref(), Some("fp"));
        assert_eq!(store.len(), 1);
        let loaded = store.load(&key).unwrap().unwrap();
        assert_eq!(loaded.value, entry(&key).value);
        assert!(loaded.last_validated_at > 0);
        assert!(store.load(&"cd".repeat(32)).unwrap().is_none());
    }

    #[test]
    fn test_touch_sets_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path(), Duration::from_secs(5));
        store.store(&entry("k1")).unwrap();
        store.touch("k1", 1_000_000).unwrap();
        assert_eq!(store.load("k1").unwrap().unwrap().last_validated_at, 1_000_000);
    }

    #[test]
    fn test_reset_removes_entries_and_rewrites_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path(), Duration::from_secs(5));
        store.reset("old").unwrap();
        store.store(&entry("k1")).unwrap();
        store.store(&entry("k2")).unwrap();
        assert_eq!(store.len(), 2);

        store.reset("new").unwrap();
        assert_eq!(store.len(), 0);
        assert_eq!(store.fingerprint().unwrap().as_deref(), Some("new"));
    }

    #[test]
    fn test_corrupt_entry_is_an_error_and_a_cache_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsStore::new(dir.path(), Duration::from_secs(5)));
        store.reset("fp").unwrap();
        let path = store.entry_path("k1");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{\"key\":\"k1\"}").unwrap();
        assert!(store.load("k1").is_err());

        let cache = IncrementalCache::new(store, "fp");
        assert!(cache.get("k1").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_incremental_cache_over_disk_invalidates_on_new_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let first = IncrementalCache::new(Arc::new(FsStore::new(dir.path(), Duration::from_secs(5))), "v1");
        first.put("k1", entry("k1").value);
        assert!(first.get("k1").is_some());

        let second = IncrementalCache::new(Arc::new(FsStore::new(dir.path(), Duration::from_secs(5))), "v2");
        assert!(second.get("k1").is_none());
        assert_eq!(second.stats().invalidations, 1);
    }
}
