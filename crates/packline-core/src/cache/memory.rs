use super::{CacheEntry, CacheStore};
use rustc_hash::FxHashMap;
use std::io;
use std::sync::RwLock;

/// Process-local store. Shared between compilers through an `Arc` to keep
/// entries across rebuilds.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<FxHashMap<String, CacheEntry>>,
    fingerprint: RwLock<Option<String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn load(&self, key: &str) -> io::Result<Option<CacheEntry>> {
        Ok(self.entries.read().unwrap().get(key).cloned())
    }

    fn store(&self, entry: &CacheEntry) -> io::Result<()> {
        self.entries
            .write()
            .unwrap()
            .insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    fn touch(&self, key: &str, at: u64) -> io::Result<()> {
        if let Some(entry) = self.entries.write().unwrap().get_mut(key) {
            entry.last_validated_at = at;
        }
        Ok(())
    }

    fn fingerprint(&self) -> io::Result<Option<String>> {
        Ok(self.fingerprint.read().unwrap().clone())
    }

    fn reset(&self, fingerprint: &str) -> io::Result<()> {
        // Hold both locks so no reader sees new fingerprint with old entries.
        let mut entries = self.entries.write().unwrap();
        let mut current = self.fingerprint.write().unwrap();
        entries.clear();
        *current = Some(fingerprint.to_string());
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }
}
