use super::builtin::{
    AssetTransform, BannerTransform, CssTransform, JsonTransform, MinifyTransform,
    ReplaceTransform, ScriptTransform, SourceMapTransform, StyleTransform,
};
use super::Transform;
use crate::error::Error;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Named transforms available to rules.
///
/// The registry is owned by the compiler: `init` runs once before the first
/// build and `teardown` once when the compiler is dropped.
#[derive(Debug, Default)]
pub struct TransformRegistry {
    transforms: FxHashMap<String, Arc<dyn Transform>>,
    initialized: AtomicBool,
}

impl TransformRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with every built-in transform.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(ScriptTransform);
        registry.register(SourceMapTransform);
        registry.register(ReplaceTransform);
        registry.register(BannerTransform);
        registry.register(JsonTransform);
        registry.register(CssTransform);
        registry.register(StyleTransform);
        registry.register(AssetTransform);
        registry.register(MinifyTransform);
        registry
    }

    /// Register a transform under its own name, replacing any previous one.
    pub fn register<T: Transform + 'static>(&mut self, transform: T) -> &mut Self {
        let transform: Arc<dyn Transform> = Arc::new(transform);
        self.transforms
            .insert(transform.name().to_string(), transform);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Transform>> {
        self.transforms.get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.transforms.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn sorted(&self) -> Vec<&Arc<dyn Transform>> {
        let mut all: Vec<_> = self.transforms.values().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// Initialise every transform, in name order. Idempotent.
    ///
    /// # Errors
    /// Returns the first transform's init failure.
    pub fn init(&self) -> Result<(), Error> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        for transform in self.sorted() {
            if let Err(e) = transform.init() {
                self.initialized.store(false, Ordering::Release);
                return Err(Error::other(format!(
                    "transform '{}' failed to initialise: {e}",
                    transform.name()
                )));
            }
            tracing::trace!(transform = transform.name(), "initialised");
        }
        Ok(())
    }

    /// Tear every transform down. Does nothing unless `init` succeeded.
    pub fn teardown(&self) {
        if !self.initialized.swap(false, Ordering::AcqRel) {
            return;
        }
        for transform in self.sorted() {
            transform.teardown();
        }
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransformError;
    use crate::transform::{Artifact, TransformContext};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        inits: Arc<AtomicUsize>,
        teardowns: Arc<AtomicUsize>,
    }

    impl Transform for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn init(&self) -> Result<(), TransformError> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn teardown(&self) {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
        }

        fn apply(
            &self,
            input: Artifact,
            _options: &serde_json::Value,
            _ctx: &mut TransformContext<'_>,
        ) -> Result<Artifact, TransformError> {
            Ok(input)
        }
    }

    #[test]
    fn test_builtins_registered() {
        let registry = TransformRegistry::with_builtins();
        assert_eq!(
            registry.names(),
            vec![
                "asset",
                "banner",
                "css",
                "json",
                "minify",
                "replace",
                "script",
                "source-map",
                "style"
            ]
        );
        assert!(registry.get("css").is_some());
        assert!(!registry.contains("sass"));
    }

    #[test]
    fn test_lifecycle_runs_once() {
        let inits = Arc::new(AtomicUsize::new(0));
        let teardowns = Arc::new(AtomicUsize::new(0));
        let mut registry = TransformRegistry::new();
        registry.register(Counting {
            inits: Arc::clone(&inits),
            teardowns: Arc::clone(&teardowns),
        });

        registry.teardown();
        assert_eq!(teardowns.load(Ordering::SeqCst), 0);

        registry.init().unwrap();
        registry.init().unwrap();
        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert!(registry.is_initialized());

        registry.teardown();
        registry.teardown();
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }
}
