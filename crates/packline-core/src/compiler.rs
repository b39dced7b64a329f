//! The build facade: configuration in, rendered output out.
//!
//! A [`Compiler`] is long-lived in dev mode. It keeps the module memo, the
//! resolver cache and the incremental cache between builds, so a rebuild
//! only re-reads the changed files and re-resolves their dependents.

use crate::cache::{build_dependency_fingerprint, CacheStats, CacheStore, FsStore, IncrementalCache, MemoryStore};
use crate::cancel::CancelToken;
use crate::chunks::{split, ChunkSet, SplitPolicy};
use crate::config::{CacheType, Config};
use crate::emit::{emit, write_output, BuildOutput, EmitOptions, HtmlOptions};
use crate::error::{BuildError, ConfigError, Error};
use crate::graph::{normalize, GraphBuilder, ModuleGraph, ModuleMemo, Resolver};
use crate::rules::RuleSet;
use crate::transform::{TransformPipeline, TransformRegistry};
use packline_util::fs::read_with_timeout;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Counters for one build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStats {
    pub modules: usize,
    pub chunks: usize,
    /// Modules read and matched in this pass (the rest came from the memo).
    pub processed: usize,
    pub failed_modules: usize,
    pub duration_ms: u64,
    pub cache: CacheStats,
}

/// Result of a build or rebuild.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub graph: Arc<ModuleGraph>,
    pub chunks: Arc<ChunkSet>,
    pub output: Arc<BuildOutput>,
    /// Module-level failures, in module order.
    pub errors: Vec<BuildError>,
    pub stats: BuildStats,
}

impl BuildResult {
    /// Whether every entry was emitted.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.output.is_ok()
    }
}

/// Owns everything one project needs to build repeatedly.
#[derive(Debug)]
pub struct Compiler {
    config: Config,
    registry: Arc<TransformRegistry>,
    rules: RuleSet,
    policy: SplitPolicy,
    pipeline: TransformPipeline,
    resolver: Resolver,
    cache: IncrementalCache,
    memo: ModuleMemo,
    entries: Vec<(String, Vec<PathBuf>)>,
    emit_options: EmitOptions,
    last_graph: Option<Arc<ModuleGraph>>,
}

impl Compiler {
    /// Compiler with the built-in transforms and the configured cache store.
    ///
    /// # Errors
    /// Configuration errors, or a transform failing to initialise.
    pub fn new(config: Config) -> Result<Self, Error> {
        Self::with_registry(config, TransformRegistry::with_builtins())
    }

    /// Compiler with a custom transform registry.
    ///
    /// # Errors
    /// As [`Compiler::new`].
    pub fn with_registry(config: Config, registry: TransformRegistry) -> Result<Self, Error> {
        let store: Arc<dyn CacheStore> = match config.cache.kind {
            CacheType::Memory => Arc::new(MemoryStore::new()),
            CacheType::Filesystem => Arc::new(FsStore::new(config.cache_dir(), config.io_timeout())),
        };
        Self::with_store(config, registry, store)
    }

    /// Compiler backed by an explicit cache store.
    ///
    /// # Errors
    /// As [`Compiler::new`].
    pub fn with_store(
        config: Config,
        registry: TransformRegistry,
        store: Arc<dyn CacheStore>,
    ) -> Result<Self, Error> {
        let rules = config.rule_set(&registry)?;
        let policy = config.split_policy()?;
        let entries = config.entries()?;
        let registry = Arc::new(registry);
        registry.init()?;

        let fingerprint =
            build_dependency_fingerprint(&config.canonical_json(), &config.build_dependencies());
        let cache = IncrementalCache::new(store, fingerprint);
        let pipeline = TransformPipeline::new(Arc::clone(&registry), config.pipeline_settings());
        let resolver = Resolver::new(config.resolver_options());
        let emit_options = EmitOptions {
            public_path: config.output.public_path.clone(),
            production: config.is_production(),
            source_maps: config.source_maps(),
            minimize: config.minimize(),
            html: HtmlOptions {
                template: None,
                filename: config.html.filename.clone(),
                title: config.html.title.clone(),
                hot_client: None,
            },
        };

        debug!(
            rules = rules.len(),
            entries = entries.len(),
            cache_groups = policy.cache_groups.len(),
            "compiler ready"
        );
        Ok(Self {
            config,
            registry,
            rules,
            policy,
            pipeline,
            resolver,
            cache,
            memo: ModuleMemo::new(),
            entries,
            emit_options,
            last_graph: None,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    #[must_use]
    pub fn cache(&self) -> &IncrementalCache {
        &self.cache
    }

    #[must_use]
    pub fn emit_options(&self) -> &EmitOptions {
        &self.emit_options
    }

    /// Inject the hot client script into the generated HTML.
    pub fn set_hot_client(&mut self, url: Option<String>) {
        self.emit_options.html.hot_client = url;
    }

    /// Build everything reachable from the entries.
    ///
    /// # Errors
    /// Only whole-build failures (the HTML template cannot be read); module
    /// failures are reported in [`BuildResult::errors`].
    pub fn build(&mut self) -> Result<BuildResult, Error> {
        let token = CancelToken::new();
        let generation = token.current();
        self.run(&token, generation)
    }

    /// Rebuild after `changed` paths were modified, created or removed.
    ///
    /// Changed modules and everything importing them are re-processed;
    /// unchanged sources come back from the incremental cache.
    ///
    /// # Errors
    /// `BuildError::Cancelled` if `cancel` moved past `generation`; the
    /// memo and the cache are left as they were.
    pub fn rebuild(
        &mut self,
        changed: &[PathBuf],
        cancel: &CancelToken,
        generation: u64,
    ) -> Result<BuildResult, Error> {
        let changed: Vec<PathBuf> = changed.iter().map(|p| normalize(p)).collect();
        let mut stale = changed.clone();
        if let Some(graph) = &self.last_graph {
            let ids: Vec<usize> = changed.iter().filter_map(|p| graph.id_of(p)).collect();
            stale.extend(
                graph
                    .affected_by(&ids)
                    .into_iter()
                    .map(|id| graph.modules()[id].path.clone()),
            );
        }
        self.resolver.clear_cache();

        let snapshot = self.memo.clone();
        let dropped = self.memo.invalidate(&stale);
        debug!(changed = changed.len(), dropped, "invalidated modules");
        let result = self.run(cancel, generation);
        if result.is_err() {
            self.memo = snapshot;
        }
        result
    }

    fn run(&mut self, cancel: &CancelToken, generation: u64) -> Result<BuildResult, Error> {
        let started = Instant::now();
        info!(entries = self.entries.len(), known_modules = self.memo.len(), "build started");
        self.emit_options.html.template = self.read_template()?;

        let builder = GraphBuilder {
            rules: &self.rules,
            pipeline: &self.pipeline,
            resolver: &self.resolver,
            cache: &self.cache,
            io_timeout: self.config.io_timeout(),
            module_ids: self.config.optimization.module_ids,
        };
        let pass = builder.build(&self.entries, &mut self.memo, cancel, generation)?;
        if cancel.is_stale(generation) {
            return Err(BuildError::Cancelled.into());
        }
        for (key, value) in pass.pending_cache {
            self.cache.put(&key, value);
        }

        let graph = pass.graph;
        let chunks = split(&graph, &self.policy);
        let output = emit(&graph, &chunks, &self.emit_options);
        let mut errors: Vec<BuildError> = graph.failures().filter_map(|m| m.error.clone()).collect();
        for error in &errors {
            warn!(code = error.code(), "{error}");
        }
        errors.extend(output.errors.iter().cloned());

        let stats = BuildStats {
            modules: graph.len(),
            chunks: output.chunks.len(),
            processed: pass.processed,
            failed_modules: errors.len(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            cache: self.cache.stats(),
        };
        info!(
            modules = stats.modules,
            chunks = stats.chunks,
            processed = stats.processed,
            errors = stats.failed_modules,
            duration_ms = stats.duration_ms,
            "build finished"
        );

        let graph = Arc::new(graph);
        self.last_graph = Some(Arc::clone(&graph));
        Ok(BuildResult {
            graph,
            chunks: Arc::new(chunks),
            output: Arc::new(output),
            errors,
            stats,
        })
    }

    fn read_template(&self) -> Result<Option<String>, Error> {
        let Some(path) = self.config.html_template() else {
            return Ok(None);
        };
        let bytes = read_with_timeout(&path, self.config.io_timeout())
            .map_err(|source| ConfigError::Read { path, source })?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Write `output` to the configured output directory.
    ///
    /// # Errors
    /// I/O failures while cleaning or writing.
    pub fn write(&self, output: &BuildOutput) -> Result<usize, Error> {
        let dir = self.config.output_dir();
        Ok(write_output(output, &dir, self.config.output.clean)?)
    }

    /// Whether `path` is under the output or cache directory.
    #[must_use]
    pub fn is_generated_path(&self, path: &Path) -> bool {
        path.starts_with(self.config.output_dir()) || path.starts_with(self.config.cache_dir())
    }
}

impl Drop for Compiler {
    fn drop(&mut self) {
        self.registry.teardown();
    }
}
