//! Wave-parallel graph construction.
//!
//! Each wave takes the newly discovered paths, runs the per-module work
//! (read, match, cache lookup or transform, scan, resolve) on the rayon pool,
//! then merges the results on the calling thread. Merging is the only place
//! the memo and the `seen` set change, so a dependency discovered by several
//! modules in the same wave is processed once.

use super::resolve::Resolver;
use super::scan::{scan_imports, ImportKind};
use super::{Dependency, Module, ModuleGraph, ModuleId};
use crate::cache::{cache_key, CachedModule, IncrementalCache};
use crate::cancel::CancelToken;
use crate::config::ModuleIds;
use crate::error::BuildError;
use crate::rules::RuleSet;
use crate::transform::{ArtifactKind, TransformPipeline};
use packline_util::fs::{read_with_timeout, slash_path};
use packline_util::hash::{blake3_bytes, short_hash};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// A dependency after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDep {
    pub specifier: String,
    pub kind: ImportKind,
    pub target: PathBuf,
}

/// Everything learned about one path in one pass.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    pub path: PathBuf,
    pub fingerprint: String,
    /// Transform output; `None` if reading or transforming failed.
    pub output: Option<CachedModule>,
    pub deps: Vec<ResolvedDep>,
    pub error: Option<BuildError>,
}

impl ModuleRecord {
    fn failed(path: &Path, fingerprint: String, error: BuildError) -> Self {
        Self {
            path: path.to_path_buf(),
            fingerprint,
            output: None,
            deps: Vec::new(),
            error: Some(error),
        }
    }

    /// Whether a change to `changed` could make this record's failure go
    /// away (the file it could not find now exists, or vice versa).
    fn retry_on(&self, changed: &FxHashSet<&Path>) -> bool {
        match &self.error {
            Some(BuildError::Resolution { tried, .. }) => tried.iter().any(|p| {
                changed.contains(p.as_path())
                    || p.parent().is_some_and(|parent| changed.contains(parent))
            }),
            _ => false,
        }
    }
}

/// Per-path results carried between builds.
///
/// A record is reused until it is invalidated, so unchanged modules are
/// neither read nor resolved again.
#[derive(Debug, Clone, Default)]
pub struct ModuleMemo {
    records: FxHashMap<PathBuf, Arc<ModuleRecord>>,
}

impl ModuleMemo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&Arc<ModuleRecord>> {
        self.records.get(path)
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.records.contains_key(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Drop the records for `paths`, plus failed records whose resolution
    /// might succeed now. Returns how many records were dropped.
    pub fn invalidate(&mut self, paths: &[PathBuf]) -> usize {
        let changed: FxHashSet<&Path> = paths.iter().map(PathBuf::as_path).collect();
        let before = self.records.len();
        self.records
            .retain(|path, record| !changed.contains(path.as_path()) && !record.retry_on(&changed));
        before - self.records.len()
    }

    fn insert(&mut self, record: ModuleRecord) {
        self.records.insert(record.path.clone(), Arc::new(record));
    }

    fn retain_paths(&mut self, keep: &FxHashSet<PathBuf>) {
        self.records.retain(|path, _| keep.contains(path));
    }
}

/// Result of one graph pass.
#[derive(Debug, Default)]
pub struct GraphPass {
    pub graph: ModuleGraph,
    /// Fresh transform outputs, to be written to the cache once the build is
    /// known not to be stale.
    pub pending_cache: Vec<(String, CachedModule)>,
    /// Paths processed (read and matched) in this pass.
    pub processed: usize,
}

/// Builds a [`ModuleGraph`] from entry paths.
#[derive(Debug)]
pub struct GraphBuilder<'a> {
    pub rules: &'a RuleSet,
    pub pipeline: &'a TransformPipeline,
    pub resolver: &'a Resolver,
    pub cache: &'a IncrementalCache,
    pub io_timeout: Duration,
    pub module_ids: ModuleIds,
}

impl GraphBuilder<'_> {
    /// Build the graph reachable from `entries`, reusing and updating `memo`.
    ///
    /// `memo` is only modified on success; a cancelled pass leaves it as it
    /// was.
    ///
    /// # Errors
    /// `BuildError::Cancelled` if `cancel` moved past `generation` between
    /// waves.
    pub fn build(
        &self,
        entries: &[(String, Vec<PathBuf>)],
        memo: &mut ModuleMemo,
        cancel: &CancelToken,
        generation: u64,
    ) -> Result<GraphPass, BuildError> {
        let settings_fp = self.pipeline.settings().fingerprint();
        let entries: Vec<(String, Vec<PathBuf>)> = entries
            .iter()
            .map(|(name, paths)| (name.clone(), paths.iter().map(|p| normalize(p)).collect()))
            .collect();

        let mut working = memo.clone();
        let mut pending_cache = Vec::new();
        let mut processed = 0usize;

        let mut seen: FxHashSet<PathBuf> = FxHashSet::default();
        let mut wave: Vec<PathBuf> = Vec::new();
        for path in entries.iter().flat_map(|(_, paths)| paths) {
            if seen.insert(path.clone()) {
                wave.push(path.clone());
            }
        }

        while !wave.is_empty() {
            if cancel.is_stale(generation) {
                tracing::debug!(generation, "graph build superseded");
                return Err(BuildError::Cancelled);
            }

            let todo: Vec<&PathBuf> = wave.iter().filter(|p| !working.contains(p)).collect();
            processed += todo.len();
            let results: Vec<(ModuleRecord, Option<(String, CachedModule)>)> = todo
                .par_iter()
                .map(|path| self.process(path, &settings_fp))
                .collect();

            for (record, pending) in results {
                if let Some(pending) = pending {
                    pending_cache.push(pending);
                }
                working.insert(record);
            }

            let mut next = Vec::new();
            for path in &wave {
                if let Some(record) = working.get(path) {
                    for dep in &record.deps {
                        if seen.insert(dep.target.clone()) {
                            next.push(dep.target.clone());
                        }
                    }
                }
            }
            wave = next;
        }

        if cancel.is_stale(generation) {
            return Err(BuildError::Cancelled);
        }

        working.retain_paths(&seen);
        let graph = self.assemble(&entries, &working);
        for cycle in graph.find_cycles() {
            let names: Vec<&str> = cycle
                .iter()
                .filter_map(|&id| graph.get(id).map(|m| m.name.as_str()))
                .collect();
            tracing::debug!(cycle = ?names, "dependency cycle");
        }

        *memo = working;
        Ok(GraphPass {
            graph,
            pending_cache,
            processed,
        })
    }

    /// Per-module work. Runs on the rayon pool; touches no shared mutable
    /// state except the cache's own synchronisation.
    fn process(&self, path: &Path, settings_fp: &str) -> (ModuleRecord, Option<(String, CachedModule)>) {
        let source = match read_with_timeout(path, self.io_timeout) {
            Ok(bytes) => bytes,
            Err(e) => {
                let err = BuildError::Read {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                };
                tracing::warn!(code = err.code(), "{err}");
                return (ModuleRecord::failed(path, String::new(), err), None);
            }
        };

        let fingerprint = blake3_bytes(&source);
        let matched = self.rules.match_path(path);
        let key = cache_key(&fingerprint, &matched.fingerprint(), settings_fp);

        let (output, pending) = if let Some(hit) = self.cache.get(&key) {
            tracing::debug!(path = %path.display(), "cache hit");
            (hit, None)
        } else {
            tracing::debug!(path = %path.display(), "cache miss");
            match self.pipeline.run(path, source, matched.rules()) {
                Ok(out) => {
                    let cached = CachedModule {
                        artifact: out.artifact,
                        dependencies: out.dependencies,
                        emitted: out.emitted,
                        diagnostics: out.diagnostics,
                    };
                    (cached.clone(), Some((key, cached)))
                }
                Err(err) => {
                    tracing::warn!(code = err.code(), "{err}");
                    return (ModuleRecord::failed(path, fingerprint, err), None);
                }
            }
        };

        let mut specifiers: Vec<(String, ImportKind)> = output
            .dependencies
            .iter()
            .map(|s| (s.clone(), ImportKind::Static))
            .collect();
        if output.artifact.kind == ArtifactKind::Script {
            for import in scan_imports(&output.artifact.code_lossy()) {
                if !specifiers.iter().any(|(s, _)| *s == import.specifier) {
                    specifiers.push((import.specifier, import.kind));
                }
            }
        }

        let mut deps = Vec::with_capacity(specifiers.len());
        let mut error = None;
        for (specifier, kind) in specifiers {
            match self.resolver.resolve(&specifier, path) {
                Ok(target) => deps.push(ResolvedDep {
                    specifier,
                    kind,
                    target,
                }),
                Err(err) => {
                    tracing::warn!(code = err.code(), "{err}");
                    error.get_or_insert(err);
                }
            }
        }

        let record = ModuleRecord {
            path: path.to_path_buf(),
            fingerprint,
            output: Some(output),
            deps,
            error,
        };
        (record, pending)
    }

    /// Turn memo records into an arena graph, breadth-first from the entries
    /// so ids follow a stable discovery order.
    fn assemble(&self, entries: &[(String, Vec<PathBuf>)], memo: &ModuleMemo) -> ModuleGraph {
        let root = &self.resolver.options().root;
        let mut graph = ModuleGraph::new();
        let mut queue: std::collections::VecDeque<PathBuf> = entries
            .iter()
            .flat_map(|(_, paths)| paths.iter().cloned())
            .collect();

        let mut order: Vec<PathBuf> = Vec::new();
        let mut placed: FxHashSet<PathBuf> = FxHashSet::default();
        while let Some(path) = queue.pop_front() {
            if !placed.insert(path.clone()) {
                continue;
            }
            if let Some(record) = memo.get(&path) {
                queue.extend(record.deps.iter().map(|d| d.target.clone()));
            }
            order.push(path);
        }

        for path in &order {
            let Some(record) = memo.get(path) else {
                continue;
            };
            let name = path
                .strip_prefix(root)
                .map_or_else(|_| slash_path(path), slash_path);
            let hash_id = match self.module_ids {
                ModuleIds::Deterministic => short_hash(name.as_bytes(), 8),
                ModuleIds::Natural => graph.len().to_string(),
            };
            let output = record.output.as_ref();
            graph.add_module(Module {
                id: 0,
                path: path.clone(),
                name,
                hash_id,
                fingerprint: record.fingerprint.clone(),
                artifact: output.map(|o| o.artifact.clone()),
                emitted: output.map(|o| o.emitted.clone()).unwrap_or_default(),
                dependencies: Vec::new(),
                is_entry: false,
                error: record.error.clone(),
            });
        }

        for path in &order {
            let (Some(record), Some(from)) = (memo.get(path), graph.id_of(path)) else {
                continue;
            };
            for dep in &record.deps {
                if let Some(target) = graph.id_of(&dep.target) {
                    graph.add_dependency(
                        from,
                        Dependency {
                            specifier: dep.specifier.clone(),
                            target,
                            kind: dep.kind,
                        },
                    );
                }
            }
        }

        for (name, paths) in entries {
            let ids: Vec<ModuleId> = paths.iter().filter_map(|p| graph.id_of(p)).collect();
            graph.add_entry(name.clone(), ids);
        }
        graph
    }
}

/// Canonical form of a possibly missing path: the file itself if it
/// exists, else its canonical parent joined with the file name.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = dunce::canonicalize(path) {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => dunce::canonicalize(parent)
            .map_or_else(|_| path.to_path_buf(), |p| p.join(name)),
        _ => path.to_path_buf(),
    }
}
