//! Chunk splitting.
//!
//! Every module lands in exactly one chunk:
//!
//! 1. a cache-group chunk (vendor style), if a group's `test` matches and its
//!    `chunks` mode fits how the module is loaded;
//! 2. otherwise the chunk of the single root that reaches it, where roots are
//!    the entries plus the targets of `import()`;
//! 3. otherwise, if one entry reaches it and every async root reaching it is
//!    only loaded under that entry, that entry's chunk;
//! 4. otherwise a synthetic `shared~<a>~<b>` chunk named after its roots.
//!
//! The result only depends on the graph's structure and module names, never
//! on discovery order, so two runs give the same chunks in the same order.

use crate::graph::{ModuleGraph, ModuleId};
use crate::rules::PathPredicate;
use packline_util::hash::{fingerprint_parts, short_hash};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Which loads a cache group applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkingMode {
    #[default]
    All,
    #[serde(alias = "async")]
    AsyncOnly,
    #[serde(alias = "initial")]
    InitialOnly,
}

/// A named extraction rule (`splitChunks.cacheGroups.<key>`).
#[derive(Debug, Clone)]
pub struct CacheGroup {
    pub key: String,
    /// Chunk name the group's modules go to.
    pub name: String,
    /// `None` matches every module.
    pub test: Option<PathPredicate>,
    pub chunks: ChunkingMode,
    pub priority: i32,
}

impl CacheGroup {
    fn accepts(&self, path: &Path, initial: bool, async_only: bool) -> bool {
        let mode_fits = match self.chunks {
            ChunkingMode::All => true,
            ChunkingMode::InitialOnly => initial,
            ChunkingMode::AsyncOnly => async_only,
        };
        mode_fits && self.test.as_ref().map_or(true, |t| t.matches(path))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SplitPolicy {
    /// Highest priority first; ties by key.
    pub cache_groups: Vec<CacheGroup>,
    /// Name of a separate runtime chunk, if requested.
    pub runtime_chunk: Option<String>,
}

impl SplitPolicy {
    #[must_use]
    pub fn new(mut cache_groups: Vec<CacheGroup>, runtime_chunk: Option<String>) -> Self {
        cache_groups.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.key.cmp(&b.key)));
        Self {
            cache_groups,
            runtime_chunk,
        }
    }
}

/// Role of a chunk; also its load-order rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Runtime,
    Vendor,
    Shared,
    Async,
    Entry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Content-addressed id.
    pub id: String,
    pub name: String,
    pub kind: ChunkKind,
    /// Dependencies before dependents.
    pub modules: Vec<ModuleId>,
}

impl Chunk {
    #[must_use]
    pub fn is_runtime(&self) -> bool {
        self.kind == ChunkKind::Runtime
    }

    #[must_use]
    pub fn is_vendor(&self) -> bool {
        self.kind == ChunkKind::Vendor
    }
}

/// An entry and the chunks to load for it, in order (entry chunk last).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryChunks {
    pub name: String,
    pub roots: Vec<ModuleId>,
    pub chunk: usize,
    pub requires: Vec<usize>,
}

/// An `import()` target and the chunks to fetch before running it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncRoot {
    pub module: ModuleId,
    pub requires: Vec<usize>,
}

/// Output of [`split`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkSet {
    chunks: Vec<Chunk>,
    module_chunk: FxHashMap<ModuleId, usize>,
    entries: Vec<EntryChunks>,
    async_roots: Vec<AsyncRoot>,
}

impl ChunkSet {
    /// Chunks in load order: runtime, vendor, shared, async, entry; by name
    /// within a kind.
    #[must_use]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }

    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.name == name)
    }

    /// Index of the chunk holding `module`.
    #[must_use]
    pub fn chunk_index_of(&self, module: ModuleId) -> Option<usize> {
        self.module_chunk.get(&module).copied()
    }

    #[must_use]
    pub fn chunk_of(&self, module: ModuleId) -> Option<&Chunk> {
        self.chunk_index_of(module).map(|i| &self.chunks[i])
    }

    #[must_use]
    pub fn entries(&self) -> &[EntryChunks] {
        &self.entries
    }

    #[must_use]
    pub fn async_roots(&self) -> &[AsyncRoot] {
        &self.async_roots
    }

    #[must_use]
    pub fn runtime(&self) -> Option<usize> {
        self.chunks.iter().position(Chunk::is_runtime)
    }
}

/// Where a module is loaded from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Root {
    Entry(String),
    Async(String),
}

impl Root {
    fn name(&self) -> &str {
        match self {
            Self::Entry(name) | Self::Async(name) => name,
        }
    }
}

/// Partition `graph` into chunks according to `policy`.
#[must_use]
pub fn split(graph: &ModuleGraph, policy: &SplitPolicy) -> ChunkSet {
    // Roots: entries by name, then import() targets by module name.
    let mut roots: Vec<(Root, Vec<ModuleId>)> = graph
        .entries()
        .iter()
        .map(|e| (Root::Entry(e.name.clone()), e.modules.clone()))
        .collect();
    roots.sort_by(|a, b| a.0.cmp(&b.0));

    let entry_roots: FxHashSet<ModuleId> = graph
        .entries()
        .iter()
        .flat_map(|e| e.modules.iter().copied())
        .collect();
    let mut async_targets: Vec<ModuleId> = graph
        .modules()
        .iter()
        .flat_map(|m| m.dynamic_deps())
        .filter(|id| !entry_roots.contains(id))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    async_targets.sort_by(|&a, &b| graph.modules()[a].name.cmp(&graph.modules()[b].name));
    let async_names = async_chunk_names(graph, &async_targets, &roots);
    for (&module, name) in async_targets.iter().zip(async_names) {
        roots.push((Root::Async(name), vec![module]));
    }

    // Owners: which roots statically reach each module.
    let mut owners: BTreeMap<ModuleId, BTreeSet<usize>> = BTreeMap::new();
    for (index, (_, modules)) in roots.iter().enumerate() {
        for id in graph.reachable_from(modules, true) {
            owners.entry(id).or_default().insert(index);
        }
    }

    // Entries under which each async root can be loaded.
    let mut parents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); roots.len()];
    for (index, (root, modules)) in roots.iter().enumerate() {
        if matches!(root, Root::Async(_)) {
            continue;
        }
        let loaded: FxHashSet<ModuleId> = graph.reachable_from(modules, false).into_iter().collect();
        for (async_index, (other, other_modules)) in roots.iter().enumerate() {
            if matches!(other, Root::Async(_)) && loaded.contains(&other_modules[0]) {
                parents[async_index].insert(index);
            }
        }
    }

    // Assign each module a chunk name and kind.
    let mut members: BTreeMap<(ChunkKind, String), Vec<ModuleId>> = BTreeMap::new();
    for (root, _) in &roots {
        if let Root::Entry(name) = root {
            members.entry((ChunkKind::Entry, name.clone())).or_default();
        }
    }
    for (&module, owned_by) in &owners {
        let initial: Vec<usize> = owned_by
            .iter()
            .copied()
            .filter(|&i| matches!(roots[i].0, Root::Entry(_)))
            .collect();
        let path = &graph.modules()[module].path;
        let group = policy
            .cache_groups
            .iter()
            .find(|g| g.accepts(path, !initial.is_empty(), initial.is_empty()));

        let slot = if let Some(group) = group {
            (ChunkKind::Vendor, group.name.clone())
        } else if let (1, Some(&only)) = (owned_by.len(), owned_by.first()) {
            match &roots[only].0 {
                Root::Entry(name) => (ChunkKind::Entry, name.clone()),
                Root::Async(name) => (ChunkKind::Async, name.clone()),
            }
        } else if initial.len() == 1
            && owned_by
                .iter()
                .all(|o| initial.contains(o) || parents[*o].iter().all(|p| *p == initial[0]))
        {
            (ChunkKind::Entry, roots[initial[0]].0.name().to_string())
        } else {
            let considered: Vec<&str> = if initial.len() > 1 {
                initial.iter().map(|&i| roots[i].0.name()).collect()
            } else {
                owned_by.iter().map(|&i| roots[i].0.name()).collect()
            };
            (ChunkKind::Shared, format!("shared~{}", considered.join("~")))
        };
        members.entry(slot).or_default().push(module);
    }

    if let Some(runtime) = &policy.runtime_chunk {
        members.insert((ChunkKind::Runtime, runtime.clone()), Vec::new());
    }

    // Build chunks in (kind, name) order; drop empty non-entry chunks.
    let mut set = ChunkSet::default();
    let mut by_slot: FxHashMap<(ChunkKind, String), usize> = FxHashMap::default();
    for ((kind, name), modules) in members {
        if modules.is_empty() && !matches!(kind, ChunkKind::Entry | ChunkKind::Runtime) {
            continue;
        }
        let modules = order_within(graph, &modules);
        let id = chunk_id(graph, &name, &modules);
        let index = set.chunks.len();
        for &m in &modules {
            set.module_chunk.insert(m, index);
        }
        by_slot.insert((kind, name.clone()), index);
        set.chunks.push(Chunk {
            id,
            name,
            kind,
            modules,
        });
    }

    let runtime = set.runtime();
    for (root, modules) in &roots {
        let mut requires: BTreeSet<usize> = graph
            .reachable_from(modules, true)
            .into_iter()
            .filter_map(|m| set.module_chunk.get(&m).copied())
            .collect();
        match root {
            Root::Entry(name) => {
                let Some(&chunk) = by_slot.get(&(ChunkKind::Entry, name.clone())) else {
                    continue;
                };
                requires.extend(runtime);
                requires.insert(chunk);
                set.entries.push(EntryChunks {
                    name: name.clone(),
                    roots: modules.clone(),
                    chunk,
                    requires: requires.into_iter().collect(),
                });
            }
            Root::Async(_) => {
                // Entry chunks and the runtime are already on the page.
                requires.retain(|&i| !matches!(set.chunks[i].kind, ChunkKind::Entry | ChunkKind::Runtime));
                set.async_roots.push(AsyncRoot {
                    module: modules[0],
                    requires: requires.into_iter().collect(),
                });
            }
        }
    }
    set
}

/// `pages/Home.tsx` → `Home`; stems that collide with each other or with an
/// entry name fall back to the slugged module name.
fn async_chunk_names(
    graph: &ModuleGraph,
    targets: &[ModuleId],
    entries: &[(Root, Vec<ModuleId>)],
) -> Vec<String> {
    let stem = |id: ModuleId| {
        graph.modules()[id]
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("chunk")
            .to_string()
    };
    let mut counts: FxHashMap<String, usize> = FxHashMap::default();
    for &id in targets {
        *counts.entry(stem(id)).or_default() += 1;
    }
    for (root, _) in entries {
        *counts.entry(root.name().to_string()).or_default() += 1;
    }
    targets
        .iter()
        .map(|&id| {
            let s = stem(id);
            if counts.get(&s).copied().unwrap_or(0) > 1 {
                slug(&graph.modules()[id].name)
            } else {
                s
            }
        })
        .collect()
}

fn slug(name: &str) -> String {
    let base = name.rsplit_once('.').map_or(name, |(b, _)| b);
    base.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '-' })
        .collect()
}

/// Dependencies before dependents, restricted to `modules`, starting from
/// members in name order.
fn order_within(graph: &ModuleGraph, modules: &[ModuleId]) -> Vec<ModuleId> {
    let members: FxHashSet<ModuleId> = modules.iter().copied().collect();
    let mut starts = modules.to_vec();
    starts.sort_by(|&a, &b| graph.modules()[a].name.cmp(&graph.modules()[b].name));

    let mut done: FxHashSet<ModuleId> = FxHashSet::default();
    let mut order = Vec::with_capacity(modules.len());
    for start in starts {
        if done.contains(&start) {
            continue;
        }
        let mut active: FxHashSet<ModuleId> = FxHashSet::default();
        let mut stack = vec![(start, 0usize)];
        active.insert(start);
        while let Some(top) = stack.last_mut() {
            let id = top.0;
            let next = graph.modules()[id]
                .static_deps()
                .skip(top.1)
                .next();
            if let Some(dep) = next {
                top.1 += 1;
                if members.contains(&dep) && !done.contains(&dep) && active.insert(dep) {
                    stack.push((dep, 0));
                }
            } else {
                stack.pop();
                active.remove(&id);
                done.insert(id);
                order.push(id);
            }
        }
    }
    order
}

fn chunk_id(graph: &ModuleGraph, name: &str, modules: &[ModuleId]) -> String {
    let parts = std::iter::once(name).chain(modules.iter().map(|&m| graph.modules()[m].hash_id.as_str()));
    short_hash(fingerprint_parts(parts).as_bytes(), 8)
}
