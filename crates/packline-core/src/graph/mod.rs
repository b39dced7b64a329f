//! Module dependency graph.
//!
//! Modules live in an arena indexed by [`ModuleId`]; edges are ids, so cycles
//! need no special ownership handling. Reverse edges are kept alongside for
//! invalidation and hot-update planning.

mod builder;
mod resolve;
mod scan;

pub use builder::{normalize, GraphBuilder, ModuleMemo, ModuleRecord, ResolvedDep};
pub use resolve::{Resolver, ResolverOptions};
pub use scan::{scan_imports, ImportKind, ImportRef};

use crate::error::BuildError;
use crate::transform::{Artifact, ArtifactKind, EmittedFile};
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::{Path, PathBuf};

/// Index of a module in its graph.
pub type ModuleId = usize;

/// An edge from an importer to a resolved module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Specifier as written by the importer.
    pub specifier: String,
    pub target: ModuleId,
    pub kind: ImportKind,
}

/// One source file and what was built from it.
#[derive(Debug, Clone)]
pub struct Module {
    pub id: ModuleId,
    pub path: PathBuf,
    /// Root-relative path with `/` separators.
    pub name: String,
    /// Id used in emitted code (`moduleIds`).
    pub hash_id: String,
    /// Content hash of the source.
    pub fingerprint: String,
    /// `None` when the module failed to build.
    pub artifact: Option<Artifact>,
    pub emitted: Vec<EmittedFile>,
    pub dependencies: Vec<Dependency>,
    pub is_entry: bool,
    /// First error that made this module fail.
    pub error: Option<BuildError>,
}

impl Module {
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    #[must_use]
    pub fn kind(&self) -> Option<ArtifactKind> {
        self.artifact.as_ref().map(|a| a.kind)
    }

    /// Targets of static (and `require`) edges, in declaration order.
    pub fn static_deps(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.dependencies
            .iter()
            .filter(|d| d.kind.is_static())
            .map(|d| d.target)
    }

    /// Targets of `import()` edges.
    pub fn dynamic_deps(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.dependencies
            .iter()
            .filter(|d| !d.kind.is_static())
            .map(|d| d.target)
    }
}

/// A named entry and its root modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub name: String,
    pub modules: Vec<ModuleId>,
}

/// All modules of one build.
#[derive(Debug, Default, Clone)]
pub struct ModuleGraph {
    modules: Vec<Module>,
    by_path: FxHashMap<PathBuf, ModuleId>,
    dependents: Vec<Vec<ModuleId>>,
    entries: Vec<EntryPoint>,
}

impl ModuleGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a module; its `id` is assigned here. A path already present
    /// returns the existing id and drops `module`.
    pub fn add_module(&mut self, mut module: Module) -> ModuleId {
        if let Some(&id) = self.by_path.get(&module.path) {
            return id;
        }
        let id = self.modules.len();
        module.id = id;
        self.by_path.insert(module.path.clone(), id);
        self.modules.push(module);
        self.dependents.push(Vec::new());
        id
    }

    /// Add an edge `from → dependency.target`.
    pub fn add_dependency(&mut self, from: ModuleId, dependency: Dependency) {
        let target = dependency.target;
        self.modules[from].dependencies.push(dependency);
        if !self.dependents[target].contains(&from) {
            self.dependents[target].push(from);
        }
    }

    pub fn add_entry(&mut self, name: impl Into<String>, modules: Vec<ModuleId>) {
        for &id in &modules {
            self.modules[id].is_entry = true;
        }
        self.entries.push(EntryPoint {
            name: name.into(),
            modules,
        });
    }

    #[must_use]
    pub fn get(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(id)
    }

    pub fn get_mut(&mut self, id: ModuleId) -> Option<&mut Module> {
        self.modules.get_mut(id)
    }

    #[must_use]
    pub fn id_of(&self, path: &Path) -> Option<ModuleId> {
        self.by_path.get(path).copied()
    }

    #[must_use]
    pub fn by_path(&self, path: &Path) -> Option<&Module> {
        self.id_of(path).map(|id| &self.modules[id])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    #[must_use]
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    #[must_use]
    pub fn entries(&self) -> &[EntryPoint] {
        &self.entries
    }

    /// Modules importing `id`.
    #[must_use]
    pub fn dependents(&self, id: ModuleId) -> &[ModuleId] {
        &self.dependents[id]
    }

    /// Modules whose build failed.
    pub fn failures(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter().filter(|m| m.is_failed())
    }

    /// Dependencies before dependents, starting from the entries in order.
    /// Cycles are broken at the back edge.
    #[must_use]
    pub fn toposort(&self) -> Vec<ModuleId> {
        let n = self.modules.len();
        let mut done = vec![false; n];
        let mut order = Vec::with_capacity(n);
        let roots = self
            .entries
            .iter()
            .flat_map(|e| e.modules.iter().copied())
            .chain(0..n);

        for root in roots {
            if done[root] {
                continue;
            }
            let mut on_stack = FxHashSet::default();
            let mut stack: Vec<(ModuleId, usize)> = vec![(root, 0)];
            on_stack.insert(root);
            while let Some(top) = stack.last_mut() {
                let id = top.0;
                if let Some(dep) = self.modules[id].dependencies.get(top.1) {
                    top.1 += 1;
                    let target = dep.target;
                    if !done[target] && on_stack.insert(target) {
                        stack.push((target, 0));
                    }
                } else {
                    stack.pop();
                    on_stack.remove(&id);
                    done[id] = true;
                    order.push(id);
                }
            }
        }
        order
    }

    /// Every elementary cycle found by a visiting-set walk, each listed from
    /// the first module reached.
    #[must_use]
    pub fn find_cycles(&self) -> Vec<Vec<ModuleId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Visiting,
            Done,
        }

        let n = self.modules.len();
        let mut marks = vec![Mark::New; n];
        let mut cycles = Vec::new();

        for root in 0..n {
            if marks[root] != Mark::New {
                continue;
            }
            let mut path: Vec<ModuleId> = vec![root];
            let mut cursor: Vec<usize> = vec![0];
            marks[root] = Mark::Visiting;
            while let Some(&id) = path.last() {
                let depth = path.len() - 1;
                let next = cursor[depth];
                if let Some(dep) = self.modules[id].dependencies.get(next) {
                    cursor[depth] += 1;
                    match marks[dep.target] {
                        Mark::New => {
                            marks[dep.target] = Mark::Visiting;
                            path.push(dep.target);
                            cursor.push(0);
                        }
                        Mark::Visiting => {
                            if let Some(start) = path.iter().position(|&m| m == dep.target) {
                                cycles.push(path[start..].to_vec());
                            }
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[id] = Mark::Done;
                    path.pop();
                    cursor.pop();
                }
            }
        }
        cycles
    }

    /// `ids` plus every module that transitively imports one of them, sorted.
    #[must_use]
    pub fn affected_by(&self, ids: &[ModuleId]) -> Vec<ModuleId> {
        let mut seen: FxHashSet<ModuleId> = ids.iter().copied().collect();
        let mut queue: Vec<ModuleId> = ids.to_vec();
        while let Some(id) = queue.pop() {
            for &dependent in &self.dependents[id] {
                if seen.insert(dependent) {
                    queue.push(dependent);
                }
            }
        }
        let mut out: Vec<ModuleId> = seen.into_iter().collect();
        out.sort_unstable();
        out
    }

    /// Modules reachable from `roots`, following static edges only if
    /// `static_only`. Sorted by id.
    #[must_use]
    pub fn reachable_from(&self, roots: &[ModuleId], static_only: bool) -> Vec<ModuleId> {
        let mut seen: FxHashSet<ModuleId> = roots.iter().copied().collect();
        let mut queue: Vec<ModuleId> = roots.to_vec();
        while let Some(id) = queue.pop() {
            for dep in &self.modules[id].dependencies {
                if static_only && !dep.kind.is_static() {
                    continue;
                }
                if seen.insert(dep.target) {
                    queue.push(dep.target);
                }
            }
        }
        let mut out: Vec<ModuleId> = seen.into_iter().collect();
        out.sort_unstable();
        out
    }
}
