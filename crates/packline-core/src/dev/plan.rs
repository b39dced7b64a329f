//! Deciding what to push after a rebuild.

use super::message::ModuleUpdate;
use crate::compiler::BuildResult;
use crate::emit::{module_definition, EmitOptions};
use crate::graph::{ModuleGraph, ModuleId};
use rustc_hash::FxHashSet;
use std::path::PathBuf;

/// What clients need after a successful rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdatePlan {
    /// No module changed.
    Nothing,
    /// Dependencies before dependents.
    Update(Vec<ModuleUpdate>),
    FullReload(String),
}

/// Compare the last good build with a new one.
///
/// A full reload is needed when the entries changed, a module disappeared,
/// a surviving module changed id or chunk. Otherwise the changed and new
/// modules are sent in dependency order.
#[must_use]
pub fn plan_update(previous: &BuildResult, next: &BuildResult, options: &EmitOptions) -> UpdatePlan {
    let (old, new) = (&*previous.graph, &*next.graph);

    if entry_roots(old) != entry_roots(new) {
        return UpdatePlan::FullReload("entries changed".to_string());
    }

    let mut changed: FxHashSet<ModuleId> = FxHashSet::default();
    for module in old.modules() {
        let Some(id) = new.id_of(&module.path) else {
            return UpdatePlan::FullReload(format!("{} was removed", module.name));
        };
        let current = &new.modules()[id];
        if current.hash_id != module.hash_id {
            return UpdatePlan::FullReload(format!("{} changed id", module.name));
        }
        let old_chunk = previous.chunks.chunk_of(module.id).map(|c| c.name.as_str());
        let new_chunk = next.chunks.chunk_of(id).map(|c| c.name.as_str());
        if old_chunk != new_chunk {
            return UpdatePlan::FullReload(format!("{} moved to another chunk", module.name));
        }
        if current.artifact != module.artifact || dep_ids(new, id) != dep_ids(old, module.id) {
            changed.insert(id);
        }
    }
    for module in new.modules() {
        if old.id_of(&module.path).is_none() {
            changed.insert(module.id);
        }
    }

    if changed.is_empty() {
        return UpdatePlan::Nothing;
    }
    let updates = new
        .toposort()
        .into_iter()
        .filter(|id| changed.contains(id))
        .map(|id| {
            let module = &new.modules()[id];
            ModuleUpdate {
                module_id: module.hash_id.clone(),
                path: module.name.clone(),
                code: module_definition(new, id, options),
            }
        })
        .collect();
    UpdatePlan::Update(updates)
}

fn entry_roots(graph: &ModuleGraph) -> Vec<(String, Vec<PathBuf>)> {
    graph
        .entries()
        .iter()
        .map(|e| {
            let paths = e.modules.iter().map(|&id| graph.modules()[id].path.clone()).collect();
            (e.name.clone(), paths)
        })
        .collect()
}

fn dep_ids(graph: &ModuleGraph, id: ModuleId) -> Vec<(&str, &str)> {
    graph.modules()[id]
        .dependencies
        .iter()
        .map(|d| (d.specifier.as_str(), graph.modules()[d.target].hash_id.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::{split, SplitPolicy};
    use crate::compiler::BuildStats;
    use crate::emit::emit;
    use crate::graph::test_support::graph;
    use crate::graph::ImportKind::{self, Dynamic, Static};
    use crate::transform::{Artifact, ArtifactKind};
    use std::path::Path;
    use std::sync::Arc;

    type Rows<'a> = &'a [(&'a str, &'a [(&'a str, ImportKind)])];

    fn result(rows: Rows<'_>, code: &[(&str, &str)]) -> BuildResult {
        let mut g = graph(rows, &[]);
        for (name, text) in code {
            let id = g.id_of(Path::new(&format!("/p/{name}"))).unwrap();
            g.get_mut(id).unwrap().artifact = Some(Artifact {
                kind: ArtifactKind::Script,
                code: text.as_bytes().to_vec(),
                map: None,
            });
        }
        let chunks = split(&g, &SplitPolicy::default());
        let output = emit(&g, &chunks, &EmitOptions::default());
        BuildResult {
            graph: Arc::new(g),
            chunks: Arc::new(chunks),
            output: Arc::new(output),
            errors: Vec::new(),
            stats: BuildStats::default(),
        }
    }

    const ROWS: Rows<'static> = &[
        ("a.js", &[("b.js", Static)]),
        ("b.js", &[("c.js", Static)]),
        ("c.js", &[]),
    ];

    #[test]
    fn test_updates_in_dependency_order() {
        let before = result(ROWS, &[]);
        let after = result(ROWS, &[("a.js", "a2"), ("c.js", "c2")]);
        let UpdatePlan::Update(updates) = plan_update(&before, &after, &EmitOptions::default()) else {
            panic!("expected an update");
        };
        let paths: Vec<&str> = updates.iter().map(|u| u.path.as_str()).collect();
        assert_eq!(paths, vec!["c.js", "a.js"]);
        assert!(updates[0].code.contains("c2"));
    }

    #[test]
    fn test_no_change() {
        let before = result(ROWS, &[("a.js", "a")]);
        let after = result(ROWS, &[("a.js", "a")]);
        assert_eq!(plan_update(&before, &after, &EmitOptions::default()), UpdatePlan::Nothing);
    }

    #[test]
    fn test_removed_module_forces_reload() {
        let before = result(ROWS, &[]);
        let after = result(&[("a.js", &[("b.js", Static)]), ("b.js", &[])], &[]);
        assert!(matches!(
            plan_update(&before, &after, &EmitOptions::default()),
            UpdatePlan::FullReload(reason) if reason == "c.js was removed"
        ));
    }

    #[test]
    fn test_added_module_is_pushed_with_its_importer() {
        let before = result(&[("a.js", &[("b.js", Static)]), ("b.js", &[])], &[]);
        let after = result(
            &[("a.js", &[("b.js", Static)]), ("b.js", &[("new.js", Static)]), ("new.js", &[])],
            &[],
        );
        let UpdatePlan::Update(updates) = plan_update(&before, &after, &EmitOptions::default()) else {
            panic!("expected an update");
        };
        let paths: Vec<&str> = updates.iter().map(|u| u.path.as_str()).collect();
        assert_eq!(paths, vec!["new.js", "b.js"]);
    }

    #[test]
    fn test_chunk_move_forces_reload() {
        let before = result(&[("a.js", &[("b.js", Static)]), ("b.js", &[])], &[]);
        let after = result(&[("a.js", &[("b.js", Dynamic)]), ("b.js", &[])], &[]);
        assert!(matches!(
            plan_update(&before, &after, &EmitOptions::default()),
            UpdatePlan::FullReload(reason) if reason.contains("chunk")
        ));
    }
}
