//! Chunk rendering and output files.
//!
//! Every chunk becomes a self-registering script:
//!
//! ```text
//! (self.packlineChunks = self.packlineChunks || []).push([["<chunk id>"], {
//! "<module id>": [function (module, exports, require) {
//! ...transformed code...
//! }, {"./dep.js": "<dep id>"}],
//! }, ["<entry module id>"]]);
//! ```
//!
//! The runtime drains that queue, so chunks may load before it. Chunks that
//! contain a failed module, or a module that statically imports one, are not
//! emitted; the entries needing them are reported as failed. Two modules
//! writing different bytes to one output file both count as failed.

mod html;

pub use html::{render_html, HtmlOptions};

use crate::chunks::{Chunk, ChunkKind, ChunkSet};
use crate::codes;
use crate::error::BuildError;
use crate::graph::{ModuleGraph, ModuleId};
use crate::transform::sourcemap::{index_map, MapSection};
use crate::transform::{ArtifactKind, EmittedFile, MinifyTransform};
use packline_util::fs::atomic_write;
use packline_util::hash::short_hash;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use tracing::{debug, warn};

const RUNTIME: &str = include_str!("runtime.js");

#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    pub public_path: String,
    /// Content-hashed file names.
    pub production: bool,
    pub source_maps: bool,
    pub minimize: bool,
    pub html: HtmlOptions,
}

/// One rendered chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOutput {
    pub id: String,
    pub name: String,
    pub kind: ChunkKind,
    /// Output-relative file name.
    pub file: String,
    pub code: String,
    pub map: Option<EmittedFile>,
    /// CSS of stylesheet modules in this chunk.
    pub stylesheet: Option<EmittedFile>,
    /// Emitted module ids, in order.
    pub modules: Vec<String>,
}

/// Result of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryOutput {
    pub name: String,
    /// Script files in load order; empty when the entry failed.
    pub scripts: Vec<String>,
    pub styles: Vec<String>,
    pub errors: Vec<BuildError>,
}

impl EntryOutput {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Everything a build writes or serves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutput {
    pub chunks: Vec<ChunkOutput>,
    pub assets: Vec<EmittedFile>,
    pub html: Option<EmittedFile>,
    pub entries: Vec<EntryOutput>,
    /// Names of chunks withheld because of failed modules.
    pub failed_chunks: Vec<String>,
    /// Failures found while emitting, in module order.
    pub errors: Vec<BuildError>,
}

impl BuildOutput {
    /// Every output file as `(name, bytes)`.
    pub fn files(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.chunks
            .iter()
            .flat_map(|c| {
                std::iter::once((c.file.as_str(), c.code.as_bytes()))
                    .chain(c.map.iter().map(as_pair))
                    .chain(c.stylesheet.iter().map(as_pair))
            })
            .chain(self.assets.iter().map(as_pair))
            .chain(self.html.iter().map(as_pair))
    }

    /// Look up an output file by its output-relative name.
    #[must_use]
    pub fn file(&self, name: &str) -> Option<&[u8]> {
        self.files().find(|(n, _)| *n == name).map(|(_, bytes)| bytes)
    }

    #[must_use]
    pub fn chunk(&self, name: &str) -> Option<&ChunkOutput> {
        self.chunks.iter().find(|c| c.name == name)
    }

    /// Whether every entry built.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.entries.iter().all(EntryOutput::is_ok)
    }
}

fn as_pair(file: &EmittedFile) -> (&str, &[u8]) {
    (file.name.as_str(), file.content.as_slice())
}

/// Modules that failed, collide on an output file, or statically import one
/// of those.
fn poisoned_modules(
    graph: &ModuleGraph,
    conflicts: &FxHashMap<ModuleId, BuildError>,
) -> FxHashSet<ModuleId> {
    let mut poisoned: FxHashSet<ModuleId> = graph
        .failures()
        .map(|m| m.id)
        .chain(conflicts.keys().copied())
        .collect();
    let mut queue: Vec<ModuleId> = poisoned.iter().copied().collect();
    while let Some(id) = queue.pop() {
        for &dependent in graph.dependents(id) {
            let imports_statically = graph.modules()[dependent].static_deps().any(|d| d == id);
            if imports_statically && poisoned.insert(dependent) {
                queue.push(dependent);
            }
        }
    }
    poisoned
}

/// Modules whose output files land on a name already taken by different
/// bytes. Both sides of a collision are reported.
fn asset_conflicts(graph: &ModuleGraph, options: &EmitOptions) -> FxHashMap<ModuleId, BuildError> {
    let mut owners: BTreeMap<String, (ModuleId, &[u8])> = BTreeMap::new();
    let mut conflicts = FxHashMap::default();
    for module in graph.modules() {
        if module.is_failed() {
            continue;
        }
        let passthrough = module
            .artifact
            .as_ref()
            .filter(|a| matches!(a.kind, ArtifactKind::Asset | ArtifactKind::Source))
            .map(|a| {
                (
                    passthrough_name(&module.path, &a.code, options.production),
                    a.code.as_slice(),
                )
            });
        let emitted = module
            .emitted
            .iter()
            .map(|f| (f.name.clone(), f.content.as_slice()));
        for (name, content) in passthrough.into_iter().chain(emitted) {
            match owners.get(&name) {
                None => {
                    owners.insert(name, (module.id, content));
                }
                Some(&(owner, existing)) if owner != module.id && existing != content => {
                    let other = &graph.modules()[owner];
                    conflicts.entry(module.id).or_insert_with(|| BuildError::AssetConflict {
                        path: module.path.clone(),
                        other: other.path.clone(),
                        file: name.clone(),
                    });
                    conflicts.entry(owner).or_insert_with(|| BuildError::AssetConflict {
                        path: other.path.clone(),
                        other: module.path.clone(),
                        file: name,
                    });
                }
                Some(_) => {}
            }
        }
    }
    conflicts
}

/// Render `chunks` of `graph`.
#[must_use]
pub fn emit(graph: &ModuleGraph, chunks: &ChunkSet, options: &EmitOptions) -> BuildOutput {
    let conflicts = asset_conflicts(graph, options);
    let poisoned = poisoned_modules(graph, &conflicts);
    let failed: Vec<bool> = chunks
        .chunks()
        .iter()
        .map(|c| c.modules.iter().any(|m| poisoned.contains(m)))
        .collect();

    let mut assets: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let mut rendered: Vec<Option<ChunkOutput>> = vec![None; chunks.len()];

    // Split chunks first: the runtime needs their file names.
    for (index, chunk) in chunks.chunks().iter().enumerate() {
        if failed[index] || matches!(chunk.kind, ChunkKind::Entry | ChunkKind::Runtime) {
            continue;
        }
        rendered[index] = Some(render_chunk(graph, chunk, None, &[], options, &mut assets));
    }

    let runtime = runtime_source(graph, chunks, &rendered, options);
    for (index, chunk) in chunks.chunks().iter().enumerate() {
        if failed[index] {
            continue;
        }
        match chunk.kind {
            ChunkKind::Runtime => {
                rendered[index] = Some(render_chunk(graph, chunk, Some(&runtime), &[], options, &mut assets));
            }
            ChunkKind::Entry => {
                let start: Vec<&str> = chunks
                    .entries()
                    .iter()
                    .filter(|e| e.chunk == index)
                    .flat_map(|e| e.roots.iter().map(|&r| graph.modules()[r].hash_id.as_str()))
                    .collect();
                let prelude = chunks.runtime().is_none().then_some(runtime.as_str());
                rendered[index] = Some(render_chunk(graph, chunk, prelude, &start, options, &mut assets));
            }
            _ => {}
        }
    }

    let failed_chunks: Vec<String> = chunks
        .chunks()
        .iter()
        .zip(&failed)
        .filter(|(_, f)| **f)
        .map(|(c, _)| c.name.clone())
        .collect();
    for name in &failed_chunks {
        warn!(chunk = %name, code = codes::PACKLINE_CHUNK_SKIPPED, "chunk not emitted: contains a failed module");
    }

    let entries: Vec<EntryOutput> = chunks
        .entries()
        .iter()
        .map(|entry| {
            let broken: Vec<usize> = entry.requires.iter().copied().filter(|&i| failed[i]).collect();
            if broken.is_empty() {
                let files = |f: fn(&ChunkOutput) -> Option<String>| {
                    entry
                        .requires
                        .iter()
                        .filter_map(|&i| rendered[i].as_ref().and_then(f))
                        .collect::<Vec<_>>()
                };
                EntryOutput {
                    name: entry.name.clone(),
                    scripts: files(|c| Some(c.file.clone())),
                    styles: files(|c| c.stylesheet.as_ref().map(|s| s.name.clone())),
                    errors: Vec::new(),
                }
            } else {
                EntryOutput {
                    name: entry.name.clone(),
                    scripts: Vec::new(),
                    styles: Vec::new(),
                    errors: failure_causes(graph, chunks, &broken, &conflicts),
                }
            }
        })
        .collect();

    let html = html_file(&entries, chunks, &rendered, options);
    let mut errors: Vec<(ModuleId, BuildError)> = conflicts.into_iter().collect();
    errors.sort_by_key(|(id, _)| *id);
    for (_, error) in &errors {
        warn!(code = error.code(), "{error}");
    }
    let output = BuildOutput {
        chunks: rendered.into_iter().flatten().collect(),
        assets: assets
            .into_iter()
            .map(|(name, content)| EmittedFile { name, content })
            .collect(),
        html,
        entries,
        failed_chunks,
        errors: errors.into_iter().map(|(_, e)| e).collect(),
    };
    debug!(
        chunks = output.chunks.len(),
        assets = output.assets.len(),
        "rendered output"
    );
    output
}

/// Errors of failed modules reachable from the broken chunks.
fn failure_causes(
    graph: &ModuleGraph,
    chunks: &ChunkSet,
    broken: &[usize],
    conflicts: &FxHashMap<ModuleId, BuildError>,
) -> Vec<BuildError> {
    let members: Vec<ModuleId> = broken
        .iter()
        .flat_map(|&i| chunks.chunks()[i].modules.iter().copied())
        .collect();
    graph
        .reachable_from(&members, true)
        .into_iter()
        .filter_map(|id| {
            graph.modules()[id]
                .error
                .clone()
                .or_else(|| conflicts.get(&id).cloned())
        })
        .collect()
}

fn html_file(
    entries: &[EntryOutput],
    chunks: &ChunkSet,
    rendered: &[Option<ChunkOutput>],
    options: &EmitOptions,
) -> Option<EmittedFile> {
    if !entries.iter().any(EntryOutput::is_ok) {
        return None;
    }
    let wanted: FxHashSet<usize> = chunks
        .entries()
        .iter()
        .zip(entries)
        .filter(|(_, out)| out.is_ok())
        .flat_map(|(e, _)| e.requires.iter().copied())
        .collect();
    // Chunk order is load order.
    let mut scripts = Vec::new();
    let mut styles = Vec::new();
    for (index, chunk) in rendered.iter().enumerate() {
        let Some(chunk) = chunk else { continue };
        if !wanted.contains(&index) {
            continue;
        }
        scripts.push(format!("{}{}", options.public_path, chunk.file));
        if let Some(css) = &chunk.stylesheet {
            styles.push(format!("{}{}", options.public_path, css.name));
        }
    }
    Some(EmittedFile {
        name: options.html.filename.clone(),
        content: render_html(&options.html, &scripts, &styles).into_bytes(),
    })
}

/// The runtime with its public path and async chunk table filled in.
fn runtime_source(
    graph: &ModuleGraph,
    chunks: &ChunkSet,
    rendered: &[Option<ChunkOutput>],
    options: &EmitOptions,
) -> String {
    let mut table: BTreeMap<&str, Vec<[&str; 2]>> = BTreeMap::new();
    for root in chunks.async_roots() {
        let files: Option<Vec<[&str; 2]>> = root
            .requires
            .iter()
            .map(|&i| rendered[i].as_ref().map(|c| [c.id.as_str(), c.file.as_str()]))
            .collect();
        // A root whose chunks were withheld stays out of the table.
        if let Some(files) = files {
            table.insert(graph.modules()[root.module].hash_id.as_str(), files);
        }
    }
    RUNTIME
        .replace("__PACKLINE_PUBLIC_PATH__", &json_string(&options.public_path))
        .replace(
            "__PACKLINE_ASYNC_CHUNKS__",
            &serde_json::to_string(&table).unwrap_or_else(|_| "{}".to_string()),
        )
}

fn json_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// String builder that counts generated lines.
struct LineWriter {
    out: String,
    line: usize,
}

impl LineWriter {
    fn push(&mut self, s: &str) {
        self.line += s.bytes().filter(|&b| b == b'\n').count();
        self.out.push_str(s);
    }
}

/// Parts of one module definition.
struct ModuleParts {
    body: String,
    map: Option<String>,
    deps: String,
    css: Option<String>,
    asset: Option<EmittedFile>,
}

fn module_parts(graph: &ModuleGraph, id: ModuleId, options: &EmitOptions) -> ModuleParts {
    let module = &graph.modules()[id];
    let deps: BTreeMap<&str, &str> = module
        .dependencies
        .iter()
        .map(|d| (d.specifier.as_str(), graph.modules()[d.target].hash_id.as_str()))
        .collect();
    let deps = serde_json::to_string(&deps).unwrap_or_else(|_| "{}".to_string());

    let mut parts = ModuleParts {
        body: String::new(),
        map: None,
        deps,
        css: None,
        asset: None,
    };
    let Some(artifact) = &module.artifact else {
        return parts;
    };
    match artifact.kind {
        ArtifactKind::Script => {
            let code = artifact.code_lossy();
            if options.minimize {
                parts.body = MinifyTransform::minify(&code);
            } else {
                parts.body = code.into_owned();
                parts.map.clone_from(&artifact.map);
            }
        }
        ArtifactKind::Stylesheet => parts.css = Some(artifact.code_lossy().into_owned()),
        ArtifactKind::Asset | ArtifactKind::Source => {
            let name = passthrough_name(&module.path, &artifact.code, options.production);
            parts.body = format!(
                "module.exports = {};\n",
                json_string(&format!("{}{name}", options.public_path))
            );
            parts.asset = Some(EmittedFile {
                name,
                content: artifact.code.clone(),
            });
        }
    }
    if !parts.body.is_empty() && !parts.body.ends_with('\n') {
        parts.body.push('\n');
    }
    parts
}

/// `assets/logo.png` in development, `assets/logo.1a2b3c4d.png` in production.
#[must_use]
pub fn passthrough_name(path: &Path, content: &[u8], production: bool) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("asset");
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    if production {
        format!("assets/{stem}.{}{ext}", short_hash(content, 8))
    } else {
        format!("assets/{stem}{ext}")
    }
}

/// Standalone definition of one module, as pushed in hot updates:
/// `[function (module, exports, require) {...}, {deps}]`.
#[must_use]
pub fn module_definition(graph: &ModuleGraph, id: ModuleId, options: &EmitOptions) -> String {
    let parts = module_parts(graph, id, options);
    format!(
        "[function (module, exports, require) {{\n{}}}, {}]",
        parts.body, parts.deps
    )
}

fn render_chunk(
    graph: &ModuleGraph,
    chunk: &Chunk,
    prelude: Option<&str>,
    start: &[&str],
    options: &EmitOptions,
    assets: &mut BTreeMap<String, Vec<u8>>,
) -> ChunkOutput {
    let mut w = LineWriter {
        out: String::new(),
        line: 0,
    };
    let mut sections = Vec::new();
    let mut css = String::new();
    let mut ids = Vec::with_capacity(chunk.modules.len());

    if let Some(prelude) = prelude {
        w.push(prelude);
        if !prelude.ends_with('\n') {
            w.push("\n");
        }
    }
    w.push("(self.packlineChunks = self.packlineChunks || []).push([[");
    w.push(&json_string(&chunk.id));
    w.push("], {\n");
    for &id in &chunk.modules {
        let module = &graph.modules()[id];
        let parts = module_parts(graph, id, options);
        w.push(&json_string(&module.hash_id));
        w.push(": [function (module, exports, require) {\n");
        if let Some(map) = parts.map {
            sections.push(MapSection { line: w.line, map });
        }
        w.push(&parts.body);
        w.push("}, ");
        w.push(&parts.deps);
        w.push("],\n");
        if let Some(text) = parts.css {
            css.push_str(&text);
            if !text.ends_with('\n') {
                css.push('\n');
            }
        }
        if let Some(asset) = parts.asset {
            assets.insert(asset.name, asset.content);
        }
        for file in &module.emitted {
            assets.insert(file.name.clone(), file.content.clone());
        }
        ids.push(module.hash_id.clone());
    }
    w.push("}");
    if !start.is_empty() {
        w.push(", ");
        w.push(&serde_json::to_string(start).unwrap_or_else(|_| "[]".to_string()));
    }
    w.push("]);\n");

    let file = output_name(&chunk.name, "js", &w.out, options.production);
    let mut code = w.out;
    let map = (options.source_maps && !sections.is_empty()).then(|| {
        let name = format!("{file}.map");
        let base = name.rsplit('/').next().unwrap_or(&name).to_string();
        code.push_str(&format!("//# sourceMappingURL={base}\n"));
        EmittedFile {
            content: index_map(&file, &sections).into_bytes(),
            name,
        }
    });
    let stylesheet = (!css.is_empty()).then(|| EmittedFile {
        name: output_name(&chunk.name, "css", &css, options.production),
        content: css.into_bytes(),
    });

    ChunkOutput {
        id: chunk.id.clone(),
        name: chunk.name.clone(),
        kind: chunk.kind,
        file,
        code,
        map,
        stylesheet,
        modules: ids,
    }
}

/// `[name].js` or `[name].[contenthash8].js`.
fn output_name(name: &str, ext: &str, content: &str, production: bool) -> String {
    if production {
        format!("{name}.{}.{ext}", short_hash(content.as_bytes(), 8))
    } else {
        format!("{name}.{ext}")
    }
}

/// Write `output` under `dir`, removing `dir` first when `clean`.
///
/// # Errors
/// Any I/O failure while cleaning or writing.
pub fn write_output(output: &BuildOutput, dir: &Path, clean: bool) -> io::Result<usize> {
    if clean {
        match std::fs::remove_dir_all(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    let mut written = 0;
    for (name, bytes) in output.files() {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        atomic_write(&path, bytes)?;
        written += 1;
    }
    debug!(dir = %dir.display(), files = written, "wrote output");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::{split, CacheGroup, ChunkingMode, SplitPolicy};
    use crate::graph::test_support::graph;
    use crate::graph::ImportKind::{Dynamic, Static};
    use crate::rules::PathPredicate;
    use crate::transform::Artifact;
    use crate::transform::sourcemap::identity_map;

    fn set_code(g: &mut ModuleGraph, name: &str, code: &str) {
        let id = g.id_of(Path::new(&format!("/p/{name}"))).unwrap();
        let module = g.get_mut(id).unwrap();
        module.artifact = Some(Artifact {
            kind: ArtifactKind::Script,
            code: code.as_bytes().to_vec(),
            map: Some(identity_map(name, code)),
        });
    }

    fn fail(g: &mut ModuleGraph, name: &str) {
        let id = g.id_of(Path::new(&format!("/p/{name}"))).unwrap();
        let module = g.get_mut(id).unwrap();
        module.artifact = None;
        module.error = Some(BuildError::ModuleBuild {
            path: module.path.clone(),
            transform: "script".to_string(),
            message: "boom".to_string(),
        });
    }

    fn dev() -> EmitOptions {
        EmitOptions {
            public_path: "/".to_string(),
            source_maps: true,
            ..EmitOptions::default()
        }
    }

    #[test]
    fn test_entry_chunk_registers_and_starts() {
        let mut g = graph(&[("a.js", &[("b.js", Static)]), ("b.js", &[])], &[]);
        set_code(&mut g, "a.js", "require(\"./b.js\");");
        set_code(&mut g, "b.js", "exports.x = 1;");
        let set = split(&g, &SplitPolicy::default());
        let out = emit(&g, &set, &dev());

        let main = out.chunk("main").unwrap();
        assert_eq!(main.file, "main.js");
        assert!(main.code.starts_with("(function () {"));
        assert!(main.code.contains("\"b.js\": [function (module, exports, require) {\nexports.x = 1;\n}, {}],"));
        assert!(main.code.contains("}, {\"./b.js\":\"b.js\"}],"));
        assert!(main.code.contains("}, [\"a.js\"]]);\n"));
        assert!(main.code.ends_with("//# sourceMappingURL=main.js.map\n"));
        assert!(out.file("main.js.map").is_some());
        assert_eq!(out.entries[0].scripts, vec!["main.js"]);

        let html = String::from_utf8(out.html.unwrap().content).unwrap();
        assert!(html.contains("<script defer src=\"/main.js\"></script>"));
    }

    #[test]
    fn test_source_map_sections_point_at_module_bodies() {
        let mut g = graph(&[("a.js", &[("b.js", Static)]), ("b.js", &[])], &[]);
        set_code(&mut g, "a.js", "one\ntwo");
        set_code(&mut g, "b.js", "three");
        let set = split(&g, &SplitPolicy::default());
        let out = emit(&g, &set, &dev());
        let main = out.chunk("main").unwrap();
        let map: serde_json::Value =
            serde_json::from_slice(&main.map.as_ref().unwrap().content).unwrap();
        let lines: Vec<&str> = main.code.split('\n').collect();
        for (section, text) in map["sections"].as_array().unwrap().iter().zip(["three", "one"]) {
            let line = usize::try_from(section["offset"]["line"].as_u64().unwrap()).unwrap();
            assert_eq!(lines[line], text);
        }
    }

    #[test]
    fn test_runtime_chunk_and_content_hashes() {
        let mut g = graph(&[("a.js", &[("lib/x.js", Static)]), ("lib/x.js", &[])], &[]);
        set_code(&mut g, "a.js", "// note\nrequire(\"./lib/x.js\");");
        set_code(&mut g, "lib/x.js", "exports.x = 1;");
        let policy = SplitPolicy::new(
            vec![CacheGroup {
                key: "vendor".to_string(),
                name: "vendor".to_string(),
                test: Some(PathPredicate::dir("lib", Path::new("/p"))),
                chunks: ChunkingMode::All,
                priority: 0,
            }],
            Some("runtime".to_string()),
        );
        let set = split(&g, &policy);
        let options = EmitOptions {
            public_path: "./".to_string(),
            production: true,
            minimize: true,
            ..EmitOptions::default()
        };
        let out = emit(&g, &set, &options);
        let names: Vec<&str> = out.chunks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["runtime", "vendor", "main"]);
        for chunk in &out.chunks {
            let expected = format!("{}.{}.js", chunk.name, short_hash(chunk.code.as_bytes(), 8));
            assert_eq!(chunk.file, expected);
            assert!(chunk.map.is_none());
        }
        let main = out.chunk("main").unwrap();
        assert!(!main.code.contains("// note"));
        assert!(!main.code.contains("(function () {"));
        assert!(out.chunk("runtime").unwrap().code.contains("var publicPath = \"./\";"));
        assert_eq!(out.entries[0].scripts.len(), 3);
    }

    #[test]
    fn test_failed_module_withholds_only_affected_entries() {
        let mut g = graph(
            &[
                ("a.js", &[("broken.js", Static)]),
                ("b.js", &[("ok.js", Static)]),
                ("broken.js", &[]),
                ("ok.js", &[]),
            ],
            &[("a", &["a.js"]), ("b", &["b.js"])],
        );
        fail(&mut g, "broken.js");
        let set = split(&g, &SplitPolicy::default());
        let out = emit(&g, &set, &dev());

        assert_eq!(out.failed_chunks, vec!["a"]);
        assert!(out.chunk("a").is_none());
        assert!(out.chunk("b").is_some());
        let a = &out.entries[0];
        assert!(!a.is_ok());
        assert_eq!(a.errors.len(), 1);
        assert_eq!(a.errors[0].path(), Some(Path::new("/p/broken.js")));
        assert!(out.entries[1].is_ok());
        let html = String::from_utf8(out.html.unwrap().content).unwrap();
        assert!(html.contains("/b.js"));
        assert!(!html.contains("/a.js"));
    }

    #[test]
    fn test_async_table_and_passthrough_asset() {
        let mut g = graph(
            &[("main.js", &[("Lazy.js", Dynamic), ("logo.png", Static)]), ("Lazy.js", &[]), ("logo.png", &[])],
            &[],
        );
        set_code(&mut g, "Lazy.js", "exports.lazy = true;");
        let logo = g.id_of(Path::new("/p/logo.png")).unwrap();
        g.get_mut(logo).unwrap().artifact = Some(Artifact {
            kind: ArtifactKind::Asset,
            code: vec![0x89, b'P', b'N', b'G'],
            map: None,
        });
        let set = split(&g, &SplitPolicy::default());
        let out = emit(&g, &set, &dev());

        let main = out.chunk("main").unwrap();
        assert!(main.code.contains("var asyncChunks = {\"Lazy.js\":[["));
        assert!(main.code.contains("module.exports = \"/assets/logo.png\";"));
        assert_eq!(out.file("assets/logo.png"), Some(&[0x89, b'P', b'N', b'G'][..]));
        assert!(out.file("Lazy.js").is_some());
        // Async chunks are not in the HTML.
        let html = String::from_utf8(out.html.unwrap().content).unwrap();
        assert!(!html.contains("Lazy.js"));
    }

    #[test]
    fn test_write_output_cleans() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("dist");
        std::fs::create_dir_all(&out_dir).unwrap();
        std::fs::write(out_dir.join("stale.js"), "old").unwrap();

        let mut g = graph(&[("a.js", &[])], &[]);
        set_code(&mut g, "a.js", "1;");
        let set = split(&g, &SplitPolicy::default());
        let out = emit(&g, &set, &dev());
        let written = write_output(&out, &out_dir, true).unwrap();
        assert_eq!(written, out.files().count());
        assert!(!out_dir.join("stale.js").exists());
        assert!(out_dir.join("main.js").exists());
        assert!(out_dir.join("index.html").exists());
    }

    #[test]
    fn test_module_definition_for_hot_updates() {
        let mut g = graph(&[("a.js", &[("b.js", Static)]), ("b.js", &[])], &[]);
        set_code(&mut g, "a.js", "x");
        let def = module_definition(&g, 0, &dev());
        assert_eq!(def, "[function (module, exports, require) {\nx\n}, {\"./b.js\":\"b.js\"}]");
    }
}
