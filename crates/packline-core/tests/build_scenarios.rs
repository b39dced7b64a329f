//! End-to-end builds over real project directories.

use packline_core::{ChunkKind, Compiler, Config};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn project(files: &[(&str, &str)]) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = dunce::canonicalize(dir.path()).unwrap();
    for (name, content) in files {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    (dir, root)
}

fn compiler(root: &Path, config: &str) -> Compiler {
    Compiler::new(Config::from_json_str(config, root).unwrap()).unwrap()
}

#[test]
fn test_vendor_code_is_split_out() {
    let (_dir, root) = project(&[
        ("src/a.js", "import './b.js';\n"),
        ("src/b.js", "import '../shared_lib/x.js';\n"),
        ("shared_lib/x.js", "export const x = 1;\n"),
    ]);
    let mut compiler = compiler(
        &root,
        r#"{
            "entry": {"a": "./src/a.js"},
            "rules": [{"test": "\\.js$", "use": ["script"]}],
            "optimization": {
                "splitChunks": {"cacheGroups": {"vendor": {"test": {"dir": "shared_lib"}, "name": "vendor"}}}
            }
        }"#,
    );
    let result = compiler.build().unwrap();
    assert!(result.is_ok(), "{:?}", result.errors);

    let chunks = result.chunks.chunks();
    assert_eq!(chunks.len(), 2);

    let names = |chunk: &packline_core::Chunk| -> Vec<String> {
        chunk
            .modules
            .iter()
            .map(|&id| result.graph.modules()[id].name.clone())
            .collect()
    };
    let entry = result.chunks.by_name("a").unwrap();
    assert_eq!(entry.kind, ChunkKind::Entry);
    let mut entry_modules = names(entry);
    entry_modules.sort();
    assert_eq!(entry_modules, vec!["src/a.js", "src/b.js"]);

    let vendor = result.chunks.by_name("vendor").unwrap();
    assert!(vendor.is_vendor());
    assert_eq!(names(vendor), vec!["shared_lib/x.js"]);

    // The entry page loads the vendor chunk before the entry chunk.
    let scripts = &result.output.entries[0].scripts;
    assert_eq!(scripts, &vec!["vendor.js".to_string(), "a.js".to_string()]);
}

#[test]
fn test_unmatched_file_becomes_passthrough_asset() {
    let (_dir, root) = project(&[
        ("src/index.js", "import logo from './logo.png';\n"),
        ("src/logo.png", "\u{89}PNG-not-really"),
    ]);
    let mut compiler = compiler(
        &root,
        r#"{
            "entry": "./src/index.js",
            "rules": [
                {"test": "\\.js$", "use": ["script"]},
                {"test": "\\.css$", "use": ["css"]}
            ]
        }"#,
    );
    let result = compiler.build().unwrap();
    assert!(result.is_ok(), "{:?}", result.errors);
    assert!(result.errors.is_empty());
    assert_eq!(
        result.output.file("assets/logo.png"),
        Some("\u{89}PNG-not-really".as_bytes())
    );
    let main = result.output.chunk("main").unwrap();
    assert!(main.code.contains(r#"module.exports = "/assets/logo.png""#));
}

#[test]
fn test_same_named_assets_with_different_content_fail() {
    let (_dir, root) = project(&[
        ("src/index.js", "import './a/logo.png';\nimport './b/logo.png';\n"),
        ("src/a/logo.png", "AAAA"),
        ("src/b/logo.png", "BBBB"),
    ]);
    let mut compiler = compiler(
        &root,
        r#"{"entry": "./src/index.js", "rules": [{"test": "\\.js$", "use": ["script"]}]}"#,
    );
    let result = compiler.build().unwrap();
    assert!(!result.is_ok());

    let conflicts: Vec<_> = result
        .errors
        .iter()
        .filter(|e| e.code() == packline_core::codes::PACKLINE_ASSET_CONFLICT)
        .collect();
    assert_eq!(conflicts.len(), 2, "{:?}", result.errors);
    assert!(conflicts[0].to_string().contains("assets/logo.png"));
    assert!(result.output.file("assets/logo.png").is_none());
    assert!(!result.output.entries[0].is_ok());
}

#[test]
fn test_same_named_assets_with_equal_content_share_a_file() {
    let (_dir, root) = project(&[
        ("src/index.js", "import './a/logo.png';\nimport './b/logo.png';\n"),
        ("src/a/logo.png", "SAME"),
        ("src/b/logo.png", "SAME"),
    ]);
    let mut compiler = compiler(
        &root,
        r#"{"entry": "./src/index.js", "rules": [{"test": "\\.js$", "use": ["script"]}]}"#,
    );
    let result = compiler.build().unwrap();
    assert!(result.is_ok(), "{:?}", result.errors);
    assert_eq!(result.output.file("assets/logo.png"), Some("SAME".as_bytes()));
}

#[test]
fn test_config_change_invalidates_whole_cache() {
    let (_dir, root) = project(&[
        ("src/index.js", "import './a.js';\n"),
        ("src/a.js", "export default 1;\n"),
    ]);
    let base = r#"{
        "entry": "./src/index.js",
        "cache": {"type": "filesystem"},
        "rules": [{"test": "\\.js$", "use": ["script"]}]
    }"#;
    let changed = r#"{
        "entry": "./src/index.js",
        "cache": {"type": "filesystem"},
        "rules": [
            {"test": "\\.js$", "use": ["script"]},
            {"test": "\\.css$", "use": ["css"]}
        ]
    }"#;

    let first = compiler(&root, base).build().unwrap();
    assert_eq!(first.stats.cache.misses, 2);
    assert_eq!(first.stats.cache.writes, 2);

    let warm = compiler(&root, base).build().unwrap();
    assert_eq!(warm.stats.cache.hits, 2);
    assert_eq!(warm.stats.cache.misses, 0);

    let cold = compiler(&root, changed).build().unwrap();
    assert_eq!(cold.stats.cache.hits, 0);
    assert_eq!(cold.stats.cache.misses, 2);
    assert_eq!(cold.stats.cache.invalidations, 1);
    assert_eq!(first.output.chunks[0].code, cold.output.chunks[0].code);
}

#[test]
fn test_cycle_is_built_once_per_module() {
    let (_dir, root) = project(&[
        ("src/index.js", "import './a.js';\n"),
        ("src/a.js", "import './b.js';\n"),
        ("src/b.js", "import './a.js';\nimport './index.js';\n"),
    ]);
    let mut compiler = compiler(
        &root,
        r#"{"entry": "./src/index.js", "rules": [{"test": "\\.js$", "use": ["script"]}]}"#,
    );
    let result = compiler.build().unwrap();
    assert!(result.is_ok());
    assert_eq!(result.stats.modules, 3);
    assert_eq!(result.stats.processed, 3);
    assert_eq!(result.output.chunks.len(), 1);
    assert_eq!(result.output.chunks[0].modules.len(), 3);
}

#[test]
fn test_failed_entry_does_not_block_others() {
    let (_dir, root) = project(&[
        ("src/a.js", "export default 'a';\n"),
        ("src/b.js", "import './gone.js';\n"),
    ]);
    let mut compiler = compiler(
        &root,
        r#"{
            "entry": {"a": "./src/a.js", "b": "./src/b.js"},
            "rules": [{"test": "\\.js$", "use": ["script"]}]
        }"#,
    );
    let result = compiler.build().unwrap();
    assert!(!result.is_ok());
    assert_eq!(result.errors.len(), 1);

    let by_name = |name: &str| result.output.entries.iter().find(|e| e.name == name).unwrap();
    assert!(by_name("a").is_ok());
    assert_eq!(by_name("a").scripts, vec!["a.js".to_string()]);
    assert!(!by_name("b").is_ok());
    assert!(result.output.failed_chunks.contains(&"b".to_string()));
    assert!(result.output.html.is_some());
}

#[test]
fn test_production_names_are_content_hashed_and_stable() {
    let (_dir, root) = project(&[("src/index.js", "export const answer = 42;\n")]);
    let config = r#"{
        "entry": "./src/index.js",
        "mode": "production",
        "rules": [{"test": "\\.js$", "use": ["script"]}]
    }"#;
    let first = compiler(&root, config).build().unwrap();
    let second = compiler(&root, config).build().unwrap();

    let file = &first.output.chunks[0].file;
    assert!(file.starts_with("main.") && file.ends_with(".js"));
    assert_eq!(file.len(), "main.".len() + 8 + ".js".len());
    assert_eq!(file, &second.output.chunks[0].file);
    assert!(first.output.chunks[0].map.is_none());
}
