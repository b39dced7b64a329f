//! `packline build`.

use miette::{miette, Result};
use packline_core::chunks::ChunkKind;
use packline_core::compiler::BuildStats;
use packline_core::dev::ErrorReport;
use packline_core::{codes, BuildResult, Compiler, Config, Mode};
use serde::Serialize;
use tracing::info;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BuildSummaryJson<'a> {
    ok: bool,
    mode: Mode,
    output_dir: String,
    /// Files written; 0 on a dry run.
    written: usize,
    stats: &'a BuildStats,
    entries: Vec<EntryJson>,
    chunks: Vec<ChunkJson<'a>>,
    failed_chunks: &'a [String],
}

#[derive(Serialize)]
struct EntryJson {
    name: String,
    ok: bool,
    scripts: Vec<String>,
    styles: Vec<String>,
    errors: Vec<ErrorReport>,
}

#[derive(Serialize)]
struct ChunkJson<'a> {
    id: &'a str,
    name: &'a str,
    kind: ChunkKind,
    file: &'a str,
    bytes: usize,
    modules: usize,
}

pub fn run(config: Config, dry_run: bool, json: bool) -> Result<()> {
    let mode = config.mode;
    let output_dir = config.output_dir();
    let mut compiler = Compiler::new(config).map_err(|e| miette!(code = e.code(), "{e}"))?;
    let result = compiler.build().map_err(|e| miette!(code = e.code(), "{e}"))?;

    let written = if dry_run {
        0
    } else {
        let written = compiler
            .write(&result.output)
            .map_err(|e| miette!(code = e.code(), "{e}"))?;
        info!(files = written, dir = %output_dir.display(), "output written");
        written
    };

    if json {
        let summary = summary(&result, mode, &output_dir.display().to_string(), written);
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).map_err(|e| miette!("{e}"))?
        );
    } else {
        print_human(&result);
    }

    let failed = result.output.entries.iter().filter(|e| !e.is_ok()).count();
    if failed > 0 {
        return Err(miette!(
            code = codes::PACKLINE_MODULE_BUILD_FAILED,
            "{failed} of {} entries failed to build",
            result.output.entries.len()
        ));
    }
    Ok(())
}

fn summary<'a>(result: &'a BuildResult, mode: Mode, output_dir: &str, written: usize) -> BuildSummaryJson<'a> {
    BuildSummaryJson {
        ok: result.is_ok(),
        mode,
        output_dir: output_dir.to_string(),
        written,
        stats: &result.stats,
        entries: result
            .output
            .entries
            .iter()
            .map(|e| EntryJson {
                name: e.name.clone(),
                ok: e.is_ok(),
                scripts: e.scripts.clone(),
                styles: e.styles.clone(),
                errors: e.errors.iter().map(ErrorReport::from).collect(),
            })
            .collect(),
        chunks: result
            .output
            .chunks
            .iter()
            .map(|c| ChunkJson {
                id: &c.id,
                name: &c.name,
                kind: c.kind,
                file: &c.file,
                bytes: c.code.len(),
                modules: c.modules.len(),
            })
            .collect(),
        failed_chunks: &result.output.failed_chunks,
    }
}

fn print_human(result: &BuildResult) {
    for chunk in &result.output.chunks {
        println!(
            "  {:<32} {:>10}  ({} modules)",
            chunk.file,
            format_size(chunk.code.len()),
            chunk.modules.len()
        );
    }
    for asset in &result.output.assets {
        println!("  {:<32} {:>10}", asset.name, format_size(asset.content.len()));
    }
    for error in &result.errors {
        eprintln!("  error[{}] {error}", error.code());
    }
    for name in &result.output.failed_chunks {
        eprintln!("  skipped chunk {name}");
    }

    let stats = &result.stats;
    println!();
    println!(
        "built {} modules into {} chunks in {} ms (cache: {} hits, {} misses)",
        stats.modules, stats.chunks, stats.duration_ms, stats.cache.hits, stats.cache.misses
    );
}

#[allow(clippy::cast_precision_loss)]
fn format_size(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} kB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
