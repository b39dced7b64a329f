//! Minimal source map v3 helpers.
//!
//! Transforms here either preserve lines or prepend whole lines, so line-level
//! maps are exact: every generated line maps column 0 to column 0 of the
//! corresponding original line.

use serde_json::{json, Value};

/// Identity line map for `source` named `name`.
#[must_use]
pub fn identity_map(name: &str, source: &str) -> String {
    let lines = source.split('\n').count().max(1);
    let mut mappings = String::with_capacity(lines * 5);
    mappings.push_str("AAAA");
    for _ in 1..lines {
        // Same source, next original line, column 0.
        mappings.push_str(";AACA");
    }
    json!({
        "version": 3,
        "sources": [name],
        "sourcesContent": [source],
        "names": [],
        "mappings": mappings,
    })
    .to_string()
}

/// Shift a map down by `lines` generated lines (for prepended banners).
///
/// Returns `None` if `map` is not a JSON object with a `mappings` string.
#[must_use]
pub fn shift_lines(map: &str, lines: usize) -> Option<String> {
    let mut value: Value = serde_json::from_str(map).ok()?;
    let mappings = value.get("mappings")?.as_str()?;
    let shifted = format!("{}{mappings}", ";".repeat(lines));
    value["mappings"] = Value::String(shifted);
    Some(value.to_string())
}

/// One section of an index map.
#[derive(Debug, Clone)]
pub struct MapSection {
    /// Zero-based generated line where the section starts.
    pub line: usize,
    pub map: String,
}

/// Build an index map (`sections`) for a chunk file.
#[must_use]
pub fn index_map(file: &str, sections: &[MapSection]) -> String {
    let sections: Vec<Value> = sections
        .iter()
        .filter_map(|section| {
            let map: Value = serde_json::from_str(&section.map).ok()?;
            Some(json!({
                "offset": { "line": section.line, "column": 0 },
                "map": map,
            }))
        })
        .collect();
    json!({ "version": 3, "file": file, "sections": sections }).to_string()
}
