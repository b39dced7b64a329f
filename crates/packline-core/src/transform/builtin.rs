//! Built-in transforms.
//!
//! Each covers one loader role of a typical web configuration without
//! compiling the language. Heavier loaders plug in through the same
//! [`Transform`] trait.

use super::sourcemap;
use super::{typed_options, Artifact, ArtifactKind, Transform, TransformContext};
use crate::error::TransformError;
use packline_util::hash::short_hash;
use serde::Deserialize;
use std::collections::BTreeMap;

fn module_name(ctx: &TransformContext<'_>) -> String {
    let rel = ctx.path.strip_prefix(ctx.root).unwrap_or(ctx.path);
    packline_util::fs::slash_path(rel)
}

fn normalize_newlines(code: &str) -> String {
    code.replace("\r\n", "\n")
}

// ---------------------------------------------------------------------------
// script
// ---------------------------------------------------------------------------

const TARGETS: &[&str] = &[
    "es5", "es2015", "es2016", "es2017", "es2018", "es2019", "es2020", "es2021", "es2022",
    "esnext",
];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScriptOptions {
    target: Option<String>,
    /// Syntax flavour hint (`js`, `jsx`, `ts`, `tsx`); accepted for
    /// compatibility, the stand-in transform does not parse.
    loader: Option<String>,
}

/// Claims source text as executable script.
#[derive(Debug, Default)]
pub struct ScriptTransform;

impl Transform for ScriptTransform {
    fn name(&self) -> &str {
        "script"
    }

    fn output_kind(&self) -> Option<ArtifactKind> {
        Some(ArtifactKind::Script)
    }

    fn apply(
        &self,
        input: Artifact,
        options: &serde_json::Value,
        ctx: &mut TransformContext<'_>,
    ) -> Result<Artifact, TransformError> {
        let opts: ScriptOptions = typed_options(options)?;
        if let Some(target) = opts.target.as_deref() {
            if !TARGETS.contains(&target.to_ascii_lowercase().as_str()) {
                return Err(TransformError::new(format!("unsupported target '{target}'")));
            }
        }
        if let Some(loader) = opts.loader.as_deref() {
            if !matches!(loader, "js" | "jsx" | "ts" | "tsx") {
                return Err(TransformError::new(format!("unsupported loader '{loader}'")));
            }
        }

        let code = normalize_newlines(input.code_str()?);
        let map = if ctx.settings.source_maps {
            Some(input.map.unwrap_or_else(|| sourcemap::identity_map(&module_name(ctx), &code)))
        } else {
            None
        };
        Ok(Artifact {
            kind: ArtifactKind::Script,
            code: code.into_bytes(),
            map,
        })
    }
}

// ---------------------------------------------------------------------------
// source-map
// ---------------------------------------------------------------------------

/// Strips `sourceMappingURL` comments left by upstream tooling so emitted
/// chunks never point at maps that are not part of the output.
#[derive(Debug, Default)]
pub struct SourceMapTransform;

impl Transform for SourceMapTransform {
    fn name(&self) -> &str {
        "source-map"
    }

    fn apply(
        &self,
        input: Artifact,
        _options: &serde_json::Value,
        ctx: &mut TransformContext<'_>,
    ) -> Result<Artifact, TransformError> {
        let code = input.code_str()?;
        let mut stripped = 0usize;
        let kept: Vec<&str> = code
            .split('\n')
            .map(|line| {
                let trimmed = line.trim_start();
                if trimmed.starts_with("//# sourceMappingURL=")
                    || trimmed.starts_with("//@ sourceMappingURL=")
                {
                    stripped += 1;
                    ""
                } else {
                    line
                }
            })
            .collect();
        if stripped == 0 {
            return Ok(input);
        }
        ctx.warn(format!("removed {stripped} sourceMappingURL comment(s)"));
        // Lines are blanked rather than removed, so existing maps stay valid.
        Ok(Artifact {
            code: kept.join("\n").into_bytes(),
            ..input
        })
    }
}

// ---------------------------------------------------------------------------
// replace
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReplaceOptions {
    values: BTreeMap<String, String>,
}

/// Literal define-style replacements (`process.env.NODE_ENV` → `"production"`).
#[derive(Debug, Default)]
pub struct ReplaceTransform;

impl Transform for ReplaceTransform {
    fn name(&self) -> &str {
        "replace"
    }

    fn apply(
        &self,
        input: Artifact,
        options: &serde_json::Value,
        _ctx: &mut TransformContext<'_>,
    ) -> Result<Artifact, TransformError> {
        let opts: ReplaceOptions = typed_options(options)?;
        if opts.values.is_empty() {
            return Ok(input);
        }

        let mut code = input.code_str()?.to_string();
        let mut multiline = false;
        for (from, to) in &opts.values {
            if from.is_empty() {
                return Err(TransformError::new("replacement key must not be empty"));
            }
            if code.contains(from.as_str()) {
                multiline |= to.contains('\n');
                code = code.replace(from.as_str(), to);
            }
        }
        Ok(Artifact {
            kind: input.kind,
            code: code.into_bytes(),
            map: if multiline { None } else { input.map },
        })
    }
}

// ---------------------------------------------------------------------------
// banner
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BannerOptions {
    banner: String,
}

/// Prepends a fixed banner.
#[derive(Debug, Default)]
pub struct BannerTransform;

impl Transform for BannerTransform {
    fn name(&self) -> &str {
        "banner"
    }

    fn apply(
        &self,
        input: Artifact,
        options: &serde_json::Value,
        _ctx: &mut TransformContext<'_>,
    ) -> Result<Artifact, TransformError> {
        let opts: BannerOptions = typed_options(options)?;
        if opts.banner.is_empty() {
            return Ok(input);
        }
        let banner = opts.banner.trim_end_matches('\n');
        let added = banner.split('\n').count();

        let mut code = Vec::with_capacity(banner.len() + 1 + input.code.len());
        code.extend_from_slice(banner.as_bytes());
        code.push(b'\n');
        code.extend_from_slice(&input.code);

        Ok(Artifact {
            kind: input.kind,
            code,
            map: input
                .map
                .as_deref()
                .and_then(|m| sourcemap::shift_lines(m, added)),
        })
    }
}

// ---------------------------------------------------------------------------
// json
// ---------------------------------------------------------------------------

/// Turns a JSON document into a CommonJS module.
#[derive(Debug, Default)]
pub struct JsonTransform;

impl Transform for JsonTransform {
    fn name(&self) -> &str {
        "json"
    }

    fn output_kind(&self) -> Option<ArtifactKind> {
        Some(ArtifactKind::Script)
    }

    fn apply(
        &self,
        input: Artifact,
        _options: &serde_json::Value,
        _ctx: &mut TransformContext<'_>,
    ) -> Result<Artifact, TransformError> {
        let value: serde_json::Value = serde_json::from_slice(&input.code)
            .map_err(|e| TransformError::new(format!("invalid JSON: {e}")))?;
        Ok(Artifact {
            kind: ArtifactKind::Script,
            code: format!("module.exports = {value};\n").into_bytes(),
            map: None,
        })
    }
}

// ---------------------------------------------------------------------------
// css / style
// ---------------------------------------------------------------------------

/// Claims text as a stylesheet and reports its `@import` / `url()` references.
#[derive(Debug, Default)]
pub struct CssTransform;

impl Transform for CssTransform {
    fn name(&self) -> &str {
        "css"
    }

    fn output_kind(&self) -> Option<ArtifactKind> {
        Some(ArtifactKind::Stylesheet)
    }

    fn apply(
        &self,
        input: Artifact,
        _options: &serde_json::Value,
        ctx: &mut TransformContext<'_>,
    ) -> Result<Artifact, TransformError> {
        let css = normalize_newlines(input.code_str()?);
        for reference in css_references(&css) {
            if is_local_reference(&reference) {
                ctx.add_dependency(css_specifier(&reference));
            }
        }
        Ok(Artifact {
            kind: ArtifactKind::Stylesheet,
            code: css.into_bytes(),
            map: input.map,
        })
    }
}

/// `@import "x"`, `@import url(x)` and `url(x)` targets, in source order.
pub(crate) fn css_references(css: &str) -> Vec<String> {
    let mut refs = Vec::new();
    let mut rest = css;
    while let Some(pos) = rest.find(['@', 'u']) {
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("@import") {
            let after = after.trim_start();
            if let Some(value) = quoted(after) {
                refs.push(value);
            }
            rest = &tail[7..];
        } else if let Some(after) = tail.strip_prefix("url(") {
            if let Some(end) = after.find(')') {
                let raw = after[..end].trim();
                let value = quoted(raw).unwrap_or_else(|| raw.to_string());
                if !value.is_empty() {
                    refs.push(value);
                }
                rest = &after[end..];
            } else {
                break;
            }
        } else {
            rest = &tail[1..];
        }
    }
    refs
}

fn quoted(s: &str) -> Option<String> {
    let quote = s.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let inner = &s[1..];
    inner.find(quote).map(|end| inner[..end].to_string())
}

fn is_local_reference(reference: &str) -> bool {
    !(reference.starts_with("data:")
        || reference.starts_with("http:")
        || reference.starts_with("https:")
        || reference.starts_with("//")
        || reference.starts_with('#')
        || reference.starts_with('/'))
}

/// CSS references are relative unless written `~pkg`.
fn css_specifier(reference: &str) -> String {
    if let Some(bare) = reference.strip_prefix('~') {
        bare.to_string()
    } else if reference.starts_with('.') {
        reference.to_string()
    } else {
        format!("./{reference}")
    }
}

/// Wraps a stylesheet in a script that injects it into the document.
#[derive(Debug, Default)]
pub struct StyleTransform;

impl Transform for StyleTransform {
    fn name(&self) -> &str {
        "style"
    }

    fn input_kind(&self) -> Option<ArtifactKind> {
        Some(ArtifactKind::Stylesheet)
    }

    fn output_kind(&self) -> Option<ArtifactKind> {
        Some(ArtifactKind::Script)
    }

    fn apply(
        &self,
        input: Artifact,
        _options: &serde_json::Value,
        ctx: &mut TransformContext<'_>,
    ) -> Result<Artifact, TransformError> {
        let css = serde_json::to_string(input.code_str()?)
            .map_err(|e| TransformError::new(e.to_string()))?;
        let id = serde_json::to_string(&module_name(ctx))
            .map_err(|e| TransformError::new(e.to_string()))?;
        let code = format!(
            "var css = {css};\n\
             if (typeof document !== \"undefined\") {{\n\
             \x20 var style = document.querySelector('style[data-packline=' + JSON.stringify({id}) + ']') || document.createElement(\"style\");\n\
             \x20 style.setAttribute(\"data-packline\", {id});\n\
             \x20 style.textContent = css;\n\
             \x20 document.head.appendChild(style);\n\
             }}\n\
             module.exports = css;\n"
        );
        Ok(Artifact {
            kind: ArtifactKind::Script,
            code: code.into_bytes(),
            map: None,
        })
    }
}

// ---------------------------------------------------------------------------
// asset
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AssetOptions {
    /// `[name]`, `[hash]` and `[ext]` placeholders.
    filename: Option<String>,
}

/// `asset/resource`: emits the file and exports its public URL.
#[derive(Debug, Default)]
pub struct AssetTransform;

impl Transform for AssetTransform {
    fn name(&self) -> &str {
        "asset"
    }

    fn output_kind(&self) -> Option<ArtifactKind> {
        Some(ArtifactKind::Script)
    }

    fn apply(
        &self,
        input: Artifact,
        options: &serde_json::Value,
        ctx: &mut TransformContext<'_>,
    ) -> Result<Artifact, TransformError> {
        let opts: AssetOptions = typed_options(options)?;
        let ext = ctx
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        let template = opts.filename.as_deref().unwrap_or(if ctx.settings.production {
            "assets/[name].[hash][ext]"
        } else {
            "assets/[name][ext]"
        });
        let file = template
            .replace("[name]", ctx.file_stem())
            .replace("[hash]", &short_hash(&input.code, 8))
            .replace("[ext]", &ext)
            .replace("[query]", "");
        let url = serde_json::to_string(&format!("{}{file}", ctx.settings.public_path))
            .map_err(|e| TransformError::new(e.to_string()))?;

        ctx.emit_file(file, input.code);
        Ok(Artifact {
            kind: ArtifactKind::Script,
            code: format!("module.exports = {url};\n").into_bytes(),
            map: None,
        })
    }
}

// ---------------------------------------------------------------------------
// minify
// ---------------------------------------------------------------------------

/// Line-level minifier: trims indentation, drops blank and comment-only
/// lines. Lines inside template literals are left alone.
#[derive(Debug, Default)]
pub struct MinifyTransform;

impl MinifyTransform {
    /// Minify a script string.
    #[must_use]
    pub fn minify(code: &str) -> String {
        let mut out = String::with_capacity(code.len());
        let mut in_template = false;
        let mut in_block_comment = false;

        for line in code.split('\n') {
            if in_template {
                out.push_str(line);
                out.push('\n');
                in_template ^= odd_backticks(line);
                continue;
            }

            let trimmed = line.trim();
            if in_block_comment {
                if let Some(end) = trimmed.find("*/") {
                    in_block_comment = false;
                    let rest = trimmed[end + 2..].trim();
                    if !rest.is_empty() {
                        out.push_str(rest);
                        out.push('\n');
                    }
                }
                continue;
            }
            if trimmed.is_empty() || trimmed.starts_with("//") {
                continue;
            }
            if trimmed.starts_with("/*") {
                if !trimmed[2..].contains("*/") {
                    in_block_comment = true;
                }
                let after = trimmed.find("*/").map(|end| trimmed[end + 2..].trim());
                match after {
                    Some(rest) if !rest.is_empty() => {
                        out.push_str(rest);
                        out.push('\n');
                    }
                    _ => {}
                }
                continue;
            }

            out.push_str(trimmed);
            out.push('\n');
            in_template = odd_backticks(trimmed);
        }
        out
    }
}

fn odd_backticks(line: &str) -> bool {
    let mut count = 0usize;
    let mut escaped = false;
    for c in line.chars() {
        match c {
            '\\' if !escaped => {
                escaped = true;
                continue;
            }
            '`' if !escaped => count += 1,
            _ => {}
        }
        escaped = false;
    }
    count % 2 == 1
}

impl Transform for MinifyTransform {
    fn name(&self) -> &str {
        "minify"
    }

    fn input_kind(&self) -> Option<ArtifactKind> {
        Some(ArtifactKind::Script)
    }

    fn apply(
        &self,
        input: Artifact,
        _options: &serde_json::Value,
        _ctx: &mut TransformContext<'_>,
    ) -> Result<Artifact, TransformError> {
        let code = Self::minify(input.code_str()?);
        Ok(Artifact {
            kind: input.kind,
            code: code.into_bytes(),
            map: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::PipelineSettings;
    use serde_json::json;
    use std::path::Path;

    fn run(
        transform: &dyn Transform,
        path: &str,
        code: &str,
        options: serde_json::Value,
    ) -> (Result<Artifact, TransformError>, Vec<String>, Vec<super::super::EmittedFile>) {
        let settings = PipelineSettings {
            source_maps: true,
            public_path: "/static/".to_string(),
            production: true,
            ..PipelineSettings::default()
        };
        let mut ctx = TransformContext::new(Path::new(path), Path::new("/p"), &settings);
        let out = transform.apply(Artifact::source(code.as_bytes().to_vec()), &options, &mut ctx);
        let (deps, emitted, _) = ctx.into_parts();
        (out, deps, emitted)
    }

    #[test]
    fn test_script_normalizes_and_maps() {
        let (out, _, _) = run(&ScriptTransform, "/p/src/a.js", "a\r\nb", json!({"target": "es2015"}));
        let out = out.unwrap();
        assert_eq!(out.code, b"a\nb");
        assert!(out.map.unwrap().contains("src/a.js"));
    }

    #[test]
    fn test_script_rejects_unknown_target() {
        let (out, _, _) = run(&ScriptTransform, "/p/a.js", "x", json!({"target": "es1999"}));
        assert!(out.unwrap_err().message.contains("es1999"));
    }

    #[test]
    fn test_source_map_comment_blanked() {
        let (out, _, _) = run(
            &SourceMapTransform,
            "/p/a.js",
            "code();\n//# sourceMappingURL=a.js.map",
            json!(null),
        );
        assert_eq!(out.unwrap().code, b"code();\n");
    }

    #[test]
    fn test_replace_values() {
        let (out, _, _) = run(
            &ReplaceTransform,
            "/p/a.js",
            "if (process.env.NODE_ENV === 'x') {}",
            json!({"values": {"process.env.NODE_ENV": "\"production\""}}),
        );
        assert_eq!(out.unwrap().code_lossy(), "if (\"production\" === 'x') {}");
    }

    #[test]
    fn test_banner_shifts_map() {
        let settings = PipelineSettings::default();
        let mut ctx = TransformContext::new(Path::new("/p/a.js"), Path::new("/p"), &settings);
        let input = Artifact {
            kind: ArtifactKind::Script,
            code: b"x".to_vec(),
            map: Some(sourcemap::identity_map("a.js", "x")),
        };
        let out = BannerTransform
            .apply(input, &json!({"banner": "/* one */\n/* two */"}), &mut ctx)
            .unwrap();
        assert!(out.code_lossy().starts_with("/* one */\n/* two */\nx"));
        assert!(out.map.unwrap().contains(";;AAAA"));
    }

    #[test]
    fn test_json_module_and_invalid_json() {
        let (out, _, _) = run(&JsonTransform, "/p/a.json", "{\"a\": 1}", json!(null));
        assert_eq!(out.unwrap().code_lossy(), "module.exports = {\"a\":1};\n");
        let (bad, _, _) = run(&JsonTransform, "/p/a.json", "{", json!(null));
        assert!(bad.unwrap_err().message.starts_with("invalid JSON"));
    }

    #[test]
    fn test_css_reports_local_references() {
        let css = "@import './base.css';\n@import url(\"theme.css\");\n\
                   .a { background: url(./img/logo.png) }\n\
                   .b { background: url(data:image/png;base64,AAA) }\n\
                   .c { background: url('https://cdn/x.png') }";
        let (out, deps, _) = run(&CssTransform, "/p/a.css", css, json!(null));
        assert_eq!(out.unwrap().kind, ArtifactKind::Stylesheet);
        assert_eq!(deps, vec!["./base.css", "./theme.css", "./img/logo.png"]);
    }

    #[test]
    fn test_style_wraps_css() {
        let settings = PipelineSettings::default();
        let mut ctx = TransformContext::new(Path::new("/p/a.css"), Path::new("/p"), &settings);
        let input = Artifact {
            kind: ArtifactKind::Stylesheet,
            code: b".a{color:red}".to_vec(),
            map: None,
        };
        let out = StyleTransform.apply(input, &json!(null), &mut ctx).unwrap();
        let code = out.code_lossy();
        assert!(code.contains("var css = \".a{color:red}\";"));
        assert!(code.contains("\"a.css\""));
    }

    #[test]
    fn test_asset_emits_hashed_file() {
        let (out, _, emitted) = run(&AssetTransform, "/p/img/logo.png", "PNGDATA", json!(null));
        let hash = short_hash(b"PNGDATA", 8);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].name, format!("assets/logo.{hash}.png"));
        assert_eq!(
            out.unwrap().code_lossy(),
            format!("module.exports = \"/static/assets/logo.{hash}.png\";\n")
        );
    }

    #[test]
    fn test_asset_dev_name_and_custom_template() {
        let settings = PipelineSettings::default();
        let mut ctx = TransformContext::new(Path::new("/p/logo.png"), Path::new("/p"), &settings);
        AssetTransform
            .apply(Artifact::source(b"x".to_vec()), &json!(null), &mut ctx)
            .unwrap();
        let mut ctx2 = TransformContext::new(Path::new("/p/logo.png"), Path::new("/p"), &settings);
        AssetTransform
            .apply(
                Artifact::source(b"x".to_vec()),
                &json!({"filename": "img/[name]-v1[ext]"}),
                &mut ctx2,
            )
            .unwrap();
        assert_eq!(ctx.into_parts().1[0].name, "assets/logo.png");
        assert_eq!(ctx2.into_parts().1[0].name, "img/logo-v1.png");
    }

    #[test]
    fn test_minify_keeps_template_literals() {
        let code = "  // comment\n  const a = 1;\n\n  /* block\n   still */\n  const t = `\n    keep\n  `;\n";
        assert_eq!(
            MinifyTransform::minify(code),
            "const a = 1;\nconst t = `\n    keep\n  `;\n"
        );
    }
}
