//! Transform capability.
//!
//! A transform turns one artifact into another (`script`, `css`, `minify`, …).
//! Transforms are pure functions of `(input, options)`: the only side channel
//! is the [`TransformContext`], through which a stage may report discovered
//! dependencies, emit auxiliary files and leave diagnostics.
//!
//! Transforms are registered by name in a [`TransformRegistry`] owned by the
//! compiler and run in sequence by the [`TransformPipeline`].

mod builtin;
mod pipeline;
mod registry;
pub mod sourcemap;

pub use builtin::{
    AssetTransform, BannerTransform, CssTransform, JsonTransform, MinifyTransform,
    ReplaceTransform, ScriptTransform, SourceMapTransform, StyleTransform,
};
pub use pipeline::{PipelineOutput, PipelineSettings, TransformPipeline};
pub use registry::TransformRegistry;

use crate::error::TransformError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// What an artifact currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Raw file content, not yet claimed by any transform.
    Source,
    /// Executable module code.
    Script,
    /// CSS text.
    Stylesheet,
    /// Opaque bytes emitted verbatim.
    Asset,
}

impl ArtifactKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Script => "script",
            Self::Stylesheet => "stylesheet",
            Self::Asset => "asset",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The product of a transform stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub code: Vec<u8>,
    /// Source map v3 JSON, when the stage produced one.
    pub map: Option<String>,
}

impl Artifact {
    /// An untouched source file.
    #[must_use]
    pub fn source(code: Vec<u8>) -> Self {
        Self {
            kind: ArtifactKind::Source,
            code,
            map: None,
        }
    }

    /// Code as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn code_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.code)
    }

    /// Code as UTF-8, or a transform error naming the stage.
    pub fn code_str(&self) -> Result<&str, TransformError> {
        std::str::from_utf8(&self.code)
            .map_err(|e| TransformError::new(format!("input is not valid UTF-8: {e}")))
    }
}

/// A file a transform wants written next to the bundle (e.g. an image).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedFile {
    /// Output-relative path, forward slashes.
    pub name: String,
    pub content: Vec<u8>,
}

/// Per-module context handed to each stage.
#[derive(Debug)]
pub struct TransformContext<'a> {
    /// Absolute path of the module being built.
    pub path: &'a Path,
    /// Project root.
    pub root: &'a Path,
    pub settings: &'a PipelineSettings,
    dependencies: Vec<String>,
    emitted: Vec<EmittedFile>,
    diagnostics: Vec<String>,
}

impl<'a> TransformContext<'a> {
    #[must_use]
    pub fn new(path: &'a Path, root: &'a Path, settings: &'a PipelineSettings) -> Self {
        Self {
            path,
            root,
            settings,
            dependencies: Vec::new(),
            emitted: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Report an extra dependency (an imported stylesheet, an image, …).
    pub fn add_dependency(&mut self, specifier: impl Into<String>) {
        let specifier = specifier.into();
        if !self.dependencies.contains(&specifier) {
            self.dependencies.push(specifier);
        }
    }

    /// Ask for an auxiliary file to be written with the bundle.
    pub fn emit_file(&mut self, name: impl Into<String>, content: Vec<u8>) {
        self.emitted.push(EmittedFile {
            name: name.into(),
            content,
        });
    }

    /// Leave a non-fatal diagnostic.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.diagnostics.push(message.into());
    }

    /// File stem of the module (`logo` for `/p/logo.png`).
    #[must_use]
    pub fn file_stem(&self) -> &str {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("module")
    }

    pub(crate) fn into_parts(self) -> (Vec<String>, Vec<EmittedFile>, Vec<String>) {
        (self.dependencies, self.emitted, self.diagnostics)
    }
}

/// A pluggable transform.
///
/// `input_kind`/`output_kind` let the pipeline reject incompatible chains
/// before running anything. `None` means "any" for inputs and "unchanged" for
/// outputs.
pub trait Transform: Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    fn input_kind(&self) -> Option<ArtifactKind> {
        None
    }

    fn output_kind(&self) -> Option<ArtifactKind> {
        None
    }

    /// Called once when the owning registry is initialised.
    fn init(&self) -> Result<(), TransformError> {
        Ok(())
    }

    /// Called once when the owning registry is torn down.
    fn teardown(&self) {}

    /// Apply the transform. The returned artifact's `kind` is overwritten by
    /// the pipeline with the declared output kind.
    fn apply(
        &self,
        input: Artifact,
        options: &serde_json::Value,
        ctx: &mut TransformContext<'_>,
    ) -> Result<Artifact, TransformError>;
}

impl fmt::Debug for dyn Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform").field("name", &self.name()).finish()
    }
}

/// Parse a transform's JSON options into its typed form.
pub(crate) fn typed_options<T>(options: &serde_json::Value) -> Result<T, TransformError>
where
    T: serde::de::DeserializeOwned + Default,
{
    if options.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(options.clone())
        .map_err(|e| TransformError::new(format!("invalid options: {e}")))
}

/// Whether a path looks like script source the graph should scan for imports.
#[must_use]
pub fn is_script_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("js" | "mjs" | "cjs" | "jsx" | "ts" | "tsx" | "mts" | "cts")
    )
}
