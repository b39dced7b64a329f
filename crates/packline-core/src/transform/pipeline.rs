use super::{is_script_path, Artifact, ArtifactKind, EmittedFile, Transform, TransformContext};
use super::TransformRegistry;
use crate::error::BuildError;
use crate::rules::Rule;
use packline_util::hash::Fingerprinter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Build-wide knobs visible to every transform.
#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    pub root: PathBuf,
    /// Emit source maps (`devtool`).
    pub source_maps: bool,
    pub public_path: String,
    pub production: bool,
}

impl PipelineSettings {
    /// Part of every module cache key: a settings change must miss.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut fp = Fingerprinter::new();
        fp.part(self.root.to_string_lossy().as_bytes())
            .part([u8::from(self.source_maps), u8::from(self.production)])
            .part(self.public_path.as_bytes());
        fp.finish()
    }
}

/// Result of running one module through its matched rules.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub artifact: Artifact,
    /// Specifiers reported by stages (css `@import`, `url()`, …).
    pub dependencies: Vec<String>,
    pub emitted: Vec<EmittedFile>,
    pub diagnostics: Vec<String>,
}

/// Sequential transform runner.
#[derive(Debug, Clone)]
pub struct TransformPipeline {
    registry: Arc<TransformRegistry>,
    settings: PipelineSettings,
}

struct Stage<'r> {
    transform: Arc<dyn Transform>,
    options: &'r serde_json::Value,
}

impl TransformPipeline {
    #[must_use]
    pub fn new(registry: Arc<TransformRegistry>, settings: PipelineSettings) -> Self {
        Self { registry, settings }
    }

    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TransformRegistry> {
        &self.registry
    }

    /// Resolve and type-check the chain for `rules` without running it.
    fn stages<'r>(&self, path: &Path, rules: &[&'r Rule]) -> Result<Vec<Stage<'r>>, BuildError> {
        let mut stages = Vec::new();
        let mut kind = ArtifactKind::Source;
        let mut previous = "<source>".to_string();

        for rule in rules {
            for reference in &rule.transforms {
                let transform = self.registry.get(&reference.name).ok_or_else(|| {
                    BuildError::ModuleBuild {
                        path: path.to_path_buf(),
                        transform: reference.name.clone(),
                        message: "transform is not registered".to_string(),
                    }
                })?;

                if let Some(expected) = transform.input_kind() {
                    if expected != kind {
                        return Err(BuildError::TransformChain {
                            path: path.to_path_buf(),
                            previous,
                            produced: kind,
                            next: reference.name.clone(),
                            expected,
                        });
                    }
                }
                if let Some(out) = transform.output_kind() {
                    kind = out;
                }
                previous.clone_from(&reference.name);
                stages.push(Stage {
                    transform,
                    options: &reference.options,
                });
            }
        }
        Ok(stages)
    }

    /// Run `source` through every transform of `rules`, in order.
    ///
    /// No rules means passthrough: the bytes are returned untouched as an
    /// [`ArtifactKind::Asset`].
    ///
    /// # Errors
    /// `TransformChain` if declared kinds do not compose, `ModuleBuild` if a
    /// stage fails. Either is fatal to this module only.
    pub fn run(
        &self,
        path: &Path,
        source: Vec<u8>,
        rules: &[&Rule],
    ) -> Result<PipelineOutput, BuildError> {
        if rules.iter().all(|r| r.transforms.is_empty()) {
            return Ok(PipelineOutput {
                artifact: Artifact {
                    kind: ArtifactKind::Asset,
                    code: source,
                    map: None,
                },
                dependencies: Vec::new(),
                emitted: Vec::new(),
                diagnostics: Vec::new(),
            });
        }

        let stages = self.stages(path, rules)?;
        let mut ctx = TransformContext::new(path, &self.settings.root, &self.settings);
        let mut artifact = Artifact::source(source);

        for stage in &stages {
            let declared = stage.transform.output_kind().unwrap_or(artifact.kind);
            artifact = stage
                .transform
                .apply(artifact, stage.options, &mut ctx)
                .map_err(|e| BuildError::ModuleBuild {
                    path: path.to_path_buf(),
                    transform: stage.transform.name().to_string(),
                    message: e.message,
                })?;
            artifact.kind = declared;
        }

        if artifact.kind == ArtifactKind::Source {
            artifact.kind = if is_script_path(path) {
                ArtifactKind::Script
            } else {
                ArtifactKind::Asset
            };
        }

        let (dependencies, emitted, diagnostics) = ctx.into_parts();
        for message in &diagnostics {
            tracing::debug!(path = %path.display(), "{message}");
        }
        Ok(PipelineOutput {
            artifact,
            dependencies,
            emitted,
            diagnostics,
        })
    }
}
