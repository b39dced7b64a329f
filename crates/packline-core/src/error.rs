use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::codes;
use crate::transform::ArtifactKind;

/// Per-module and per-client failures.
///
/// Module-level variants are fatal to one module only; the graph builder keeps
/// going and the emitter drops the chunks that contain the failed module.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("cannot resolve '{specifier}' from {}", importer.display())]
    Resolution {
        importer: PathBuf,
        specifier: String,
        /// Candidate paths probed, in resolution order.
        tried: Vec<PathBuf>,
    },

    #[error(
        "transform chain for {}: '{previous}' produces {produced} but '{next}' expects {expected}",
        path.display()
    )]
    TransformChain {
        path: PathBuf,
        previous: String,
        produced: ArtifactKind,
        next: String,
        expected: ArtifactKind,
    },

    #[error("[{transform}] failed on {}: {message}", path.display())]
    ModuleBuild {
        path: PathBuf,
        transform: String,
        message: String,
    },

    #[error("cannot read {}: {message}", path.display())]
    Read { path: PathBuf, message: String },

    #[error(
        "{} and {} emit different content to '{file}'",
        path.display(),
        other.display()
    )]
    AssetConflict {
        path: PathBuf,
        other: PathBuf,
        file: String,
    },

    #[error("cache invalidated: {reason}")]
    CacheInvalidation { reason: String },

    #[error("delivery to client {client} failed: {reason}")]
    ServerDelivery { client: u64, reason: String },

    #[error("build superseded by a newer change")]
    Cancelled,
}

impl BuildError {
    /// Stable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Resolution { .. } => codes::PACKLINE_RESOLVE_FAILED,
            Self::TransformChain { .. } => codes::PACKLINE_TRANSFORM_CHAIN,
            Self::ModuleBuild { .. } => codes::PACKLINE_MODULE_BUILD_FAILED,
            Self::Read { .. } => codes::PACKLINE_READ_FAILED,
            Self::AssetConflict { .. } => codes::PACKLINE_ASSET_CONFLICT,
            Self::CacheInvalidation { .. } => codes::PACKLINE_CACHE_INVALIDATED,
            Self::ServerDelivery { .. } => codes::PACKLINE_DELIVERY_FAILED,
            Self::Cancelled => codes::PACKLINE_BUILD_CANCELLED,
        }
    }

    /// The module this error is attributed to, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Resolution { importer, .. } => Some(importer),
            Self::TransformChain { path, .. }
            | Self::ModuleBuild { path, .. }
            | Self::Read { path, .. }
            | Self::AssetConflict { path, .. } => Some(path),
            Self::CacheInvalidation { .. } | Self::ServerDelivery { .. } | Self::Cancelled => None,
        }
    }

    /// Whether the error fails the module it is attached to.
    #[must_use]
    pub fn is_module_fatal(&self) -> bool {
        self.path().is_some()
    }
}

/// Failure reported by a single transform.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransformError {
    pub message: String,
}

impl TransformError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Configuration could not be loaded or validated.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No packline.config.json found in {root}")]
    NotFound { root: PathBuf },

    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Unknown transform '{name}'")]
    UnknownTransform { name: String },

    #[error("Cache group '{name}' is declared twice")]
    DuplicateCacheGroup { name: String },

    #[error("No entry points configured")]
    NoEntries,
}

impl ConfigError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        codes::PACKLINE_CONFIG_INVALID
    }
}

/// Crate-level error.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("{0}")]
    Other(String),
}

impl Error {
    #[must_use]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(e) => e.code(),
            Self::Build(e) => e.code(),
            Self::Io(_) | Self::Other(_) => codes::PACKLINE_BUILD_FAILED,
        }
    }
}
