#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_lines)]

//! packline build orchestration.
//!
//! A [`Config`] becomes a [`Compiler`]: rules pick transforms per module,
//! the graph builder follows imports, the splitter groups modules into
//! chunks and the emitter renders them. [`dev::DevLoop`] keeps a compiler
//! alive and pushes incremental updates to connected clients.

pub mod cache;
pub mod cancel;
pub mod chunks;
pub mod codes;
pub mod compiler;
pub mod config;
pub mod dev;
pub mod emit;
pub mod error;
pub mod graph;
pub mod rules;
pub mod transform;

pub use cancel::CancelToken;
pub use chunks::{split, Chunk, ChunkKind, ChunkSet, SplitPolicy};
pub use compiler::{BuildResult, BuildStats, Compiler};
pub use config::{find_config_file, Config, Mode};
pub use emit::{BuildOutput, ChunkOutput, EntryOutput};
pub use error::{BuildError, ConfigError, Error, TransformError};
pub use graph::{Module, ModuleGraph, ModuleId};
pub use rules::{Rule, RuleSet};

/// packline version, part of every cache fingerprint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
