pub mod build;
pub mod dev;

use miette::{miette, Result};
use packline_core::{Config, Mode};
use std::path::Path;

/// Load the explicit config file, or discover one in `cwd`.
pub fn load_config(cwd: &Path, explicit: Option<&Path>, mode: Option<Mode>) -> Result<Config> {
    let loaded = match explicit {
        Some(path) if path.is_absolute() => Config::load(path),
        Some(path) => Config::load(&cwd.join(path)),
        None => Config::discover(cwd),
    };
    let mut config = loaded.map_err(|e| miette!(code = e.code(), "{e}"))?;
    if let Some(mode) = mode {
        config.mode = mode;
    }
    Ok(config)
}
