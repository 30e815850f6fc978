// src/config.rs

//! Configuration loading.
//!
//! Values are layered: built-in defaults, then the TOML file, then the
//! environment (`KAFKA_BROKER`, `OPENSEARCH_HOST`, `OPENSEARCH_PORT`). The
//! CLI applies its own flags on top of the result.

use std::path::Path;

use crate::error::{AppError, Result};
use crate::models::Config;

/// File read when no `--config` is given, if present.
pub const DEFAULT_CONFIG_PATH: &str = "detector.toml";

/// Load, overlay and validate the configuration.
///
/// An explicit `path` must exist. Without one, `detector.toml` in the working
/// directory is used when present and defaults otherwise.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = load_file(path)?;
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

fn load_file(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Path::new(DEFAULT_CONFIG_PATH),
        None => return Ok(Config::default()),
    };

    Config::load(path).map_err(|e| {
        AppError::config(format!("failed to load {}: {e}", path.display()))
    })
}
