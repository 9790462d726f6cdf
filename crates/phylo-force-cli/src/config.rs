//! CLI configuration.
//!
//! Layout settings come from an optional JSON file holding a
//! [`ControllerConfig`] (missing fields take their defaults); the worker
//! count comes from `--threads` or `PHYFORCE_THREADS`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use phylo_force_layout::ControllerConfig;

/// Environment variable overriding the worker thread count.
pub const THREADS_ENV: &str = "PHYFORCE_THREADS";

/// Loads a controller configuration, or the defaults when `path` is `None`.
pub fn load_controller_config(path: Option<&Path>) -> Result<ControllerConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str::<ControllerConfig>(&text)
                .with_context(|| format!("Invalid config file {}", path.display()))?
        }
        None => ControllerConfig::default(),
    };
    config
        .validate()
        .context("Configuration rejected by the layout engine")?;
    Ok(config)
}

/// Worker count: 0 means single-thread layout.
pub fn resolve_threads(flag: Option<usize>) -> Result<usize> {
    if let Some(threads) = flag {
        return Ok(threads);
    }
    match std::env::var(THREADS_ENV) {
        Ok(value) => match value.trim().parse::<usize>() {
            Ok(threads) => Ok(threads),
            Err(_) => bail!("{THREADS_ENV} must be a non-negative integer, got {value:?}"),
        },
        Err(_) => Ok(1),
    }
}
