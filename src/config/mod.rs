//! Fleet configuration loading.
//!
//! Everything the engine can be told from the outside lives in one TOML
//! document; see [`schema`] for the full shape and defaults.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Read and parse a fleet configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read configuration at {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Invalid fleet configuration in {}", path.display()))
}

/// Parse a fleet configuration from TOML text.
pub fn load_config_str(content: &str) -> Result<Config> {
    toml::from_str(content).context("Invalid fleet configuration")
}
