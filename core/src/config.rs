//! Optimizer configuration.
//!
//! Options can be supplied in a TOML file:
//!
//! ```toml
//! max_shapes = 32
//! audit = true
//! ```
//!
//! Any option left out keeps its default.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::optimize::MAX_STMT_SHAPES;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Maximum number of distinct statement shapes tracked per chain. Chains
    /// with more are left unoptimized.
    pub max_shapes: usize,

    /// Write a record of every merge to the audit sink.
    pub audit: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            max_shapes: MAX_STMT_SHAPES,
            audit: true,
        }
    }
}

/// Returns the default configuration.
pub fn default_config() -> OptimizerConfig {
    OptimizerConfig::default()
}

/// Parses configuration from a TOML string.
pub fn parse_config(config_str: &str) -> Result<OptimizerConfig> {
    let config: OptimizerConfig = toml::from_str(config_str).context("Invalid optimizer config")?;
    if config.max_shapes == 0 {
        bail!("max_shapes must be greater than zero");
    }
    Ok(config)
}

/// Loads configuration from a TOML file.
pub fn load_config<P: AsRef<Path>>(filepath: P) -> Result<OptimizerConfig> {
    let filepath = filepath.as_ref();
    let config_str = fs::read_to_string(filepath)
        .with_context(|| format!("Failed to read config file {}", filepath.display()))?;
    let config = parse_config(&config_str)?;
    log::debug!("Loaded optimizer config {:?} from {}", config, filepath.display());
    Ok(config)
}
